// src/chart/signal.rs

use crate::math::Point;
use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::close;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Share of the lowest heights averaged into the baseline.
const BASELINE_PERCENTILE: f64 = 0.05;
const SAVITZKY_GOLAY: [f64; 5] = [-3.0, 12.0, 17.0, 12.0, -3.0];

/// The chart curve as a height-per-column signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalData {
    pub points: Vec<Point>,
    pub baseline: f64,
}

/// Convert an RGB pixel to HSV on the 0–180 hue / 0–255 saturation and
/// value scale used by common vision libraries.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let (r, g, b) = (f64::from(r), f64::from(g), f64::from(b));
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta)
    } else if max == g {
        60.0 * ((b - r) / delta) + 120.0
    } else {
        60.0 * ((r - g) / delta) + 240.0
    };
    let h = if h < 0.0 { h + 360.0 } else { h };
    (h / 2.0, s, max)
}

/// Blue curve fill or red separator/outline pixel.
pub fn is_curve_pixel(r: u8, g: u8, b: u8) -> bool {
    let (h, s, v) = rgb_to_hsv(r, g, b);
    if s < 40.0 || v < 40.0 {
        return false;
    }
    let blue = (90.0..=140.0).contains(&h);
    let red = h <= 15.0 || (165.0..=180.0).contains(&h);
    blue || red
}

/// Binary mask of curve pixels, closed with a 3×3 square so one-pixel
/// breaks in the outline do not split the curve.
pub fn curve_mask(image: &RgbImage) -> GrayImage {
    let mask = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y);
        Luma([if is_curve_pixel(p[0], p[1], p[2]) { 255 } else { 0 }])
    });
    close(&mask, Norm::LInf, 1)
}

/// Extract the curve's top edge as a signal.
pub fn extract_raw_signal(image: &RgbImage) -> SignalData {
    let mask = curve_mask(image);
    scan_columns_for_top_edge(&mask)
}

/// For each column, the height (from the bottom) of the first mask pixel.
/// Empty columns repeat the last known height.
pub fn scan_columns_for_top_edge(mask: &GrayImage) -> SignalData {
    let (width, height) = mask.dimensions();
    let mut points: Vec<Point> = Vec::with_capacity(width as usize);

    for x in 0..width {
        let top = (0..height).find(|&y| mask.get_pixel(x, y)[0] > 0);
        match top {
            Some(y) => points.push(Point::new(f64::from(x), f64::from(height - y))),
            None => {
                if let Some(last) = points.last().copied() {
                    points.push(Point::new(f64::from(x), last.y));
                }
            }
        }
    }

    let baseline = detect_baseline(&points);
    debug!(points = points.len(), baseline, "Extracted raw signal");
    SignalData { points, baseline }
}

fn detect_baseline(points: &[Point]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let mut heights: Vec<f64> = points.iter().map(|p| p.y).collect();
    heights.sort_by(f64::total_cmp);
    let take = ((heights.len() as f64 * BASELINE_PERCENTILE) as usize).max(1);
    heights[..take].iter().sum::<f64>() / take as f64
}

/// Running median over `window` points.
pub fn smooth_median(points: &[Point], window: usize) -> Vec<Point> {
    if points.len() < window {
        return points.to_vec();
    }
    let half = window / 2;
    (0..points.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half).min(points.len() - 1);
            let mut values: Vec<f64> = points[start..=end].iter().map(|p| p.y).collect();
            values.sort_by(f64::total_cmp);
            Point::new(points[i].x, values[values.len() / 2])
        })
        .collect()
}

/// Five-point quadratic Savitzky–Golay smoothing; the two points at each
/// end are copied unchanged.
pub fn savitzky_golay(points: &[Point]) -> Vec<Point> {
    if points.len() < 5 {
        return points.to_vec();
    }
    let norm: f64 = SAVITZKY_GOLAY.iter().sum();
    let mut smoothed = Vec::with_capacity(points.len());
    smoothed.extend_from_slice(&points[..2]);
    for i in 2..points.len() - 2 {
        let weighted: f64 = SAVITZKY_GOLAY
            .iter()
            .enumerate()
            .map(|(k, c)| points[i + k - 2].y * c)
            .sum();
        smoothed.push(Point::new(points[i].x, weighted / norm));
    }
    smoothed.extend_from_slice(&points[points.len() - 2..]);
    smoothed
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_hsv_of_primaries() {
        let (h, s, v) = rgb_to_hsv(0, 0, 255);
        assert_eq!((h, s, v), (120.0, 255.0, 255.0));
        let (h, _, _) = rgb_to_hsv(255, 0, 0);
        assert_eq!(h, 0.0);
        let (_, s, _) = rgb_to_hsv(200, 200, 200);
        assert_eq!(s, 0.0);
    }

    #[test]
    fn test_curve_pixel_classes() {
        assert!(is_curve_pixel(100, 149, 237));
        assert!(is_curve_pixel(220, 20, 20));
        assert!(!is_curve_pixel(255, 255, 255));
        assert!(!is_curve_pixel(0, 0, 0));
        assert!(!is_curve_pixel(30, 200, 30));
    }

    #[test]
    fn test_top_edge_of_block() {
        // blue block over columns 5..=15, rows 10..20
        let img = RgbImage::from_fn(20, 20, |x, y| {
            if (5..=15).contains(&x) && y >= 10 {
                Rgb([100, 149, 237])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let signal = extract_raw_signal(&img);
        assert_eq!(signal.points.len(), 15);
        assert_eq!(signal.points[0].x, 5.0);
        assert!(signal.points.iter().all(|p| p.y == 10.0));
        assert_eq!(signal.baseline, 10.0);
    }

    #[test]
    fn test_empty_columns_repeat_previous() {
        let mut mask = GrayImage::new(4, 10);
        mask.put_pixel(1, 5, Luma([255]));
        let signal = scan_columns_for_top_edge(&mask);
        // column 0 is skipped, columns 2 and 3 repeat column 1
        let xs: Vec<f64> = signal.points.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
        assert!(signal.points.iter().all(|p| p.y == 5.0));
    }

    #[test]
    fn test_mask_closes_single_column_gap() {
        let blue = Rgb([100, 149, 237]);
        let white = Rgb([255, 255, 255]);
        let narrow = RgbImage::from_fn(9, 5, |x, _| if x == 4 { white } else { blue });
        assert_eq!(curve_mask(&narrow).get_pixel(4, 2)[0], 255);

        // a three column break stays open
        let wide = RgbImage::from_fn(11, 5, |x, _| if (3..=5).contains(&x) { white } else { blue });
        let mask = curve_mask(&wide);
        assert_eq!(mask.get_pixel(4, 2)[0], 0);
        assert_eq!(mask.get_pixel(1, 2)[0], 255);
    }

    #[test]
    fn test_median_removes_spike() {
        let mut points: Vec<Point> = (0..9).map(|x| Point::new(f64::from(x), 1.0)).collect();
        points[4].y = 50.0;
        let smoothed = smooth_median(&points, 5);
        assert_eq!(smoothed[4].y, 1.0);
    }

    #[test]
    fn test_savitzky_golay_keeps_lines() {
        let points: Vec<Point> = (0..10).map(|x| Point::new(f64::from(x), f64::from(x) * 2.0)).collect();
        let smoothed = savitzky_golay(&points);
        assert_eq!(smoothed.len(), points.len());
        for (a, b) in smoothed.iter().zip(&points) {
            assert!((a.y - b.y).abs() < 1e-9);
        }
    }
}
