// src/chart/bars.rs

use super::signal::curve_mask;
use crate::config::ChartConfig;
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const BAR_COLOR: Rgb<u8> = Rgb([40, 40, 40]);
const PAPER: Rgb<u8> = Rgb([255, 255, 255]);
/// The gamma fraction must exceed albumin by this ratio before any
/// gammopathy is considered.
const GAMMA_TO_ALBUMIN_RATIO: f64 = 9.0 / 7.0;
const PEAK_RATIO: f64 = 2.0;

/// Per-segment ink heights of the synthetic bar image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarAnalysis {
    /// Height of each segment as a percentage of the image height.
    pub bar_heights: Vec<f64>,
    pub segment_width: u32,
    pub image_width: u32,
    pub image_height: u32,
    /// Red fraction separators in the cropped chart, ascending.
    pub separator_columns: Vec<u32>,
}

/// Bar heights split into the four protein fractions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarSections {
    pub albumin: Vec<f64>,
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
    pub gamma: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gammopathy {
    None,
    Monoclonal,
    Polyclonal,
}

impl Gammopathy {
    pub fn description(&self) -> &'static str {
        match self {
            Self::None => "No gammopathy",
            Self::Monoclonal => "Monoclonal gammopathy (narrow gamma spike)",
            Self::Polyclonal => "Polyclonal gammopathy (broad gamma elevation)",
        }
    }
}

impl std::fmt::Display for Gammopathy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Monoclonal => write!(f, "monoclonal"),
            Self::Polyclonal => write!(f, "polyclonal"),
        }
    }
}

pub fn is_red_pixel(r: u8, g: u8, b: u8) -> bool {
    r > 200 && g < 100 && b < 100
}

pub fn is_ink_pixel(cfg: &ChartConfig, r: u8, g: u8, b: u8) -> bool {
    r < cfg.ink_threshold || g < cfg.ink_threshold || b < cfg.ink_threshold
}

/// Recolour the chart into solid bars: every column is filled from the
/// curve's top edge to the bottom, the rest becomes paper.
pub fn render_bar_image(chart: &RgbImage) -> RgbImage {
    let mask = curve_mask(chart);
    let (width, height) = chart.dimensions();
    let tops: Vec<Option<u32>> = (0..width)
        .map(|x| (0..height).find(|&y| mask.get_pixel(x, y)[0] > 0))
        .collect();
    RgbImage::from_fn(width, height, |x, y| match tops[x as usize] {
        Some(top) if y >= top => BAR_COLOR,
        _ => PAPER,
    })
}

/// Measure segment heights on the bar image and find the separators on the
/// original chart.
pub fn analyze_bar_heights(cfg: &ChartConfig, bars: &RgbImage, chart: &RgbImage) -> BarAnalysis {
    let (width, height) = bars.dimensions();
    let segment_width = (width / cfg.bar_segments.max(1)).max(1);

    let mut bar_heights = Vec::new();
    let mut x_start = 0;
    while x_start < width {
        let x_end = (x_start + segment_width).min(width);
        let ink: usize = (x_start..x_end)
            .map(|x| {
                (0..height)
                    .filter(|&y| {
                        let p = bars.get_pixel(x, y);
                        is_ink_pixel(cfg, p[0], p[1], p[2])
                    })
                    .count()
            })
            .sum();
        let columns = (x_end - x_start).max(1);
        let avg = ink as f64 / f64::from(columns);
        bar_heights.push(avg / f64::from(height.max(1)) * 100.0);
        x_start += segment_width;
    }

    let separator_columns = find_separator_columns(cfg, chart);
    info!(
        segments = bar_heights.len(),
        separators = ?separator_columns,
        "Bar heights measured"
    );

    BarAnalysis {
        bar_heights,
        segment_width,
        image_width: chart.width(),
        image_height: chart.height(),
        separator_columns,
    }
}

/// Up to three columns with the most red pixels, kept apart by the minimum
/// separator distance.
pub fn find_separator_columns(cfg: &ChartConfig, chart: &RgbImage) -> Vec<u32> {
    let (width, height) = chart.dimensions();
    let mut counts: Vec<(u32, usize)> = (0..width)
        .map(|x| {
            let red = (0..height)
                .filter(|&y| {
                    let p = chart.get_pixel(x, y);
                    is_red_pixel(p[0], p[1], p[2])
                })
                .count();
            (x, red)
        })
        .filter(|&(_, red)| red > 0)
        .collect();
    // stable: equal counts keep the leftmost column first
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let min_distance = (f64::from(width) * cfg.separator_min_distance) as u32;
    let mut selected: Vec<u32> = Vec::with_capacity(3);
    for (x, _) in counts {
        if selected.iter().all(|&s| s.abs_diff(x) >= min_distance) {
            selected.push(x);
            if selected.len() == 3 {
                break;
            }
        }
    }
    selected.sort_unstable();
    selected
}

impl BarAnalysis {
    /// Split the bar heights at the three separators. `None` unless exactly
    /// three separators were found.
    pub fn sections(&self) -> Option<BarSections> {
        let [a, b, c] = <[u32; 3]>::try_from(self.separator_columns.as_slice()).ok()?;
        let len = self.bar_heights.len();
        let to_segment = |col: u32| ((col / self.segment_width) as usize).min(len);
        let (i1, i2, i3) = (to_segment(a), to_segment(b), to_segment(c));
        Some(BarSections {
            albumin: self.bar_heights[..i1].to_vec(),
            alpha: self.bar_heights[i1..i2].to_vec(),
            beta: self.bar_heights[i2..i3].to_vec(),
            gamma: self.bar_heights[i3..].to_vec(),
        })
    }
}

/// Classify the gamma region against the albumin region.
pub fn analyze_gammopathy(albumin: &[f64], gamma: &[f64]) -> Gammopathy {
    let sum_albumin: f64 = albumin.iter().sum();
    let sum_gamma: f64 = gamma.iter().sum();
    let threshold = sum_albumin * GAMMA_TO_ALBUMIN_RATIO;

    if sum_gamma <= threshold {
        debug!(sum_gamma, threshold, "Gamma below albumin threshold");
        return Gammopathy::None;
    }

    for i in 0..gamma.len() {
        let current = gamma[i];
        let left = if i > 0 { gamma[i - 1] } else { 0.0 };
        let right = gamma.get(i + 1).copied().unwrap_or(0.0);

        let left_ratio = if left > 0.0 { current / left } else { f64::MAX };
        let right_ratio = if right > 0.0 { current / right } else { f64::MAX };
        if left_ratio > PEAK_RATIO && right_ratio > PEAK_RATIO {
            debug!(segment = i, "Sharp gamma spike");
            return Gammopathy::Monoclonal;
        }

        if let Some(&next) = gamma.get(i + 1) {
            let surrounding: Vec<f64> = [i.checked_sub(1).map(|j| gamma[j]), gamma.get(i + 2).copied()]
                .into_iter()
                .flatten()
                .collect();
            if surrounding.is_empty() {
                continue;
            }
            let avg_surrounding = surrounding.iter().sum::<f64>() / surrounding.len() as f64;
            let pair_avg = (current + next) / 2.0;
            if avg_surrounding > 0.0 && pair_avg > avg_surrounding * PEAK_RATIO {
                debug!(segment = i, "Local two-segment gamma peak");
                return Gammopathy::Monoclonal;
            }
        }
    }

    debug!("Broad gamma elevation without spikes");
    Gammopathy::Polyclonal
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLUE: Rgb<u8> = Rgb([100, 149, 237]);
    const RED: Rgb<u8> = Rgb([230, 30, 30]);

    #[test]
    fn test_bar_image_fills_under_curve() {
        // a single blue pixel per column at row 4 (outline only)
        let chart = RgbImage::from_fn(10, 10, |_, y| if y == 4 { BLUE } else { PAPER });
        let bars = render_bar_image(&chart);
        assert_eq!(*bars.get_pixel(3, 3), PAPER);
        assert_eq!(*bars.get_pixel(3, 4), BAR_COLOR);
        assert_eq!(*bars.get_pixel(3, 9), BAR_COLOR);
    }

    #[test]
    fn test_bar_heights_percentages() {
        let cfg = ChartConfig::default();
        // 100 columns, left half fully inked, right half quarter height
        let bars = RgbImage::from_fn(100, 40, |x, y| {
            if x < 50 || y >= 30 { BAR_COLOR } else { PAPER }
        });
        let analysis = analyze_bar_heights(&cfg, &bars, &bars);
        assert_eq!(analysis.segment_width, 2);
        assert_eq!(analysis.bar_heights.len(), 50);
        assert_eq!(analysis.bar_heights[0], 100.0);
        assert_eq!(analysis.bar_heights[49], 25.0);
    }

    #[test]
    fn test_separators_spaced_and_sorted() {
        let cfg = ChartConfig::default();
        // red lines at 20, 22 (too close to 20), 50 and 80; 22 is the tallest
        let chart = RgbImage::from_fn(100, 50, |x, y| match x {
            22 => RED,
            20 | 50 if y >= 5 => RED,
            80 if y >= 10 => RED,
            _ => PAPER,
        });
        assert_eq!(find_separator_columns(&cfg, &chart), vec![22, 50, 80]);
    }

    #[test]
    fn test_no_separators_without_red() {
        let cfg = ChartConfig::default();
        let chart = RgbImage::from_pixel(30, 30, PAPER);
        assert!(find_separator_columns(&cfg, &chart).is_empty());
    }

    #[test]
    fn test_sections_split() {
        let analysis = BarAnalysis {
            bar_heights: (0..10).map(f64::from).collect(),
            segment_width: 10,
            image_width: 100,
            image_height: 50,
            separator_columns: vec![25, 50, 75],
        };
        let s = analysis.sections().unwrap();
        assert_eq!(s.albumin, vec![0.0, 1.0]);
        assert_eq!(s.alpha, vec![2.0, 3.0, 4.0]);
        assert_eq!(s.beta, vec![5.0, 6.0]);
        assert_eq!(s.gamma, vec![7.0, 8.0, 9.0]);

        let partial = BarAnalysis {
            separator_columns: vec![25, 50],
            ..analysis
        };
        assert!(partial.sections().is_none());
    }

    #[test]
    fn test_gammopathy_none_when_gamma_small() {
        assert_eq!(analyze_gammopathy(&[10.0, 10.0], &[5.0, 5.0]), Gammopathy::None);
        assert_eq!(analyze_gammopathy(&[7.0], &[8.9]), Gammopathy::None);
    }

    #[test]
    fn test_gammopathy_monoclonal_spike() {
        let albumin = [10.0, 10.0];
        let gamma = [5.0, 5.0, 30.0, 5.0, 5.0];
        assert_eq!(analyze_gammopathy(&albumin, &gamma), Gammopathy::Monoclonal);
    }

    #[test]
    fn test_gammopathy_monoclonal_pair() {
        let albumin = [5.0];
        // 20/21 pair against surrounding 5 and 5; neither is twice its neighbour
        let gamma = [4.0, 5.0, 20.0, 21.0, 5.0, 4.0];
        assert_eq!(analyze_gammopathy(&albumin, &gamma), Gammopathy::Monoclonal);
    }

    #[test]
    fn test_gammopathy_polyclonal_plateau() {
        let albumin = [10.0, 10.0];
        let gamma = [12.0, 14.0, 15.0, 14.0, 12.0];
        assert_eq!(analyze_gammopathy(&albumin, &gamma), Gammopathy::Polyclonal);
    }
}
