// src/chart/locate.rs

use crate::config::ChartConfig;
use image::{RgbImage, imageops};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Pixel rectangle, all four edges inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropBox {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left) + 1
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top) + 1
    }
}

/// Whether each channel sits within the configured tolerance of the chart colour.
pub fn is_chart_blue(cfg: &ChartConfig, r: u8, g: u8, b: u8) -> bool {
    let tol = i16::from(cfg.color_tolerance);
    [r, g, b]
        .iter()
        .zip(cfg.target_color)
        .all(|(&c, t)| (i16::from(c) - i16::from(t)).abs() <= tol)
}

/// Drop the top share of the image (letterhead, logos).
pub fn remove_top_margin(image: &RgbImage, margin: f64) -> RgbImage {
    let cut = (f64::from(image.height()) * margin.clamp(0.0, 0.99)) as u32;
    imageops::crop_imm(image, 0, cut, image.width(), image.height() - cut).to_image()
}

/// Blue pixels on a sparse sampling grid.
pub fn count_blue_pixels(cfg: &ChartConfig, image: &RgbImage) -> usize {
    let step = cfg.sample_step.max(1) as usize;
    (0..image.width())
        .step_by(step)
        .flat_map(|x| (0..image.height()).step_by(step).map(move |y| (x, y)))
        .filter(|&(x, y)| {
            let p = image.get_pixel(x, y);
            is_chart_blue(cfg, p[0], p[1], p[2])
        })
        .count()
}

/// Index of the candidate holding the chart: the one with the most blue
/// pixels once its top margin is removed. Ties keep the earlier candidate.
pub fn select_chart_image(cfg: &ChartConfig, candidates: &[RgbImage]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (idx, image) in candidates.iter().enumerate() {
        let trimmed = remove_top_margin(image, cfg.top_margin);
        let blue = count_blue_pixels(cfg, &trimmed);
        debug!(candidate = idx, blue_pixels = blue, "Colour analysis");
        if blue > best.map_or(0, |(_, count)| count) {
            best = Some((idx, blue));
        }
    }
    if let Some((idx, blue)) = best {
        info!(candidate = idx, blue_pixels = blue, "Chart image selected");
    }
    best.map(|(idx, _)| idx)
}

/// Bounding box of all blue pixels.
pub fn find_crop_box(cfg: &ChartConfig, image: &RgbImage) -> Option<CropBox> {
    let mut bounds: Option<CropBox> = None;
    for (x, y, p) in image.enumerate_pixels() {
        if !is_chart_blue(cfg, p[0], p[1], p[2]) {
            continue;
        }
        let b = bounds.get_or_insert(CropBox {
            left: x,
            top: y,
            right: x,
            bottom: y,
        });
        b.left = b.left.min(x);
        b.top = b.top.min(y);
        b.right = b.right.max(x);
        b.bottom = b.bottom.max(y);
    }
    bounds
}

/// Grow the box by `padding` of its edge-to-edge span on every side,
/// clamped to the last pixel of a `width` × `height` image.
pub fn add_padding(crop: CropBox, padding: f64, width: u32, height: u32) -> CropBox {
    if padding < 0.01 {
        return crop;
    }
    let pad_x = (f64::from(crop.right - crop.left) * padding) as u32;
    let pad_y = (f64::from(crop.bottom - crop.top) * padding) as u32;
    CropBox {
        left: crop.left.saturating_sub(pad_x),
        top: crop.top.saturating_sub(pad_y),
        right: (crop.right + pad_x).min(width.saturating_sub(1)),
        bottom: (crop.bottom + pad_y).min(height.saturating_sub(1)),
    }
}

/// Cut the chart out of a page image: margin removal, blue bounding box,
/// padding. `None` when the image holds no chart colour at all.
pub fn crop_chart(cfg: &ChartConfig, page: &RgbImage) -> Option<(RgbImage, CropBox)> {
    let trimmed = remove_top_margin(page, cfg.top_margin);
    let crop = find_crop_box(cfg, &trimmed)?;
    let padded = add_padding(crop, cfg.padding, trimmed.width(), trimmed.height());
    let chart = imageops::crop_imm(&trimmed, padded.left, padded.top, padded.width(), padded.height())
        .to_image();
    info!(
        width = chart.width(),
        height = chart.height(),
        left = padded.left,
        top = padded.top,
        "Chart cropped"
    );
    Some((chart, padded))
}
