// src/chart/mod.rs

pub mod bars;
pub mod locate;
pub mod signal;

use crate::config::ChartConfig;
use crate::math::{ElectrophoresisModel, RegionFit, fit_gaussian_curves};
use bars::{BarAnalysis, BarSections, Gammopathy};
use image::RgbImage;
use locate::CropBox;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const MEDIAN_WINDOW: usize = 5;

/// Everything measured on the electrophoresis chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartAnalysis {
    /// Index of the candidate image the chart was found in.
    pub source_index: usize,
    pub crop: CropBox,
    pub bars: BarAnalysis,
    pub sections: Option<BarSections>,
    pub gammopathy: Option<Gammopathy>,
    pub baseline: f64,
    pub fits: Vec<RegionFit>,
    pub max_gamma_slope: f64,
    /// Area share of each fitted fraction, percent.
    pub fraction_shares: Vec<f64>,
}

/// A chart analysis together with the bitmaps it was measured on.
#[derive(Debug, Clone)]
pub struct ChartRun {
    pub analysis: ChartAnalysis,
    pub chart: RgbImage,
    pub bar_image: RgbImage,
}

/// Locate the chart among the candidate images and digitise it.
pub fn analyze_chart(cfg: &ChartConfig, candidates: &[RgbImage]) -> Option<ChartRun> {
    let source_index = locate::select_chart_image(cfg, candidates)?;
    let (chart, crop) = locate::crop_chart(cfg, &candidates[source_index])?;

    let bar_image = bars::render_bar_image(&chart);
    let bars = bars::analyze_bar_heights(cfg, &bar_image, &chart);
    let sections = bars.sections();
    if sections.is_none() {
        warn!(
            separators = bars.separator_columns.len(),
            "Expected three fraction separators"
        );
    }
    let gammopathy = sections
        .as_ref()
        .map(|s| bars::analyze_gammopathy(&s.albumin, &s.gamma));

    let raw = signal::extract_raw_signal(&chart);
    let smoothed = signal::savitzky_golay(&signal::smooth_median(&raw.points, MEDIAN_WINDOW));
    let fits = fit_gaussian_curves(&smoothed, &bars.separator_columns, chart.width(), raw.baseline);
    let model = ElectrophoresisModel::new(fits.iter().map(|f| f.component).collect(), raw.baseline);

    info!(
        gammopathy = ?gammopathy,
        fitted = fits.len(),
        "Chart analysed"
    );

    Some(ChartRun {
        analysis: ChartAnalysis {
            source_index,
            crop,
            sections,
            gammopathy,
            baseline: raw.baseline,
            max_gamma_slope: model.max_gamma_slope(),
            fraction_shares: model.fraction_shares(),
            fits,
            bars,
        },
        chart,
        bar_image,
    })
}
