use crate::error::Result;
use serde::Deserialize;
use std::{fs, path::Path};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub chart: ChartConfig,
    #[serde(default)]
    pub scoring: ScoringWeights,
}

fn default_db_path() -> String {
    "fipscan/results.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            chart: ChartConfig::default(),
            scoring: ScoringWeights::default(),
        }
    }
}

/// Colour heuristics used to find and digitise the electrophoresis chart.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    /// Curve fill colour of the chart (cornflower blue in the lab template).
    pub target_color: [u8; 3],
    /// Per-channel tolerance around `target_color`.
    pub color_tolerance: u8,
    /// Share of the page height cut from the top before searching.
    pub top_margin: f64,
    /// Padding added around the blue bounding box, as a share of its size.
    pub padding: f64,
    /// Sampling grid used when counting blue pixels per candidate image.
    pub sample_step: u32,
    /// Number of bar segments the chart width is divided into.
    pub bar_segments: u32,
    /// Minimum distance between separator columns, as a share of the width.
    pub separator_min_distance: f64,
    /// Channel value below which a pixel counts as ink on the bar image.
    pub ink_threshold: u8,
    /// Channel value above which a pixel counts as paper in shape profiles.
    pub white_threshold: u8,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            target_color: [100, 149, 237],
            color_tolerance: 30,
            top_margin: 0.2,
            padding: 0.01,
            sample_step: 5,
            bar_segments: 50,
            separator_min_distance: 0.05,
            ink_threshold: 250,
            white_threshold: 230,
        }
    }
}

/// Relative weight of each risk component.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub rivalta: f64,
    pub gammopathy: f64,
    pub ag_ratio: f64,
    pub gamma: f64,
    pub age: f64,
    pub lab_flags: f64,
    pub shape: f64,
    pub pattern: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            rivalta: 0.6,
            gammopathy: 0.4,
            ag_ratio: 0.3,
            gamma: 0.2,
            age: 0.2,
            lab_flags: 0.3,
            shape: 0.3,
            pattern: 0.3,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load the config file if it exists, falling back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!(path = %path.display(), "No config file — using defaults");
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            db_path = "/tmp/x.db"

            [scoring]
            rivalta = 1.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.db_path, "/tmp/x.db");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.scoring.rivalta, 1.0);
        assert_eq!(cfg.scoring.gammopathy, 0.4);
        assert_eq!(cfg.chart.target_color, [100, 149, 237]);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let cfg = Config::load_or_default("/definitely/not/here.toml").unwrap();
        assert_eq!(cfg.chart.bar_segments, 50);
    }
}
