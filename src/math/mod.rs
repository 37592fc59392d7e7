// src/math/mod.rs

mod fit;
mod gaussian;

pub use fit::{RegionFit, fit_gaussian_curves, r_squared};
pub use gaussian::{ElectrophoresisModel, GaussianComponent};

/// A sampled point of the chart curve, in image columns and pixel heights.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}
