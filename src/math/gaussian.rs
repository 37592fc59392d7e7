use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// One peak of the electrophoresis curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianComponent {
    pub amplitude: f64,
    pub mean: f64,
    pub sigma: f64,
}

impl GaussianComponent {
    pub fn new(amplitude: f64, mean: f64, sigma: f64) -> Self {
        Self {
            amplitude,
            mean,
            sigma,
        }
    }

    pub fn value_at(&self, x: f64) -> f64 {
        let numerator = (x - self.mean).powi(2);
        let denominator = 2.0 * self.sigma.powi(2);
        self.amplitude * (-numerator / denominator).exp()
    }

    pub fn first_derivative_at(&self, x: f64) -> f64 {
        -self.value_at(x) * (x - self.mean) / self.sigma.powi(2)
    }

    pub fn second_derivative_at(&self, x: f64) -> f64 {
        let variance = self.sigma.powi(2);
        let term1 = (x - self.mean).powi(2) / variance.powi(2);
        let term2 = 1.0 / variance;
        self.value_at(x) * (term1 - term2)
    }

    /// Area under the whole curve.
    pub fn area(&self) -> f64 {
        self.amplitude * self.sigma.abs() * (2.0 * PI).sqrt()
    }
}

/// Sum of Gaussian peaks sitting on a flat baseline.
///
/// Components are ordered left to right, so the last one is the gamma
/// fraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElectrophoresisModel {
    components: Vec<GaussianComponent>,
    baseline: f64,
}

impl ElectrophoresisModel {
    pub fn new(components: Vec<GaussianComponent>, baseline: f64) -> Self {
        Self {
            components,
            baseline,
        }
    }

    pub fn y(&self, x: f64) -> f64 {
        self.baseline + self.components.iter().map(|c| c.value_at(x)).sum::<f64>()
    }

    pub fn derivative(&self, x: f64) -> f64 {
        self.components
            .iter()
            .map(|c| c.first_derivative_at(x))
            .sum()
    }

    /// Slope of the gamma peak at one sigma left of its mean, where a
    /// Gaussian rises fastest.
    pub fn max_gamma_slope(&self) -> f64 {
        let Some(gamma) = self.components.last() else {
            return 0.0;
        };
        gamma.first_derivative_at(gamma.mean - gamma.sigma)
    }

    /// Area share of each component in percent.
    pub fn fraction_shares(&self) -> Vec<f64> {
        let total: f64 = self.components.iter().map(GaussianComponent::area).sum();
        if total <= 0.0 {
            return Vec::new();
        }
        self.components
            .iter()
            .map(|c| c.area() / total * 100.0)
            .collect()
    }

    pub fn components(&self) -> &[GaussianComponent] {
        &self.components
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }
}
