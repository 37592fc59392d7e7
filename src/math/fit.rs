use super::{GaussianComponent, Point};
use crate::error::{FipError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Regions with this many points or fewer are not fitted.
const MIN_REGION_POINTS: usize = 10;
/// Regions whose height range (after baseline removal) is below this are flat.
const MIN_Y_RANGE: f64 = 5.0;
const MAX_ITERATIONS: usize = 500;
/// FWHM = 2·sqrt(2·ln 2)·sigma
const FWHM_TO_SIGMA: f64 = 2.355;

/// A Gaussian fitted to one fraction region of the curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionFit {
    pub region: usize,
    pub start: f64,
    pub end: f64,
    pub component: GaussianComponent,
    pub r_squared: f64,
}

/// Fit one Gaussian per region, regions being delimited by the separator
/// columns. Regions that cannot be fitted are logged and skipped.
pub fn fit_gaussian_curves(
    points: &[Point],
    separators: &[u32],
    max_x: u32,
    baseline: f64,
) -> Vec<RegionFit> {
    let mut sorted = separators.to_vec();
    sorted.sort_unstable();

    let mut boundaries = vec![0.0];
    boundaries.extend(sorted.iter().map(|&s| f64::from(s)));
    boundaries.push(f64::from(max_x));

    debug!(baseline, regions = boundaries.len() - 1, "Fitting Gaussian regions");

    let mut fits = Vec::new();
    for (region, window) in boundaries.windows(2).enumerate() {
        let (start, end) = (window[0], window[1]);
        let region_points: Vec<Point> = points
            .iter()
            .filter(|p| p.x >= start && p.x < end)
            .copied()
            .collect();

        debug!(region, points = region_points.len(), start, end, "Region");
        if region_points.len() <= MIN_REGION_POINTS {
            continue;
        }

        match fit_region(&region_points, region, start, end, baseline) {
            Ok(fit) => {
                info!(
                    region,
                    amplitude = format!("{:.1}", fit.component.amplitude),
                    mean = format!("{:.1}", fit.component.mean),
                    sigma = format!("{:.1}", fit.component.sigma),
                    r_squared = format!("{:.3}", fit.r_squared),
                    "Region fitted"
                );
                fits.push(fit);
            }
            Err(e) => warn!(region, error = %e, "Region fit failed"),
        }
    }
    fits
}

fn fit_region(points: &[Point], region: usize, start: f64, end: f64, baseline: f64) -> Result<RegionFit> {
    let adjusted: Vec<Point> = points
        .iter()
        .map(|p| Point::new(p.x, (p.y - baseline).max(0.0)))
        .collect();

    let min_y = adjusted.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_y = adjusted.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
    let range_y = max_y - min_y;
    if range_y < MIN_Y_RANGE {
        return Err(FipError::Fit(format!(
            "y range too small ({range_y:.2}) after baseline removal"
        )));
    }

    let xs: Vec<f64> = adjusted.iter().map(|p| p.x).collect();
    let ys: Vec<f64> = adjusted.iter().map(|p| (p.y - min_y) / range_y).collect();

    let peak_x = adjusted
        .iter()
        .fold(adjusted[0], |best, p| if p.y > best.y { *p } else { best })
        .x;

    let half_max = (max_y + min_y) / 2.0;
    let above_half: Vec<&Point> = adjusted.iter().filter(|p| p.y >= half_max).collect();
    let fwhm = match (above_half.first(), above_half.last()) {
        (Some(first), Some(last)) if above_half.len() >= 2 => last.x - first.x,
        _ => (end - start) / 3.0,
    };
    let sigma_max = ((end - start) / 2.0).max(5.0);
    let sigma0 = (fwhm / FWHM_TO_SIGMA).clamp(5.0, sigma_max);
    debug!(region, peak_x, fwhm, sigma0, "Initial guess");

    let [a, mean, sigma] = levenberg_marquardt(&xs, &ys, [1.0, peak_x, sigma0], MAX_ITERATIONS)?;

    let amplitude = a * range_y + min_y;
    let sigma = sigma.abs();
    if amplitude <= 0.0 || sigma <= 0.0 || !amplitude.is_finite() || !sigma.is_finite() {
        return Err(FipError::Fit("invalid parameters".to_string()));
    }
    if mean < start || mean > end {
        return Err(FipError::Fit(format!("mean {mean:.1} outside [{start}, {end}]")));
    }

    let component = GaussianComponent::new(amplitude, mean, sigma);
    Ok(RegionFit {
        region,
        start,
        end,
        r_squared: r_squared(&adjusted, &component),
        component,
    })
}

/// Coefficient of determination of `component` against the points.
pub fn r_squared(points: &[Point], component: &GaussianComponent) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let y_mean = points.iter().map(|p| p.y).sum::<f64>() / points.len() as f64;
    let (ss_total, ss_residual) = points.iter().fold((0.0, 0.0), |(tot, res), p| {
        let predicted = component.value_at(p.x);
        (tot + (p.y - y_mean).powi(2), res + (p.y - predicted).powi(2))
    });
    if ss_total > 0.0 {
        1.0 - ss_residual / ss_total
    } else {
        0.0
    }
}

fn sum_squared_residuals(xs: &[f64], ys: &[f64], p: &[f64; 3]) -> f64 {
    let g = GaussianComponent::new(p[0], p[1], p[2]);
    xs.iter()
        .zip(ys)
        .map(|(&x, &y)| (y - g.value_at(x)).powi(2))
        .sum()
}

/// Builds JᵀJ and Jᵀr for the model `a·exp(-(x-m)²/(2s²))`.
fn normal_equations(xs: &[f64], ys: &[f64], p: &[f64; 3]) -> ([[f64; 3]; 3], [f64; 3]) {
    let [a, m, s] = *p;
    let mut jtj = [[0.0; 3]; 3];
    let mut jtr = [0.0; 3];
    for (&x, &y) in xs.iter().zip(ys) {
        let d = x - m;
        let e = (-d * d / (2.0 * s * s)).exp();
        let j = [e, a * e * d / (s * s), a * e * d * d / (s * s * s)];
        let r = y - a * e;
        for row in 0..3 {
            jtr[row] += j[row] * r;
            for col in 0..3 {
                jtj[row][col] += j[row] * j[col];
            }
        }
    }
    (jtj, jtr)
}

fn levenberg_marquardt(xs: &[f64], ys: &[f64], init: [f64; 3], max_iter: usize) -> Result<[f64; 3]> {
    let mut p = init;
    let mut cost = sum_squared_residuals(xs, ys, &p);
    let mut lambda = 1e-3;

    if !cost.is_finite() {
        return Err(FipError::Fit("non-finite initial cost".to_string()));
    }

    for _ in 0..max_iter {
        if cost == 0.0 {
            return Ok(p);
        }
        let (jtj, jtr) = normal_equations(xs, ys, &p);

        let mut stepped = false;
        for _ in 0..16 {
            let mut damped = jtj;
            for i in 0..3 {
                damped[i][i] += lambda * jtj[i][i].max(1e-12);
            }
            let Some(delta) = solve3(damped, jtr) else {
                lambda *= 10.0;
                continue;
            };
            let candidate = [p[0] + delta[0], p[1] + delta[1], p[2] + delta[2]];
            if candidate[2] <= 0.0 {
                lambda *= 10.0;
                continue;
            }
            let new_cost = sum_squared_residuals(xs, ys, &candidate);
            if new_cost.is_finite() && new_cost < cost {
                let improvement = (cost - new_cost) / cost;
                p = candidate;
                cost = new_cost;
                lambda = (lambda * 0.1).max(1e-12);
                stepped = true;
                if improvement < 1e-10 || delta.iter().all(|d| d.abs() < 1e-10) {
                    return Ok(p);
                }
                break;
            }
            lambda *= 10.0;
        }

        if !stepped {
            // no damping level improves the fit any more
            return Ok(p);
        }
    }

    Err(FipError::Fit(format!("no convergence after {max_iter} iterations")))
}

/// Solves a 3×3 linear system by Gaussian elimination with partial pivoting.
fn solve3(mut a: [[f64; 3]; 3], mut b: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-15 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..3 {
            let factor = a[row][col] / a[col][col];
            for k in col..3 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = [0.0; 3];
    for row in (0..3).rev() {
        let tail: f64 = ((row + 1)..3).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}
