// src/analysis/shape.rs

use crate::config::ChartConfig;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const PROFILE_SAMPLES: u32 = 50;
const BRIDGE_EDGE_SAMPLES: usize = 10;
const BRIDGE_MIN_DEPTH: f64 = 0.3;
const SCORE_MULTIPLIER: f64 = 2.75;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakCharacteristics {
    pub height: f64,
    /// Half-max width as a share of the section profile.
    pub width: f64,
    pub symmetry: f64,
    pub sharpness: f64,
    pub position: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeCharacteristics {
    pub present: bool,
    pub depth: f64,
    pub width: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapePattern {
    Monoclonal,
    Polyclonal,
    Bridging,
    Normal,
    Nonspecific,
}

impl ShapePattern {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Monoclonal => "Monoclonal",
            Self::Polyclonal => "Polyclonal",
            Self::Bridging => "Beta-gamma bridging",
            Self::Normal => "Normal",
            Self::Nonspecific => "Nonspecific",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::Polyclonal => "Broad polyclonal gamma elevation, typical of FIP",
            Self::Monoclonal => "Narrow monoclonal gamma spike, less typical of FIP",
            Self::Bridging => "Beta-gamma bridging, frequently seen in FIP",
            Self::Normal => "Normal electrophoresis profile with a dominant albumin peak",
            Self::Nonspecific => "Nonspecific electrophoresis profile",
        }
    }

    fn score(&self) -> f64 {
        match self {
            Self::Polyclonal => 40.0,
            Self::Bridging => 35.0,
            Self::Monoclonal => 20.0,
            Self::Normal => -20.0,
            Self::Nonspecific => 0.0,
        }
    }
}

/// Distribution of ink across the gamma section, positions normalised to
/// the section width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GammaSpread {
    pub mass: f64,
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
}

/// Gamma peak widths at several heights, relative to the beta half-max width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GammaWidthRatios {
    pub at_70: f64,
    pub at_50: f64,
    pub at_30: f64,
    /// Width at 70 % over width at 30 %; near 1 for a plateau, small for a spike.
    pub narrowing: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeAnalysis {
    pub albumin: PeakCharacteristics,
    pub alpha: PeakCharacteristics,
    pub beta: PeakCharacteristics,
    pub gamma: PeakCharacteristics,
    pub beta_gamma_bridge: BridgeCharacteristics,
    pub alpha_beta_bridge: BridgeCharacteristics,
    pub pattern: ShapePattern,
    pub fip_shape_score: f64,
    pub description: String,
    pub gamma_spread: GammaSpread,
    /// Albumin, alpha, beta and gamma share of the total ink, percent.
    pub area_shares: [f64; 4],
    pub gamma_width_ratios: Option<GammaWidthRatios>,
}

/// Analyse the fraction shapes of a chart bitmap split at the separator
/// columns. Needs at least three separators.
pub fn analyze_shape(cfg: &ChartConfig, bitmap: &RgbImage, separators: &[u32]) -> Option<ShapeAnalysis> {
    if separators.len() < 3 {
        warn!(separators = separators.len(), "Not enough separator columns for shape analysis");
        return None;
    }

    let profiles = section_profiles(cfg, bitmap, separators);
    let [albumin_p, alpha_p, beta_p, gamma_p] = &profiles;

    let albumin = analyze_peak(&albumin_p.values);
    let alpha = analyze_peak(&alpha_p.values);
    let beta = analyze_peak(&beta_p.values);
    let gamma = analyze_peak(&gamma_p.values);

    let beta_gamma_bridge = analyze_bridge(&beta_p.values, &gamma_p.values);
    let alpha_beta_bridge = analyze_bridge(&alpha_p.values, &beta_p.values);

    let pattern = classify_pattern(&albumin, &alpha, &gamma, &beta_gamma_bridge);
    let fip_shape_score = shape_score(&albumin, &alpha, &gamma, &beta_gamma_bridge, pattern);
    let description = describe(&albumin, &gamma, &beta_gamma_bridge, pattern, fip_shape_score);

    info!(
        pattern = pattern.name(),
        score = format!("{fip_shape_score:.1}"),
        "Shape analysed"
    );

    Some(ShapeAnalysis {
        albumin,
        alpha,
        beta,
        gamma,
        beta_gamma_bridge,
        alpha_beta_bridge,
        pattern,
        fip_shape_score,
        description,
        gamma_spread: gamma_spread(&gamma_p.values),
        area_shares: area_shares(&profiles),
        gamma_width_ratios: gamma_width_ratios(beta_p, gamma_p),
    })
}

/// Sampled ink heights of one fraction.
#[derive(Debug, Clone, Default)]
struct SectionProfile {
    values: Vec<f64>,
    /// Columns between consecutive samples.
    step: u32,
}

fn section_profiles(cfg: &ChartConfig, bitmap: &RgbImage, separators: &[u32]) -> [SectionProfile; 4] {
    let (width, height) = bitmap.dimensions();
    let mut cols: Vec<u32> = separators.iter().map(|&c| c.min(width)).collect();
    cols.sort_unstable();
    // each separator column opens the fraction to its right
    let bounds = [(0, cols[0]), (cols[0], cols[1]), (cols[1], cols[2]), (cols[2], width)];

    bounds.map(|(start, end)| {
        if end <= start {
            return SectionProfile::default();
        }
        let step = ((end - start) / PROFILE_SAMPLES).max(1);
        let values = (start..end)
            .step_by(step as usize)
            .map(|x| {
                let ink = (0..height)
                    .filter(|&y| !is_white(cfg, bitmap.get_pixel(x, y).0))
                    .count();
                ink as f64 / f64::from(height.max(1))
            })
            .collect();
        SectionProfile { values, step }
    })
}

fn is_white(cfg: &ChartConfig, [r, g, b]: [u8; 3]) -> bool {
    r > cfg.white_threshold && g > cfg.white_threshold && b > cfg.white_threshold
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(0.0, f64::max)
}

fn mean_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub fn analyze_peak(profile: &[f64]) -> PeakCharacteristics {
    if profile.is_empty() {
        return PeakCharacteristics::default();
    }
    let height = max_of(profile);
    let position = profile.iter().position(|&v| v == height).unwrap_or(0);

    let half = height / 2.0;
    let mut left = position;
    let mut right = position;
    while left > 0 && profile[left] > half {
        left -= 1;
    }
    while right < profile.len() - 1 && profile[right] > half {
        right += 1;
    }

    let width = (right - left).max(1) as f64 / profile.len() as f64;
    PeakCharacteristics {
        height,
        width,
        symmetry: symmetry(profile, position),
        sharpness: if width > 0.0 { height / width } else { 0.0 },
        position,
    }
}

/// Mirror comparison around the peak; 0 when the peak sits on an edge.
fn symmetry(profile: &[f64], peak: usize) -> f64 {
    if profile.is_empty() || peak == 0 || peak == profile.len() - 1 {
        return 0.0;
    }
    let (left, right) = profile.split_at(peak);
    let n = left.len().min(right.len());
    let total: f64 = left
        .iter()
        .rev()
        .zip(right)
        .take(n)
        .map(|(&l, &r)| 1.0 - (l - r).abs() / l.max(r).max(0.01))
        .sum();
    (total / n as f64).clamp(0.0, 1.0)
}

pub fn analyze_bridge(left: &[f64], right: &[f64]) -> BridgeCharacteristics {
    if left.is_empty() || right.is_empty() {
        return BridgeCharacteristics::default();
    }
    let left_end = mean_of(&left[left.len().saturating_sub(BRIDGE_EDGE_SAMPLES)..]);
    let right_start = mean_of(&right[..right.len().min(BRIDGE_EDGE_SAMPLES)]);
    let valley = left_end.min(right_start);

    let avg_max = (max_of(left) + max_of(right)) / 2.0;
    let depth = if avg_max > 0.0 { valley / avg_max } else { 0.0 };
    let present = depth > BRIDGE_MIN_DEPTH;

    let width = if present {
        let threshold = avg_max * BRIDGE_MIN_DEPTH;
        let share = |s: &[f64]| s.iter().filter(|&&v| v > threshold).count() as f64 / s.len() as f64;
        (share(left) + share(right)) / 2.0
    } else {
        0.0
    };

    BridgeCharacteristics { present, depth, width }
}

pub fn classify_pattern(
    albumin: &PeakCharacteristics,
    alpha: &PeakCharacteristics,
    gamma: &PeakCharacteristics,
    beta_gamma: &BridgeCharacteristics,
) -> ShapePattern {
    if gamma.sharpness > 2.0 && gamma.height > albumin.height * 1.5 {
        ShapePattern::Monoclonal
    } else if gamma.width > 0.3 && gamma.height > albumin.height * 1.2 {
        ShapePattern::Polyclonal
    } else if beta_gamma.present && beta_gamma.depth > 0.5 {
        ShapePattern::Bridging
    } else if albumin.height > gamma.height * 1.5 && albumin.height > alpha.height * 1.5 {
        ShapePattern::Normal
    } else {
        ShapePattern::Nonspecific
    }
}

/// Albumin to gamma peak height ratio; very large when there is no gamma peak.
fn height_ratio(albumin: &PeakCharacteristics, gamma: &PeakCharacteristics) -> f64 {
    if gamma.height > 0.01 {
        albumin.height / gamma.height
    } else {
        999.0
    }
}

pub fn shape_score(
    albumin: &PeakCharacteristics,
    alpha: &PeakCharacteristics,
    gamma: &PeakCharacteristics,
    beta_gamma: &BridgeCharacteristics,
    pattern: ShapePattern,
) -> f64 {
    let mut score = pattern.score();

    let ratio = height_ratio(albumin, gamma);
    score += if ratio < 0.6 {
        30.0
    } else if ratio < 0.8 {
        20.0
    } else if ratio < 1.0 {
        10.0
    } else {
        0.0
    };

    if gamma.width > 0.35 {
        score += 15.0;
    } else if gamma.width > 0.25 {
        score += 10.0;
    }
    if beta_gamma.present {
        score += beta_gamma.depth * 20.0;
    }
    if gamma.symmetry < 0.7 {
        score += 10.0;
    }
    if alpha.height > albumin.height * 0.5 {
        score += 5.0;
    }

    debug!(raw = score, "Shape score before scaling");
    (score * SCORE_MULTIPLIER).clamp(0.0, 100.0)
}

fn describe(
    albumin: &PeakCharacteristics,
    gamma: &PeakCharacteristics,
    beta_gamma: &BridgeCharacteristics,
    pattern: ShapePattern,
    score: f64,
) -> String {
    let mut parts = vec![pattern.description().to_string()];

    let ratio = height_ratio(albumin, gamma);
    if ratio < 0.6 {
        parts.push("Albumin peak far below the gamma peak".to_string());
    } else if ratio < 0.8 {
        parts.push("Albumin peak lower than the gamma peak".to_string());
    }
    if beta_gamma.present {
        parts.push(format!(
            "Beta-gamma bridge at {}% of the peak height",
            (beta_gamma.depth * 100.0) as i32
        ));
    }
    if gamma.symmetry < 0.7 {
        parts.push("Asymmetric gamma peak".to_string());
    }

    let risk = if score >= 70.0 {
        "high"
    } else if score >= 50.0 {
        "moderate"
    } else if score >= 30.0 {
        "low"
    } else {
        "no"
    };
    parts.push(format!(
        "The curve shape indicates {risk} FIP likelihood ({}/100)",
        score as i32
    ));
    parts.join(". ")
}

fn gamma_spread(profile: &[f64]) -> GammaSpread {
    let mass: f64 = profile.iter().sum();
    if mass <= 0.0 {
        return GammaSpread::default();
    }
    let n = profile.len() as f64;
    let pos = |i: usize| i as f64 / n;
    let mean = profile.iter().enumerate().map(|(i, v)| pos(i) * v).sum::<f64>() / mass;
    let variance = profile
        .iter()
        .enumerate()
        .map(|(i, v)| v * (pos(i) - mean).powi(2))
        .sum::<f64>()
        / mass;
    GammaSpread {
        mass,
        mean,
        variance,
        std_dev: variance.sqrt(),
    }
}

fn area_shares(profiles: &[SectionProfile; 4]) -> [f64; 4] {
    let areas = profiles
        .each_ref()
        .map(|p| p.values.iter().sum::<f64>() * f64::from(p.step));
    let total: f64 = areas.iter().sum();
    if total <= 0.0 {
        return [0.0; 4];
    }
    areas.map(|a| a / total * 100.0)
}

/// Width in columns of the span at or above `level` of the profile maximum.
fn width_at(profile: &SectionProfile, level: f64) -> f64 {
    let threshold = max_of(&profile.values) * level;
    let first = profile.values.iter().position(|&v| v >= threshold);
    let last = profile.values.iter().rposition(|&v| v >= threshold);
    match (first, last) {
        (Some(a), Some(b)) => ((b - a + 1) as f64) * f64::from(profile.step),
        _ => 0.0,
    }
}

fn gamma_width_ratios(beta: &SectionProfile, gamma: &SectionProfile) -> Option<GammaWidthRatios> {
    if max_of(&beta.values) <= 0.0 || max_of(&gamma.values) <= 0.0 {
        return None;
    }
    let reference = width_at(beta, 0.5);
    let (w70, w50, w30) = (width_at(gamma, 0.7), width_at(gamma, 0.5), width_at(gamma, 0.3));
    Some(GammaWidthRatios {
        at_70: w70 / reference,
        at_50: w50 / reference,
        at_30: w30 / reference,
        narrowing: if w30 > 0.0 { w70 / w30 } else { 0.0 },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::testing::{BLUE, WHITE, synthetic_chart};

    /// 500×400 curve bitmap without separator lines.
    fn curve(height_at: impl Fn(u32) -> u32) -> RgbImage {
        let (w, h) = (500, 400);
        RgbImage::from_fn(w, h, |x, y| if y >= h - height_at(x).min(h) { BLUE } else { WHITE })
    }

    fn bump(x: u32, center: f64, sigma: f64, height: f64) -> f64 {
        height * (-(f64::from(x) - center).powi(2) / (2.0 * sigma * sigma)).exp()
    }

    #[test]
    fn test_peak_of_triangle() {
        let profile = [0.0, 0.25, 0.5, 1.0, 0.5, 0.25, 0.0];
        let peak = analyze_peak(&profile);
        assert_eq!(peak.position, 3);
        assert_eq!(peak.height, 1.0);
        // walks down to the first value not above half (indices 2 and 4)
        assert!((peak.width - 2.0 / 7.0).abs() < 1e-12);
        // the right side starts at the peak itself
        assert!((peak.symmetry - 1.0 / 3.0).abs() < 1e-12);
        assert!((peak.sharpness - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_edge_peak_has_no_symmetry() {
        let peak = analyze_peak(&[1.0, 0.5, 0.2]);
        assert_eq!(peak.position, 0);
        assert_eq!(peak.symmetry, 0.0);
        assert_eq!(analyze_peak(&[]), PeakCharacteristics::default());
    }

    #[test]
    fn test_bridge_detection() {
        let left = [0.2, 0.6, 0.8, 0.7, 0.6];
        let right = [0.6, 0.7, 0.8, 0.5];
        let bridge = analyze_bridge(&left, &right);
        assert!(bridge.present);
        assert!(bridge.depth > 0.5);
        assert!(bridge.width > 0.0);

        let left: Vec<f64> = [0.9; 5].into_iter().chain([0.05; 10]).collect();
        let right: Vec<f64> = [0.05; 10].into_iter().chain([0.9; 5]).collect();
        let valley = analyze_bridge(&left, &right);
        assert!(!valley.present);
        assert_eq!(valley.width, 0.0);
    }

    #[test]
    fn test_pattern_rules_in_order() {
        let albumin = PeakCharacteristics { height: 0.3, width: 0.2, ..Default::default() };
        let alpha = PeakCharacteristics { height: 0.1, ..Default::default() };
        let spike = PeakCharacteristics { height: 0.6, width: 0.1, sharpness: 6.0, ..Default::default() };
        let broad = PeakCharacteristics { height: 0.4, width: 0.5, sharpness: 0.8, ..Default::default() };
        let small = PeakCharacteristics { height: 0.1, width: 0.2, sharpness: 0.5, ..Default::default() };
        let no_bridge = BridgeCharacteristics::default();
        let deep = BridgeCharacteristics { present: true, depth: 0.6, width: 0.4 };

        assert_eq!(classify_pattern(&albumin, &alpha, &spike, &deep), ShapePattern::Monoclonal);
        assert_eq!(classify_pattern(&albumin, &alpha, &broad, &deep), ShapePattern::Polyclonal);
        assert_eq!(classify_pattern(&albumin, &alpha, &small, &deep), ShapePattern::Bridging);
        assert_eq!(classify_pattern(&albumin, &alpha, &small, &no_bridge), ShapePattern::Normal);
        let tall_alpha = PeakCharacteristics { height: 0.3, ..Default::default() };
        assert_eq!(
            classify_pattern(&albumin, &tall_alpha, &small, &no_bridge),
            ShapePattern::Nonspecific
        );
    }

    #[test]
    fn test_score_is_scaled_and_clamped() {
        let albumin = PeakCharacteristics { height: 0.2, ..Default::default() };
        let alpha = PeakCharacteristics { height: 0.05, ..Default::default() };
        let gamma = PeakCharacteristics { height: 0.5, width: 0.4, symmetry: 0.9, ..Default::default() };
        // 40 + 30 + 15 = 85 -> clamped
        let score = shape_score(&albumin, &alpha, &gamma, &BridgeCharacteristics::default(), ShapePattern::Polyclonal);
        assert_eq!(score, 100.0);

        let albumin = PeakCharacteristics { height: 0.6, ..Default::default() };
        let gamma = PeakCharacteristics { height: 0.2, width: 0.1, symmetry: 0.9, ..Default::default() };
        let score = shape_score(&albumin, &alpha, &gamma, &BridgeCharacteristics::default(), ShapePattern::Normal);
        assert_eq!(score, 0.0);

        // 0 + 10 (ratio 0.9) + 10 (asymmetric) = 20 -> 55
        let albumin = PeakCharacteristics { height: 0.45, ..Default::default() };
        let gamma = PeakCharacteristics { height: 0.5, width: 0.1, symmetry: 0.5, ..Default::default() };
        let score = shape_score(&albumin, &alpha, &gamma, &BridgeCharacteristics::default(), ShapePattern::Nonspecific);
        assert!((score - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_requires_three_separators() {
        let chart = synthetic_chart(|_| 50);
        assert!(analyze_shape(&ChartConfig::default(), &chart, &[125, 250]).is_none());
    }

    #[test]
    fn test_sections_start_at_the_separator() {
        let cfg = ChartConfig::default();
        let bitmap = RgbImage::from_fn(400, 100, |x, _| if x == 100 { BLUE } else { WHITE });
        let [albumin, alpha, beta, gamma] = section_profiles(&cfg, &bitmap, &[300, 100, 200]);
        assert!(albumin.values.iter().all(|&v| v == 0.0));
        assert_eq!(alpha.step, 2);
        assert_eq!(alpha.values.len(), 50);
        assert_eq!(alpha.values[0], 1.0);
        assert!(alpha.values[1..].iter().all(|&v| v == 0.0));
        assert!(beta.values.iter().chain(&gamma.values).all(|&v| v == 0.0));
    }

    #[test]
    fn test_polyclonal_chart() {
        let chart = curve(|x| {
            (20.0
                + bump(x, 60.0, 25.0, 120.0)
                + bump(x, 190.0, 20.0, 60.0)
                + bump(x, 310.0, 20.0, 80.0)
                + bump(x, 440.0, 45.0, 300.0)) as u32
        });
        let shape = analyze_shape(&ChartConfig::default(), &chart, &[125, 250, 375]).unwrap();
        assert!(shape.gamma.height > shape.albumin.height);
        assert_eq!(shape.pattern, ShapePattern::Polyclonal);
        assert!(shape.fip_shape_score >= 70.0);
        assert!(shape.description.contains("high FIP likelihood"));
        assert!((shape.area_shares.iter().sum::<f64>() - 100.0).abs() < 1e-9);
        assert!(shape.area_shares[3] > shape.area_shares[0]);
        assert!(shape.gamma_spread.std_dev > 0.0);
        let ratios = shape.gamma_width_ratios.unwrap();
        assert!(ratios.at_30 >= ratios.at_50 && ratios.at_50 >= ratios.at_70);
    }

    #[test]
    fn test_normal_chart() {
        let chart = curve(|x| {
            (10.0
                + bump(x, 60.0, 20.0, 330.0)
                + bump(x, 190.0, 20.0, 60.0)
                + bump(x, 310.0, 20.0, 70.0)
                + bump(x, 440.0, 20.0, 80.0)) as u32
        });
        let shape = analyze_shape(&ChartConfig::default(), &chart, &[125, 250, 375]).unwrap();
        assert_eq!(shape.pattern, ShapePattern::Normal);
        assert!(shape.fip_shape_score < 30.0);
    }
}
