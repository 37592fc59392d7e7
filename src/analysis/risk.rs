// src/analysis/risk.rs

use super::pattern::{FipProfile, PatternAnalysis};
use super::shape::ShapeAnalysis;
use crate::chart::bars::Gammopathy;
use crate::config::ScoringWeights;
use crate::error::FipError;
use crate::heuristics::LabReport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

const HIGH_RISK: u32 = 70;
const MEDIUM_RISK: u32 = 30;
/// Number of FIP-associated lab flags that saturates the flag component.
const LAB_FLAG_SATURATION: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RivaltaStatus {
    Positive,
    Negative,
    #[default]
    NotPerformed,
}

impl RivaltaStatus {
    fn score(&self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::NotPerformed => 0.5,
            Self::Negative => 0.0,
        }
    }
}

impl fmt::Display for RivaltaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive => write!(f, "positive"),
            Self::Negative => write!(f, "negative"),
            Self::NotPerformed => write!(f, "not performed"),
        }
    }
}

impl FromStr for RivaltaStatus {
    type Err = FipError;

    /// Accepts English and Polish wording.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "positive" | "pos" | "pozytywna" | "pozytywny" | "+" => Ok(Self::Positive),
            "negative" | "neg" | "negatywna" | "negatywny" => Ok(Self::Negative),
            "not performed" | "none" | "nie wykonano" | "" => Ok(Self::NotPerformed),
            _ => Err(FipError::Rivalta(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Bucket boundaries belong to the higher bucket.
    pub fn from_percentage(percentage: u32) -> Self {
        if percentage >= HIGH_RISK {
            Self::High
        } else if percentage >= MEDIUM_RISK {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::High => "#FF0000",
            Self::Medium => "#FFA500",
            Self::Low => "#00FF00",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "HIGH FIP RISK",
            Self::Medium => "MEDIUM FIP RISK",
            Self::Low => "LOW FIP RISK",
        }
    }
}

/// One scored input to the composite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskComponent {
    pub name: String,
    /// Component score in [0, 1].
    pub score: f64,
    pub weight: f64,
    /// Share of the final percentage earned by this component.
    pub points: f64,
    pub max_points: f64,
    pub detail: String,
}

impl RiskComponent {
    pub fn breakdown_line(&self) -> String {
        format!(
            "{}: {:.1}/{:.1} pts ({})",
            self.name, self.points, self.max_points, self.detail
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub percentage: u32,
    pub level: RiskLevel,
    pub color: String,
    pub rivalta: RivaltaStatus,
    pub components: Vec<RiskComponent>,
    pub summary: String,
    pub further_tests: Vec<String>,
    pub supplement_advice: String,
    pub consultation_advice: String,
}

impl RiskAssessment {
    pub fn breakdown(&self) -> Vec<String> {
        self.components.iter().map(RiskComponent::breakdown_line).collect()
    }
}

/// Everything the scorer can draw on. Missing inputs drop their component.
#[derive(Debug, Clone, Copy)]
pub struct RiskInputs<'a> {
    pub report: &'a LabReport,
    pub rivalta: RivaltaStatus,
    pub gammopathy: Option<Gammopathy>,
    pub shape: Option<&'a ShapeAnalysis>,
    pub pattern: Option<&'a PatternAnalysis>,
}

fn age_score(months: u32) -> f64 {
    if months < 24 {
        1.0
    } else if months < 84 {
        0.4
    } else {
        0.1
    }
}

fn ag_score(ratio: f64) -> f64 {
    if ratio < 0.6 {
        1.0
    } else if ratio < 0.8 {
        0.5
    } else {
        0.0
    }
}

fn gammopathy_score(g: Gammopathy) -> f64 {
    match g {
        Gammopathy::Polyclonal => 1.0,
        Gammopathy::None => 0.5,
        Gammopathy::Monoclonal => 0.0,
    }
}

/// (name, weight, score, detail) of every component whose input exists.
fn collect_components(w: &ScoringWeights, inputs: &RiskInputs<'_>) -> Vec<(&'static str, f64, f64, String)> {
    let report = inputs.report;
    let mut parts = vec![(
        "Rivalta test",
        w.rivalta,
        inputs.rivalta.score(),
        inputs.rivalta.to_string(),
    )];

    if let Some(g) = inputs.gammopathy {
        parts.push(("Chart gammopathy", w.gammopathy, gammopathy_score(g), g.to_string()));
    }
    if let Some(ratio) = report.ag_ratio() {
        parts.push(("A/G ratio", w.ag_ratio, ag_score(ratio), format!("{ratio:.2}")));
    }
    let gamma = report
        .get("gamma_globulins")
        .and_then(|g| Some((g.value?, g.range_max?)));
    if let Some((value, max)) = gamma {
        let detail = format!("{value} (max {max})");
        parts.push(("Gamma globulins", w.gamma, if value > max { 1.0 } else { 0.0 }, detail));
    }
    if let Some(months) = report.patient.age_months {
        parts.push(("Age", w.age, age_score(months), format!("{months} months")));
    }
    if let Some(pattern) = inputs.pattern {
        let flags = pattern
            .abnormalities
            .keys()
            .filter(|a| a.is_fip_associated())
            .count();
        parts.push((
            "Lab abnormalities",
            w.lab_flags,
            (flags as f64 / LAB_FLAG_SATURATION).min(1.0),
            format!("{flags} FIP-associated"),
        ));
        let score = if pattern.primary_profile == FipProfile::NonFip {
            0.0
        } else {
            pattern.pattern_strength / 100.0
        };
        parts.push((
            "Lab pattern",
            w.pattern,
            score,
            pattern.primary_profile.name().to_string(),
        ));
    }
    if let Some(shape) = inputs.shape {
        parts.push((
            "Curve shape",
            w.shape,
            shape.fip_shape_score / 100.0,
            shape.pattern.name().to_string(),
        ));
    }
    parts
}

/// Weighted composite FIP risk: floor(sum(w*s) / sum(w) * 100).
pub fn assess_risk(weights: &ScoringWeights, inputs: &RiskInputs<'_>) -> RiskAssessment {
    let parts = collect_components(weights, inputs);
    let total_weight: f64 = parts.iter().map(|p| p.1).sum();
    let weighted: f64 = parts.iter().map(|p| p.1 * p.2).sum();

    let percentage = if total_weight > 0.0 {
        (weighted / total_weight * 100.0).floor().clamp(0.0, 100.0) as u32
    } else {
        0
    };
    let level = RiskLevel::from_percentage(percentage);

    let components: Vec<RiskComponent> = parts
        .into_iter()
        .map(|(name, weight, score, detail)| {
            let max_points = if total_weight > 0.0 { weight / total_weight * 100.0 } else { 0.0 };
            RiskComponent {
                name: name.to_string(),
                score,
                weight,
                points: score * max_points,
                max_points,
                detail,
            }
        })
        .collect();
    for c in &components {
        debug!(component = %c.name, score = c.score, weight = c.weight, "Risk component");
    }

    info!(
        percentage,
        level = ?level,
        components = components.len(),
        "FIP risk assessed"
    );

    let (further_tests, supplement_advice, consultation_advice) = recommendations(level);
    RiskAssessment {
        percentage,
        level,
        color: level.color().to_string(),
        rivalta: inputs.rivalta,
        summary: format!("{} ({percentage}%)", level.label()),
        components,
        further_tests,
        supplement_advice,
        consultation_advice,
    }
}

fn recommendations(level: RiskLevel) -> (Vec<String>, String, String) {
    let tests: &[&str] = match level {
        RiskLevel::High => &[
            "Further FIP diagnostics are indicated:",
            "- Rivalta test on any effusion to confirm its inflammatory character",
            "- FCoV RT-PCR on blood or effusion",
            "- Abdominal ultrasound for lymph node, liver and kidney changes",
            "- Cytology or histopathology of affected tissue for a definitive diagnosis",
        ],
        RiskLevel::Medium => &[
            "Monitor and repeat the electrophoresis in a few weeks to follow the trend",
            "If clinical signs persist or worsen, test for FIP (Rivalta, PCR, imaging)",
        ],
        RiskLevel::Low => &[
            "No specialised FIP testing is needed at this point",
            "Keep monitoring the cat and reassess if worrying signs appear",
        ],
    };
    let supplements = match level {
        RiskLevel::High => {
            "No specific supplements; causal antiviral treatment under veterinary supervision once the diagnosis is confirmed"
        }
        RiskLevel::Medium => {
            "Immune support (e.g. beta-glucans, vitamins) may be considered with the vet while awaiting diagnosis"
        }
        RiskLevel::Low => "No special supplementation needed; good diet and general care",
    };
    let consultation = match level {
        RiskLevel::High | RiskLevel::Medium => {
            "Consult an internal or infectious disease veterinary specialist to discuss the results and next steps"
        }
        RiskLevel::Low => "No specialist consultation is required on the protein profile",
    };
    (
        tests.iter().map(|s| s.to_string()).collect(),
        supplements.to_string(),
        consultation.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::pattern::analyze_patterns;
    use crate::heuristics::{LabValue, PatientInfo};

    fn lab(key: &str, value: f64, max: f64) -> LabValue {
        LabValue {
            key: key.to_string(),
            name: key.to_string(),
            raw: value.to_string(),
            value: Some(value),
            unit: None,
            range_min: None,
            range_max: Some(max),
            text: None,
        }
    }

    fn report(age_months: u32, values: Vec<LabValue>) -> LabReport {
        LabReport {
            patient: PatientInfo {
                age_months: Some(age_months),
                ..Default::default()
            },
            values,
        }
    }

    #[test]
    fn test_rivalta_parsing() {
        assert_eq!("Pozytywna".parse::<RivaltaStatus>().unwrap(), RivaltaStatus::Positive);
        assert_eq!("negative".parse::<RivaltaStatus>().unwrap(), RivaltaStatus::Negative);
        assert_eq!("not-performed".parse::<RivaltaStatus>().unwrap(), RivaltaStatus::NotPerformed);
        assert_eq!("Nie wykonano".parse::<RivaltaStatus>().unwrap(), RivaltaStatus::NotPerformed);
        assert!("maybe".parse::<RivaltaStatus>().is_err());
    }

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(RiskLevel::from_percentage(70), RiskLevel::High);
        assert_eq!(RiskLevel::from_percentage(69), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_percentage(30), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_percentage(29), RiskLevel::Low);
        assert_eq!(RiskLevel::High.color(), "#FF0000");
    }

    #[test]
    fn test_rivalta_only() {
        let empty = LabReport::default();
        let inputs = RiskInputs {
            report: &empty,
            rivalta: RivaltaStatus::NotPerformed,
            gammopathy: None,
            shape: None,
            pattern: None,
        };
        let risk = assess_risk(&ScoringWeights::default(), &inputs);
        assert_eq!(risk.percentage, 50);
        assert_eq!(risk.components.len(), 1);
        assert_eq!(risk.level, RiskLevel::Medium);
    }

    #[test]
    fn test_high_risk_young_cat() {
        let r = report(
            12,
            vec![
                lab("globulins", 6.0, 4.5),
                lab("ag_ratio", 0.35, 1.2),
                lab("total_bilirubin", 2.0, 0.5),
            ],
        );
        let pattern = analyze_patterns(&r);
        let inputs = RiskInputs {
            report: &r,
            rivalta: RivaltaStatus::Positive,
            gammopathy: Some(Gammopathy::Polyclonal),
            shape: None,
            pattern: Some(&pattern),
        };
        let risk = assess_risk(&ScoringWeights::default(), &inputs);
        // (0.6 + 0.4 + 0.3 + 0.2 + 0.3 * 2/3 + 0) / 2.1
        assert_eq!(risk.percentage, 80);
        assert_eq!(risk.level, RiskLevel::High);
        assert_eq!(risk.color, "#FF0000");
        assert!(risk.summary.starts_with("HIGH FIP RISK"));
        assert!(risk.further_tests.iter().any(|t| t.contains("PCR")));
        let earned: f64 = risk.components.iter().map(|c| c.points).sum();
        assert!((earned - 1.7 / 2.1 * 100.0).abs() < 1e-9);
        assert_eq!(risk.breakdown().len(), risk.components.len());
    }

    #[test]
    fn test_low_risk_adult_cat() {
        let r = report(60, vec![lab("globulins", 3.0, 4.5), lab("ag_ratio", 0.9, 1.2)]);
        let pattern = analyze_patterns(&r);
        let inputs = RiskInputs {
            report: &r,
            rivalta: RivaltaStatus::Negative,
            gammopathy: Some(Gammopathy::None),
            shape: None,
            pattern: Some(&pattern),
        };
        let risk = assess_risk(&ScoringWeights::default(), &inputs);
        // (0.2 + 0.08) / 2.1
        assert_eq!(risk.percentage, 13);
        assert_eq!(risk.level, RiskLevel::Low);
        assert!(risk.consultation_advice.starts_with("No specialist"));
    }

    #[test]
    fn test_custom_weights() {
        let empty = LabReport::default();
        let inputs = RiskInputs {
            report: &empty,
            rivalta: RivaltaStatus::Positive,
            gammopathy: Some(Gammopathy::Monoclonal),
            shape: None,
            pattern: None,
        };
        let weights = ScoringWeights {
            rivalta: 1.0,
            gammopathy: 3.0,
            ..Default::default()
        };
        assert_eq!(assess_risk(&weights, &inputs).percentage, 25);
    }
}
