// src/analysis/pattern.rs

use crate::heuristics::{LabReport, LabValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

const STRENGTH_MULTIPLIER: f64 = 2.75;
/// Secondary profiles need a candidate score above this.
const SECONDARY_MIN_SCORE: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Abnormality {
    Hyperglobulinemia,
    Hypoalbuminemia,
    Lymphopenia,
    Neutrophilia,
    Anemia,
    Hyperbilirubinemia,
    LiverEnzymes,
    Azotemia,
    Thrombocytopenia,
}

impl Abnormality {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hyperglobulinemia => "hyperglobulinemia",
            Self::Hypoalbuminemia => "hypoalbuminemia",
            Self::Lymphopenia => "lymphopenia",
            Self::Neutrophilia => "neutrophilia",
            Self::Anemia => "anemia",
            Self::Hyperbilirubinemia => "hyperbilirubinemia",
            Self::LiverEnzymes => "elevated liver enzymes",
            Self::Azotemia => "azotemia",
            Self::Thrombocytopenia => "thrombocytopenia",
        }
    }

    /// Findings counted by the risk scorer as pointing towards FIP.
    pub fn is_fip_associated(&self) -> bool {
        matches!(
            self,
            Self::Hyperglobulinemia
                | Self::Hypoalbuminemia
                | Self::Lymphopenia
                | Self::Neutrophilia
                | Self::Anemia
                | Self::Hyperbilirubinemia
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combination {
    ClassicTriad,
    Inflammatory,
    Wasting,
    Hepatic,
    Renal,
    Hematologic,
    StressLeukogram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FipProfile {
    InflammatoryAcute,
    InflammatoryChronic,
    EffusiveClassic,
    DryNeurological,
    MixedPattern,
    Atypical,
    NonFip,
}

impl FipProfile {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InflammatoryAcute => "Acute inflammatory",
            Self::InflammatoryChronic => "Chronic inflammatory",
            Self::EffusiveClassic => "Classic effusive (wet)",
            Self::DryNeurological => "Dry / neurological",
            Self::MixedPattern => "Mixed",
            Self::Atypical => "Atypical",
            Self::NonFip => "Not FIP-like",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::InflammatoryAcute => {
                "Acute inflammatory profile: marked globulin rise with neutrophilia and lymphopenia"
            }
            Self::InflammatoryChronic => {
                "Chronic inflammatory profile: protein loss and anemia on top of the classic triad"
            }
            Self::EffusiveClassic => {
                "Classic effusive profile: the classic triad together with liver involvement"
            }
            Self::DryNeurological => {
                "Dry form profile: inflammation with a stress leukogram and no liver involvement"
            }
            Self::MixedPattern => "Mixed profile: many abnormality combinations at once",
            Self::Atypical => "Atypical profile: several abnormalities without the classic triad",
            Self::NonFip => "The laboratory picture does not resemble FIP",
        }
    }

    fn base_strength(&self) -> f64 {
        match self {
            Self::InflammatoryAcute => 80.0,
            Self::InflammatoryChronic => 75.0,
            Self::EffusiveClassic => 85.0,
            Self::DryNeurological => 70.0,
            Self::MixedPattern => 65.0,
            Self::Atypical => 50.0,
            Self::NonFip => 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub abnormalities: BTreeMap<Abnormality, Severity>,
    pub combinations: Vec<Combination>,
    pub primary_profile: FipProfile,
    pub secondary_profile: Option<FipProfile>,
    pub pattern_strength: f64,
    pub key_findings: Vec<String>,
    pub profile_description: String,
    pub management_suggestions: Vec<String>,
}

pub fn analyze_patterns(report: &LabReport) -> PatternAnalysis {
    let abnormalities = detect_abnormalities(report);
    let combinations = identify_combinations(&abnormalities);
    let (primary, secondary) = determine_profiles(&combinations);
    let strength = pattern_strength(&combinations, primary);

    info!(
        abnormalities = abnormalities.len(),
        combinations = combinations.len(),
        primary = ?primary,
        secondary = ?secondary,
        strength = format!("{strength:.1}"),
        "Lab pattern analysed"
    );

    PatternAnalysis {
        key_findings: key_findings(&abnormalities, &combinations),
        profile_description: describe(primary, secondary, &abnormalities, &combinations),
        management_suggestions: suggestions(primary, strength),
        abnormalities,
        combinations,
        primary_profile: primary,
        secondary_profile: secondary,
        pattern_strength: strength,
    }
}

fn with_max(report: &LabReport, key: &str) -> Option<(f64, f64)> {
    let v: &LabValue = report.get(key)?;
    Some((v.value?, v.range_max?))
}

fn with_min(report: &LabReport, key: &str) -> Option<(f64, f64)> {
    let v: &LabValue = report.get(key)?;
    Some((v.value?, v.range_min?))
}

/// Severity of a value above its maximum, by fold thresholds.
fn above(value: f64, max: f64, moderate: f64, severe: f64) -> Option<Severity> {
    if value <= max {
        None
    } else if value > max * severe {
        Some(Severity::Severe)
    } else if value > max * moderate {
        Some(Severity::Moderate)
    } else {
        Some(Severity::Mild)
    }
}

/// Severity of a value below its minimum, by fold thresholds.
fn below(value: f64, min: f64, moderate: f64, severe: f64) -> Option<Severity> {
    if value >= min {
        None
    } else if value < min * severe {
        Some(Severity::Severe)
    } else if value < min * moderate {
        Some(Severity::Moderate)
    } else {
        Some(Severity::Mild)
    }
}

/// HCT reported as a percentage is converted to a fraction.
fn hct_fraction(value: f64) -> f64 {
    if value > 1.0 { value / 100.0 } else { value }
}

pub fn detect_abnormalities(report: &LabReport) -> BTreeMap<Abnormality, Severity> {
    use Abnormality::*;
    let mut found = BTreeMap::new();
    let mut add = |kind: Abnormality, severity: Option<Severity>| {
        if let Some(s) = severity {
            debug!(abnormality = kind.name(), severity = ?s, "Abnormality");
            found.insert(kind, s);
        }
    };

    add(
        Hyperglobulinemia,
        with_max(report, "globulins").and_then(|(v, max)| above(v, max, 1.5, 2.0)),
    );
    add(
        Hypoalbuminemia,
        with_min(report, "albumin").and_then(|(v, min)| below(v, min, 0.75, 0.5)),
    );
    add(
        Lymphopenia,
        with_min(report, "lym").and_then(|(v, min)| below(v, min, 0.6, 0.3)),
    );
    add(
        Neutrophilia,
        with_max(report, "neu").and_then(|(v, max)| above(v, max, 1.25, 1.5)),
    );
    add(
        Anemia,
        with_min(report, "hct").and_then(|(v, min)| {
            (v < min).then(|| match hct_fraction(v) {
                f if f < 0.2 => Severity::Severe,
                f if f < 0.25 => Severity::Moderate,
                _ => Severity::Mild,
            })
        }),
    );
    add(
        Hyperbilirubinemia,
        with_max(report, "total_bilirubin").and_then(|(v, max)| above(v, max, 2.0, 3.0)),
    );
    add(
        LiverEnzymes,
        with_max(report, "alt").and_then(|(v, max)| above(v, max, 2.0, 3.0)),
    );
    let urea = with_max(report, "urea").and_then(|(v, max)| above(v, max, 1.5, 2.0));
    let creatinine = with_max(report, "creatinine").and_then(|(v, max)| above(v, max, 1.5, 2.0));
    add(Azotemia, urea.max(creatinine));
    add(
        Thrombocytopenia,
        with_min(report, "plt").and_then(|(v, min)| {
            (v < min).then(|| {
                if v < 50.0 {
                    Severity::Severe
                } else if v < 100.0 {
                    Severity::Moderate
                } else {
                    Severity::Mild
                }
            })
        }),
    );

    found
}

pub fn identify_combinations(found: &BTreeMap<Abnormality, Severity>) -> Vec<Combination> {
    use Abnormality::*;
    let has = |a: Abnormality| found.contains_key(&a);
    let severe = |a: Abnormality| found.get(&a) == Some(&Severity::Severe);

    [
        (
            Combination::ClassicTriad,
            has(Hyperglobulinemia) && has(Hypoalbuminemia) && has(Lymphopenia),
        ),
        (
            Combination::Inflammatory,
            has(Hyperglobulinemia) && has(Neutrophilia),
        ),
        (
            Combination::Wasting,
            has(Hypoalbuminemia) && has(Anemia) && (severe(Hypoalbuminemia) || severe(Anemia)),
        ),
        (
            Combination::Hepatic,
            has(Hyperbilirubinemia) || has(LiverEnzymes),
        ),
        (Combination::Renal, has(Azotemia)),
        (
            Combination::Hematologic,
            (has(Anemia) || has(Thrombocytopenia)) && has(Lymphopenia),
        ),
        (
            Combination::StressLeukogram,
            has(Neutrophilia) && has(Lymphopenia),
        ),
    ]
    .into_iter()
    .filter_map(|(c, present)| present.then_some(c))
    .collect()
}

/// Primary and secondary profile. Candidates are sorted by score with a
/// stable sort, so equal scores keep their listing order.
pub fn determine_profiles(combinations: &[Combination]) -> (FipProfile, Option<FipProfile>) {
    use Combination::*;
    let has = |c: Combination| combinations.contains(&c);
    let count = combinations.len();

    let mut candidates: Vec<(FipProfile, f64)> = Vec::new();
    if has(ClassicTriad) && has(Inflammatory) {
        candidates.push((FipProfile::InflammatoryAcute, 85.0));
    }
    if has(ClassicTriad) && has(Wasting) {
        candidates.push((FipProfile::InflammatoryChronic, 80.0));
    }
    if has(ClassicTriad) && has(Hepatic) {
        candidates.push((FipProfile::EffusiveClassic, 90.0));
    }
    if has(Inflammatory) && !has(Hepatic) && has(StressLeukogram) {
        candidates.push((FipProfile::DryNeurological, 70.0));
    }
    if count >= 4 {
        candidates.push((FipProfile::MixedPattern, 75.0));
    }
    if !has(ClassicTriad) && count >= 2 {
        candidates.push((FipProfile::Atypical, 60.0));
    }
    if count < 2 {
        candidates.push((FipProfile::NonFip, 90.0));
    }

    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    let primary = candidates.first().map_or(FipProfile::NonFip, |c| c.0);
    let secondary = candidates
        .get(1)
        .filter(|c| c.1 > SECONDARY_MIN_SCORE)
        .map(|c| c.0);
    (primary, secondary)
}

pub fn pattern_strength(combinations: &[Combination], profile: FipProfile) -> f64 {
    let has = |c: Combination| combinations.contains(&c);
    let mut score = profile.base_strength();
    if has(Combination::ClassicTriad) {
        score += 15.0;
    }
    if has(Combination::StressLeukogram) {
        score += 10.0;
    }
    if has(Combination::Inflammatory) {
        score += 5.0;
    }
    if !has(Combination::ClassicTriad) && profile != FipProfile::NonFip {
        score -= 20.0;
    }
    (score * STRENGTH_MULTIPLIER).clamp(0.0, 100.0)
}

fn key_findings(found: &BTreeMap<Abnormality, Severity>, combinations: &[Combination]) -> Vec<String> {
    let mut findings = Vec::new();
    if combinations.contains(&Combination::ClassicTriad) {
        findings.push(
            "Classic FIP triad: hyperglobulinemia, hypoalbuminemia and lymphopenia".to_string(),
        );
    }
    if combinations.contains(&Combination::StressLeukogram) {
        findings.push("Stress leukogram (neutrophilia with lymphopenia)".to_string());
    }
    for (kind, severity) in found {
        let reported = matches!(
            kind,
            Abnormality::Hyperglobulinemia
                | Abnormality::Hypoalbuminemia
                | Abnormality::Lymphopenia
                | Abnormality::Anemia
        );
        if reported && *severity == Severity::Severe {
            findings.push(format!("Severe {}", kind.name()));
        }
    }
    if combinations.contains(&Combination::Hepatic) {
        findings.push("Liver involvement".to_string());
    }
    if combinations.contains(&Combination::Renal) {
        findings.push("Kidney involvement".to_string());
    }
    findings
}

fn describe(
    primary: FipProfile,
    secondary: Option<FipProfile>,
    found: &BTreeMap<Abnormality, Severity>,
    combinations: &[Combination],
) -> String {
    let mut parts = vec![primary.description().to_string()];
    if let Some(s) = secondary {
        parts.push(format!("Also shows features of the {} profile", s.name().to_lowercase()));
    }
    if combinations.contains(&Combination::ClassicTriad) {
        parts.push("The classic triad is present".to_string());
    }
    let severe = found.values().filter(|&&s| s == Severity::Severe).count();
    if severe > 0 {
        parts.push(format!("{severe} severe abnormalities found"));
    }
    parts.join(". ")
}

fn suggestions(profile: FipProfile, strength: f64) -> Vec<String> {
    let lines: &[&str] = match profile {
        FipProfile::InflammatoryAcute | FipProfile::EffusiveClassic => &[
            "Urgent veterinary consultation",
            "Abdominal ultrasound and a Rivalta test on any effusion",
            "Discuss starting antiviral therapy without delay once FIP is confirmed",
        ],
        FipProfile::InflammatoryChronic => &[
            "Prompt veterinary consultation",
            "Imaging to look for organ lesions",
            "Antiviral therapy with nutritional support",
        ],
        FipProfile::DryNeurological => &[
            "Neurological consultation",
            "MRI or CT of the central nervous system",
            "Antiviral therapy at the higher neurological dose",
        ],
        FipProfile::MixedPattern => &[
            "Broad diagnostic workup",
            "Comprehensive imaging",
        ],
        FipProfile::Atypical => &[
            "Differential diagnosis for other inflammatory diseases",
            "Repeat the tests in 1-2 weeks",
        ],
        FipProfile::NonFip => &[
            "FIP is unlikely on the laboratory picture",
            "Look for other causes of the abnormalities",
        ],
    };
    let mut out: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
    if strength >= 70.0 && profile != FipProfile::NonFip {
        out.push("Monitor blood work closely during treatment".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lab(key: &str, value: f64, min: f64, max: f64) -> LabValue {
        LabValue {
            key: key.to_string(),
            name: key.to_string(),
            raw: value.to_string(),
            value: Some(value),
            unit: None,
            range_min: Some(min),
            range_max: Some(max),
            text: None,
        }
    }

    fn report(values: Vec<LabValue>) -> LabReport {
        LabReport {
            values,
            ..Default::default()
        }
    }

    #[test]
    fn test_severity_folds() {
        assert_eq!(above(5.0, 5.0, 1.5, 2.0), None);
        assert_eq!(above(6.0, 5.0, 1.5, 2.0), Some(Severity::Mild));
        assert_eq!(above(8.0, 5.0, 1.5, 2.0), Some(Severity::Moderate));
        assert_eq!(above(10.5, 5.0, 1.5, 2.0), Some(Severity::Severe));
        assert_eq!(below(1.0, 2.6, 0.75, 0.5), Some(Severity::Severe));
        assert_eq!(below(1.8, 2.6, 0.75, 0.5), Some(Severity::Moderate));
        assert_eq!(below(2.6, 2.6, 0.75, 0.5), None);
    }

    #[test]
    fn test_anemia_uses_fraction_for_percentages() {
        let r = report(vec![lab("hct", 19.0, 30.0, 45.0)]);
        assert_eq!(detect_abnormalities(&r)[&Abnormality::Anemia], Severity::Severe);
        let r = report(vec![lab("hct", 0.24, 0.30, 0.45)]);
        assert_eq!(detect_abnormalities(&r)[&Abnormality::Anemia], Severity::Moderate);
    }

    #[test]
    fn test_azotemia_takes_worst() {
        let r = report(vec![
            lab("urea", 70.0, 20.0, 60.0),
            lab("creatinine", 4.0, 0.8, 1.8),
        ]);
        assert_eq!(detect_abnormalities(&r)[&Abnormality::Azotemia], Severity::Severe);
    }

    #[test]
    fn test_effusive_profile() {
        let r = report(vec![
            lab("globulins", 7.5, 2.8, 5.1),
            lab("albumin", 1.8, 2.6, 4.0),
            lab("lym", 0.9, 1.5, 7.0),
            lab("total_bilirubin", 1.2, 0.0, 0.5),
        ]);
        let p = analyze_patterns(&r);
        assert_eq!(
            p.combinations,
            vec![Combination::ClassicTriad, Combination::Hepatic]
        );
        assert_eq!(p.primary_profile, FipProfile::EffusiveClassic);
        assert_eq!(p.secondary_profile, None);
        // (85 + 15) * 2.75 clamped
        assert_eq!(p.pattern_strength, 100.0);
        assert!(p.key_findings[0].starts_with("Classic FIP triad"));
        assert!(p.management_suggestions.iter().any(|s| s.contains("Rivalta")));
    }

    #[test]
    fn test_profile_ranking() {
        // effusive 90, acute 85, mixed 75
        let combos = [
            Combination::ClassicTriad,
            Combination::Inflammatory,
            Combination::Hepatic,
            Combination::StressLeukogram,
        ];
        assert_eq!(
            determine_profiles(&combos),
            (FipProfile::EffusiveClassic, Some(FipProfile::InflammatoryAcute))
        );
        // fewer than two combinations: only the non-FIP candidate
        assert_eq!(determine_profiles(&[Combination::Renal]), (FipProfile::NonFip, None));
        assert_eq!(determine_profiles(&[]), (FipProfile::NonFip, None));
    }

    #[test]
    fn test_atypical_and_strength_penalty() {
        let combos = [Combination::Hepatic, Combination::Renal];
        let (primary, _) = determine_profiles(&combos);
        assert_eq!(primary, FipProfile::Atypical);
        // (50 - 20) * 2.75
        assert!((pattern_strength(&combos, primary) - 82.5).abs() < 1e-9);
        // 20 * 2.75, no penalty for non-FIP
        assert!((pattern_strength(&[], FipProfile::NonFip) - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_normal_report() {
        let r = report(vec![lab("albumin", 3.0, 2.6, 4.0), lab("alt", 50.0, 10.0, 100.0)]);
        let p = analyze_patterns(&r);
        assert!(p.abnormalities.is_empty());
        assert_eq!(p.primary_profile, FipProfile::NonFip);
        assert!(p.key_findings.is_empty());
    }
}
