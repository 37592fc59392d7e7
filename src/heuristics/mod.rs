// src/heuristics/mod.rs

pub mod catalog;
mod generic;

use crate::error::Result;
use catalog::{FieldExtractor, FieldKind, FieldMatch, FieldSpec};
use serde::Deserialize;
use serde::Serialize;
use tracing::{debug, info};

pub use generic::{parse_age_months, parse_table_lines};

/// One laboratory result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabValue {
    /// Canonical catalog key, or a slug of the printed name.
    pub key: String,
    pub name: String,
    /// The value exactly as printed, qualifiers included.
    pub raw: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub range_min: Option<f64>,
    pub range_max: Option<f64>,
    /// Qualitative result (serology).
    pub text: Option<String>,
}

impl LabValue {
    pub fn is_high(&self) -> bool {
        matches!((self.value, self.range_max), (Some(v), Some(max)) if v > max)
    }

    pub fn is_low(&self) -> bool {
        matches!((self.value, self.range_min), (Some(v), Some(min)) if v < min)
    }

    pub fn is_abnormal(&self) -> bool {
        self.is_high() || self.is_low()
    }

    /// Take value, unit and reference range from `other` where this result has none.
    fn fill_missing(&mut self, other: LabValue) {
        if self.value.is_none() && other.value.is_some() {
            self.value = other.value;
            self.raw = other.raw;
        }
        if self.unit.is_none() {
            self.unit = other.unit;
        }
        if self.range_min.is_none() && self.range_max.is_none() {
            self.range_min = other.range_min;
            self.range_max = other.range_max;
        }
    }

    /// "name value unit (range)" for reports and logs.
    pub fn summary(&self) -> String {
        let mut s = format!("{} {}", self.name, self.raw);
        if let Some(unit) = &self.unit {
            s.push(' ');
            s.push_str(unit);
        }
        match (self.range_min, self.range_max) {
            (Some(min), Some(max)) => s.push_str(&format!(" (norm {min}-{max})")),
            (None, Some(max)) => s.push_str(&format!(" (norm <{max})")),
            (Some(min), None) => s.push_str(&format!(" (norm >{min})")),
            (None, None) => {}
        }
        s
    }
}

/// Patient and sample metadata printed in the report header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub name: Option<String>,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub sex: Option<String>,
    pub age: Option<String>,
    pub age_months: Option<u32>,
    pub coat: Option<String>,
    pub microchip: Option<String>,
    pub owner: Option<String>,
    pub clinic: Option<String>,
    pub vet: Option<String>,
    pub collection_date: Option<String>,
}

/// Everything extracted from a report's text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabReport {
    pub patient: PatientInfo,
    /// Results in the order they were found.
    pub values: Vec<LabValue>,
}

impl LabReport {
    pub fn get(&self, key: &str) -> Option<&LabValue> {
        self.values.iter().find(|v| v.key == key)
    }

    pub fn value(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.value)
    }

    /// First result whose key or printed name contains `fragment`, ignoring case.
    pub fn find_containing(&self, fragment: &str) -> Option<&LabValue> {
        let needle = fragment.to_lowercase();
        self.values
            .iter()
            .find(|v| v.key.contains(&needle) || v.name.to_lowercase().contains(&needle))
    }

    /// Add a result, replacing an earlier one with the same key.
    pub fn insert(&mut self, value: LabValue) {
        match self.values.iter_mut().find(|v| v.key == value.key) {
            Some(existing) => *existing = value,
            None => self.values.push(value),
        }
    }

    /// Albumin to globulin ratio: the printed ratio, else albumin over
    /// globulins, else albumin over (total protein - albumin).
    pub fn ag_ratio(&self) -> Option<f64> {
        if let Some(ratio) = self.value("ag_ratio") {
            return Some(ratio);
        }
        let albumin = self.value("albumin")?;
        let globulins = self
            .value("globulins")
            .or_else(|| self.value("total_protein").map(|tp| tp - albumin))?;
        (globulins > 0.0).then(|| albumin / globulins)
    }

    pub fn abnormal_results(&self) -> Vec<&LabValue> {
        self.values.iter().filter(|v| v.is_abnormal()).collect()
    }

    /// (found, catalog size) for logging extraction coverage.
    pub fn coverage(&self) -> (usize, usize) {
        let found = catalog::FIELDS
            .iter()
            .filter(|f| self.get(f.key).is_some())
            .count();
        (found, catalog::FIELDS.len())
    }
}

/// Parse a printed number: `,` decimal separators and `<`/`>` qualifiers allowed.
pub fn parse_number(s: &str) -> Option<f64> {
    s.trim()
        .trim_start_matches(['<', '>'])
        .trim()
        .replace(',', ".")
        .parse()
        .ok()
}

/// Split a printed reference range into (min, max).
pub fn parse_range(s: &str) -> (Option<f64>, Option<f64>) {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix('<') {
        return (None, parse_number(rest));
    }
    if let Some(rest) = s.strip_prefix('>') {
        return (parse_number(rest), None);
    }
    match s.split_once('-') {
        Some((min, max)) => (parse_number(min), parse_number(max)),
        None => (None, None),
    }
}

fn to_lab_value(spec: &FieldSpec, m: FieldMatch) -> LabValue {
    let (range_min, range_max) = m.range.as_deref().map(parse_range).unwrap_or((None, None));
    let raw = m.value.clone().or_else(|| m.text.clone()).unwrap_or_default();
    LabValue {
        key: spec.key.to_string(),
        name: spec.label.to_string(),
        value: match spec.kind {
            FieldKind::Numeric => m.value.as_deref().and_then(parse_number),
            FieldKind::Qualitative => None,
        },
        raw,
        unit: m.unit,
        range_min,
        range_max,
        text: m.text,
    }
}

/// "Albuminy 52 %" is the electrophoresis fraction. Move a percent albumin
/// result there and look further down for the serum value in g/dl.
fn split_percent_albumin(extractor: &FieldExtractor, text: &str, report: &mut LabReport) {
    let (Some(albumin), Some(fraction)) = (catalog::lookup("albumin"), catalog::lookup("ep_albumin")) else {
        return;
    };
    let is_percent = |v: &LabValue| v.unit.as_deref() == Some("%");
    let Some(idx) = report.values.iter().position(|v| v.key == albumin.key && is_percent(v)) else {
        return;
    };

    let mut moved = report.values.remove(idx);
    debug!(raw = %moved.raw, "Albumin in percent read as electrophoresis fraction");
    if report.get(fraction.key).is_none() {
        moved.key = fraction.key.to_string();
        moved.name = fraction.label.to_string();
        report.values.push(moved);
    }
    if let Some(m) = extractor
        .matches(albumin.key, text)
        .find(|m| m.unit.as_deref() != Some("%"))
    {
        report.insert(to_lab_value(albumin, m));
    }
}

/// Extract patient metadata and lab results from raw report text.
pub fn extract_lab_report(text: &str) -> Result<LabReport> {
    let extractor = FieldExtractor::new()?;
    let mut report = LabReport {
        patient: generic::extract_patient(text),
        values: Vec::new(),
    };

    for (spec, m) in extractor.scan(text) {
        debug!(key = spec.key, raw = ?m.value.as_ref().or(m.text.as_ref()), "Field matched");
        report.values.push(to_lab_value(spec, m));
    }

    // semicolon table rows add missing results and complete partial ones
    for row in parse_table_lines(text) {
        match report.values.iter_mut().find(|v| v.key == row.key) {
            Some(existing) => existing.fill_missing(row),
            None => report.values.push(row),
        }
    }

    split_percent_albumin(&extractor, text, &mut report);

    let (found, total) = report.coverage();
    info!(
        fields = found,
        catalog = total,
        results = report.values.len(),
        abnormal = report.abnormal_results().len(),
        "Lab report extracted"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
Pacjent: Mruczek Gatunek: kot Rasa: europejska Płeć: samiec Wiek: 1 rok 3 miesiące
Data pobrania materiału: 12.03.2024
WBC 24,5 10^9/l 5,5-19,5
LYM 0,9 10^9/l 1,5-7,0
NEU 21,0 10^9/l 2,5-12,5
HCT 24 % 30-45
Białko całkowite 9,2 g/dl 5,7-8,9
Albumina 2,1 g/dl 2,6-4,0
Globuliny 7,1 g/dl 2,8-5,1
ALT 95 U/l 10-100
Bilirubina całkowita 1,2 mg/dl <0,5
Gamma-globuliny 3,9 g/dl 0,7-1,7
FCoV ELISA: dodatni 1:1600
";

    #[test]
    fn test_parse_number_variants() {
        assert_eq!(parse_number("2,5"), Some(2.5));
        assert_eq!(parse_number("<0.5"), Some(0.5));
        assert_eq!(parse_number(" > 12 "), Some(12.0));
        assert_eq!(parse_number("-"), None);
    }

    #[test]
    fn test_parse_range_variants() {
        assert_eq!(parse_range("2,6-4,0"), (Some(2.6), Some(4.0)));
        assert_eq!(parse_range("5.5 - 19.5"), (Some(5.5), Some(19.5)));
        assert_eq!(parse_range("<0,5"), (None, Some(0.5)));
        assert_eq!(parse_range(">100"), (Some(100.0), None));
    }

    #[test]
    fn test_extract_report() {
        let report = extract_lab_report(REPORT).unwrap();
        assert_eq!(report.patient.name.as_deref(), Some("Mruczek"));
        assert_eq!(report.patient.age_months, Some(15));
        assert_eq!(report.patient.collection_date.as_deref(), Some("12.03.2024"));

        let alb = report.get("albumin").unwrap();
        assert_eq!(alb.value, Some(2.1));
        assert_eq!(alb.unit.as_deref(), Some("g/dl"));
        assert!(alb.is_low());

        let bili = report.get("total_bilirubin").unwrap();
        assert_eq!(bili.range_max, Some(0.5));
        assert!(bili.is_high());

        assert!(!report.get("alt").unwrap().is_abnormal());
        assert_eq!(report.value("gamma_globulins"), Some(3.9));
        assert!(report.get("fcov_elisa").unwrap().text.as_deref().unwrap().contains("1:1600"));
        // no printed ratio, so albumin / globulins
        assert!((report.ag_ratio().unwrap() - 2.1 / 7.1).abs() < 1e-12);
    }

    #[test]
    fn test_semicolon_table_rows() {
        let text = "\
Badanie Wynik; Jedn.; Norma
Albuminy 2,8; g/dl; 2,7-3,9
Globuliny 4,5; g/dl; 2,6-5,1
Stosunek A/G 0,62
Data pobrania materiału: 15.03.2024
";
        let report = extract_lab_report(text).unwrap();
        assert_eq!(report.patient.collection_date.as_deref(), Some("15.03.2024"));

        let alb = report.get("albumin").unwrap();
        assert_eq!(alb.value, Some(2.8));
        assert_eq!(alb.unit.as_deref(), Some("g/dl"));
        assert_eq!((alb.range_min, alb.range_max), (Some(2.7), Some(3.9)));
        assert!(report.get("ep_albumin").is_none());

        let glob = report.get("globulins").unwrap();
        assert_eq!((glob.range_min, glob.range_max), (Some(2.6), Some(5.1)));
        assert_eq!(report.value("ag_ratio"), Some(0.62));
    }

    #[test]
    fn test_semicolon_rows_flag_abnormal_results() {
        let text = "Albuminy 1,8; g/dl; 2,6-4,0\nGlobuliny 7,5; g/dl; 2,8-5,1\n";
        let report = extract_lab_report(text).unwrap();
        assert_eq!(report.get("globulins").unwrap().range_max, Some(5.1));
        assert!(report.get("globulins").unwrap().is_high());
        assert!(report.get("albumin").unwrap().is_low());
        assert_eq!(report.abnormal_results().len(), 2);
        assert!((report.ag_ratio().unwrap() - 1.8 / 7.5).abs() < 1e-12);
    }

    #[test]
    fn test_table_row_completes_catalog_match() {
        let mut value = LabValue {
            key: "globulins".to_string(),
            name: "Globulins".to_string(),
            raw: "7,5".to_string(),
            value: Some(7.5),
            unit: None,
            range_min: None,
            range_max: None,
            text: None,
        };
        value.fill_missing(LabValue {
            name: "Globuliny".to_string(),
            raw: "7,4".to_string(),
            value: Some(7.4),
            unit: Some("g/dl".to_string()),
            range_min: Some(2.8),
            range_max: Some(5.1),
            ..value.clone()
        });
        assert_eq!(value.value, Some(7.5));
        assert_eq!(value.name, "Globulins");
        assert_eq!(value.unit.as_deref(), Some("g/dl"));
        assert_eq!(value.range_max, Some(5.1));
    }

    #[test]
    fn test_percent_albumin_is_electrophoresis_fraction() {
        let report = extract_lab_report("Albuminy 52,0 % 45-60\nAlbumina 2,9 g/dl 2,6-4,0\n").unwrap();
        assert_eq!(report.value("ep_albumin"), Some(52.0));
        assert_eq!(report.get("ep_albumin").unwrap().name, "Albumins (electrophoresis)");
        let alb = report.get("albumin").unwrap();
        assert_eq!(alb.value, Some(2.9));
        assert_eq!(alb.range_min, Some(2.6));

        // an explicit fraction label keeps its own value
        let report = extract_lab_report("Albuminy % 48,0 45-60\nAlbuminy 50,0 % 45-60\n").unwrap();
        assert_eq!(report.value("ep_albumin"), Some(48.0));
        assert!(report.get("albumin").is_none());
    }

    #[test]
    fn test_free_text_is_not_an_electrolyte() {
        let report = extract_lab_report("Na podstawie 3 badań wynik wątpliwy\nNa 152 mmol/l 147-156\n").unwrap();
        assert_eq!(report.value("sodium"), Some(152.0));
    }

    #[test]
    fn test_ag_ratio_from_total_protein() {
        let mut report = LabReport::default();
        for (key, v) in [("albumin", 3.0), ("total_protein", 7.0)] {
            report.insert(LabValue {
                key: key.to_string(),
                name: key.to_string(),
                raw: v.to_string(),
                value: Some(v),
                unit: None,
                range_min: None,
                range_max: None,
                text: None,
            });
        }
        assert_eq!(report.ag_ratio(), Some(0.75));
    }

    #[test]
    fn test_find_containing_and_insert_replaces() {
        let mut report = extract_lab_report(REPORT).unwrap();
        assert_eq!(report.find_containing("GAMMA").unwrap().key, "gamma_globulins");
        let before = report.values.len();
        let mut alt = report.get("alt").unwrap().clone();
        alt.value = Some(300.0);
        report.insert(alt);
        assert_eq!(report.values.len(), before);
        assert!(report.get("alt").unwrap().is_high());
    }

    #[test]
    fn test_summary_line() {
        let report = extract_lab_report(REPORT).unwrap();
        assert_eq!(
            report.get("albumin").unwrap().summary(),
            "Albumin 2,1 g/dl (norm 2.6-4)"
        );
    }
}
