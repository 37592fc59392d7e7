// src/analysis/lab.rs

use crate::heuristics::LabReport;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabCommentary {
    pub comments: Vec<String>,
    pub supplement_advice: String,
    pub consultation_advice: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Specialist {
    Hepatologist,
    Internist,
}

impl Specialist {
    fn title(&self) -> &'static str {
        match self {
            Self::Hepatologist => "a hepatologist",
            Self::Internist => "an internal medicine specialist",
        }
    }
}

const POSITIVE_WORDS: [&str; 3] = ["dodatni", "pozytywny", "positive"];
const NEGATIVE_WORDS: [&str; 3] = ["ujemny", "negatywny", "negative"];

/// Per-parameter diagnostic comments with supplement and consultation advice.
pub fn comment_lab_results(report: &LabReport) -> LabCommentary {
    let mut comments = Vec::new();
    let mut supplements = Vec::new();
    let mut specialist: Option<Specialist> = None;
    let mut consult = false;

    if let Some(ratio) = report.ag_ratio() {
        if ratio < 0.6 {
            comments.push(format!(
                "A/G ratio {ratio:.2} is very low (<0.6), strongly supporting FIP."
            ));
        } else if ratio < 0.8 {
            comments.push(format!(
                "A/G ratio {ratio:.2} is reduced (<0.8); FIP is possible but not certain."
            ));
        }
    }

    if report.get("gamma_globulins").is_some_and(|g| g.is_high()) {
        comments.push("Hypergammaglobulinemia, frequently seen in cats with FIP.".to_string());
    }

    if let Some(alt) = report.get("alt").filter(|v| v.is_high()) {
        let (value, max) = (alt.value.unwrap_or_default(), alt.range_max.unwrap_or_default());
        let unit = alt.unit.as_deref().unwrap_or("");
        let fold = if max > 0.0 { value / max } else { f64::INFINITY };
        if fold <= 2.0 {
            comments.push(format!("ALT mildly elevated ({value:.1} {unit})."));
            supplements.push("Liver support supplement (e.g. SAMe with silybin)".to_string());
        } else {
            comments.push(format!(
                "ALT markedly elevated ({value:.1} {unit}), suggesting significant liver damage."
            ));
            supplements
                .push("Liver support supplement at the extended dose, under veterinary control".to_string());
            consult = true;
            specialist = Some(Specialist::Hepatologist);
        }
    }

    if let Some(bili) = report.get("total_bilirubin").filter(|v| v.is_high()) {
        let (value, max) = (bili.value.unwrap_or_default(), bili.range_max.unwrap_or_default());
        let unit = bili.unit.as_deref().unwrap_or("");
        comments.push(format!("Bilirubin elevated ({value:.1} {unit})."));
        if max > 0.0 && value / max > 2.0 {
            consult = true;
            specialist.get_or_insert(Specialist::Internist);
        }
    }

    if let Some(wbc) = report.get("wbc").filter(|v| v.value.is_some()) {
        let value = wbc.value.unwrap_or_default();
        if wbc.is_high() {
            comments.push(format!("Leukocytosis (WBC {value:.1})."));
        } else if wbc.is_low() {
            comments.push(format!("Leukopenia (WBC {value:.1})."));
        }
    }

    let neutrophilia = report.get("neu").is_some_and(|v| v.is_high());
    let lymphopenia = report.get("lym").is_some_and(|v| v.is_low());
    if neutrophilia && lymphopenia {
        comments.push("Stress leukogram: neutrophilia with lymphopenia, common in FIP.".to_string());
    }

    if let Some(hct) = report.get("hct").filter(|v| v.is_low()) {
        comments.push(format!(
            "Anemia (HCT {:.1}), which may accompany chronic FIP.",
            hct.value.unwrap_or_default()
        ));
    }

    if let Some(comment) = fcov_comment(report) {
        comments.push(comment);
    }

    if comments.is_empty() {
        comments.push("Results within reference ranges; no FIP-typical abnormalities.".to_string());
    } else if comments.iter().any(|c| c.to_lowercase().contains("fip")) {
        comments.push(
            "These changes are not specific to FIP and can occur in other inflammatory diseases."
                .to_string(),
        );
    }

    let consultation_advice = match (consult, specialist) {
        (true, Some(s)) => format!("Consultation with {} is recommended.", s.title()),
        (true, None) => "Veterinary consultation is recommended.".to_string(),
        (false, _) => "No specialist consultation is needed on these results.".to_string(),
    };
    let supplement_advice = if supplements.is_empty() {
        "No specific supplements indicated.".to_string()
    } else {
        supplements.join("; ")
    };

    debug!(comments = comments.len(), consult, "Lab commentary");
    LabCommentary {
        comments,
        supplement_advice,
        consultation_advice,
    }
}

/// FCoV serology, read from positive/negative wording or a titre such as "1:400".
fn fcov_comment(report: &LabReport) -> Option<String> {
    let fcov = report.get("fcov_elisa")?;
    let result = fcov.text.as_deref().unwrap_or(&fcov.raw).trim();
    if result.is_empty() {
        return None;
    }
    let lower = result.to_lowercase();

    let comment = if POSITIVE_WORDS.iter().any(|w| lower.contains(w)) {
        "FCoV ELISA positive: coronavirus exposure, compatible with FIP.".to_string()
    } else if NEGATIVE_WORDS.iter().any(|w| lower.contains(w)) {
        "FCoV ELISA negative, which makes FIP less likely.".to_string()
    } else if let Some((_, titre)) = result.rsplit_once(':') {
        match titre.trim().replace(',', ".").parse::<f64>() {
            Ok(t) if t >= 400.0 => format!("FCoV antibody titre {result} is high."),
            Ok(t) if t >= 100.0 => format!("FCoV antibody titre {result} is moderate."),
            Ok(_) => format!("FCoV antibody titre {result} is low."),
            Err(_) => format!("FCoV ELISA result: {result}."),
        }
    } else {
        format!("FCoV ELISA result: {result}.")
    };
    Some(comment)
}
