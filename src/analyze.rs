// src/analyze.rs

use crate::analysis::lab::{LabCommentary, comment_lab_results};
use crate::analysis::pattern::{PatternAnalysis, analyze_patterns};
use crate::analysis::risk::{RiskAssessment, RiskInputs, RivaltaStatus, assess_risk};
use crate::analysis::shape::{ShapeAnalysis, analyze_shape};
use crate::chart::{ChartAnalysis, ChartRun, analyze_chart};
use crate::config::Config;
use crate::error::{FipError, Result};
use crate::heuristics::{LabReport, extract_lab_report};
use crate::pdf_extract::{PdfContent, extract_page_images, extract_text_from_pdf};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, info_span, warn};

/// The complete, serialisable result of analysing one report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// File the report was read from, if any.
    pub source: Option<String>,
    /// RFC 3339, UTC.
    pub analysed_at: String,
    pub lab: LabReport,
    pub chart: Option<ChartAnalysis>,
    pub shape: Option<ShapeAnalysis>,
    pub pattern: PatternAnalysis,
    pub commentary: LabCommentary,
    pub risk: RiskAssessment,
}

/// An analysis plus the chart bitmaps it was measured on.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub report: AnalysisReport,
    pub chart_run: Option<ChartRun>,
}

fn now_rfc3339() -> Result<String> {
    Ok(OffsetDateTime::now_utc().format(&Rfc3339)?)
}

/// Analyse a PDF report. `chart_override` replaces the embedded images with
/// a single chart bitmap read from disk.
pub fn analyze_pdf(
    cfg: &Config,
    path: &Path,
    rivalta: RivaltaStatus,
    chart_override: Option<&Path>,
) -> Result<Analysis> {
    let span = info_span!("analyze", file = %path.display());
    let _guard = span.enter();

    let bytes = fs::read(path)?;
    info!(bytes = bytes.len(), "Loaded PDF");

    let text = match extract_text_from_pdf(&bytes) {
        PdfContent::Text(text) => text,
        PdfContent::ScannedImage => {
            warn!("PDF has no text layer, lab values will be missing");
            String::new()
        }
        PdfContent::Error(e) => return Err(FipError::Pdf(e)),
    };

    let images = match chart_override {
        Some(chart_path) => vec![image::open(chart_path)?.to_rgb8()],
        None => extract_page_images(&bytes).unwrap_or_else(|e| {
            warn!(error = %e, "Could not read embedded images");
            Vec::new()
        }),
    };

    let mut analysis = analyze_report(cfg, &text, &images, rivalta)?;
    analysis.report.source = Some(path.display().to_string());
    Ok(analysis)
}

/// Analyse already extracted report text and candidate chart images.
/// Chart problems degrade to an analysis without chart data.
pub fn analyze_report(
    cfg: &Config,
    text: &str,
    images: &[RgbImage],
    rivalta: RivaltaStatus,
) -> Result<Analysis> {
    let lab = extract_lab_report(text)?;

    let chart_run = if images.is_empty() {
        warn!("No images to search for the electrophoresis chart");
        None
    } else {
        let run = analyze_chart(&cfg.chart, images);
        if run.is_none() {
            warn!(candidates = images.len(), "No electrophoresis chart found");
        }
        run
    };

    let shape = chart_run.as_ref().and_then(|run| {
        analyze_shape(&cfg.chart, &run.bar_image, &run.analysis.bars.separator_columns)
    });
    let pattern = analyze_patterns(&lab);
    let commentary = comment_lab_results(&lab);

    let risk = assess_risk(
        &cfg.scoring,
        &RiskInputs {
            report: &lab,
            rivalta,
            gammopathy: chart_run.as_ref().and_then(|r| r.analysis.gammopathy),
            shape: shape.as_ref(),
            pattern: Some(&pattern),
        },
    );

    info!(
        patient = ?lab.patient.name,
        results = lab.values.len(),
        chart = chart_run.is_some(),
        risk = risk.percentage,
        "Analysis complete"
    );

    Ok(Analysis {
        report: AnalysisReport {
            source: None,
            analysed_at: now_rfc3339()?,
            chart: chart_run.as_ref().map(|r| r.analysis.clone()),
            lab,
            shape,
            pattern,
            commentary,
            risk,
        },
        chart_run,
    })
}

/// Write the cropped chart and the synthetic bar image as PNG files.
pub fn export_chart_images(run: &ChartRun, dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let chart_path = dir.join(format!("{stem}_chart.png"));
    let bars_path = dir.join(format!("{stem}_bars.png"));
    run.chart.save(&chart_path)?;
    run.bar_image.save(&bars_path)?;
    info!(dir = %dir.display(), "Chart images exported");
    Ok(vec![chart_path, bars_path])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::risk::RiskLevel;
    use crate::chart::testing::{WHITE, synthetic_chart};
    use image::imageops;

    const REPORT: &str = "\
Pacjent: Mruczek Gatunek: kot Wiek: 10 miesięcy
Data pobrania materiału: 12.03.2024
LYM 0,9 10^9/l 1,5-7,0
NEU 21,0 10^9/l 2,5-12,5
Albumina 1,9 g/dl 2,6-4,0
Globuliny 7,6 g/dl 2,8-5,1
Gamma-globuliny 3,9 g/dl 0,7-1,7
";

    fn page_with_chart() -> RgbImage {
        // broad gamma region over a modest albumin peak
        let chart = synthetic_chart(|x| {
            let g = |m: f64, s: f64, a: f64| a * (-(f64::from(x) - m).powi(2) / (2.0 * s * s)).exp();
            (10.0 + g(60.0, 20.0, 120.0) + g(190.0, 20.0, 60.0) + g(310.0, 25.0, 90.0) + g(440.0, 40.0, 280.0))
                as u32
        });
        let mut page = RgbImage::from_pixel(600, 700, WHITE);
        imageops::replace(&mut page, &chart, 50, 250);
        page
    }

    #[test]
    fn test_report_without_chart() {
        let cfg = Config::default();
        let a = analyze_report(&cfg, REPORT, &[], RivaltaStatus::Positive).unwrap();
        assert!(a.chart_run.is_none());
        assert!(a.report.chart.is_none());
        assert!(a.report.shape.is_none());
        assert_eq!(a.report.lab.patient.age_months, Some(10));
        assert!(a.report.risk.components.iter().all(|c| c.name != "Chart gammopathy"));
        assert_eq!(a.report.risk.level, RiskLevel::High);
        assert!(a.report.analysed_at.contains('T'));
    }

    #[test]
    fn test_report_with_chart() {
        let cfg = Config::default();
        let a = analyze_report(&cfg, REPORT, &[page_with_chart()], RivaltaStatus::NotPerformed).unwrap();
        let chart = a.report.chart.as_ref().unwrap();
        assert_eq!(chart.bars.separator_columns.len(), 3);
        assert!(chart.gammopathy.is_some());
        assert!(a.report.shape.is_some());
        assert!(a.report.risk.components.iter().any(|c| c.name == "Chart gammopathy"));
        assert!(a.report.risk.components.iter().any(|c| c.name == "Curve shape"));

        let json = serde_json::to_string(&a.report).unwrap();
        let back: AnalysisReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.risk.percentage, a.report.risk.percentage);
    }

    #[test]
    fn test_blank_image_degrades_to_no_chart() {
        let cfg = Config::default();
        let blank = RgbImage::from_pixel(60, 60, WHITE);
        let a = analyze_report(&cfg, REPORT, &[blank], RivaltaStatus::Negative).unwrap();
        assert!(a.chart_run.is_none());
        assert!(!a.report.risk.components.is_empty());
    }

    #[test]
    fn test_export_chart_images() {
        let cfg = Config::default();
        let a = analyze_report(&cfg, REPORT, &[page_with_chart()], RivaltaStatus::Positive).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let paths = export_chart_images(a.chart_run.as_ref().unwrap(), dir.path(), "mruczek").unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.exists()));
        assert!(paths[1].ends_with("mruczek_bars.png"));
    }

    #[test]
    fn test_missing_pdf_is_io_error() {
        let cfg = Config::default();
        let err = analyze_pdf(&cfg, Path::new("/nonexistent/report.pdf"), RivaltaStatus::NotPerformed, None)
            .unwrap_err();
        assert!(matches!(err, FipError::Io(_)));
    }
}
