mod analysis;
mod analyze;
mod chart;
mod config;
mod error;
mod heuristics;
mod math;
mod pdf_extract;
mod result_db;

use analysis::risk::RivaltaStatus;
use analyze::AnalysisReport;
use clap::{Parser, Subcommand};
use pdf_extract::PdfContent;
use result_db::ResultStore;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fipscan", version, about = "FIP risk analysis of feline blood-test PDF reports")]
struct Cli {
    /// Config file
    #[arg(long, global = true, default_value = "fipscan.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyse a PDF report and score the FIP risk
    Analyze {
        pdf: PathBuf,
        /// Rivalta test result: positive, negative or not-performed
        #[arg(long, default_value = "not-performed")]
        rivalta: RivaltaStatus,
        /// Use this chart image instead of the images embedded in the PDF
        #[arg(long)]
        chart: Option<PathBuf>,
        /// Write the cropped chart and bar image as PNG files here
        #[arg(long)]
        export_dir: Option<PathBuf>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
        /// Do not save the result in the history database
        #[arg(long)]
        no_store: bool,
    },
    /// Print the lab values extracted from a PDF report
    Extract {
        pdf: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List stored analyses, newest first
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show a stored analysis
    Show {
        uid: String,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let cfg = config::Config::load_or_default(&cli.config)?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Analyze {
            pdf,
            rivalta,
            chart,
            export_dir,
            json,
            no_store,
        } => {
            let analysis = analyze::analyze_pdf(&cfg, &pdf, rivalta, chart.as_deref())?;

            if let Some(dir) = export_dir {
                match &analysis.chart_run {
                    Some(run) => {
                        let stem = pdf.file_stem().map_or("report".into(), |s| s.to_string_lossy());
                        for path in analyze::export_chart_images(run, &dir, &stem)? {
                            info!(path = %path.display(), "Exported");
                        }
                    }
                    None => warn!("No chart found, nothing to export"),
                }
            }

            if !no_store {
                let store = ResultStore::new(&cfg.db_path)?;
                let uid = store.upsert(&analysis.report)?;
                info!(uid = %uid, "Analysis saved");
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&analysis.report)?);
            } else {
                print_report(&analysis.report);
            }
        }
        Command::Extract { pdf, json } => {
            let bytes = std::fs::read(&pdf)?;
            let text = match pdf_extract::extract_text_from_pdf(&bytes) {
                PdfContent::Text(text) => text,
                PdfContent::ScannedImage => {
                    println!("PDF is scanned/image-only, no text to extract.");
                    return Ok(());
                }
                PdfContent::Error(e) => return Err(error::FipError::Pdf(e).into()),
            };
            let report = heuristics::extract_lab_report(&text)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", patient_line(&report.patient));
                for value in &report.values {
                    let flag = if value.is_high() {
                        " H"
                    } else if value.is_low() {
                        " L"
                    } else {
                        ""
                    };
                    println!("  {}{flag}", value.summary());
                }
            }
        }
        Command::History { limit } => {
            let store = ResultStore::new(&cfg.db_path)?;
            let rows = store.list_recent(limit)?;
            println!("{} of {} stored analyses", rows.len(), store.count()?);
            for row in rows {
                println!(
                    "{}  {:<20} {:>3}%  {:<16} {}",
                    &row.uid[..12.min(row.uid.len())],
                    row.patient_name.as_deref().unwrap_or("-"),
                    row.risk_percentage,
                    row.risk_level,
                    row.analysed_at
                );
            }
        }
        Command::Show { uid, json } => {
            let store = ResultStore::new(&cfg.db_path)?;
            let report = store.get_report(&uid)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }

    Ok(())
}

fn patient_line(p: &heuristics::PatientInfo) -> String {
    format!(
        "Patient: {} ({}, {}), sample {}",
        p.name.as_deref().unwrap_or("unknown"),
        p.breed.as_deref().or(p.species.as_deref()).unwrap_or("-"),
        p.age.as_deref().unwrap_or("age unknown"),
        p.collection_date.as_deref().unwrap_or("-"),
    )
}

fn print_report(report: &AnalysisReport) {
    let risk = &report.risk;
    println!("{}", patient_line(&report.lab.patient));
    println!("\n{} [{}]", risk.summary, risk.color);
    for line in risk.breakdown() {
        println!("  {line}");
    }

    match (&report.chart, &report.shape) {
        (Some(chart), shape) => {
            let verdict = chart.gammopathy.map_or("not determined", |g| g.description());
            println!("\nChart: {verdict}");
            if let Some(shape) = shape {
                println!("  {} (shape score {:.0})", shape.description, shape.fip_shape_score);
            }
        }
        (None, _) => println!("\nChart: not found"),
    }

    println!("\nLab pattern: {}", report.pattern.profile_description);
    for finding in &report.pattern.key_findings {
        println!("  - {finding}");
    }

    println!("\nComments:");
    for comment in &report.commentary.comments {
        println!("  - {comment}");
    }

    println!("\nFurther tests:");
    for test in &risk.further_tests {
        println!("  {test}");
    }
    println!("\nSupplements: {}", risk.supplement_advice);
    println!("Lab supplements: {}", report.commentary.supplement_advice);
    println!("Consultation: {}", risk.consultation_advice);
    println!("Lab consultation: {}", report.commentary.consultation_advice);
}
