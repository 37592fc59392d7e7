// src/error.rs

use thiserror::Error;

/// Errors surfaced by the extraction and analysis pipeline.
#[derive(Debug, Error)]
pub enum FipError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid field pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Timestamp formatting failed: {0}")]
    Time(#[from] time::error::Format),

    #[error("Failed to parse PDF: {0}")]
    Pdf(String),

    #[error("Unsupported embedded image: {0}")]
    UnsupportedImage(String),

    #[error("Curve fit did not converge: {0}")]
    Fit(String),

    #[error("Unknown Rivalta status '{0}' (expected positive, negative or not-performed)")]
    Rivalta(String),

    #[error("No stored analysis with uid {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, FipError>;
