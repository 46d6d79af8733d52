//! Error taxonomy of the analysis pipeline.
//!
//! One `thiserror` enum per failure surface: `ConfigError` when the options
//! cannot be validated, `TraceError` when a preprocessed trace file is
//! missing or malformed, `MapFileError` for broken symbol tables and
//! `ReportError` for report output. Structural anomalies inside a trace are
//! deliberately NOT errors (the merger recovers and records a warning);
//! only these four kinds can abort a run, wrapped in `anyhow` by the
//! commands layer.

use thiserror::Error;

/// Errors that can occur while validating the analysis configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Output directory is required")]
    MissingOutputDirectory,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("MAP directory does not exist: {0}")]
    MissingMapDirectory(String),
}

/// Errors that can occur while loading a preprocessed trace
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid trace format: {0}")]
    InvalidFormat(String),

    #[error("Cannot derive testcase id from file name: {0}")]
    InvalidTestcaseId(String),
}

/// Errors that can occur while parsing a MAP file
#[derive(Error, Debug)]
pub enum MapFileError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("MAP file is empty: {0}")]
    EmptyFile(String),

    #[error("Malformed MAP entry at line {line}: {content}")]
    MalformedEntry { line: usize, content: String },
}

/// Errors that can occur during report output
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("Failed to serialize JSON: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),
}
