//! CLI command implementations.

pub mod analyze;

pub use analyze::{execute_analyze, validate_args, AnalyzeArgs};
