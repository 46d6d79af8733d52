//! Configuration and constants for an analysis run.

use crate::utils::error::ConfigError;
use std::path::PathBuf;

/// Current summary schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// File name of the optional merged-call-tree dump
pub const CALL_TREE_DUMP_FILENAME: &str = "call-tree-dump.txt";

/// File name of the per-call-stack leakage report
pub const CALL_STACKS_FILENAME: &str = "call-stacks.txt";

/// File name of the machine-readable run summary
pub const SUMMARY_FILENAME: &str = "analysis-summary.json";

/// Options controlling one analysis run
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Directory where report files are written (required)
    pub output_directory: PathBuf,

    /// Explicit MAP files for symbol resolution
    pub map_files: Vec<PathBuf>,

    /// Directory scanned for `*.map` files
    pub map_directory: Option<PathBuf>,

    /// Emit `call-tree-dump.txt` with the full merged tree
    pub dump_call_tree: bool,

    /// Include memory-access and allocation lines in the dump
    pub include_memory_accesses_in_dump: bool,
}

impl AnalysisOptions {
    /// Create options for the given output directory with all defaults
    ///
    /// **Public** - constructor
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            output_directory: output_directory.into(),
            map_files: Vec::new(),
            map_directory: None,
            dump_call_tree: false,
            include_memory_accesses_in_dump: true,
        }
    }

    /// Check that the options are usable
    ///
    /// **Public** - called before execute_analyze
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_directory.as_os_str().is_empty() {
            return Err(ConfigError::MissingOutputDirectory);
        }

        if let Some(dir) = &self.map_directory {
            if !dir.is_dir() {
                return Err(ConfigError::MissingMapDirectory(
                    dir.display().to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty_output_directory() {
        let options = AnalysisOptions::new("");
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_defaults() {
        let options = AnalysisOptions::new("out");
        assert!(options.validate().is_ok());
        assert!(!options.dump_call_tree);
        assert!(options.include_memory_accesses_in_dump);
    }
}
