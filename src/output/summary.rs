//! Machine-readable run summary.
//!
//! Written next to the text reports so pipelines can check results without
//! parsing them. Schema is versioned to allow future evolution.

use crate::analysis::LeakageReport;
use crate::calltree::TraceMerger;
use crate::utils::config::SCHEMA_VERSION;
use crate::utils::error::ReportError;
use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Top-level summary structure written to JSON
///
/// **Public** - written to analysis-summary.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    /// Schema version for compatibility checking
    pub version: String,

    /// Timestamp when the summary was generated
    pub generated_at: String,

    /// Number of testcases merged into the tree
    pub testcase_count: usize,

    /// Trace records consumed across all testcases
    pub record_count: usize,

    /// Nodes in the merged call tree
    pub tree_node_count: usize,

    /// Leaking instructions across all call stacks
    pub leaking_instruction_count: usize,

    /// Call stacks holding at least one finding
    pub leaking_call_stack_count: usize,

    /// Structural anomalies recorded during merging
    pub warning_count: usize,

    /// Memory accesses that caused a full split (audit counter)
    pub memory_conflict_count: usize,
}

/// Build the summary for one finished run
///
/// **Public** - used by commands to create the final output
pub fn build_summary(merger: &TraceMerger, report: &LeakageReport) -> AnalysisSummary {
    AnalysisSummary {
        version: SCHEMA_VERSION.to_string(),
        generated_at: Utc::now().to_rfc3339(),
        testcase_count: merger.testcases().count(),
        record_count: merger.stats().records,
        tree_node_count: merger.tree().len(),
        leaking_instruction_count: report.finding_count(),
        leaking_call_stack_count: report.leaking_call_stack_count(),
        warning_count: merger.warnings().len(),
        memory_conflict_count: merger.stats().memory_conflicts,
    }
}

/// Write a summary to a JSON file
///
/// **Public** - main entry point for JSON output
pub fn write_summary(
    summary: &AnalysisSummary,
    output_path: impl AsRef<Path>,
) -> Result<(), ReportError> {
    let output_path = output_path.as_ref();
    info!("Writing analysis summary to: {}", output_path.display());

    if let Some(parent) = output_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ReportError::InvalidPath(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }
    }

    let file = File::create(output_path).map_err(ReportError::WriteFailed)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, summary).map_err(ReportError::SerializationFailed)?;

    Ok(())
}

/// Read a summary back from a JSON file
///
/// **Public** - useful for validation and testing
pub fn read_summary(input_path: impl AsRef<Path>) -> Result<AnalysisSummary, ReportError> {
    let input_path = input_path.as_ref();
    debug!("Reading analysis summary from: {}", input_path.display());

    let file = File::open(input_path).map_err(ReportError::WriteFailed)?;
    let summary: AnalysisSummary =
        serde_json::from_reader(file).map_err(ReportError::SerializationFailed)?;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_summary() -> AnalysisSummary {
        AnalysisSummary {
            version: SCHEMA_VERSION.to_string(),
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            testcase_count: 4,
            record_count: 1024,
            tree_node_count: 99,
            leaking_instruction_count: 2,
            leaking_call_stack_count: 1,
            warning_count: 0,
            memory_conflict_count: 0,
        }
    }

    #[test]
    fn test_write_and_read_summary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("analysis-summary.json");

        write_summary(&test_summary(), &path).unwrap();
        let loaded = read_summary(&path).unwrap();

        assert_eq!(loaded.version, SCHEMA_VERSION);
        assert_eq!(loaded.testcase_count, 4);
        assert_eq!(loaded.leaking_instruction_count, 2);
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested/out/analysis-summary.json");

        write_summary(&test_summary(), &nested).unwrap();
        assert!(nested.exists());
    }
}
