//! Loading of preprocessed trace files.
//!
//! A trace file is a JSON document with an image prefix table and the
//! record sequence. Files are named `t<N>.trace.json` where `<N>` is the
//! testcase id.

use super::record::{ImageFileInfo, TraceRecord};
use crate::utils::error::TraceError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// One loaded preprocessed trace
///
/// **Public** - returned by load_trace, consumed by the analyze command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Images loaded during the traced execution
    pub images: Vec<ImageFileInfo>,

    /// Normalized trace records in execution order
    pub records: Vec<TraceRecord>,
}

/// Load a preprocessed trace from a JSON file
///
/// **Public** - main entry point for trace loading
///
/// # Errors
/// * `TraceError::IoError` - file cannot be opened
/// * `TraceError::JsonError` - malformed JSON
/// * `TraceError::InvalidFormat` - structurally invalid prefix table
pub fn load_trace(path: impl AsRef<Path>) -> Result<Trace, TraceError> {
    let path = path.as_ref();
    debug!("Loading trace file: {}", path.display());

    let file = File::open(path)?;
    let trace: Trace = serde_json::from_reader(BufReader::new(file))?;

    validate_prefix(&trace)?;

    debug!(
        "Loaded trace: {} images, {} records",
        trace.images.len(),
        trace.records.len()
    );

    Ok(trace)
}

/// Derive the testcase id from a trace file name
///
/// **Public** - used by trace discovery in the analyze command
///
/// Expects the `t<N>.trace.json` convention used by the preprocessor.
pub fn parse_testcase_id(path: &Path) -> Result<u32, TraceError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TraceError::InvalidTestcaseId(path.display().to_string()))?;

    name.strip_prefix('t')
        .and_then(|rest| rest.strip_suffix(".trace.json"))
        .and_then(|id| id.parse::<u32>().ok())
        .ok_or_else(|| TraceError::InvalidTestcaseId(name.to_string()))
}

/// Check the image prefix table for duplicate ids
///
/// **Private** - internal helper for load_trace
fn validate_prefix(trace: &Trace) -> Result<(), TraceError> {
    for (i, image) in trace.images.iter().enumerate() {
        if trace.images[..i].iter().any(|other| other.id == image.id) {
            return Err(TraceError::InvalidFormat(format!(
                "Duplicate image id {} in prefix table",
                image.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_testcase_id() {
        assert_eq!(parse_testcase_id(&PathBuf::from("t0.trace.json")).unwrap(), 0);
        assert_eq!(
            parse_testcase_id(&PathBuf::from("/tmp/traces/t17.trace.json")).unwrap(),
            17
        );
    }

    #[test]
    fn test_parse_testcase_id_rejects_other_names() {
        assert!(parse_testcase_id(&PathBuf::from("trace.json")).is_err());
        assert!(parse_testcase_id(&PathBuf::from("t.trace.json")).is_err());
        assert!(parse_testcase_id(&PathBuf::from("tx.trace.json")).is_err());
    }

    #[test]
    fn test_validate_prefix_rejects_duplicate_ids() {
        let trace = Trace {
            images: vec![
                ImageFileInfo {
                    id: 0,
                    low: 0x1000,
                    high: 0x2000,
                    name: "a.so".to_string(),
                },
                ImageFileInfo {
                    id: 0,
                    low: 0x3000,
                    high: 0x4000,
                    name: "b.so".to_string(),
                },
            ],
            records: Vec::new(),
        };

        assert!(validate_prefix(&trace).is_err());
    }
}
