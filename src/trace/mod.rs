//! Preprocessed trace input: record model and file loading.

pub mod reader;
pub mod record;

pub use reader::{load_trace, parse_testcase_id, Trace};
pub use record::{BranchKind, ImageFileInfo, TraceRecord};
