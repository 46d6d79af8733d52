//! Report writers: call-tree dump, per-call-stack leakage report and the
//! machine-readable run summary.

pub mod call_stacks;
pub mod call_tree_dump;
pub mod sequence;
pub mod summary;

pub use call_stacks::{write_call_stack_report, write_call_stack_report_file};
pub use call_tree_dump::{write_call_tree_dump, write_call_tree_dump_file};
pub use sequence::format_id_sequence;
pub use summary::{build_summary, read_summary, write_summary, AnalysisSummary};
