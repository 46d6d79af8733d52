//! The merged call tree: testcase sets, tagged addresses, the node arena
//! and the trace merge engine.

pub mod address;
pub mod merge;
pub mod node;
pub mod testcase_set;

pub use address::{AddressFormatter, HEAP_FLAG, MEMORY_FLAG, UNMAPPED_HEAP_ID, UNMAPPED_STACK_ID};
pub use merge::{derive_call_stack_id, AnomalyKind, MergeStats, MergeWarning, TraceMerger};
pub use node::{CallTree, CallTreeNode, NodeId, NodeKind, SplitData};
pub use testcase_set::TestcaseSet;
