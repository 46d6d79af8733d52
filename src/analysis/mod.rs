//! Leakage attribution over the merged call tree.

pub mod attribution;
pub mod callstack;

pub use attribution::analyze;
pub use callstack::{
    CallStackNode, CallStackNodeId, InstructionLeak, LeakKind, LeakageReport, PartitionNode,
    PartitionNodeId,
};
