//! Preprocessed trace record model.
//!
//! A trace is the linear sequence of records emitted by one execution of the
//! instrumented target under one test case. The tracer and preprocessor live
//! outside this crate; we consume their normalized output.

use serde::{Deserialize, Serialize};

/// Kind of a control-flow transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchKind {
    Call,
    Jump,
    Return,
}

/// A loaded image (executable or shared library) described in the trace prefix
///
/// **Public** - registered with the address formatter per trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFileInfo {
    /// Image id referenced by trace records
    pub id: u32,

    /// Lowest mapped address
    pub low: u64,

    /// Highest mapped address
    pub high: u64,

    /// File name of the image
    pub name: String,
}

/// One record of a preprocessed trace
///
/// **Public** - consumed by the merge engine
///
/// Allocation ids are per-trace; the merger remaps them to process-wide
/// shared ids. An id of -1 marks an access into unmapped stack memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceRecord {
    /// Control-flow transfer. `dest_*` is meaningful only when `taken` is true.
    Branch {
        #[serde(rename = "type")]
        branch_kind: BranchKind,
        source_image: u32,
        source_offset: u32,
        dest_image: u32,
        dest_offset: u32,
        taken: bool,
    },

    /// Heap block allocated by the target
    HeapAllocation { id: i32, size: u32 },

    /// Stack frame allocated by the target
    StackAllocation { id: i32, size: u32 },

    /// Memory access into a loaded image (globals, constants)
    ImageMemoryAccess {
        is_write: bool,
        instruction_image: u32,
        instruction_offset: u32,
        memory_image: u32,
        memory_offset: u32,
    },

    /// Memory access into a tracked stack frame
    StackMemoryAccess {
        is_write: bool,
        instruction_image: u32,
        instruction_offset: u32,
        stack_allocation: i32,
        memory_offset: u32,
    },

    /// Memory access into a tracked heap block
    HeapMemoryAccess {
        is_write: bool,
        instruction_image: u32,
        instruction_offset: u32,
        heap_allocation: i32,
        memory_offset: u32,
    },
}

impl TraceRecord {
    /// Shorthand constructor for a taken branch record
    ///
    /// **Public** - constructor
    pub fn branch(kind: BranchKind, source: (u32, u32), dest: (u32, u32)) -> Self {
        Self::Branch {
            branch_kind: kind,
            source_image: source.0,
            source_offset: source.1,
            dest_image: dest.0,
            dest_offset: dest.1,
            taken: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_round_trip() {
        let record = TraceRecord::Branch {
            branch_kind: BranchKind::Call,
            source_image: 0,
            source_offset: 0x10,
            dest_image: 0,
            dest_offset: 0x20,
            taken: true,
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"branch\""));
        assert!(json.contains("\"type\":\"call\""));

        let parsed: TraceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_memory_access_json_tag() {
        let record = TraceRecord::HeapMemoryAccess {
            is_write: false,
            instruction_image: 1,
            instruction_offset: 0x42,
            heap_allocation: 3,
            memory_offset: 0x8,
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"heap_memory_access\""));
    }
}
