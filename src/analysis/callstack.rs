//! Result structures of the leakage attribution walk.
//!
//! The walk produces a call-stack tree parallel to the merged call tree:
//! one node per unique call-stack id, each holding the leaking instructions
//! discovered under that stack together with their testcase partition trees.

use crate::calltree::TestcaseSet;
use std::collections::BTreeMap;

/// Index of a node in the call-stack tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallStackNodeId(pub(crate) usize);

/// Index of a node in the partition-tree arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionNodeId(pub(crate) usize);

/// What kind of instruction leaked
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LeakKind {
    Call,
    Return,
    Jump,
    MemoryAccess,
}

impl LeakKind {
    /// Label used in the leakage report
    pub fn label(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Return => "return",
            Self::Jump => "jump",
            Self::MemoryAccess => "memory access",
        }
    }
}

/// One node of a testcase partition tree
///
/// **Public** - rendered by the call-stack report writer
///
/// Dummy nodes are placeholders inserted when a divergence stays open
/// across a split that belongs to a different instruction; they inherit
/// the split successor's testcases and are tagged `[M]` in reports.
#[derive(Debug, Clone)]
pub struct PartitionNode {
    pub testcases: TestcaseSet,
    pub children: Vec<PartitionNodeId>,
    pub dummy: bool,
}

/// Findings for one leaking instruction within one call stack
///
/// **Public** - stored per call-stack node, keyed by instruction id
#[derive(Debug, Clone)]
pub struct InstructionLeak {
    /// Instruction type observed at the divergence
    pub kind: LeakKind,

    /// Partition tree roots, one per independent divergence occurrence
    pub partitions: Vec<PartitionNodeId>,
}

/// One node of the call-stack tree
///
/// **Public** - traversed by the call-stack report writer
#[derive(Debug)]
pub struct CallStackNode {
    /// Rolling hash identifying this call stack (0 for the root)
    pub call_stack_id: u64,

    /// Call site instruction id (0 for the root)
    pub source: u64,

    /// Call target instruction id (0 for the root)
    pub target: u64,

    children: Vec<CallStackNodeId>,
    findings: BTreeMap<u64, InstructionLeak>,
    interesting: bool,
}

impl CallStackNode {
    fn new(call_stack_id: u64, source: u64, target: u64) -> Self {
        Self {
            call_stack_id,
            source,
            target,
            children: Vec::new(),
            findings: BTreeMap::new(),
            interesting: false,
        }
    }

    /// Child call stacks in discovery order
    pub fn children(&self) -> &[CallStackNodeId] {
        &self.children
    }

    /// Leaking instructions, keyed by instruction id
    pub fn findings(&self) -> &BTreeMap<u64, InstructionLeak> {
        &self.findings
    }

    /// True if this node or any descendant holds a finding
    pub fn is_interesting(&self) -> bool {
        self.interesting
    }
}

/// Output of the attribution walk
///
/// **Public** - holds the call-stack tree and the partition-tree arena
#[derive(Debug)]
pub struct LeakageReport {
    call_stacks: Vec<CallStackNode>,
    partitions: Vec<PartitionNode>,
}

impl LeakageReport {
    pub(crate) fn new() -> Self {
        Self {
            call_stacks: vec![CallStackNode::new(0, 0, 0)],
            partitions: Vec::new(),
        }
    }

    /// Root of the call-stack tree
    pub fn root(&self) -> CallStackNodeId {
        CallStackNodeId(0)
    }

    pub fn call_stack(&self, id: CallStackNodeId) -> &CallStackNode {
        &self.call_stacks[id.0]
    }

    pub fn partition(&self, id: PartitionNodeId) -> &PartitionNode {
        &self.partitions[id.0]
    }

    /// Total number of leaking instructions across all call stacks
    ///
    /// **Public** - reported in the analysis summary
    pub fn finding_count(&self) -> usize {
        self.call_stacks.iter().map(|node| node.findings.len()).sum()
    }

    /// Number of call stacks that directly hold at least one finding
    pub fn leaking_call_stack_count(&self) -> usize {
        self.call_stacks
            .iter()
            .filter(|node| !node.findings.is_empty())
            .count()
    }

    /// Flat (call-stack-id, instruction-id, kind) view of all findings
    ///
    /// **Public** - useful for comparing runs
    ///
    /// Sorted, so two reports over the same traces compare equal
    /// regardless of ingestion order.
    pub fn finding_summary(&self) -> Vec<(u64, u64, LeakKind)> {
        let mut summary: Vec<(u64, u64, LeakKind)> = self
            .call_stacks
            .iter()
            .flat_map(|node| {
                node.findings
                    .iter()
                    .map(|(&instruction, leak)| (node.call_stack_id, instruction, leak.kind))
            })
            .collect();
        summary.sort();
        summary
    }

    /// Child lookup by call-stack id, creating the node on first sight
    ///
    /// **Private** - internal helper for the attribution walk
    pub(crate) fn find_or_create_child(
        &mut self,
        parent: CallStackNodeId,
        call_stack_id: u64,
        source: u64,
        target: u64,
    ) -> CallStackNodeId {
        if let Some(&child) = self.call_stacks[parent.0]
            .children
            .iter()
            .find(|&&child| self.call_stacks[child.0].call_stack_id == call_stack_id)
        {
            return child;
        }

        let child = CallStackNodeId(self.call_stacks.len());
        self.call_stacks
            .push(CallStackNode::new(call_stack_id, source, target));
        self.call_stacks[parent.0].children.push(child);
        child
    }

    /// Finding lookup by instruction id, creating the entry on first sight
    ///
    /// **Private** - internal helper for the attribution walk
    pub(crate) fn finding_entry(
        &mut self,
        node: CallStackNodeId,
        instruction: u64,
        kind: LeakKind,
    ) -> &mut InstructionLeak {
        self.call_stacks[node.0]
            .findings
            .entry(instruction)
            .or_insert_with(|| InstructionLeak {
                kind,
                partitions: Vec::new(),
            })
    }

    pub(crate) fn insert_partition(&mut self, node: PartitionNode) -> PartitionNodeId {
        let id = PartitionNodeId(self.partitions.len());
        self.partitions.push(node);
        id
    }

    pub(crate) fn partition_mut(&mut self, id: PartitionNodeId) -> &mut PartitionNode {
        &mut self.partitions[id.0]
    }

    pub(crate) fn mark_interesting(&mut self, path: &[CallStackNodeId]) {
        for &id in path {
            self.call_stacks[id.0].interesting = true;
        }
    }
}
