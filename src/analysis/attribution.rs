//! Leakage attribution: the post-ingestion walk over the merged tree.
//!
//! A single depth-first traversal discovers every divergence point. Split
//! successors are grouped by the source instruction of their first
//! control-flow node; an instruction appearing in more than one group
//! member means at least two testcases behaved differently there. Memory
//! accesses leak independently whenever one instruction touched more than
//! one address.

use super::callstack::{
    CallStackNodeId, LeakKind, LeakageReport, PartitionNode, PartitionNodeId,
};
use crate::calltree::{CallTree, NodeId, NodeKind};
use log::debug;
use std::collections::HashMap;

/// Run the attribution walk over a merged call tree
///
/// **Public** - main entry point of the analysis stage
pub fn analyze(tree: &CallTree) -> LeakageReport {
    let mut walker = Walker {
        tree,
        report: LeakageReport::new(),
        path: vec![],
    };

    let root = walker.report.root();
    walker.path.push(root);
    walker.walk(tree.root(), root, &mut HashMap::new());

    debug!(
        "Attribution walk finished: {} leaking instructions in {} call stacks",
        walker.report.finding_count(),
        walker.report.leaking_call_stack_count()
    );

    walker.report
}

/// Open partition trees of the current call frame, keyed by instruction id
type OpenPartitions = HashMap<u64, PartitionNodeId>;

struct Walker<'t> {
    tree: &'t CallTree,
    report: LeakageReport,

    /// Call-stack tree path from the root to the current node
    path: Vec<CallStackNodeId>,
}

impl Walker<'_> {
    fn walk(&mut self, node: NodeId, stack: CallStackNodeId, open: &mut OpenPartitions) {
        let data = match self.tree.node(node).split_data() {
            Some(data) => data,
            None => return,
        };

        for &successor in &data.successors {
            match self.tree.node(successor).kind() {
                NodeKind::Call {
                    source,
                    target,
                    call_stack_id,
                    ..
                } => {
                    let child = self.report.find_or_create_child(
                        stack,
                        *call_stack_id,
                        *source,
                        *target,
                    );
                    self.path.push(child);
                    // A nested call starts a fresh partition context
                    self.walk(successor, child, &mut HashMap::new());
                    self.path.pop();
                }
                NodeKind::MemoryAccess {
                    instruction,
                    targets,
                    ..
                } if targets.len() > 1 => {
                    self.record_memory_leak(stack, successor, *instruction, targets.len());
                }
                _ => {}
            }
        }

        let splits = &data.split_successors;
        if splits.len() >= 2 {
            self.record_divergences(node, stack, open);
        }

        for (position, &branch) in splits.iter().enumerate() {
            // Each alternative gets its own view of the open partitions;
            // divergences opened inside it must not leak to siblings.
            let mut branch_open = open.clone();
            for partition in branch_open.values_mut() {
                *partition = self.child_partition(*partition, position, branch);
            }
            self.walk(branch, stack, &mut branch_open);
        }
    }

    /// Group split successors by distinguishing instruction and record a
    /// finding for every instruction observed with at least two outcomes.
    ///
    /// **Private** - internal helper for walk
    fn record_divergences(
        &mut self,
        node: NodeId,
        stack: CallStackNodeId,
        open: &mut OpenPartitions,
    ) {
        let data = self.tree.node(node).split_data().unwrap();
        let splits = &data.split_successors;

        let mut order: Vec<(u64, LeakKind)> = Vec::new();
        let mut counts: HashMap<u64, usize> = HashMap::new();
        for &branch in splits {
            if let Some((instruction, kind)) = self.distinguishing_instruction(branch) {
                if *counts.entry(instruction).or_insert(0) == 0 {
                    order.push((instruction, kind));
                }
                *counts.get_mut(&instruction).unwrap() += 1;
            }
        }

        for (instruction, kind) in order {
            if counts[&instruction] < 2 {
                continue;
            }

            let parent = match open.get(&instruction) {
                // The partition is still open from a divergence higher up;
                // extend it in place.
                Some(&parent) => parent,
                None => {
                    let root = self.report.insert_partition(PartitionNode {
                        testcases: self.tree.node(node).testcases().clone(),
                        children: Vec::new(),
                        dummy: false,
                    });
                    self.report
                        .finding_entry(stack, instruction, kind)
                        .partitions
                        .push(root);
                    open.insert(instruction, root);
                    root
                }
            };

            // One child per split successor, index-aligned with the
            // successor list so descents can follow their branch.
            for &branch in splits {
                let child = self.report.insert_partition(PartitionNode {
                    testcases: self.tree.node(branch).testcases().clone(),
                    children: Vec::new(),
                    dummy: false,
                });
                self.report.partition_mut(parent).children.push(child);
            }

            self.report.mark_interesting(&self.path);
        }
    }

    /// Source instruction of a split successor's first control-flow node
    ///
    /// **Private** - internal helper for record_divergences
    fn distinguishing_instruction(&self, branch: NodeId) -> Option<(u64, LeakKind)> {
        let first = self
            .tree
            .node(branch)
            .split_data()?
            .successors
            .first()
            .copied()?;

        match self.tree.node(first).kind() {
            NodeKind::Call { source, .. } => Some((*source, LeakKind::Call)),
            NodeKind::Return { source, .. } => Some((*source, LeakKind::Return)),
            NodeKind::Branch { source, .. } => Some((*source, LeakKind::Jump)),
            _ => None,
        }
    }

    /// Fetch the partition child for a split descent, inserting a dummy
    /// when the divergence at this node belongs to other instructions.
    ///
    /// **Private** - internal helper for walk
    fn child_partition(
        &mut self,
        parent: PartitionNodeId,
        position: usize,
        branch: NodeId,
    ) -> PartitionNodeId {
        if let Some(&child) = self.report.partition(parent).children.get(position) {
            return child;
        }

        let dummy = self.report.insert_partition(PartitionNode {
            testcases: self.tree.node(branch).testcases().clone(),
            children: Vec::new(),
            dummy: true,
        });
        self.report.partition_mut(parent).children.push(dummy);
        dummy
    }

    /// A memory access touching several addresses partitions its testcases
    /// by target, independent of any open control-flow divergence.
    ///
    /// **Private** - internal helper for walk
    fn record_memory_leak(
        &mut self,
        stack: CallStackNodeId,
        node: NodeId,
        instruction: u64,
        target_count: usize,
    ) {
        let root = self.report.insert_partition(PartitionNode {
            testcases: self.tree.node(node).testcases().clone(),
            children: Vec::with_capacity(target_count),
            dummy: false,
        });

        if let NodeKind::MemoryAccess { targets, .. } = self.tree.node(node).kind() {
            for (_, testcases) in targets {
                let child = self.report.insert_partition(PartitionNode {
                    testcases: testcases.clone(),
                    children: Vec::new(),
                    dummy: false,
                });
                self.report.partition_mut(root).children.push(child);
            }
        }

        self.report
            .finding_entry(stack, instruction, LeakKind::MemoryAccess)
            .partitions
            .push(root);
        self.report.mark_interesting(&self.path);
    }
}
