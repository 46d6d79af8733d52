//! Trace ingestion and merging.
//!
//! The merger walks the accumulated call tree alongside the record stream
//! of one testcase, extending the tree where the trace is new and splitting
//! it where the trace conflicts with the shared history. Ingestion is
//! strictly serial; one `add_trace` call fully completes before the next.

use super::address::{AddressFormatter, UNMAPPED_HEAP_ID, UNMAPPED_STACK_ID};
use super::node::{CallTree, CallTreeNode, NodeId, NodeKind, SplitData};
use super::testcase_set::TestcaseSet;
use crate::symbols::SymbolResolver;
use crate::trace::{BranchKind, ImageFileInfo, TraceRecord};
use log::{debug, warn};
use std::collections::HashMap;
use xxhash_rust::xxh3::xxh3_64;

/// Structural anomaly condition codes
///
/// Anomalies never abort ingestion; they are recovered locally and recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    /// `Return` record while no call frame was open
    EmptyCallStack = 1,

    /// Stack memory access whose allocation id has no mapping in this trace
    UnmappedStackAllocation = 2,

    /// Heap memory access whose allocation id has no mapping in this trace
    UnmappedHeapAllocation = 3,

    /// Trace continues past a point where earlier traces ended without a
    /// control-flow divergence to split against
    MissingSplitPoint = 4,

    /// Memory access conflicting with a different instruction at the same
    /// position (conditional-move-like sites)
    MemoryAccessConflict = 5,

    /// Trace ended while call frames were still open
    UnbalancedCallStack = 6,
}

impl AnomalyKind {
    /// Numeric condition code (1-6)
    pub fn code(self) -> u8 {
        self as u8
    }

    fn describe(self) -> &'static str {
        match self {
            Self::EmptyCallStack => "return with empty call frame stack",
            Self::UnmappedStackAllocation => "stack access into unmapped allocation",
            Self::UnmappedHeapAllocation => "heap access into unmapped allocation",
            Self::MissingSplitPoint => "merge point without control-flow divergence",
            Self::MemoryAccessConflict => "memory access conflicts with different instruction",
            Self::UnbalancedCallStack => "trace ended with open call frames",
        }
    }
}

/// A recorded structural anomaly
///
/// **Public** - surfaced through TraceMerger::warnings
#[derive(Debug, Clone)]
pub struct MergeWarning {
    pub testcase_id: u32,
    pub record_index: usize,
    pub kind: AnomalyKind,
}

/// Counters maintained across all ingested traces
///
/// **Public** - feeds the analysis summary
#[derive(Debug, Clone, Default)]
pub struct MergeStats {
    /// Traces merged so far
    pub traces: usize,

    /// Records consumed across all traces
    pub records: usize,

    /// Memory accesses that caused a full split (audit counter)
    pub memory_conflicts: usize,
}

/// Derive a call-stack id from its parent and the call edge
///
/// **Public** - also used to recompute expected stack ids in tests
///
/// Hashes the 24-byte little-endian concatenation `parent | source | target`.
/// The root stack id is 0; equal call sequences produce equal ids.
pub fn derive_call_stack_id(parent: u64, source: u64, target: u64) -> u64 {
    let mut buffer = [0u8; 24];
    buffer[..8].copy_from_slice(&parent.to_le_bytes());
    buffer[8..16].copy_from_slice(&source.to_le_bytes());
    buffer[16..].copy_from_slice(&target.to_le_bytes());
    xxh3_64(&buffer)
}

/// Position of the merger inside the tree while ingesting one trace
struct Cursor {
    /// Current split-like node
    node: NodeId,

    /// Next linear successor index of `node`
    index: usize,

    /// Rolling call-stack id
    call_stack_id: u64,

    /// Open call frames: (node, successor index) to resume at on return
    frames: Vec<(NodeId, usize)>,

    /// Call-stack ids saved on call entry, parallel to `frames`
    saved_ids: Vec<u64>,
}

/// Distinguishing key of a record against existing tree nodes
#[derive(Debug, Clone, Copy)]
enum StepKey {
    Call { source: u64, target: u64 },
    Branch { source: u64, target: u64, taken: bool },
    Return { source: u64, target: u64 },
    Allocation { size: u32, heap: bool },
    Memory { instruction: u64 },
}

/// Where a record landed in the tree
enum StepTarget {
    /// Existing linear successor matched
    Matched(NodeId),

    /// Fresh node appended to the linear successors
    Appended(NodeId),

    /// Linear conflict; the node sits in a new split branch
    ConflictSplit { branch: NodeId, node: NodeId },

    /// Existing split successor's first node matched
    SplitMatched { branch: NodeId, node: NodeId },

    /// No split successor matched; a fresh one was appended
    SplitAppended { branch: NodeId, node: NodeId },
}

impl StepTarget {
    /// The node representing the current record
    fn node(&self) -> NodeId {
        match self {
            Self::Matched(node) | Self::Appended(node) => *node,
            Self::ConflictSplit { node, .. }
            | Self::SplitMatched { node, .. }
            | Self::SplitAppended { node, .. } => *node,
        }
    }
}

/// Merges preprocessed traces into a shared call tree
///
/// **Public** - the central type of the crate
///
/// Holds the per-run shared state: the tree, the address interner, the
/// shared-allocation-id counter and the anomaly log.
pub struct TraceMerger {
    tree: CallTree,
    formatter: AddressFormatter,
    next_allocation_id: u64,
    warnings: Vec<MergeWarning>,
    stats: MergeStats,
    testcases: TestcaseSet,
}

impl TraceMerger {
    /// Create a merger that formats addresses through the given resolver
    ///
    /// **Public** - constructor
    pub fn new(resolver: Box<dyn SymbolResolver>) -> Self {
        Self {
            tree: CallTree::new(),
            formatter: AddressFormatter::new(resolver),
            // 0 and 1 are the unmapped-stack / unmapped-heap sentinels
            next_allocation_id: 2,
            warnings: Vec::new(),
            stats: MergeStats::default(),
            testcases: TestcaseSet::new(),
        }
    }

    /// Register the images of a trace prefix table
    ///
    /// **Public** - call before add_trace for each loaded trace
    pub fn register_images(&mut self, images: &[ImageFileInfo]) {
        for image in images {
            self.formatter.register_image(image);
        }
    }

    /// The merged call tree
    ///
    /// **Public** - input of the attribution walk
    pub fn tree(&self) -> &CallTree {
        &self.tree
    }

    /// The address interner with its cached renderings
    ///
    /// **Public** - needed by the report writers
    pub fn formatter(&self) -> &AddressFormatter {
        &self.formatter
    }

    /// Structural anomalies recorded so far
    pub fn warnings(&self) -> &[MergeWarning] {
        &self.warnings
    }

    /// Ingestion counters
    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    /// All testcase ids ingested so far
    pub fn testcases(&self) -> &TestcaseSet {
        &self.testcases
    }

    /// Merge one trace into the tree
    ///
    /// **Public** - main entry point for ingestion, strictly serial
    ///
    /// Records are consumed in order; the merger never aborts on malformed
    /// sequences, it recovers and records a warning instead.
    pub fn add_trace(
        &mut self,
        testcase_id: u32,
        records: impl IntoIterator<Item = TraceRecord>,
    ) {
        debug!("Merging trace for testcase {}", testcase_id);

        self.testcases.add(testcase_id);
        self.stats.traces += 1;

        let root = self.tree.root();
        self.tree.node_mut(root).testcases_mut().add(testcase_id);

        let mut cursor = Cursor {
            node: root,
            index: 0,
            call_stack_id: 0,
            frames: Vec::new(),
            saved_ids: Vec::new(),
        };

        // Per-trace allocation id remappings, valid only for this trace
        let mut stack_allocations: HashMap<i32, u64> = HashMap::new();
        let mut heap_allocations: HashMap<i32, u64> = HashMap::new();
        let mut warned_unmapped_stack = false;
        let mut warned_unmapped_heap = false;

        let mut record_count = 0usize;
        for (record_index, record) in records.into_iter().enumerate() {
            record_count += 1;
            match record {
                TraceRecord::Branch {
                    branch_kind,
                    source_image,
                    source_offset,
                    dest_image,
                    dest_offset,
                    taken,
                } => {
                    let source = self.formatter.intern_image(source_image, source_offset);
                    let target = if taken {
                        self.formatter.intern_image(dest_image, dest_offset)
                    } else {
                        0
                    };

                    match branch_kind {
                        BranchKind::Call => {
                            self.handle_call(&mut cursor, testcase_id, record_index, source, target)
                        }
                        BranchKind::Jump => self.handle_jump(
                            &mut cursor,
                            testcase_id,
                            record_index,
                            source,
                            target,
                            taken,
                        ),
                        BranchKind::Return => self.handle_return(
                            &mut cursor,
                            testcase_id,
                            record_index,
                            source,
                            target,
                        ),
                    }
                }

                TraceRecord::HeapAllocation { id, size } => self.handle_allocation(
                    &mut cursor,
                    testcase_id,
                    record_index,
                    id,
                    size,
                    true,
                    &mut heap_allocations,
                ),

                TraceRecord::StackAllocation { id, size } => self.handle_allocation(
                    &mut cursor,
                    testcase_id,
                    record_index,
                    id,
                    size,
                    false,
                    &mut stack_allocations,
                ),

                TraceRecord::ImageMemoryAccess {
                    is_write,
                    instruction_image,
                    instruction_offset,
                    memory_image,
                    memory_offset,
                } => {
                    let instruction = self
                        .formatter
                        .intern_image(instruction_image, instruction_offset);
                    let target = self.formatter.intern_image(memory_image, memory_offset);
                    self.handle_memory(
                        &mut cursor,
                        testcase_id,
                        record_index,
                        instruction,
                        target,
                        is_write,
                    );
                }

                TraceRecord::StackMemoryAccess {
                    is_write,
                    instruction_image,
                    instruction_offset,
                    stack_allocation,
                    memory_offset,
                } => {
                    let instruction = self
                        .formatter
                        .intern_image(instruction_image, instruction_offset);
                    let shared = match stack_allocations.get(&stack_allocation) {
                        Some(&shared) => shared,
                        None => {
                            if !warned_unmapped_stack {
                                self.warn_anomaly(
                                    testcase_id,
                                    record_index,
                                    AnomalyKind::UnmappedStackAllocation,
                                );
                                warned_unmapped_stack = true;
                            }
                            UNMAPPED_STACK_ID
                        }
                    };
                    let target = self.formatter.intern_memory(shared, memory_offset, false);
                    self.handle_memory(
                        &mut cursor,
                        testcase_id,
                        record_index,
                        instruction,
                        target,
                        is_write,
                    );
                }

                TraceRecord::HeapMemoryAccess {
                    is_write,
                    instruction_image,
                    instruction_offset,
                    heap_allocation,
                    memory_offset,
                } => {
                    let instruction = self
                        .formatter
                        .intern_image(instruction_image, instruction_offset);
                    let shared = match heap_allocations.get(&heap_allocation) {
                        Some(&shared) => shared,
                        None => {
                            if !warned_unmapped_heap {
                                self.warn_anomaly(
                                    testcase_id,
                                    record_index,
                                    AnomalyKind::UnmappedHeapAllocation,
                                );
                                warned_unmapped_heap = true;
                            }
                            UNMAPPED_HEAP_ID
                        }
                    };
                    let target = self.formatter.intern_memory(shared, memory_offset, true);
                    self.handle_memory(
                        &mut cursor,
                        testcase_id,
                        record_index,
                        instruction,
                        target,
                        is_write,
                    );
                }
            }
        }

        if !cursor.frames.is_empty() {
            self.warn_anomaly(
                testcase_id,
                record_count.saturating_sub(1),
                AnomalyKind::UnbalancedCallStack,
            );
        }

        self.stats.records += record_count;
        debug!(
            "Merged testcase {}: {} records, tree now has {} nodes",
            testcase_id,
            record_count,
            self.tree.len()
        );
    }

    /// Merge a call record and descend into the callee subtree
    ///
    /// **Private** - internal sub-handler for add_trace
    fn handle_call(
        &mut self,
        cursor: &mut Cursor,
        testcase: u32,
        record_index: usize,
        source: u64,
        target: u64,
    ) {
        // The rolling id changes before the tree is touched; the saved id
        // is restored by the matching return.
        cursor.saved_ids.push(cursor.call_stack_id);
        let call_stack_id = derive_call_stack_id(cursor.call_stack_id, source, target);
        cursor.call_stack_id = call_stack_id;

        let key = StepKey::Call { source, target };
        let (step, weird) = advance_cursor(&mut self.tree, cursor, testcase, key, || {
            NodeKind::Call {
                source,
                target,
                call_stack_id,
                data: SplitData::default(),
            }
        });
        if weird {
            self.warn_anomaly(testcase, record_index, AnomalyKind::MissingSplitPoint);
        }

        // Descend into the call subtree. The frame resumes after the call
        // site once the matching return arrives.
        match step {
            StepTarget::Matched(node) | StepTarget::Appended(node) => {
                cursor.frames.push((cursor.node, cursor.index + 1));
                cursor.node = node;
                cursor.index = 0;
            }
            StepTarget::ConflictSplit { branch, node }
            | StepTarget::SplitMatched { branch, node }
            | StepTarget::SplitAppended { branch, node } => {
                cursor.frames.push((branch, 1));
                cursor.node = node;
                cursor.index = 0;
            }
        }
    }

    /// Merge a jump record
    ///
    /// **Private** - internal sub-handler for add_trace
    fn handle_jump(
        &mut self,
        cursor: &mut Cursor,
        testcase: u32,
        record_index: usize,
        source: u64,
        target: u64,
        taken: bool,
    ) {
        let key = StepKey::Branch {
            source,
            target,
            taken,
        };
        let (step, weird) = advance_cursor(&mut self.tree, cursor, testcase, key, || {
            NodeKind::Branch {
                source,
                target,
                taken,
            }
        });
        if weird {
            self.warn_anomaly(testcase, record_index, AnomalyKind::MissingSplitPoint);
        }
        follow_leaf(cursor, &step);
    }

    /// Merge a return record and pop back to the caller frame
    ///
    /// **Private** - internal sub-handler for add_trace
    fn handle_return(
        &mut self,
        cursor: &mut Cursor,
        testcase: u32,
        record_index: usize,
        source: u64,
        target: u64,
    ) {
        let key = StepKey::Return { source, target };
        let (step, weird) = advance_cursor(&mut self.tree, cursor, testcase, key, || {
            NodeKind::Return { source, target }
        });
        if weird {
            self.warn_anomaly(testcase, record_index, AnomalyKind::MissingSplitPoint);
        }
        follow_leaf(cursor, &step);

        match cursor.frames.pop() {
            Some((node, index)) => {
                cursor.node = node;
                cursor.index = index;
                cursor.call_stack_id = cursor.saved_ids.pop().unwrap_or(0);
            }
            None => {
                self.warn_anomaly(testcase, record_index, AnomalyKind::EmptyCallStack);
                cursor.node = self.tree.root();
                cursor.index = 0;
                cursor.call_stack_id = 0;
                cursor.saved_ids.clear();
            }
        }
    }

    /// Merge an allocation record and remap its per-trace id
    ///
    /// **Private** - internal sub-handler for add_trace
    fn handle_allocation(
        &mut self,
        cursor: &mut Cursor,
        testcase: u32,
        record_index: usize,
        trace_allocation_id: i32,
        size: u32,
        heap: bool,
        allocations: &mut HashMap<i32, u64>,
    ) {
        let key = StepKey::Allocation { size, heap };

        // A shared id is minted only when a new node is actually created;
        // matches reuse the id already stored on the node.
        let next_allocation_id = &mut self.next_allocation_id;
        let (step, weird) = advance_cursor(&mut self.tree, cursor, testcase, key, || {
            let id = *next_allocation_id;
            *next_allocation_id += 1;
            NodeKind::Allocation { id, size, heap }
        });
        if weird {
            self.warn_anomaly(testcase, record_index, AnomalyKind::MissingSplitPoint);
        }

        if let NodeKind::Allocation { id, .. } = self.tree.node(step.node()).kind() {
            allocations.insert(trace_allocation_id, *id);
        }

        follow_leaf(cursor, &step);
    }

    /// Merge a memory access record into the per-instruction target map
    ///
    /// **Private** - internal sub-handler for add_trace
    fn handle_memory(
        &mut self,
        cursor: &mut Cursor,
        testcase: u32,
        record_index: usize,
        instruction: u64,
        target: u64,
        is_write: bool,
    ) {
        let key = StepKey::Memory { instruction };
        let (step, weird) = advance_cursor(&mut self.tree, cursor, testcase, key, || {
            NodeKind::MemoryAccess {
                instruction,
                is_write,
                targets: vec![(target, TestcaseSet::single(testcase))],
            }
        });
        if weird {
            self.warn_anomaly(testcase, record_index, AnomalyKind::MissingSplitPoint);
        }

        match &step {
            StepTarget::Matched(node) | StepTarget::SplitMatched { node, .. } => {
                if let NodeKind::MemoryAccess { targets, .. } =
                    self.tree.node_mut(*node).kind_mut()
                {
                    match targets.iter_mut().find(|(address, _)| *address == target) {
                        Some((_, testcases)) => testcases.add(testcase),
                        None => targets.push((target, TestcaseSet::single(testcase))),
                    }
                }
            }
            StepTarget::ConflictSplit { .. } => {
                self.stats.memory_conflicts += 1;
                self.warn_anomaly(testcase, record_index, AnomalyKind::MemoryAccessConflict);
            }
            _ => {}
        }

        follow_leaf(cursor, &step);
    }

    /// Log and record a structural anomaly
    ///
    /// **Private** - internal helper for the sub-handlers
    fn warn_anomaly(&mut self, testcase_id: u32, record_index: usize, kind: AnomalyKind) {
        warn!(
            "Structural anomaly (code {}) in testcase {} at record {}: {}",
            kind.code(),
            testcase_id,
            record_index,
            kind.describe()
        );
        self.warnings.push(MergeWarning {
            testcase_id,
            record_index,
            kind,
        });
    }
}

/// Advance past a leaf record
///
/// **Private** - internal cursor bookkeeping
fn follow_leaf(cursor: &mut Cursor, step: &StepTarget) {
    match step {
        StepTarget::Matched(_) | StepTarget::Appended(_) => cursor.index += 1,
        StepTarget::ConflictSplit { branch, .. }
        | StepTarget::SplitMatched { branch, .. }
        | StepTarget::SplitAppended { branch, .. } => {
            cursor.node = *branch;
            cursor.index = 1;
        }
    }
}

/// Apply the six-case merge decision tree for one record
///
/// **Private** - internal core of the sub-handlers
///
/// Returns where the record landed plus whether the "missing split point"
/// anomaly fired (trace continues where earlier traces ended without a
/// divergence to split against).
fn advance_cursor(
    tree: &mut CallTree,
    cursor: &mut Cursor,
    testcase: u32,
    key: StepKey,
    make_node: impl FnOnce() -> NodeKind,
) -> (StepTarget, bool) {
    let current = cursor.node;
    let data = tree
        .node(current)
        .split_data()
        .expect("cursor must rest on a split-like node");

    // Case 1/2: a linear successor exists at the cursor position
    if let Some(&successor) = data.successors.get(cursor.index) {
        if matches_linear(tree.node(successor).kind(), key) {
            tree.node_mut(successor).testcases_mut().add(testcase);
            return (StepTarget::Matched(successor), false);
        }

        let node = CallTreeNode::new(TestcaseSet::single(testcase), make_node());
        let (branch, node) = tree.split_at(current, cursor.index, testcase, node);
        return (StepTarget::ConflictSplit { branch, node }, false);
    }

    // Case 3: only this testcase ever reached the node; extend in place
    if tree.node(current).testcases().count() == 1 {
        let node =
            tree.append_successor(current, CallTreeNode::new(TestcaseSet::single(testcase), make_node()));
        return (StepTarget::Appended(node), false);
    }

    // Case 4: an existing split successor starts with a matching node
    let split_count = tree.node(current).split_data().unwrap().split_successors.len();
    for position in 0..split_count {
        let branch = tree.node(current).split_data().unwrap().split_successors[position];
        let first = tree
            .node(branch)
            .split_data()
            .and_then(|data| data.successors.first().copied());
        if let Some(first) = first {
            if matches_split(tree.node(first).kind(), key) {
                tree.node_mut(branch).testcases_mut().add(testcase);
                tree.node_mut(first).testcases_mut().add(testcase);
                return (StepTarget::SplitMatched { branch, node: first }, false);
            }
        }
    }

    // Case 5 (and 6 when no split successors exist at all): new alternative.
    // Without existing split successors this position saw earlier traces
    // end mid-stream, so the new branch has nothing to be disjoint against.
    let weird = split_count == 0;
    let node = CallTreeNode::new(TestcaseSet::single(testcase), make_node());
    let (branch, node) = tree.add_split_successor(current, testcase, node);
    (StepTarget::SplitAppended { branch, node }, weird)
}

/// Full comparison for linear successors
///
/// **Private** - internal helper for advance_cursor
fn matches_linear(kind: &NodeKind, key: StepKey) -> bool {
    match (kind, key) {
        (
            NodeKind::Call { source, target, .. },
            StepKey::Call {
                source: s,
                target: t,
            },
        ) => *source == s && *target == t,
        (
            NodeKind::Branch {
                source,
                target,
                taken,
            },
            StepKey::Branch {
                source: s,
                target: t,
                taken: tk,
            },
        ) => *source == s && *target == t && *taken == tk,
        (
            NodeKind::Return { source, target },
            StepKey::Return {
                source: s,
                target: t,
            },
        ) => *source == s && *target == t,
        (
            NodeKind::Allocation { size, heap, .. },
            StepKey::Allocation {
                size: sz,
                heap: h,
            },
        ) => *size == sz && *heap == h,
        (NodeKind::MemoryAccess { instruction, .. }, StepKey::Memory { instruction: i }) => {
            *instruction == i
        }
        _ => false,
    }
}

/// Comparison for split-successor heads; branch direction is informational
/// there, only source and target distinguish alternatives.
///
/// **Private** - internal helper for advance_cursor
fn matches_split(kind: &NodeKind, key: StepKey) -> bool {
    match (kind, key) {
        (
            NodeKind::Branch { source, target, .. },
            StepKey::Branch {
                source: s,
                target: t,
                ..
            },
        ) => *source == s && *target == t,
        _ => matches_linear(kind, key),
    }
}
