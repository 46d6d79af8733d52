//! The merged call tree.
//!
//! Nodes live in an arena and reference each other by index; parent/child
//! relations are strictly downward, return traversals use the merger's
//! explicit frame stack. Root, Split and Call nodes carry successor lists;
//! the remaining variants are leaves. Every node records the testcases
//! that traversed it.

use super::testcase_set::TestcaseSet;

/// Index of a node in the call-tree arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Successor lists shared by the split-like node variants
///
/// `successors` is the linear tail every testcase of the node follows in
/// order; `split_successors` are the alternatives taken after the linear
/// part, with pairwise disjoint testcase sets.
#[derive(Debug, Clone, Default)]
pub struct SplitData {
    pub successors: Vec<NodeId>,
    pub split_successors: Vec<NodeId>,
}

/// Node payload variants
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Tree root; one per analysis run
    Root(SplitData),

    /// Alternative branch created by a split
    Split(SplitData),

    /// Function call; the subtree below it is the callee's history
    Call {
        source: u64,
        target: u64,
        call_stack_id: u64,
        data: SplitData,
    },

    /// Conditional or unconditional jump. `target` is 0 when not taken.
    Branch { source: u64, target: u64, taken: bool },

    /// Return to the caller
    Return { source: u64, target: u64 },

    /// Heap or stack allocation with its process-wide shared id
    Allocation { id: u64, size: u32, heap: bool },

    /// Memory access; `targets` maps tagged addresses to the testcases
    /// that touched them, in insertion order.
    MemoryAccess {
        instruction: u64,
        is_write: bool,
        targets: Vec<(u64, TestcaseSet)>,
    },
}

/// One node of the merged tree
///
/// **Public** - inspected by the attribution walk and the dump writer
#[derive(Debug, Clone)]
pub struct CallTreeNode {
    testcases: TestcaseSet,
    kind: NodeKind,
}

impl CallTreeNode {
    pub fn new(testcases: TestcaseSet, kind: NodeKind) -> Self {
        Self { testcases, kind }
    }

    pub fn testcases(&self) -> &TestcaseSet {
        &self.testcases
    }

    pub fn testcases_mut(&mut self) -> &mut TestcaseSet {
        &mut self.testcases
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    /// Successor lists, for the variants that have them
    ///
    /// **Public** - used wherever code distinguishes split-like nodes from leaves
    pub fn split_data(&self) -> Option<&SplitData> {
        match &self.kind {
            NodeKind::Root(data) | NodeKind::Split(data) | NodeKind::Call { data, .. } => {
                Some(data)
            }
            _ => None,
        }
    }

    pub fn split_data_mut(&mut self) -> Option<&mut SplitData> {
        match &mut self.kind {
            NodeKind::Root(data) | NodeKind::Split(data) | NodeKind::Call { data, .. } => {
                Some(data)
            }
            _ => None,
        }
    }
}

/// Arena-backed merged call tree
///
/// **Public** - built by the merger, read by the attribution walk
#[derive(Debug, Clone)]
pub struct CallTree {
    nodes: Vec<CallTreeNode>,
}

impl CallTree {
    /// Create a tree holding only the root node
    ///
    /// **Public** - constructor
    pub fn new() -> Self {
        Self {
            nodes: vec![CallTreeNode::new(
                TestcaseSet::new(),
                NodeKind::Root(SplitData::default()),
            )],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Total number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &CallTreeNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut CallTreeNode {
        &mut self.nodes[id.index()]
    }

    /// Insert a node and return its id
    ///
    /// **Public** - used by the merge engine
    pub fn insert(&mut self, node: CallTreeNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Append a new node to `parent`'s linear successors
    ///
    /// **Public** - used by the merge engine
    pub fn append_successor(&mut self, parent: NodeId, node: CallTreeNode) -> NodeId {
        let id = self.insert(node);
        self.node_mut(parent)
            .split_data_mut()
            .expect("linear successors only exist on split-like nodes")
            .successors
            .push(id);
        id
    }

    /// Split `parent` at linear successor `index` for testcase `testcase`.
    ///
    /// **Public** - used by the merge engine on linear conflicts
    ///
    /// The displaced tail and the old split-successor list move into a new
    /// split child A, whose testcase set is the parent's minus `testcase`.
    /// A second split child B receives `new_node` as its sole successor and
    /// `{testcase}` as its set. The parent's split successors become [A, B].
    ///
    /// Returns (B, id of `new_node`).
    pub fn split_at(
        &mut self,
        parent: NodeId,
        index: usize,
        testcase: u32,
        new_node: CallTreeNode,
    ) -> (NodeId, NodeId) {
        let mut displaced_set = self.node(parent).testcases().clone();
        displaced_set.remove(testcase);

        let data = self
            .node_mut(parent)
            .split_data_mut()
            .expect("split target must be a split-like node");
        let tail = data.successors.split_off(index);
        let old_splits = std::mem::take(&mut data.split_successors);

        let displaced = self.insert(CallTreeNode::new(
            displaced_set,
            NodeKind::Split(SplitData {
                successors: tail,
                split_successors: old_splits,
            }),
        ));

        let (branch, leaf) = self.new_split_branch(testcase, new_node);

        let data = self.node_mut(parent).split_data_mut().unwrap();
        data.split_successors.push(displaced);
        data.split_successors.push(branch);

        (branch, leaf)
    }

    /// Append a fresh split successor containing only `new_node`
    ///
    /// **Public** - used by the merge engine past the linear successors
    ///
    /// Returns (split successor, id of `new_node`).
    pub fn add_split_successor(
        &mut self,
        parent: NodeId,
        testcase: u32,
        new_node: CallTreeNode,
    ) -> (NodeId, NodeId) {
        let (branch, leaf) = self.new_split_branch(testcase, new_node);
        self.node_mut(parent)
            .split_data_mut()
            .expect("split successors only exist on split-like nodes")
            .split_successors
            .push(branch);
        (branch, leaf)
    }

    /// Wrap a new node in a one-successor split branch
    ///
    /// **Private** - internal helper for split_at and add_split_successor
    fn new_split_branch(&mut self, testcase: u32, new_node: CallTreeNode) -> (NodeId, NodeId) {
        let leaf = self.insert(new_node);
        let branch = self.insert(CallTreeNode::new(
            TestcaseSet::single(testcase),
            NodeKind::Split(SplitData {
                successors: vec![leaf],
                split_successors: Vec::new(),
            }),
        ));
        (branch, leaf)
    }
}

impl Default for CallTree {
    fn default() -> Self {
        Self::new()
    }
}
