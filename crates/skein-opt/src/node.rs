//! Dependency nodes and the arena that owns them.
//!
//! Every operation, wire allocation, block argument, and terminator in
//! a kernel body gets one [`Node`] in a single [`Arena`]. Nodes refer
//! to each other by stable [`NodeId`] handles: `dependencies` is the
//! ordered operand list (order is load-bearing for regeneration) and
//! `successors` is the unordered consumer set. Structural passes rewire
//! these links in place; detached nodes stay in the arena but become
//! unreachable from any graph root.

use std::fmt;
use std::mem;

use skein_ir::{Block as IrBlock, Kernel, OpKind, Operation, Ty, ValueId};

use crate::cond::IfNode;
use crate::lifetime::LifetimePool;

/// Identity of one unbroken linear wire, globally unique per kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualQid(pub u32);

impl fmt::Display for VirtualQid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qid {}", self.0)
    }
}

/// A physical qubit slot assigned during lifetime analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysicalQid(pub u32);

impl fmt::Display for PhysicalQid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qubit {}", self.0)
    }
}

/// Stable handle to a node in an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Monotonic source of fresh virtual wire identities.
///
/// Splitting an alloc/dealloc pair across conditional branches mints a
/// fresh identity for the copy, so no two live wires ever share a qid
/// even on disjoint paths through nested conditionals.
#[derive(Debug, Default)]
pub struct QidCounter {
    next: u32,
}

impl QidCounter {
    /// Mint a fresh, never-before-used qid.
    pub fn fresh(&mut self) -> VirtualQid {
        let qid = VirtualQid(self.next);
        self.next += 1;
        qid
    }
}

/// A small insertion-ordered set.
///
/// Iteration order is insertion order, which keeps every traversal in
/// the passes deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSet<T: Copy + PartialEq> {
    items: Vec<T>,
}

// Derived `Default` would demand `T: Default`, which the id types
// deliberately do not implement.
impl<T: Copy + PartialEq> Default for IndexSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + PartialEq> IndexSet<T> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self { items: vec![] }
    }

    /// Insert an item, returning false if it was already present.
    pub fn insert(&mut self, item: T) -> bool {
        if self.items.contains(&item) {
            return false;
        }
        self.items.push(item);
        true
    }

    /// Remove an item, returning false if it was not present.
    pub fn remove(&mut self, item: T) -> bool {
        match self.items.iter().position(|x| *x == item) {
            Some(idx) => {
                self.items.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Check membership.
    pub fn contains(&self, item: T) -> bool {
        self.items.contains(&item)
    }

    /// The first item in insertion order.
    pub fn first(&self) -> Option<T> {
        self.items.first().copied()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.items.iter().copied()
    }

    /// Insert every item of `other`.
    pub fn extend_from(&mut self, other: &IndexSet<T>) {
        for item in other.iter() {
            self.insert(item);
        }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copy the items into a plain vector.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.clone()
    }
}

impl<T: Copy + PartialEq> FromIterator<T> for IndexSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for item in iter {
            set.insert(item);
        }
        set
    }
}

/// A dependency on a specific result of a specific node.
///
/// If a node uses multiple results of one dependency, `result_idx`
/// records which result feeds which operand; without it regeneration
/// could not tell, say, a control wire from a target wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    /// The producing node.
    pub node: NodeId,
    /// Which result of the producer this edge carries.
    pub result_idx: usize,
    /// The virtual wire flowing along the edge, if any.
    pub qid: Option<VirtualQid>,
    /// The physical qubit once assigned.
    pub qubit: Option<PhysicalQid>,
}

impl Edge {
    /// Create an edge, deriving the qid from the producer.
    pub fn new(arena: &Arena, node: NodeId, result_idx: usize) -> Self {
        Self {
            node,
            result_idx,
            qid: arena.qid_for_result(node, result_idx),
            qubit: None,
        }
    }
}

/// The closed set of node kinds.
#[derive(Debug)]
pub enum NodeKind {
    /// A wire birth: `borrow_wire` from a named set. Always a leaf.
    Alloc {
        /// Wire set the allocation borrows from.
        set: String,
        /// The physical slot, once assigned.
        qubit: Option<PhysicalQid>,
    },
    /// A wire death: `return_wire`. Always a root.
    Dealloc,
    /// A quantum or classical operation.
    Op {
        /// The operation to re-emit during regeneration.
        op: OpKind,
        /// Whether the operation acts on wires.
        quantum: bool,
    },
    /// An incoming linear value at a block boundary.
    Arg {
        /// Position among the block's arguments.
        arg_num: usize,
    },
    /// A reference to a classical value produced in an ancestor scope.
    Shadow {
        /// The node producing the shadowed value.
        shadowed: NodeId,
        /// Which of its results is shadowed.
        result_idx: usize,
    },
    /// A block exit. Scheduled last in its block.
    Terminator {
        /// The terminator to re-emit (`yield` or `return`).
        op: OpKind,
    },
    /// A conditional containing two nested blocks.
    If(Box<IfNode>),
    /// Transient placeholder while an [`IfNode`] payload is checked
    /// out via [`Arena::take_if`].
    Detached,
}

/// A node in the dependency DAG.
#[derive(Debug)]
pub struct Node {
    /// What the node is.
    pub kind: NodeKind,
    /// Consumers of any of this node's results. Unordered.
    pub successors: IndexSet<NodeId>,
    /// Operands, in operand order.
    pub dependencies: Vec<Edge>,
    /// The virtual wires flowing through this node.
    pub qids: IndexSet<VirtualQid>,
    /// Assigned cycle, once scheduled.
    pub cycle: Option<u32>,
    /// Set once the node has been re-emitted in the current pass.
    pub has_codegen: bool,
    /// Longest path to any leaf, in cycles, including this node.
    pub height: u32,
    /// Result values produced by the most recent regeneration.
    pub gen_results: Vec<ValueId>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            successors: IndexSet::new(),
            dependencies: vec![],
            qids: IndexSet::new(),
            cycle: None,
            has_codegen: false,
            height: 0,
            gen_results: vec![],
        }
    }
}

/// Result types an operation produces when re-emitted.
fn op_result_tys(op: &OpKind) -> Vec<Ty> {
    match op {
        OpKind::Gate(g) => vec![Ty::Wire; g.num_wires()],
        OpKind::Measure => vec![Ty::Meas, Ty::Wire],
        OpKind::Discriminate => vec![Ty::Bit],
        OpKind::ConstFloat(_) => vec![Ty::Float],
        OpKind::ConstInt(_) => vec![Ty::Int],
        _ => vec![],
    }
}

/// Whether result `result_idx` of `op` is a linear wire value.
fn result_is_wire(op: &OpKind, result_idx: usize) -> bool {
    match op {
        OpKind::Measure => result_idx == 1,
        OpKind::Gate(_) | OpKind::BorrowWire { .. } | OpKind::If { .. } => true,
        _ => false,
    }
}

/// Owns every node built for one kernel.
///
/// Nodes are never freed while the arena lives; structural passes
/// detach them from the reachable graph instead.
#[derive(Debug, Default)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl std::ops::Index<NodeId> for Arena {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }
}

impl std::ops::IndexMut<NodeId> for Arena {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }
}

impl Arena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("arena overflow"));
        self.nodes.push(node);
        id
    }

    /// Create an allocation node for a fresh virtual wire.
    pub fn new_alloc(&mut self, set: String, qid: VirtualQid) -> NodeId {
        let mut node = Node::new(NodeKind::Alloc { set, qubit: None });
        node.qids.insert(qid);
        self.push(node)
    }

    /// Create a block-argument node.
    pub fn new_arg(&mut self, arg_num: usize, qid: Option<VirtualQid>) -> NodeId {
        let mut node = Node::new(NodeKind::Arg { arg_num });
        if let Some(qid) = qid {
            node.qids.insert(qid);
        }
        self.push(node)
    }

    /// Position of an argument node among its block's arguments.
    pub fn arg_num(&self, id: NodeId) -> usize {
        match self[id].kind {
            NodeKind::Arg { arg_num } => arg_num,
            _ => panic!("arg_num on a non-argument node"),
        }
    }

    /// Renumber an argument node after arguments shift.
    pub fn set_arg_num(&mut self, id: NodeId, num: usize) {
        match &mut self[id].kind {
            NodeKind::Arg { arg_num } => *arg_num = num,
            _ => panic!("set_arg_num on a non-argument node"),
        }
    }

    /// Create a shadow node referencing a classical value from an
    /// ancestor scope.
    pub fn new_shadow(&mut self, shadowed: NodeId, result_idx: usize) -> NodeId {
        self.push(Node::new(NodeKind::Shadow {
            shadowed,
            result_idx,
        }))
    }

    /// Create an operation-like node (op, dealloc, terminator, or if),
    /// wiring successor links for its dependencies and computing qids
    /// and height.
    pub fn new_op(&mut self, kind: NodeKind, dependencies: Vec<Edge>) -> NodeId {
        let terminator = matches!(kind, NodeKind::Terminator { .. });
        let id = self.push(Node::new(kind));
        self[id].dependencies = dependencies;

        for i in 0..self[id].dependencies.len() {
            let edge = self[id].dependencies[i];
            self[edge.node].successors.insert(id);
        }

        // Terminators track every wire they return; other nodes only
        // track wires when they are themselves quantum.
        let quantum = terminator || self.is_quantum_op(id);
        if quantum {
            for i in 0..self[id].dependencies.len() {
                if let Some(qid) = self[id].dependencies[i].qid {
                    self[id].qids.insert(qid);
                }
            }
        }

        self.update_height(id);
        id
    }

    /// Check out the conditional payload of `id` for mutation.
    ///
    /// The node's links stay in the arena; only the nested blocks move
    /// out. Must be paired with [`Arena::put_if`].
    pub fn take_if(&mut self, id: NodeId) -> Box<IfNode> {
        match mem::replace(&mut self[id].kind, NodeKind::Detached) {
            NodeKind::If(ifn) => ifn,
            _ => panic!("take_if on a non-container node"),
        }
    }

    /// Return a conditional payload checked out with [`Arena::take_if`].
    pub fn put_if(&mut self, id: NodeId, ifn: Box<IfNode>) {
        assert!(
            matches!(self[id].kind, NodeKind::Detached),
            "put_if on a node that was not taken"
        );
        self[id].kind = NodeKind::If(ifn);
    }

    /// True if the node has no successors and can have them (wire
    /// deaths and terminators).
    pub fn is_root(&self, id: NodeId) -> bool {
        match self[id].kind {
            NodeKind::Arg { .. } | NodeKind::Shadow { .. } => false,
            _ => self[id].successors.is_empty(),
        }
    }

    /// True if the node has no dependencies.
    pub fn is_leaf(&self, id: NodeId) -> bool {
        match self[id].kind {
            NodeKind::Arg { .. } | NodeKind::Shadow { .. } => true,
            _ => self[id].dependencies.is_empty(),
        }
    }

    /// Cycles the node occupies in a schedule.
    pub fn num_ticks(&self, id: NodeId) -> u32 {
        match &self[id].kind {
            NodeKind::Op { quantum, .. } => u32::from(*quantum),
            NodeKind::If(ifn) => ifn.then_block.height().max(ifn.else_block.height()),
            _ => 0,
        }
    }

    /// True if the node carries no cycle cost.
    pub fn is_skip(&self, id: NodeId) -> bool {
        self.num_ticks(id) == 0
    }

    /// True if the node is a quantum value or operation.
    pub fn is_quantum_op(&self, id: NodeId) -> bool {
        match &self[id].kind {
            NodeKind::Alloc { .. } | NodeKind::Dealloc | NodeKind::Arg { .. } => true,
            NodeKind::Op { quantum, .. } => *quantum,
            NodeKind::Shadow { .. } => false,
            NodeKind::Terminator { .. } => !self[id].qids.is_empty(),
            NodeKind::If(_) => self.num_ticks(id) > 0,
            NodeKind::Detached => unreachable!("detached node"),
        }
    }

    /// True if this node is a wire allocation.
    pub fn is_alloc(&self, id: NodeId) -> bool {
        matches!(self[id].kind, NodeKind::Alloc { .. })
    }

    /// True if this node contains nested blocks.
    pub fn is_container(&self, id: NodeId) -> bool {
        matches!(self[id].kind, NodeKind::If(_) | NodeKind::Detached)
    }

    /// True if the node is quantum or has a quantum ancestor. After
    /// the front-end's cleanup passes this is only false for classical
    /// constants.
    pub fn is_quantum_dependent(&self, id: NodeId) -> bool {
        if self.is_quantum_op(id) {
            return true;
        }
        self[id]
            .dependencies
            .iter()
            .any(|dep| self.is_quantum_dependent(dep.node))
    }

    /// The physical qubit of an allocation node, if assigned.
    pub fn alloc_qubit(&self, id: NodeId) -> Option<PhysicalQid> {
        match self[id].kind {
            NodeKind::Alloc { qubit, .. } => qubit,
            _ => panic!("alloc_qubit on a non-allocation node"),
        }
    }

    /// The virtual wire of an allocation node.
    pub fn alloc_qid(&self, id: NodeId) -> VirtualQid {
        assert!(self.is_alloc(id), "alloc_qid on a non-allocation node");
        self[id].qids.first().expect("allocation without a qid")
    }

    /// Name used only for structural-equivalence comparisons.
    pub fn op_name(&self, id: NodeId) -> String {
        match &self[id].kind {
            NodeKind::Alloc { .. } => "init".to_string(),
            NodeKind::Dealloc => "return_wire".to_string(),
            // Constants are compared by value.
            NodeKind::Op {
                op: OpKind::ConstFloat(v),
                ..
            } => v.to_string(),
            NodeKind::Op {
                op: OpKind::ConstInt(v),
                ..
            } => v.to_string(),
            NodeKind::Op { op, .. } => op.name().to_string(),
            NodeKind::Arg { arg_num } => format!("{arg_num}arg"),
            NodeKind::Shadow { shadowed, .. } => format!("{}shadow", self.op_name(*shadowed)),
            NodeKind::Terminator { op } => op.name().to_string(),
            NodeKind::If(_) => "if".to_string(),
            NodeKind::Detached => unreachable!("detached node"),
        }
    }

    /// The physical qubits flowing through this node.
    pub fn qubits_of(&self, id: NodeId) -> IndexSet<PhysicalQid> {
        let mut qubits = IndexSet::new();
        match &self[id].kind {
            NodeKind::Alloc { qubit, .. } => {
                if let Some(q) = qubit {
                    qubits.insert(*q);
                }
            }
            NodeKind::Dealloc | NodeKind::Terminator { .. } => {
                for dep in &self[id].dependencies {
                    if let Some(q) = dep.qubit {
                        qubits.insert(q);
                    }
                }
            }
            NodeKind::If(ifn) => {
                qubits.extend_from(&ifn.then_block.qubits());
                qubits.extend_from(&ifn.else_block.qubits());
            }
            _ => {}
        }
        qubits
    }

    /// The index of the dependency carrying `qid`, if any.
    pub fn dependency_for_qid(&self, id: NodeId, qid: VirtualQid) -> Option<usize> {
        self[id]
            .dependencies
            .iter()
            .position(|dep| dep.qid == Some(qid))
    }

    /// The immediate consumer of `qid` downstream of this node.
    pub fn successor_for_qid(&self, id: NodeId, qid: VirtualQid) -> NodeId {
        assert!(
            self[id].qids.contains(qid),
            "asking for a qid that does not flow through this node"
        );
        for successor in self[id].successors.iter() {
            // A discriminate patched onto a measure is not on the wire.
            if !self.is_quantum_op(successor) {
                continue;
            }
            // The qid may flow through a different successor first, so
            // check the dependency actually points back at this node.
            if let Some(idx) = self.dependency_for_qid(successor, qid) {
                if self[successor].dependencies[idx].node == id {
                    return successor;
                }
            }
        }
        panic!("could not find successor for linear wire");
    }

    /// The virtual wire carried out by result `result_idx`.
    pub fn qid_for_result(&self, id: NodeId, result_idx: usize) -> Option<VirtualQid> {
        match &self[id].kind {
            NodeKind::Alloc { .. } => {
                assert!(result_idx == 0, "invalid result index");
                self[id].qids.first()
            }
            NodeKind::Dealloc => None,
            NodeKind::Op { op, quantum } => {
                if !quantum {
                    return None;
                }
                let operand = op.wire_operand_for_result(result_idx);
                self[id].dependencies.get(operand).and_then(|dep| dep.qid)
            }
            NodeKind::Arg { .. } => {
                assert!(result_idx == 0, "invalid result index");
                if self[id].qids.len() == 1 {
                    self[id].qids.first()
                } else {
                    None
                }
            }
            NodeKind::Shadow { .. } => None,
            NodeKind::Terminator { .. } => {
                let dep = self[id].dependencies.get(result_idx)?;
                if !self.is_quantum_op(dep.node) {
                    return None;
                }
                dep.qid
            }
            NodeKind::If(ifn) => {
                let term = ifn.then_block.terminator_id();
                self.qid_for_result(term, result_idx)
            }
            NodeKind::Detached => unreachable!("detached node"),
        }
    }

    /// Which result carries the wire consumed by operand `operand_idx`.
    pub fn result_for_operand(&self, id: NodeId, operand_idx: usize) -> usize {
        match &self[id].kind {
            NodeKind::Op { op, .. } => op.wire_result_for_operand(operand_idx),
            // Conditional operands are [condition, wires..] and the
            // results are the wires.
            NodeKind::If(_) | NodeKind::Detached => operand_idx - 1,
            _ => panic!("result_for_operand on a resultless node"),
        }
    }

    /// Recompute the height of `id` from its dependencies.
    pub fn update_height(&mut self, id: NodeId) {
        let mut height = 0;
        for dep in &self[id].dependencies {
            height = height.max(self[dep.node].height);
        }
        let height = height + self.num_ticks(id);
        self[id].height = height;
    }

    /// Recompute heights of `id` and everything below it, dependencies
    /// first so each update sees fresh information.
    pub fn update_height_rec(&mut self, seen: &mut IndexSet<NodeId>, id: NodeId) {
        if !seen.insert(id) {
            return;
        }
        let deps: Vec<NodeId> = self[id].dependencies.iter().map(|d| d.node).collect();
        for dep in deps {
            self.update_height_rec(seen, dep);
        }
        self.update_height(id);
    }

    /// True if the two nodes (and recursively their producers) compute
    /// the same thing, so the operation can be hoisted before a
    /// conditional.
    pub fn prefix_equivalent(&self, a: NodeId, b: NodeId) -> bool {
        // Allocations are equivalent only when they are the same
        // physical qubit; virtual identities are per-wire.
        if self.is_alloc(a) || self.is_alloc(b) {
            return self.is_alloc(a)
                && self.is_alloc(b)
                && self.alloc_qubit(a).is_some()
                && self.alloc_qubit(a) == self.alloc_qubit(b);
        }
        if self.op_name(a) != self.op_name(b) {
            return false;
        }
        if self[a].height != self[b].height {
            return false;
        }
        if self[a].dependencies.len() != self[b].dependencies.len() {
            return false;
        }
        for (da, db) in self[a].dependencies.iter().zip(&self[b].dependencies) {
            if da.qid != db.qid {
                if da.qubit.is_none() {
                    return false;
                }
                if da.qubit != db.qubit {
                    return false;
                }
            }
            if !self.prefix_equivalent(da.node, db.node) {
                return false;
            }
        }
        true
    }

    /// True if the two nodes consume the same physical wires, without
    /// looking at producers. Evaluated bottom-up on already-lifted
    /// successors, so producer recursion is deliberately skipped.
    pub fn postfix_equivalent(&self, a: NodeId, b: NodeId) -> bool {
        if self.op_name(a) != self.op_name(b) {
            return false;
        }
        if self[a].dependencies.len() != self[b].dependencies.len() {
            return false;
        }
        for (da, db) in self[a].dependencies.iter().zip(&self[b].dependencies) {
            if da.qubit != db.qubit {
                return false;
            }
            if da.qid != db.qid && (da.qubit.is_some() || db.qubit.is_some()) {
                return false;
            }
        }
        true
    }

    /// Retarget every consumer of `id` onto `other` instead. Safe only
    /// when `id` has a single result.
    pub fn replace_with(&mut self, id: NodeId, other: Edge) {
        let successors = self[id].successors.to_vec();
        for successor in successors {
            for i in 0..self[successor].dependencies.len() {
                if self[successor].dependencies[i].node == id {
                    self[successor].dependencies[i] = other;
                    self[other.node].successors.remove(id);
                    self[other.node].successors.insert(successor);
                }
            }
        }
    }

    /// Record `qubit` on the edge for `qid` in this node and all
    /// downstream nodes the wire flows through.
    pub fn update_with_physical(&mut self, id: NodeId, qid: VirtualQid, qubit: PhysicalQid) {
        for dep in &mut self[id].dependencies {
            if dep.qid == Some(qid) {
                dep.qubit = Some(qubit);
                break;
            }
        }
        let successors = self[id].successors.to_vec();
        for successor in successors {
            if self[successor].qids.contains(qid) {
                self.update_with_physical(successor, qid, qubit);
            }
        }
    }

    /// Rename `old` to `new` in this node and all downstream nodes the
    /// wire flows through.
    pub fn update_qid(&mut self, id: NodeId, old: VirtualQid, new: VirtualQid) {
        self[id].qids.remove(old);
        self[id].qids.insert(new);

        if let Some(idx) = self.dependency_for_qid(id, old) {
            self[id].dependencies[idx].qid = Some(new);
        }

        let successors = self[id].successors.to_vec();
        for successor in successors {
            if self[successor].qids.contains(old) {
                self.update_qid(successor, old, new);
            }
        }
    }

    /// Assign `phys` to the allocation `id`, threading the assignment
    /// through every edge carrying its wire.
    pub fn assign_to_physical(&mut self, id: NodeId, phys: PhysicalQid) {
        let qid = self.alloc_qid(id);
        match &mut self[id].kind {
            NodeKind::Alloc { qubit, .. } => *qubit = Some(phys),
            _ => unreachable!(),
        }
        self.update_with_physical(id, qid, phys);
    }

    /// Splice this node out of the producer chain for `qid`,
    /// reconnecting its consumer directly to its producer.
    ///
    /// Conditional nodes need block cleanup on top of this; callers
    /// holding an [`IfNode`] use [`IfNode::erase_edge_for_qid`].
    pub fn erase_edge_for_qid(&mut self, id: NodeId, qid: VirtualQid) {
        match &self[id].kind {
            NodeKind::Dealloc => {
                if self[id].qids.contains(qid) {
                    self[id].dependencies.clear();
                }
            }
            NodeKind::Terminator { .. } => {
                if let Some(idx) = self.dependency_for_qid(id, qid) {
                    self[id].dependencies.remove(idx);
                }
            }
            NodeKind::Op { .. } | NodeKind::Detached => self.erase_edge_for_qid_op(id, qid),
            NodeKind::If(_) => {
                let mut ifn = self.take_if(id);
                ifn.erase_edge_for_qid(self, id, qid);
                self.put_if(id, ifn);
            }
            _ => panic!("cannot erase an edge through a leaf node"),
        }
    }

    /// The operation-node part of [`Arena::erase_edge_for_qid`].
    pub(crate) fn erase_edge_for_qid_op(&mut self, id: NodeId, qid: VirtualQid) {
        assert!(self[id].qids.contains(qid), "erasing edge for unknown qid");
        let successor = self.successor_for_qid(id, qid);
        let out_idx = self
            .dependency_for_qid(successor, qid)
            .expect("successor lost its dependency");
        let in_idx = self
            .dependency_for_qid(id, qid)
            .expect("node lost its dependency");
        let dependency = self[id].dependencies.remove(in_idx);
        self[successor].dependencies[out_idx] = dependency;
        self[dependency.node].successors.insert(successor);

        // Keep the successor link only if another wire still ties us.
        if !self[successor].dependencies.iter().any(|d| d.node == id) {
            self[id].successors.remove(successor);
        }

        // Not recursive, but enough for the lifting pass to see newly
        // liftable successors.
        self.update_height(successor);

        if !self[id].dependencies.iter().any(|d| d.node == dependency.node) {
            self[dependency.node].successors.remove(id);
        }
    }

    /// Detach an operation node entirely, splicing every wire through
    /// it and dropping classical constants only it depended on.
    ///
    /// Classical successors (a discriminate on an erased measure, for
    /// instance) are the caller's responsibility.
    pub fn erase_op(&mut self, id: NodeId) {
        let successors = self[id].successors.to_vec();
        for successor in successors {
            let mut remove = true;
            for i in 0..self[successor].dependencies.len() {
                let edge = self[successor].dependencies[i];
                if edge.node != id {
                    continue;
                }
                let wire = match &self[id].kind {
                    NodeKind::Op { op, .. } => result_is_wire(op, edge.result_idx),
                    _ => edge.qid.is_some(),
                };
                if wire {
                    let qid = edge.qid.expect("wire edge without a qid");
                    let idx = self
                        .dependency_for_qid(id, qid)
                        .expect("erased node lost its wire dependency");
                    let dependency = self[id].dependencies[idx];
                    self[successor].dependencies[i] = dependency;
                    self[dependency.node].successors.insert(successor);
                } else {
                    remove = false;
                }
            }
            if remove {
                self[id].successors.remove(successor);
                self.update_height(successor);
            }
        }

        // Drop constants that only this node used.
        let deps = self[id].dependencies.clone();
        for dep in deps {
            self[dep.node].successors.remove(id);
        }
        self[id].dependencies.clear();
    }

    /// Recursively collect nodes scheduled exactly at `cycle`,
    /// searching down from `id`.
    pub fn collect_nodes_at_cycle(
        &self,
        id: NodeId,
        cycle: u32,
        seen: &mut IndexSet<NodeId>,
        out: &mut IndexSet<NodeId>,
    ) {
        if !seen.insert(id) {
            return;
        }
        if !self.is_skip(id) {
            let c = self[id].cycle.expect("using cycle of unscheduled node");
            if c < cycle {
                return;
            }
            if c == cycle {
                out.insert(id);
                return;
            }
        }
        let deps: Vec<NodeId> = self[id].dependencies.iter().map(|d| d.node).collect();
        for dep in deps {
            self.collect_nodes_at_cycle(dep, cycle, seen, out);
        }
    }

    /// Clear regeneration state so code generation can run afresh.
    pub fn reset_codegen(&mut self) {
        for node in &mut self.nodes {
            node.has_codegen = false;
            node.gen_results.clear();
        }
    }

    /// The regenerated value for result `result_idx` of `id`.
    pub fn gen_result(&self, id: NodeId, result_idx: usize) -> ValueId {
        match self[id].kind {
            NodeKind::Shadow {
                shadowed,
                result_idx: shadow_idx,
            } => self.gen_result(shadowed, shadow_idx),
            _ => self[id].gen_results[result_idx],
        }
    }

    /// Regenerated operand values for `id`, emitting zero-cost
    /// dependencies (constants, allocations) on demand.
    pub(crate) fn gather_operands(
        &mut self,
        id: NodeId,
        kernel: &mut Kernel,
        blk: &mut IrBlock,
        set: &LifetimePool,
    ) -> Vec<ValueId> {
        let mut operands = Vec::with_capacity(self[id].dependencies.len());
        for i in 0..self[id].dependencies.len() {
            let dep = self[id].dependencies[i];
            if self.is_skip(dep.node) {
                self.codegen_node(dep.node, kernel, blk, set);
            }
            assert!(
                self[dep.node].has_codegen,
                "generating code for successor before dependency"
            );
            operands.push(self.gen_result(dep.node, dep.result_idx));
        }
        operands
    }

    fn gen_op(&mut self, id: NodeId, kernel: &mut Kernel, blk: &mut IrBlock, set: &LifetimePool) {
        let operands = self.gather_operands(id, kernel, blk, set);
        match &self[id].kind {
            NodeKind::Dealloc => {
                blk.ops
                    .push(Operation::new(OpKind::ReturnWire, operands, vec![]));
                self[id].gen_results.clear();
            }
            NodeKind::Op { op, .. } => {
                let op = op.clone();
                let results: Vec<ValueId> = op_result_tys(&op)
                    .into_iter()
                    .map(|ty| kernel.new_value(ty))
                    .collect();
                blk.ops
                    .push(Operation::new(op, operands, results.clone()));
                self[id].gen_results = results;
            }
            _ => unreachable!("gen_op on a non-operation node"),
        }
    }

    /// Re-emit this node at the end of `blk`. Idempotent for
    /// quantum-dependent nodes; classical constants are re-emitted at
    /// every use site.
    pub fn codegen_node(
        &mut self,
        id: NodeId,
        kernel: &mut Kernel,
        blk: &mut IrBlock,
        set: &LifetimePool,
    ) {
        match &self[id].kind {
            NodeKind::Alloc { set: wire_set, .. } => {
                let wire_set = wire_set.clone();
                let qubit = self
                    .alloc_qubit(id)
                    .expect("regenerating a virtual allocation without a physical qubit");
                let wire = kernel.new_value(Ty::Wire);
                blk.ops.push(Operation::new(
                    OpKind::BorrowWire {
                        set: wire_set,
                        slot: qubit.0,
                    },
                    vec![],
                    vec![wire],
                ));
                self[id].gen_results = vec![wire];
                self[id].has_codegen = true;
            }
            // Argument values are installed by the block; terminators
            // are only emitted by gen_terminator, after everything
            // else in the block.
            NodeKind::Arg { .. } | NodeKind::Terminator { .. } => {}
            NodeKind::Shadow { shadowed, .. } => {
                let shadowed = *shadowed;
                if self[shadowed].has_codegen {
                    self[id].has_codegen = true;
                }
            }
            NodeKind::Dealloc | NodeKind::Op { .. } => {
                if self[id].has_codegen && self.is_quantum_dependent(id) {
                    return;
                }
                // A zero-cost node waits for its quantum dependencies
                // rather than emitting eagerly.
                if self.is_skip(id) {
                    for i in 0..self[id].dependencies.len() {
                        let dep = self[id].dependencies[i].node;
                        if !self[dep].has_codegen && self.is_quantum_dependent(dep) {
                            return;
                        }
                    }
                }
                self.gen_op(id, kernel, blk, set);
                self[id].has_codegen = true;
                self.codegen_classical_successors(id, kernel, blk, set);
            }
            NodeKind::If(_) => {
                if self[id].has_codegen {
                    return;
                }
                let mut ifn = self.take_if(id);
                ifn.gen_op(self, id, kernel, blk, set);
                self.put_if(id, ifn);
                self[id].has_codegen = true;
                self.codegen_classical_successors(id, kernel, blk, set);
            }
            NodeKind::Detached => unreachable!("detached node"),
        }
    }

    /// Emit zero-cost successors (discriminates and the like) right
    /// after their producer.
    pub(crate) fn codegen_classical_successors(
        &mut self,
        id: NodeId,
        kernel: &mut Kernel,
        blk: &mut IrBlock,
        set: &LifetimePool,
    ) {
        if !self.is_quantum_dependent(id) {
            return;
        }
        let successors = self[id].successors.to_vec();
        for successor in successors {
            if self.is_skip(successor) {
                self.codegen_node(successor, kernel, blk, set);
            }
        }
    }

    /// Emit the block terminator. Called only after every other node
    /// in the block has been emitted.
    pub fn gen_terminator(
        &mut self,
        id: NodeId,
        kernel: &mut Kernel,
        blk: &mut IrBlock,
        set: &LifetimePool,
    ) {
        let operands = self.gather_operands(id, kernel, blk, set);
        let op = match &self[id].kind {
            NodeKind::Terminator { op } => op.clone(),
            _ => panic!("gen_terminator on a non-terminator node"),
        };
        blk.ops.push(Operation::new(op, operands, vec![]));
        self[id].has_codegen = true;
    }
}
