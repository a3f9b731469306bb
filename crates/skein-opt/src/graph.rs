//! The dependency DAG for one block and its scheduling machinery.

use rustc_hash::FxHashMap;
use tracing::debug;

use skein_ir::{Block as IrBlock, Kernel};

use crate::lifetime::{LifeTime, LifetimePool};
use crate::node::{Arena, Edge, IndexSet, NodeId, PhysicalQid, VirtualQid};

/// A DAG of dependency nodes related by wire flow, with the metadata
/// needed to schedule it and to reason about wire lifetimes.
///
/// The graph does not own its nodes; it indexes into the [`Arena`]
/// shared by every graph of the kernel.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Root nodes (deallocations and the terminator).
    roots: IndexSet<NodeId>,
    /// The allocation node for each wire allocated in this graph.
    allocs: FxHashMap<VirtualQid, NodeId>,
    /// The leaf node (allocation or block argument) for each wire.
    leafs: FxHashMap<VirtualQid, NodeId>,
    /// Every virtual wire flowing through the graph.
    qids: IndexSet<VirtualQid>,
    /// The node introducing each physical qubit: its allocation, or
    /// the container it is allocated inside of.
    qubits: FxHashMap<PhysicalQid, NodeId>,
    total_height: u32,
    /// Conditional nodes, for recursing into nested blocks.
    containers: IndexSet<NodeId>,
}

impl DependencyGraph {
    /// Build the graph by walking every node connected to `root`.
    pub fn new(arena: &Arena, root: NodeId) -> Self {
        let mut graph = Self::default();
        let mut seen = IndexSet::new();
        graph.gather_roots(arena, &mut seen, root);
        graph
    }

    fn gather_roots(&mut self, arena: &Arena, seen: &mut IndexSet<NodeId>, next: NodeId) {
        if seen.contains(next) || !arena.is_quantum_dependent(next) {
            return;
        }
        seen.insert(next);

        if arena.is_root(next) {
            self.roots.insert(next);
            self.total_height = self.total_height.max(arena[next].height);
        }

        if arena.is_leaf(next) && arena.is_quantum_op(next) {
            if let Some(qid) = arena[next].qids.first() {
                self.leafs.insert(qid, next);
                self.qids.insert(qid);
            }
        }

        if arena.is_alloc(next) {
            self.allocs.insert(arena.alloc_qid(next), next);
        }

        if arena.is_container(next) {
            self.containers.insert(next);
        }

        for successor in arena[next].successors.to_vec() {
            self.gather_roots(arena, seen, successor);
        }
        for dep in arena[next].dependencies.clone() {
            self.gather_roots(arena, seen, dep.node);
        }
    }

    /// The roots of the graph.
    pub fn roots(&self) -> &IndexSet<NodeId> {
        &self.roots
    }

    /// The conditional nodes contained in the graph.
    pub fn containers(&self) -> &IndexSet<NodeId> {
        &self.containers
    }

    /// Height of the graph in cycles.
    pub fn height(&self) -> u32 {
        self.total_height
    }

    /// Every virtual wire in the graph.
    pub fn qids(&self) -> IndexSet<VirtualQid> {
        self.qids.clone()
    }

    /// Wires allocated in this graph that still lack a physical qubit.
    pub fn virtual_allocs(&self, arena: &Arena) -> IndexSet<VirtualQid> {
        self.qids
            .iter()
            .filter(|qid| {
                self.allocs
                    .get(qid)
                    .is_some_and(|&alloc| arena.alloc_qubit(alloc).is_none())
            })
            .collect()
    }

    /// Every physical qubit in the graph, in slot order.
    pub fn qubits(&self) -> IndexSet<PhysicalQid> {
        let mut qubits: Vec<PhysicalQid> = self.qubits.keys().copied().collect();
        qubits.sort();
        qubits.into_iter().collect()
    }

    /// Physical qubits whose allocation lives directly in this graph,
    /// in slot order.
    pub fn allocated_qubits(&self, arena: &Arena) -> IndexSet<PhysicalQid> {
        let mut qubits: Vec<PhysicalQid> = self
            .qubits
            .iter()
            .filter(|&(_, &node)| arena.is_alloc(node))
            .map(|(&qubit, _)| qubit)
            .collect();
        qubits.sort();
        qubits.into_iter().collect()
    }

    /// The allocation node for `qid`.
    pub fn alloc_for_qid(&self, qid: VirtualQid) -> NodeId {
        *self.allocs.get(&qid).expect("qid not allocated in graph")
    }

    /// The leaf node for `qid`.
    pub fn leaf_for_qid(&self, qid: VirtualQid) -> NodeId {
        *self.leafs.get(&qid).expect("qid has no leaf in graph")
    }

    /// The root node consuming `qid`.
    pub fn root_for_qid(&self, arena: &Arena, qid: VirtualQid) -> NodeId {
        assert!(self.qids.contains(qid), "qid not in dependency graph");
        self.roots
            .iter()
            .find(|&root| arena[root].qids.contains(qid))
            .expect("could not find root for qid")
    }

    /// The allocation node for the physical qubit `qubit`.
    pub fn alloc_for_qubit(&self, arena: &Arena, qubit: PhysicalQid) -> NodeId {
        let node = *self.qubits.get(&qubit).expect("qubit not in graph");
        assert!(arena.is_alloc(node), "qubit not allocated in graph");
        node
    }

    /// The root node consuming the physical qubit `qubit`.
    pub fn root_for_qubit(&self, arena: &Arena, qubit: PhysicalQid) -> NodeId {
        self.roots
            .iter()
            .find(|&root| arena.qubits_of(root).contains(qubit))
            .expect("could not find root for qubit")
    }

    /// The first operation using `qid`, or `None` if the wire flows
    /// straight from leaf to root.
    pub fn first_use_of_qid(&self, arena: &Arena, qid: VirtualQid) -> Option<NodeId> {
        let leaf = self.leaf_for_qid(qid);
        let first = arena[leaf]
            .successors
            .first()
            .expect("leaf with no successor");
        if arena.is_root(first) { None } else { Some(first) }
    }

    /// The last operation using `qid`, or `None` if the wire is unused.
    pub fn last_use_of_qid(&self, arena: &Arena, qid: VirtualQid) -> Option<NodeId> {
        let root = self.root_for_qid(arena, qid);
        let last = arena[root]
            .dependencies
            .iter()
            .find(|dep| dep.qid == Some(qid))
            .map(|dep| dep.node)?;
        if arena.is_leaf(last) { None } else { Some(last) }
    }

    /// The first operation using the physical qubit `qubit`.
    pub fn first_use_of_qubit(&self, arena: &Arena, qubit: PhysicalQid) -> Option<NodeId> {
        let defining = *self.qubits.get(&qubit).expect("qubit not in graph");
        if arena.is_alloc(defining) {
            let first = arena[defining]
                .successors
                .first()
                .expect("allocation with no successor");
            if arena.is_root(first) { None } else { Some(first) }
        } else {
            // Allocated inside a container, which is itself the use.
            Some(defining)
        }
    }

    /// The last operation using the physical qubit `qubit`.
    pub fn last_use_of_qubit(&self, arena: &Arena, qubit: PhysicalQid) -> Option<NodeId> {
        let defining = *self.qubits.get(&qubit).expect("qubit not in graph");
        if arena.is_alloc(defining) {
            self.last_use_of_qid(arena, arena.alloc_qid(defining))
        } else {
            Some(defining)
        }
    }

    /// The scheduled lifetime of the virtual wire `qid`. The graph
    /// must be scheduled and the wire used at least once.
    pub fn lifetime_for_qid(&self, arena: &Arena, qid: VirtualQid) -> LifeTime {
        let first = self
            .first_use_of_qid(arena, qid)
            .expect("cannot compute lifetime of unused qid");
        let last = self
            .last_use_of_qid(arena, qid)
            .expect("cannot compute lifetime of unused qid");
        LifeTime::new(
            arena[first].cycle.expect("graph must be scheduled"),
            arena[last].cycle.expect("graph must be scheduled"),
        )
    }

    /// The scheduled lifetime of the physical qubit `qubit`.
    pub fn lifetime_for_qubit(&self, arena: &Arena, qubit: PhysicalQid) -> LifeTime {
        let first = self
            .first_use_of_qubit(arena, qubit)
            .expect("cannot compute lifetime of unused qubit");
        let last = self
            .last_use_of_qubit(arena, qubit)
            .expect("cannot compute lifetime of unused qubit");
        LifeTime::new(
            arena[first].cycle.expect("graph must be scheduled"),
            arena[last].cycle.expect("graph must be scheduled"),
        )
    }

    /// Recompute the height of every node, dependencies first, and the
    /// total height of the graph.
    pub fn update_height(&mut self, arena: &mut Arena) {
        self.total_height = 0;
        let mut seen = IndexSet::new();
        for root in self.roots.to_vec() {
            arena.update_height_rec(&mut seen, root);
            self.total_height = self.total_height.max(arena[root].height);
        }
    }

    /// Assign a cycle to every quantum operation.
    ///
    /// Works root-down, tallest root first, always following the
    /// longest path: the longest path is saturated with an operation
    /// every cycle, off-path dependencies are scheduled as late as
    /// possible and off-path successors as early as possible, packing
    /// every other path densely around its joins with the longest one.
    pub fn scheduling_pass(&mut self, arena: &mut Arena) {
        let mut seen = IndexSet::new();
        let mut sorted = self.roots.to_vec();
        sorted.sort_by(|a, b| arena[*b].height.cmp(&arena[*a].height));
        for root in sorted {
            self.schedule(arena, &mut seen, root, self.total_height);
        }
    }

    fn schedule(&self, arena: &mut Arena, seen: &mut IndexSet<NodeId>, next: NodeId, level: u32) {
        if seen.contains(next) || !arena.is_quantum_dependent(next) {
            return;
        }
        seen.insert(next);

        // A node can never be scheduled earlier than its own height.
        let level = level.max(arena[next].height);

        let mut current = level;
        if !arena.is_skip(next) {
            current -= arena.num_ticks(next);
            arena[next].cycle = Some(current);
        }

        // Follow the longest path first, so a dependency of a
        // dependency is never scheduled at the same cycle as its user.
        let mut sorted = arena[next].dependencies.clone();
        sorted.sort_by(|a, b| arena[b.node].height.cmp(&arena[a.node].height));

        // Dependencies as late as possible.
        for dep in sorted {
            if !arena.is_leaf(dep.node) {
                self.schedule(arena, seen, dep.node, current);
            }
        }

        // Successors as early as possible.
        for successor in arena[next].successors.to_vec() {
            if !arena.is_root(successor) {
                let at = current + arena.num_ticks(next) + arena.num_ticks(successor);
                self.schedule(arena, seen, successor, at);
            }
        }
    }

    /// Nodes scheduled exactly at `cycle`.
    pub fn nodes_at_cycle(&self, arena: &Arena, cycle: u32) -> IndexSet<NodeId> {
        let mut nodes = IndexSet::new();
        let mut seen = IndexSet::new();
        for root in self.roots.iter() {
            arena.collect_nodes_at_cycle(root, cycle, &mut seen, &mut nodes);
        }
        nodes
    }

    /// Re-emit every node scheduled at `cycle`.
    pub fn codegen_at_cycle(
        &self,
        arena: &mut Arena,
        cycle: u32,
        kernel: &mut Kernel,
        blk: &mut IrBlock,
        set: &LifetimePool,
    ) {
        for node in self.nodes_at_cycle(arena, cycle).to_vec() {
            arena.codegen_node(node, kernel, blk, set);
        }
    }

    /// Assign the wire `qid`, allocated in this graph, to `phys`.
    pub fn assign_to_physical(&mut self, arena: &mut Arena, qid: VirtualQid, phys: PhysicalQid) {
        let alloc = self.alloc_for_qid(qid);
        self.qubits.insert(phys, alloc);
        arena.assign_to_physical(alloc, phys);
    }

    /// Merge the virtual wire `qid` into the physical wire for `phys`
    /// if one exists, splicing the two alloc/dealloc pairs into one;
    /// otherwise plain assignment.
    pub fn combine_with_physical_wire(
        &mut self,
        arena: &mut Arena,
        qid: VirtualQid,
        phys: PhysicalQid,
    ) {
        if !self.qubits.contains_key(&phys) {
            self.assign_to_physical(arena, qid, phys);
            return;
        }

        assert!(
            self.allocs.contains_key(&qid),
            "combining a qid not allocated in graph"
        );
        let new_lifetime = self.lifetime_for_qid(arena, qid);
        let old_lifetime = self.lifetime_for_qubit(arena, phys);
        debug!("combining {qid} into existing wire for {phys}");

        if new_lifetime.is_after(old_lifetime) {
            // Feed the old wire's final value into the new wire's
            // first use, dropping the new alloc and the old dealloc.
            let new_alloc = self.alloc_for_qid(qid);
            let old_root = self.root_for_qubit(arena, phys);

            let successor = arena.successor_for_qid(new_alloc, qid);
            let idx = arena
                .dependency_for_qid(successor, qid)
                .expect("first use lost its dependency");

            let dep = arena[old_root].dependencies[0];
            arena[successor].dependencies[idx] = dep;
            arena[dep.node].successors.insert(successor);
            arena[dep.node].successors.remove(old_root);

            let old_qid = dep.qid.expect("physical wire without a qid");
            arena.update_qid(dep.node, qid, old_qid);

            self.roots.remove(old_root);
            self.allocs.remove(&qid);
            self.leafs.remove(&qid);
            self.qids.remove(qid);

            arena.update_with_physical(successor, old_qid, phys);
        } else {
            // The new wire ends before the old one begins: feed its
            // final value into the old wire's first use instead.
            let old_alloc = self.alloc_for_qubit(arena, phys);
            let old_qid = arena.alloc_qid(old_alloc);
            let new_root = self.root_for_qid(arena, qid);

            let successor = arena.successor_for_qid(old_alloc, old_qid);
            let idx = arena
                .dependency_for_qid(successor, old_qid)
                .expect("first use lost its dependency");

            let dep = arena[new_root].dependencies[0];
            arena[successor].dependencies[idx] = dep;
            arena[dep.node].successors.insert(successor);
            arena[dep.node].successors.remove(new_root);

            arena.update_qid(dep.node, old_qid, dep.qid.expect("wire without a qid"));

            self.roots.remove(new_root);
            self.allocs.remove(&old_qid);
            self.leafs.remove(&old_qid);
            self.qids.remove(old_qid);

            let new_alloc = self.alloc_for_qid(qid);
            arena.assign_to_physical(new_alloc, phys);
            self.qubits.insert(phys, new_alloc);
        }
    }

    /// Replace (or add) the leaf for `old_qid` with `new_leaf`.
    fn replace_leaf(
        &mut self,
        arena: &mut Arena,
        old_qid: VirtualQid,
        new_qid: VirtualQid,
        new_leaf: NodeId,
    ) {
        assert!(arena.is_leaf(new_leaf), "invalid leaf");

        if let Some(&old_leaf) = self.leafs.get(&old_qid) {
            let first_use = arena.successor_for_qid(old_leaf, old_qid);
            let idx = arena
                .dependency_for_qid(first_use, old_qid)
                .expect("first use lost its dependency");

            arena[first_use].dependencies[idx] = Edge::new(arena, new_leaf, 0);
            arena[old_leaf].successors.remove(first_use);
            arena[new_leaf].successors.insert(first_use);
            if arena.is_alloc(old_leaf) {
                self.allocs.remove(&old_qid);
                if let Some(qubit) = arena.alloc_qubit(old_leaf) {
                    self.qubits.remove(&qubit);
                }
            }
        }

        self.leafs.insert(new_qid, new_leaf);
        if arena.is_alloc(new_leaf) {
            self.allocs.insert(new_qid, new_leaf);
            if let Some(qubit) = arena.alloc_qubit(new_leaf) {
                self.qubits.insert(qubit, new_leaf);
            }
        }
    }

    /// Replace (or add) the root for `old_qid` with `new_root`.
    fn replace_root(
        &mut self,
        arena: &mut Arena,
        old_qid: VirtualQid,
        new_qid: VirtualQid,
        new_root: NodeId,
    ) {
        if self.qids.contains(old_qid) {
            let old_root = self.root_for_qid(arena, old_qid);

            // If the old leaf fed the root directly, the leaf swap has
            // already renamed this edge to the new wire.
            let idx = arena
                .dependency_for_qid(old_root, old_qid)
                .or_else(|| arena.dependency_for_qid(old_root, new_qid))
                .expect("root lost its dependency");
            let dep = arena[old_root].dependencies[idx];
            arena[dep.node].successors.remove(old_root);
            arena[dep.node].successors.insert(new_root);

            arena[new_root].dependencies.push(dep);
            arena[old_root].dependencies.remove(idx);

            // A terminator losing its last dependency means the block
            // is empty and the node will never be used again.
            if arena[old_root].dependencies.is_empty() {
                self.roots.remove(old_root);
            }

            arena[old_root].qids.remove(old_qid);
        }

        arena[new_root].qids.insert(new_qid);
        self.roots.insert(new_root);
        assert!(arena.is_root(new_root), "invalid root");
    }

    /// Swap in a new leaf and root for `qid` at once, or add them if
    /// the wire was not present. Doing both together makes it harder
    /// to leave the graph in an invalid state.
    pub fn replace_leaf_and_root(
        &mut self,
        arena: &mut Arena,
        qid: VirtualQid,
        new_leaf: NodeId,
        new_root: NodeId,
    ) {
        let new_qid = arena[new_leaf].qids.first().unwrap_or(qid);

        self.replace_leaf(arena, qid, new_qid, new_leaf);
        self.replace_root(arena, qid, new_qid, new_root);

        self.qids.insert(new_qid);

        if new_qid != qid {
            self.qids.remove(qid);
            self.leafs.remove(&qid);
            arena.update_qid(new_leaf, qid, new_qid);
            // The rename walk skips the new root, which already tracks
            // the new wire; its incoming edge is patched by hand.
            if let Some(idx) = arena.dependency_for_qid(new_root, qid) {
                arena[new_root].dependencies[idx].qid = Some(new_qid);
            }
        }
    }

    /// Drop a node from the root set after it is lifted out of the
    /// graph. No-op when the node was never a root.
    pub(crate) fn remove_root(&mut self, root: NodeId) {
        self.roots.remove(root);
    }

    /// Drop the allocation and root for `qid` from the graph metadata.
    /// Detaching the nodes themselves is the caller's business.
    pub fn remove_virtual_alloc(&mut self, arena: &Arena, qid: VirtualQid) {
        self.allocs.remove(&qid);

        if self.qids.contains(qid) {
            let root = self.root_for_qid(arena, qid);
            self.roots.remove(root);
        }
    }

    /// Rename a wire in the graph metadata after its identity merged
    /// with another wire's.
    pub fn rename_qid(&mut self, old: VirtualQid, new: VirtualQid) {
        if let Some(leaf) = self.leafs.remove(&old) {
            self.leafs.insert(new, leaf);
        }
        if let Some(alloc) = self.allocs.remove(&old) {
            self.allocs.insert(new, alloc);
        }
        if self.qids.remove(old) {
            self.qids.insert(new);
        }
    }

    /// Drop `qid` from the graph metadata.
    pub fn remove_qid(&mut self, qid: VirtualQid) {
        self.leafs.remove(&qid);
        self.qids.remove(qid);
    }
}
