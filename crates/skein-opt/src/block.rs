//! A structured block and its dependency graph.

use tracing::debug;

use skein_ir::{Block as IrBlock, Kernel, Ty};

use crate::graph::DependencyGraph;
use crate::lifetime::LifetimePool;
use crate::node::{Arena, Edge, IndexSet, NodeId, PhysicalQid, QidCounter, VirtualQid};

/// A block body: argument nodes, the dependency graph of the body, and
/// the terminator node (which is a root of the graph).
#[derive(Debug)]
pub struct DependencyBlock {
    /// Argument nodes, in argument order. Arguments are always wires
    /// and may be absent from the graph when unused.
    args: Vec<NodeId>,
    graph: DependencyGraph,
    terminator: NodeId,
}

impl DependencyBlock {
    /// Assemble a block from already-built nodes.
    pub fn new(args: Vec<NodeId>, graph: DependencyGraph, terminator: NodeId) -> Self {
        Self {
            args,
            graph,
            terminator,
        }
    }

    /// Height of the block body in cycles.
    pub fn height(&self) -> u32 {
        self.graph.height()
    }

    /// The terminator node.
    pub fn terminator_id(&self) -> NodeId {
        self.terminator
    }

    /// The body graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// The body graph, mutably.
    pub fn graph_mut(&mut self) -> &mut DependencyGraph {
        &mut self.graph
    }

    /// Wires allocated in this block still lacking a physical qubit.
    pub fn virtual_allocs(&self, arena: &Arena) -> IndexSet<VirtualQid> {
        self.graph.virtual_allocs(arena)
    }

    /// Every virtual wire in the block body.
    pub fn qids(&self) -> IndexSet<VirtualQid> {
        self.graph.qids()
    }

    /// Every physical qubit in the block body.
    pub fn qubits(&self) -> IndexSet<PhysicalQid> {
        self.graph.qubits()
    }

    /// Physical qubits allocated directly in this block.
    pub fn allocated_qubits(&self, arena: &Arena) -> IndexSet<PhysicalQid> {
        self.graph.allocated_qubits(arena)
    }

    /// The wire yielded by result `result_idx` of the block.
    pub fn qid_for_result(&self, arena: &Arena, result_idx: usize) -> Option<VirtualQid> {
        arena.qid_for_result(self.terminator, result_idx)
    }

    /// Recompute node heights and the total height of the body.
    pub fn update_height(&mut self, arena: &mut Arena) {
        self.graph.update_height(arena);
    }

    /// Assign a cycle to every quantum operation in the body.
    pub fn scheduling_pass(&mut self, arena: &mut Arena) {
        self.graph.scheduling_pass(arena);
    }

    /// Schedule the body and allocate physical qubits for its virtual
    /// wires, working inside-out through nested conditionals.
    pub fn perform_analysis(&mut self, arena: &mut Arena, set: &mut LifetimePool) {
        // Resolve all nested conditionals first.
        for container in self.graph.containers().to_vec() {
            let mut ifn = arena.take_if(container);
            ifn.perform_analysis(arena, container, set, &mut self.graph);
            arena.put_if(container, ifn);
        }

        self.update_height(arena);
        self.scheduling_pass(arena);
        self.allocate_physical_qubits(arena, set);
    }

    /// Allocate physical qubits for every virtual wire allocated in
    /// the block, driven by the scheduled lifetimes.
    pub fn allocate_physical_qubits(&mut self, arena: &mut Arena, set: &mut LifetimePool) {
        // Qubits inherited from nested blocks keep their slots, with
        // lifetimes as seen from this block's schedule.
        for qubit in self.graph.qubits().to_vec() {
            let lifetime = self.graph.lifetime_for_qubit(arena, qubit);
            set.reallocate_physical(qubit, lifetime);
        }

        for qid in self.virtual_allocs(arena).to_vec() {
            if self.graph.first_use_of_qid(arena, qid).is_none() {
                continue;
            }
            let lifetime = self.graph.lifetime_for_qid(arena, qid);
            let phys = set.allocate_physical(qid, lifetime);
            // Combining (rather than plain assignment) threads every
            // wire mapped to `phys` into a single physical wire, so
            // downstream rewrites cannot reorder operations across
            // the reuse boundary.
            self.graph.combine_with_physical_wire(arena, qid, phys);
        }
    }

    /// Move allocations used only inside a nested conditional into
    /// that conditional. Works outside-in, to contract as tightly as
    /// possible.
    pub fn contract_allocs_pass(&mut self, arena: &mut Arena, counter: &mut QidCounter) {
        for qid in self.virtual_allocs(arena).to_vec() {
            let first_use = self
                .graph
                .first_use_of_qid(arena, qid)
                .expect("unused virtual wire in block");
            let last_use = self
                .graph
                .last_use_of_qid(arena, qid)
                .expect("unused virtual wire in block");
            if first_use == last_use && arena.is_container(first_use) {
                debug!("contracting {qid} into nested conditional");
                let root = self.graph.root_for_qid(arena, qid);
                let init = self.graph.alloc_for_qid(qid);
                let mut ifn = arena.take_if(first_use);
                ifn.lower_alloc(arena, first_use, init, root, qid, counter);
                arena.put_if(first_use, ifn);
                self.graph.remove_virtual_alloc(arena, qid);
                self.graph.remove_qid(qid);
            }
        }

        // Outside-in, so recur only after handling this block.
        for container in self.graph.containers().to_vec() {
            let mut ifn = arena.take_if(container);
            ifn.contract_allocs_pass(arena, counter);
            arena.put_if(container, ifn);
        }
    }

    /// Move an alloc/dealloc pair into this block, replacing the block
    /// argument and terminator dependency for the wire `qid`. The
    /// incoming allocation may carry a different wire identity, in
    /// which case the wire is renamed throughout the block.
    pub fn lower_alloc(&mut self, arena: &mut Arena, init: NodeId, root: NodeId, qid: VirtualQid) {
        let new_qid = arena[init].qids.first().unwrap_or(qid);
        self.graph.replace_leaf_and_root(arena, qid, init, root);
        self.remove_argument(arena, qid);
        // A wire with no use inside the block vanishes entirely.
        if self.graph.first_use_of_qid(arena, new_qid).is_none() {
            self.graph.remove_virtual_alloc(arena, new_qid);
            self.graph.remove_qid(new_qid);
        }
    }

    /// Remove the alloc/dealloc pair for `qid` from this block,
    /// replacing it with a block argument and terminator dependency so
    /// the wire can be allocated in the parent instead. Returns the
    /// new argument node.
    pub fn lift_alloc(&mut self, arena: &mut Arena, qid: VirtualQid, lifted_alloc: NodeId) -> NodeId {
        let incoming = Edge::new(arena, lifted_alloc, 0);
        let new_arg = self.add_argument(arena, incoming);
        self.graph
            .replace_leaf_and_root(arena, qid, new_arg, self.terminator);
        new_arg
    }

    /// Remove the argument/terminator pair for a wire flowing through
    /// this block.
    pub fn remove_qid(&mut self, arena: &mut Arena, qid: VirtualQid) {
        self.remove_argument(arena, qid);
        arena.erase_edge_for_qid(self.terminator, qid);
        self.graph.remove_qid(qid);
    }

    /// Add a block argument carrying the wire of `incoming`.
    pub fn add_argument(&mut self, arena: &mut Arena, incoming: Edge) -> NodeId {
        let arg = arena.new_arg(self.args.len(), incoming.qid);
        self.args.push(arg);
        arg
    }

    /// Remove the block argument carrying `qid`, renumbering the
    /// remaining arguments.
    pub fn remove_argument(&mut self, arena: &mut Arena, qid: VirtualQid) {
        let idx = self
            .args
            .iter()
            .position(|&arg| arena[arg].qids.contains(qid))
            .expect("could not find argument to remove");
        self.args.remove(idx);
        for (num, &arg) in self.args.iter().enumerate() {
            arena.set_arg_num(arg, num);
        }
    }

    /// Re-emit the block: fresh argument values, the body cycle by
    /// cycle, and the terminator last.
    pub fn codegen(&mut self, arena: &mut Arena, kernel: &mut Kernel, set: &LifetimePool) -> IrBlock {
        let mut blk = IrBlock::default();
        for &arg in &self.args {
            let value = kernel.new_value(Ty::Wire);
            blk.args.push(value);
            arena[arg].gen_results = vec![value];
            arena[arg].has_codegen = true;
        }

        for cycle in 0..self.graph.height() {
            self.graph.codegen_at_cycle(arena, cycle, kernel, &mut blk, set);
        }

        arena.gen_terminator(self.terminator, kernel, &mut blk, set);
        blk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use skein_ir::{GateKind, OpKind};

    fn measured_wire_block(arena: &mut Arena) -> DependencyBlock {
        let qid = VirtualQid(0);
        let alloc = arena.new_alloc("wires".into(), qid);
        let h = arena.new_op(
            NodeKind::Op {
                op: OpKind::Gate(GateKind::H),
                quantum: true,
            },
            vec![Edge::new(arena, alloc, 0)],
        );
        let mz = arena.new_op(
            NodeKind::Op {
                op: OpKind::Measure,
                quantum: true,
            },
            vec![Edge::new(arena, h, 0)],
        );
        let disc = arena.new_op(
            NodeKind::Op {
                op: OpKind::Discriminate,
                quantum: false,
            },
            vec![Edge::new(arena, mz, 0)],
        );
        let dealloc = arena.new_op(NodeKind::Dealloc, vec![Edge::new(arena, mz, 1)]);
        let term = arena.new_op(
            NodeKind::Terminator { op: OpKind::Return },
            vec![Edge::new(arena, disc, 0)],
        );
        let graph = DependencyGraph::new(arena, dealloc);
        DependencyBlock::new(vec![], graph, term)
    }

    #[test]
    fn test_analysis_allocates_one_qubit() {
        let mut arena = Arena::new();
        let mut block = measured_wire_block(&mut arena);
        let mut set = LifetimePool::new("wires");

        block.perform_analysis(&mut arena, &mut set);

        assert_eq!(set.count(), 1);
        assert_eq!(block.height(), 2);
        assert!(block.virtual_allocs(&arena).is_empty());
        assert_eq!(block.qubits().to_vec(), vec![PhysicalQid(0)]);
    }

    #[test]
    fn test_codegen_emits_cycle_order() {
        let mut arena = Arena::new();
        let mut block = measured_wire_block(&mut arena);
        let mut set = LifetimePool::new("wires");
        block.perform_analysis(&mut arena, &mut set);

        let mut kernel = Kernel::new("out");
        arena.reset_codegen();
        let blk = block.codegen(&mut arena, &mut kernel, &set);

        let names: Vec<&str> = blk.ops.iter().map(|op| op.name()).collect();
        assert_eq!(
            names,
            vec![
                "borrow_wire",
                "h",
                "mz",
                "discriminate",
                "return_wire",
                "return"
            ]
        );
        match &blk.ops[0].kind {
            OpKind::BorrowWire { set, slot } => {
                assert_eq!(set, "wires");
                assert_eq!(*slot, 0);
            }
            other => panic!("expected borrow_wire, got {}", other.name()),
        }
    }
}
