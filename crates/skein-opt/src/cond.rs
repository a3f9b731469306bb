//! Conditional nodes and the cross-branch lifting passes.
//!
//! A conditional is a "solid container": wires flow in as operands and
//! out as results, so the parent graph can treat it as one opaque
//! multi-qubit operation. The passes here exploit the container the
//! other way around, hoisting work that both branches perform
//! identically out into the parent, where the scheduler and the
//! qubit allocator can see it.

use tracing::debug;

use skein_ir::{Block as IrBlock, Kernel, OpKind, Operation, Ty};

use crate::block::DependencyBlock;
use crate::graph::DependencyGraph;
use crate::lifetime::LifetimePool;
use crate::node::{Arena, Edge, IndexSet, NodeId, NodeKind, PhysicalQid, QidCounter, VirtualQid};

/// The payload of a conditional node: both branch blocks, the result
/// arity, and the shadow nodes standing in for classical values the
/// branches capture from ancestor scopes.
#[derive(Debug)]
pub struct IfNode {
    /// Block executed when the condition is true.
    pub then_block: DependencyBlock,
    /// Block executed when the condition is false.
    pub else_block: DependencyBlock,
    /// Number of wire results. Tracked here because results are added
    /// and removed as wires are lifted and lowered.
    pub num_results: usize,
    /// Shadow nodes for captured classical values.
    pub freevars: IndexSet<NodeId>,
}

impl IfNode {
    /// The wire carried out by result `result_idx`. Both branches
    /// yield the same linear signature, so the then branch answers.
    pub fn qid_for_result(&self, arena: &Arena, result_idx: usize) -> Option<VirtualQid> {
        self.then_block.qid_for_result(arena, result_idx)
    }

    /// Recurse the contraction pass into both branches.
    pub fn contract_allocs_pass(&mut self, arena: &mut Arena, counter: &mut QidCounter) {
        self.then_block.contract_allocs_pass(arena, counter);
        self.else_block.contract_allocs_pass(arena, counter);
    }

    /// Splice this conditional out of the wire `qid`: remove the
    /// operand/result pair for the wire and drop its flow through both
    /// branches.
    pub fn erase_edge_for_qid(&mut self, arena: &mut Arena, id: NodeId, qid: VirtualQid) {
        // Find the result to drop before the blocks are torn down.
        let removed = (0..self.num_results)
            .find(|&i| self.qid_for_result(arena, i) == Some(qid))
            .expect("erasing a wire with no result");

        arena.erase_edge_for_qid_op(id, qid);
        arena[id].qids.remove(qid);

        self.then_block.remove_qid(arena, qid);
        self.else_block.remove_qid(arena, qid);

        self.num_results -= 1;

        // Later results shift down by one.
        for successor in arena[id].successors.to_vec() {
            for dep in &mut arena[successor].dependencies {
                if dep.node == id && dep.result_idx > removed {
                    dep.result_idx -= 1;
                }
            }
        }
    }

    /// Schedule and allocate both branches inside-out, then lift every
    /// physical allocation and every common operation up to the parent.
    pub fn perform_analysis(
        &mut self,
        arena: &mut Arena,
        id: NodeId,
        set: &mut LifetimePool,
        parent: &mut DependencyGraph,
    ) {
        self.then_block.perform_analysis(arena, set);
        let then_frame = set.clear_frame();
        self.else_block.perform_analysis(arena, set);
        let else_frame = set.clear_frame();
        debug!(
            "conditional branches allocated {} / {} qubits",
            then_frame.len(),
            else_frame.len()
        );

        // Both frames drew from the same pool slots, so a qubit used
        // in both branches is already the same physical slot.
        let mut allocated = self.then_block.allocated_qubits(arena);
        allocated.extend_from(&self.else_block.allocated_qubits(arena));
        for qubit in allocated.to_vec() {
            self.lift_alloc(arena, id, qubit, parent);
        }

        self.perform_lifting_pass(arena, id);
    }

    /// Move the allocation of `qubit` from the branch blocks into
    /// `parent`. Both branches get an argument/terminator pair for the
    /// wire so it flows through them whether they use it or not; if
    /// both branches allocated the qubit, the extra alloc/dealloc pair
    /// is discarded and both branches share one wire identity.
    ///
    /// Allocations are always lifted: a conditional is a solid barrier
    /// in the parent graph, so allocating around it is equivalent to
    /// allocating inside, and the parent can then combine the wire
    /// with its own allocations.
    pub fn lift_alloc(
        &mut self,
        arena: &mut Arena,
        id: NodeId,
        qubit: PhysicalQid,
        parent: &mut DependencyGraph,
    ) {
        let mut lifted: Option<(NodeId, NodeId)> = None;
        let mut else_lift: Option<(VirtualQid, NodeId)> = None;
        let mut then_contains = false;
        let mut else_contains = false;

        if self.else_block.allocated_qubits(arena).contains(qubit) {
            let alloc = self.else_block.graph().alloc_for_qubit(arena, qubit);
            let root = self.else_block.graph().root_for_qubit(arena, qubit);
            let qid = arena.alloc_qid(alloc);
            let arg = self.else_block.lift_alloc(arena, qid, alloc);
            else_lift = Some((qid, arg));
            lifted = Some((alloc, root));
            else_contains = true;
        }

        if self.then_block.allocated_qubits(arena).contains(qubit) {
            let alloc = self.then_block.graph().alloc_for_qubit(arena, qubit);
            let root = self.then_block.graph().root_for_qubit(arena, qubit);
            let qid = arena.alloc_qid(alloc);
            self.then_block.lift_alloc(arena, qid, alloc);
            // The else branch's copy of the pair is discarded; its
            // wire identity merges into the then branch's.
            if let Some((else_qid, else_arg)) = else_lift {
                arena.update_qid(else_arg, else_qid, qid);
                self.else_block.graph_mut().rename_qid(else_qid, qid);
            }
            lifted = Some((alloc, root));
            then_contains = true;
        }

        let (lifted_alloc, lifted_root) = lifted.expect("illegal qubit to lift");
        let qid = arena.alloc_qid(lifted_alloc);

        if !then_contains {
            let arg = self
                .then_block
                .add_argument(arena, Edge::new(arena, lifted_alloc, 0));
            let edge = Edge::new(arena, arg, 0);
            let term = self.then_block.terminator_id();
            arena[term].dependencies.push(edge);
            arena[arg].successors.insert(term);
            arena[term].qids.insert(qid);
        }

        if !else_contains {
            let arg = self
                .else_block
                .add_argument(arena, Edge::new(arena, lifted_alloc, 0));
            let edge = Edge::new(arena, arg, 0);
            let term = self.else_block.terminator_id();
            arena[term].dependencies.push(edge);
            arena[arg].successors.insert(term);
            arena[term].qids.insert(qid);
        }

        // The pair now lives in the parent scope, with the wire
        // flowing through this conditional as an operand/result pair.
        parent.replace_leaf_and_root(arena, qid, lifted_alloc, lifted_root);
        arena[id].qids.insert(qid);

        arena[id].successors.insert(lifted_root);
        arena[lifted_root].dependencies.push(Edge {
            node: id,
            result_idx: self.num_results,
            qid: Some(qid),
            qubit: Some(qubit),
        });
        self.num_results += 1;

        arena[lifted_alloc].successors.insert(id);
        let incoming = Edge::new(arena, lifted_alloc, 0);
        // Wire operands stay contiguous behind the condition, so
        // argument numbers keep lining up with operand positions even
        // when shadowed classical dependencies trail the operand list.
        arena[id].dependencies.insert(self.num_results, incoming);
    }

    /// Repeatedly lift operations both branches perform identically,
    /// until a fixpoint: lifting one operation can expose another.
    pub fn perform_lifting_pass(&mut self, arena: &mut Arena, id: NodeId) {
        let mut lifted = false;
        let mut unliftable: IndexSet<VirtualQid> = IndexSet::new();
        let mut run_more = true;

        while run_more {
            run_more = false;
            let liftable: Vec<VirtualQid> = arena[id]
                .qids
                .iter()
                .filter(|qid| !unliftable.contains(*qid))
                .collect();

            for qid in liftable {
                if !self.then_block.qids().contains(qid) || !self.else_block.qids().contains(qid) {
                    unliftable.insert(qid);
                    continue;
                }

                let then_use = self.then_block.graph().first_use_of_qid(arena, qid);
                let else_use = self.else_block.graph().first_use_of_qid(arena, qid);

                let (then_use, else_use) = match (then_use, else_use) {
                    (Some(t), Some(e)) => (t, e),
                    (None, None) => {
                        // Neither branch touches the wire any more.
                        self.erase_edge_for_qid(arena, id, qid);
                        unliftable.insert(qid);
                        continue;
                    }
                    _ => {
                        unliftable.insert(qid);
                        continue;
                    }
                };

                if self.try_lifting_before(arena, id, then_use, else_use) {
                    lifted = true;
                    run_more = true;
                    continue;
                }

                let then_last = self.then_block.graph().last_use_of_qid(arena, qid);
                let else_last = self.else_block.graph().last_use_of_qid(arena, qid);
                if let (Some(t), Some(e)) = (then_last, else_last) {
                    if self.try_lifting_after(arena, id, t, e) {
                        lifted = true;
                        run_more = true;
                    }
                }
            }
        }

        // Inner schedules are stale after lifting.
        if lifted {
            self.then_block.update_height(arena);
            self.else_block.update_height(arena);
            self.then_block.scheduling_pass(arena);
            self.else_block.scheduling_pass(arena);
        }
    }

    /// Lift `then_use`/`else_use` before this conditional if they
    /// compute the same thing and all their producers are already
    /// outside the branches.
    fn try_lifting_before(
        &mut self,
        arena: &mut Arena,
        id: NodeId,
        then_use: NodeId,
        else_use: NodeId,
    ) -> bool {
        // Nested conditionals are never lifted; their classical
        // results cannot be rerouted the way a gate's wires can.
        if arena.is_container(then_use) || arena.is_container(else_use) {
            return false;
        }

        if !arena.prefix_equivalent(then_use, else_use) {
            return false;
        }

        // Equivalent nodes have equivalent producers, but those must
        // be lifted first.
        if arena[then_use].height > arena.num_ticks(then_use) {
            return false;
        }

        self.lift_op_before(arena, id, then_use, else_use);
        true
    }

    /// Lift `then_use`/`else_use` after this conditional if they
    /// consume the same physical wires and nothing classical ties them
    /// into the branches.
    fn try_lifting_after(
        &mut self,
        arena: &mut Arena,
        id: NodeId,
        then_use: NodeId,
        else_use: NodeId,
    ) -> bool {
        if arena.is_container(then_use) || arena.is_container(else_use) {
            return false;
        }

        // A measure's classical token may interact with other values
        // and flow out of the branch, so measures only lift before.
        if matches!(
            arena[then_use].kind,
            NodeKind::Op {
                op: OpKind::Measure,
                ..
            }
        ) {
            return false;
        }

        if !arena.postfix_equivalent(then_use, else_use) {
            return false;
        }

        // Equivalent nodes have equivalent consumers, but those must
        // be lifted first.
        for successor in arena[then_use].successors.iter() {
            if !arena.is_skip(successor) {
                return false;
            }
        }
        for dep in &arena[then_use].dependencies {
            if !arena.is_quantum_op(dep.node) {
                return false;
            }
        }

        self.lift_op_after(arena, id, then_use, else_use);
        true
    }

    /// Hoist `then_op` out in front of this conditional, rerouting its
    /// wires through the conditional's operands, and discard `else_op`.
    fn lift_op_before(&mut self, arena: &mut Arena, id: NodeId, then_op: NodeId, else_op: NodeId) {
        debug!("lifting {} before conditional", arena.op_name(then_op));
        let mut new_deps: Vec<Edge> = vec![];

        // A measure lifts its discriminate along with it; the token's
        // classical value becomes free in the branch bodies and is
        // reached through a fresh shadow node instead.
        if matches!(
            arena[then_op].kind,
            NodeKind::Op {
                op: OpKind::Measure,
                ..
            }
        ) {
            let then_disc = arena[then_op]
                .successors
                .iter()
                .find(|&s| !arena.is_quantum_op(s))
                .expect("measure without a discriminate");
            let else_disc = arena[else_op]
                .successors
                .iter()
                .find(|&s| !arena.is_quantum_op(s))
                .expect("measure without a discriminate");

            // A discriminate whose bit is never read inside the branch
            // has nothing to shadow; it lifts out alongside the
            // measure and is re-emitted in the parent.
            if !arena[then_disc].successors.is_empty() {
                let shadow = arena.new_shadow(then_disc, 0);
                let shadow_edge = Edge {
                    node: shadow,
                    result_idx: 0,
                    qid: None,
                    qubit: None,
                };
                arena.replace_with(then_disc, shadow_edge);
                arena.replace_with(else_disc, shadow_edge);
                self.freevars.insert(shadow);
            }
            arena[id].dependencies.push(Edge {
                node: then_disc,
                result_idx: 0,
                qid: None,
                qubit: None,
            });

            // An unused discriminate was a root of its branch graph at
            // gather time; the branch schedule must not walk out of
            // the block through it after the lift.
            self.then_block.graph_mut().remove_root(then_disc);
            self.else_block.graph_mut().remove_root(else_disc);

            // The else branch's discriminate is gone for good.
            arena[else_op].successors.remove(else_disc);
            arena[else_disc].dependencies.clear();
        }

        let snapshot = arena[then_op].dependencies.clone();
        for (i, dependency) in snapshot.into_iter().enumerate() {
            if self.freevars.contains(dependency.node) {
                // A captured classical value: outside the branch the
                // real value is in scope, so depend on it directly.
                let (shadowed, result_idx) = match arena[dependency.node].kind {
                    NodeKind::Shadow {
                        shadowed,
                        result_idx,
                    } => (shadowed, result_idx),
                    _ => unreachable!("freevar that is not a shadow"),
                };
                let edge = Edge {
                    node: shadowed,
                    result_idx,
                    qid: None,
                    qubit: None,
                };
                new_deps.push(edge);
                arena[shadowed].successors.insert(then_op);
                arena[dependency.node].successors.remove(then_op);
                // Drop the shadow entirely once nothing uses it.
                if arena[dependency.node].successors.is_empty() {
                    if let Some(idx) = arena[id]
                        .dependencies
                        .iter()
                        .position(|d| d.node == shadowed && d.result_idx == result_idx)
                    {
                        arena[id].dependencies.remove(idx);
                    }
                    self.freevars.remove(dependency.node);
                }
            } else if arena.is_leaf(dependency.node) && arena.is_quantum_op(dependency.node) {
                // A block argument: reroute the conditional's operand
                // for the same wire into the lifted op, and feed the
                // lifted op's result back in as the operand.
                let num = arena.arg_num(dependency.node);
                let new_dep = arena[id].dependencies[num + 1];
                arena[new_dep.node].successors.remove(id);
                arena[new_dep.node].successors.insert(then_op);
                new_deps.push(new_dep);
                arena[dependency.node].successors.remove(then_op);

                arena[id].dependencies[num + 1] = Edge {
                    node: then_op,
                    result_idx: arena.result_for_operand(then_op, i),
                    qid: dependency.qid,
                    qubit: None,
                };

                let qid = dependency.qid.expect("wire argument without a qid");
                arena.erase_edge_for_qid(then_op, qid);
            } else if !arena.is_quantum_op(dependency.node) {
                new_deps.push(dependency);
            } else {
                unreachable!("lifting an operation before its producer was lifted");
            }
        }

        arena.erase_op(else_op);

        arena[then_op].successors.insert(id);
        arena[then_op].dependencies = new_deps;
    }

    /// Hoist `then_op` out after this conditional, rerouting the
    /// conditional's results through it, and discard `else_op`.
    fn lift_op_after(&mut self, arena: &mut Arena, id: NodeId, then_op: NodeId, else_op: NodeId) {
        debug!("lifting {} after conditional", arena.op_name(then_op));
        let mut new_deps: Vec<Edge> = vec![];

        let snapshot = arena[then_op].dependencies.clone();
        for (i, dependency) in snapshot.into_iter().enumerate() {
            let qid = dependency
                .qid
                .expect("lifting operations with classical input after branches is not supported");

            // Unhook from the wire inside the branch.
            arena.erase_edge_for_qid(then_op, qid);

            // Hook into the wire after the conditional.
            let result_idx = arena.result_for_operand(then_op, i);
            let successor = arena.successor_for_qid(id, qid);
            let idx = arena
                .dependency_for_qid(successor, qid)
                .expect("successor lost its dependency");
            new_deps.push(arena[successor].dependencies[idx]);
            arena[successor].dependencies[idx] = Edge {
                node: then_op,
                result_idx,
                qid: Some(qid),
                qubit: dependency.qubit,
            };
            arena[then_op].successors.insert(successor);

            arena[then_op].qids.insert(qid);
        }

        arena[id].successors.insert(then_op);
        arena[then_op].dependencies = new_deps;
        arena.erase_op(else_op);
    }

    /// Move an alloc/dealloc pair for a wire that flows unused through
    /// this conditional into both branches, so each branch can schedule
    /// it independently. The else branch's copy gets a fresh wire
    /// identity.
    pub fn lower_alloc(
        &mut self,
        arena: &mut Arena,
        id: NodeId,
        init: NodeId,
        root: NodeId,
        qid: VirtualQid,
        counter: &mut QidCounter,
    ) {
        assert!(
            arena[id].successors.contains(root),
            "illegal root for contracted allocation"
        );
        assert!(
            arena[init].successors.contains(id),
            "illegal init for contracted allocation"
        );
        arena[root].dependencies.remove(0);
        arena[init].successors = IndexSet::new();
        arena[id].successors.remove(root);

        let set_name = match &arena[init].kind {
            NodeKind::Alloc { set, .. } => set.clone(),
            _ => panic!("lowering a non-allocation node"),
        };
        let alloc_copy = arena.new_alloc(set_name, counter.fresh());
        let dealloc_copy = arena.new_op(NodeKind::Dealloc, vec![]);

        let offset = arena
            .dependency_for_qid(id, qid)
            .expect("lowered wire is not an operand");
        let removed = (0..self.num_results)
            .find(|&i| self.qid_for_result(arena, i) == Some(qid))
            .expect("lowered wire has no result");

        self.num_results -= 1;
        arena[id].dependencies.remove(offset);
        arena[id].qids.remove(qid);

        self.then_block.lower_alloc(arena, init, root, qid);
        self.else_block.lower_alloc(arena, alloc_copy, dealloc_copy, qid);

        // Later results shift down by one.
        for successor in arena[id].successors.to_vec() {
            for dep in &mut arena[successor].dependencies {
                if dep.node == id && dep.result_idx > removed {
                    dep.result_idx -= 1;
                }
            }
        }
    }

    /// Re-emit the conditional: condition plus wire operands, fresh
    /// wire results, and both branch bodies regenerated inside.
    pub fn gen_op(
        &mut self,
        arena: &mut Arena,
        id: NodeId,
        kernel: &mut Kernel,
        blk: &mut IrBlock,
        set: &LifetimePool,
    ) {
        let all_operands = arena.gather_operands(id, kernel, blk, set);

        // Shadowed classical values are dependencies for ordering
        // only; the re-emitted operation takes the condition and the
        // wires.
        let mut operands = vec![all_operands[0]];
        for (i, value) in all_operands.into_iter().enumerate().skip(1) {
            if arena[id].dependencies[i].qid.is_some() {
                operands.push(value);
            }
        }

        let results: Vec<_> = (0..self.num_results)
            .map(|_| kernel.new_value(Ty::Wire))
            .collect();

        let then_blk = self.then_block.codegen(arena, kernel, set);
        let else_blk = self.else_block.codegen(arena, kernel, set);

        blk.ops.push(Operation::new(
            OpKind::If { then_blk, else_blk },
            operands,
            results.clone(),
        ));
        arena[id].gen_results = results;
    }
}
