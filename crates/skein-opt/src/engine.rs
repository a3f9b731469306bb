//! Construction of the dependency DAG from a kernel body.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use skein_ir::{Block as IrBlock, Kernel, OpKind, Operation, ValueId};

use crate::block::DependencyBlock;
use crate::cond::IfNode;
use crate::error::{AnalysisError, AnalysisResult};
use crate::graph::DependencyGraph;
use crate::node::{Arena, Edge, IndexSet, NodeId, NodeKind, QidCounter};

/// Reject operations the allocator cannot reason about. Stores are a
/// soft case: they survive, but may be reordered by scheduling.
fn validate_op(op: &Operation) -> AnalysisResult<()> {
    match &op.kind {
        OpKind::Loop { .. } => Err(AnalysisError::LoopUnsupported),
        OpKind::Call { .. } => Err(AnalysisError::CallUnsupported),
        OpKind::AllocWire => Err(AnalysisError::NonBorrowAlloc(op.name().to_string())),
        OpKind::Store => {
            warn!("memory stores are volatile and may be reordered");
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Walks a kernel body front to back, building one dependency node per
/// operation and wiring edges from each operand to its producer.
pub struct DependencyAnalysisEngine<'k> {
    kernel: &'k Kernel,
    arena: Arena,
    counter: QidCounter,
    /// Producer edge and definition scope depth for every value.
    value_defs: FxHashMap<ValueId, (Edge, usize)>,
    /// One frame per enclosing conditional; a frame collects the
    /// shadow nodes for classical values captured across its boundary.
    if_frames: Vec<Vec<NodeId>>,
    /// Wire values already consumed, for linearity checking.
    consumed: FxHashSet<ValueId>,
    vallocs: u32,
}

impl<'k> DependencyAnalysisEngine<'k> {
    /// Create an engine for one kernel.
    pub fn new(kernel: &'k Kernel) -> Self {
        Self {
            kernel,
            arena: Arena::new(),
            counter: QidCounter::default(),
            value_defs: FxHashMap::default(),
            if_frames: vec![],
            consumed: FxHashSet::default(),
            vallocs: 0,
        }
    }

    /// Build the dependency block for the kernel body.
    ///
    /// On error the kernel is unusable for allocation and the caller
    /// leaves it untouched.
    pub fn run(mut self) -> AnalysisResult<(Arena, QidCounter, DependencyBlock, u32)> {
        let kernel = self.kernel;
        let body = self.visit_block(&kernel.body, None)?;
        debug!("kernel '{}' has {} virtual wires", kernel.name, self.vallocs);
        Ok((self.arena, self.counter, body, self.vallocs))
    }

    fn depth(&self) -> usize {
        self.if_frames.len()
    }

    /// The edge for an operand value.
    ///
    /// A quantum-dependent classical value defined in an ancestor
    /// scope is reached through a fresh shadow node, registered with
    /// the conditional sitting directly in the defining scope, so that
    /// conditional picks up an ordering dependency on the value.
    fn visit_value(&mut self, value: ValueId) -> Edge {
        let (edge, def_depth) = *self
            .value_defs
            .get(&value)
            .expect("operand used before definition");

        if matches!(self.arena[edge.node].kind, NodeKind::Arg { .. }) {
            return edge;
        }

        if def_depth != self.depth() && self.arena.is_quantum_dependent(edge.node) {
            let shadow = self.arena.new_shadow(edge.node, edge.result_idx);
            self.if_frames[def_depth].push(shadow);
            return Edge {
                node: shadow,
                result_idx: edge.result_idx,
                qid: None,
                qubit: None,
            };
        }

        edge
    }

    /// Build the node for one operation.
    fn visit_op(&mut self, op: &Operation, is_terminator: bool) -> AnalysisResult<NodeId> {
        validate_op(op)?;

        let mut dependencies = Vec::with_capacity(op.operands.len());
        for &operand in &op.operands {
            if self.kernel.ty(operand).is_quantum() && !self.consumed.insert(operand) {
                return Err(AnalysisError::NonLinearOp(op.name().to_string()));
            }
            dependencies.push(self.visit_value(operand));
        }

        let node = match &op.kind {
            OpKind::BorrowWire { set, .. } => {
                self.vallocs += 1;
                self.arena.new_alloc(set.clone(), self.counter.fresh())
            }
            OpKind::ReturnWire => self.arena.new_op(NodeKind::Dealloc, dependencies),
            OpKind::If { then_blk, else_blk } => {
                self.if_frames.push(vec![]);
                let then_block = self.visit_block(then_blk, Some(&dependencies))?;
                let else_block = self.visit_block(else_blk, Some(&dependencies))?;
                let frame = self.if_frames.pop().expect("unbalanced conditional frame");

                let mut freevars = IndexSet::new();
                for shadow in &frame {
                    freevars.insert(*shadow);
                }
                let ifn = IfNode {
                    then_block,
                    else_block,
                    num_results: op.results.len(),
                    freevars,
                };
                let id = self.arena.new_op(NodeKind::If(Box::new(ifn)), dependencies);

                // The conditional also depends on every value its
                // branches capture, through the shadowed producers.
                for &shadow in &frame {
                    let edge = match self.arena[shadow].kind {
                        NodeKind::Shadow {
                            shadowed,
                            result_idx,
                        } => Edge {
                            node: shadowed,
                            result_idx,
                            qid: None,
                            qubit: None,
                        },
                        _ => unreachable!("frame entry that is not a shadow"),
                    };
                    self.arena[id].dependencies.push(edge);
                }
                self.arena.update_height(id);
                id
            }
            kind if kind.is_terminator() => {
                assert!(is_terminator, "terminator in the middle of a block");
                self.arena
                    .new_op(NodeKind::Terminator { op: kind.clone() }, dependencies)
            }
            OpKind::Gate(_) | OpKind::Measure => self.arena.new_op(
                NodeKind::Op {
                    op: op.kind.clone(),
                    quantum: true,
                },
                dependencies,
            ),
            _ => self.arena.new_op(
                NodeKind::Op {
                    op: op.kind.clone(),
                    quantum: false,
                },
                dependencies,
            ),
        };

        let depth = self.depth();
        for (i, &result) in op.results.iter().enumerate() {
            let edge = Edge::new(&self.arena, node, i);
            self.value_defs.insert(result, (edge, depth));
        }

        Ok(node)
    }

    /// Build the dependency block for `blk`. `incoming` carries the
    /// operand edges of the enclosing conditional, aligned so operand
    /// `i + 1` feeds block argument `i`; the kernel body has none.
    fn visit_block(
        &mut self,
        blk: &IrBlock,
        incoming: Option<&[Edge]>,
    ) -> AnalysisResult<DependencyBlock> {
        let depth = self.depth();

        let mut args = Vec::with_capacity(blk.args.len());
        for (i, &arg_value) in blk.args.iter().enumerate() {
            let qid = incoming.and_then(|deps| deps[i + 1].qid);
            let node = self.arena.new_arg(i, qid);
            let edge = Edge::new(&self.arena, node, 0);
            self.value_defs.insert(arg_value, (edge, depth));
            args.push(node);
        }

        let mut terminator = None;
        let mut deallocs = vec![];
        for (idx, op) in blk.ops.iter().enumerate() {
            let is_term = idx == blk.ops.len() - 1;
            let node = self.visit_op(op, is_term)?;
            if matches!(op.kind, OpKind::ReturnWire) {
                deallocs.push(node);
            }
            if is_term {
                assert!(op.is_terminator(), "block does not end in a terminator");
                terminator = Some(node);
            }
        }
        let terminator = terminator.expect("empty block");

        let graph = DependencyGraph::new(&self.arena, terminator);

        // A wire whose operations never reach the terminator is dead
        // code; nothing downstream will regenerate it.
        for dealloc in deallocs {
            if !graph.roots().contains(dealloc) {
                debug!(
                    "wire is dead code and its operations will be deleted \
                     (did you forget to return a value?)"
                );
            }
        }

        Ok(DependencyBlock::new(args, graph, terminator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_ir::{GateKind, KernelBuilder};

    fn simple_kernel() -> Kernel {
        let mut b = KernelBuilder::new("simple");
        let mut body = IrBlock::default();
        let q = b.borrow_wire(&mut body, "wires", 0);
        let q = b.gate1(&mut body, GateKind::H, q).unwrap();
        let (m, q) = b.measure(&mut body, q).unwrap();
        let bit = b.discriminate(&mut body, m).unwrap();
        b.return_wire(&mut body, q).unwrap();
        b.ret(&mut body, &[bit]);
        b.finish(body)
    }

    #[test]
    fn test_engine_builds_block() {
        let kernel = simple_kernel();
        let (arena, _, body, vallocs) = DependencyAnalysisEngine::new(&kernel).run().unwrap();

        assert_eq!(vallocs, 1);
        assert_eq!(body.qids().len(), 1);
        assert_eq!(body.graph().roots().len(), 2);
        assert_eq!(body.virtual_allocs(&arena).len(), 1);
    }

    #[test]
    fn test_engine_rejects_double_consume() {
        let mut b = KernelBuilder::new("nonlinear");
        let mut body = IrBlock::default();
        let q = b.borrow_wire(&mut body, "wires", 0);
        let q2 = b.gate1(&mut body, GateKind::H, q).unwrap();
        // Reuse the already-consumed value.
        let fresh = b.new_value(skein_ir::Ty::Wire);
        body.ops.push(Operation::new(
            OpKind::Gate(GateKind::X),
            vec![q],
            vec![fresh],
        ));
        b.return_wire(&mut body, q2).unwrap();
        b.return_wire(&mut body, fresh).unwrap();
        b.ret(&mut body, &[]);
        let kernel = b.finish(body);

        let result = DependencyAnalysisEngine::new(&kernel).run();
        assert!(matches!(result, Err(AnalysisError::NonLinearOp(_))));
    }

    #[test]
    fn test_engine_rejects_loops() {
        let mut b = KernelBuilder::new("looped");
        let mut body = IrBlock::default();
        b.loop_op(&mut body, IrBlock::default());
        b.ret(&mut body, &[]);
        let kernel = b.finish(body);

        let result = DependencyAnalysisEngine::new(&kernel).run();
        assert!(matches!(result, Err(AnalysisError::LoopUnsupported)));
    }

    #[test]
    fn test_engine_builds_conditional() {
        let mut b = KernelBuilder::new("cond");
        let mut body = IrBlock::default();
        let q0 = b.borrow_wire(&mut body, "wires", 0);
        let (m, q0) = b.measure(&mut body, q0).unwrap();
        let bit = b.discriminate(&mut body, m).unwrap();
        let q1 = b.borrow_wire(&mut body, "wires", 1);

        let mut then_blk = b.block_with_wire_args(1);
        let targ = then_blk.args[0];
        let tq = b.gate1(&mut then_blk, GateKind::X, targ).unwrap();
        b.yield_wires(&mut then_blk, &[tq]);
        let mut else_blk = b.block_with_wire_args(1);
        let earg = else_blk.args[0];
        b.yield_wires(&mut else_blk, &[earg]);

        let outs = b.if_op(&mut body, bit, &[q1], then_blk, else_blk).unwrap();
        b.return_wire(&mut body, q0).unwrap();
        b.return_wire(&mut body, outs[0]).unwrap();
        b.ret(&mut body, &[bit]);
        let kernel = b.finish(body);

        let (arena, _, body, vallocs) = DependencyAnalysisEngine::new(&kernel).run().unwrap();
        assert_eq!(vallocs, 2);
        assert_eq!(body.graph().containers().len(), 1);

        let cond = body.graph().containers().first().unwrap();
        // Operands are the condition and one wire.
        assert_eq!(arena[cond].dependencies.len(), 2);
        assert!(arena.is_container(cond));
    }

    #[test]
    fn test_engine_shadows_captured_classical_value() {
        let mut b = KernelBuilder::new("nested");
        let mut body = IrBlock::default();
        let q0 = b.borrow_wire(&mut body, "wires", 0);
        let (m, q0) = b.measure(&mut body, q0).unwrap();
        let bit = b.discriminate(&mut body, m).unwrap();
        let q1 = b.borrow_wire(&mut body, "wires", 1);

        // The inner conditional reuses the bit across the outer
        // conditional's boundary.
        let mut inner_then = b.block_with_wire_args(1);
        let ita = inner_then.args[0];
        let itq = b.gate1(&mut inner_then, GateKind::X, ita).unwrap();
        b.yield_wires(&mut inner_then, &[itq]);
        let mut inner_else = b.block_with_wire_args(1);
        let iea = inner_else.args[0];
        b.yield_wires(&mut inner_else, &[iea]);

        let mut outer_then = b.block_with_wire_args(1);
        let ota = outer_then.args[0];
        let inner = b
            .if_op(&mut outer_then, bit, &[ota], inner_then, inner_else)
            .unwrap();
        b.yield_wires(&mut outer_then, &[inner[0]]);
        let mut outer_else = b.block_with_wire_args(1);
        let oea = outer_else.args[0];
        b.yield_wires(&mut outer_else, &[oea]);

        let outs = b
            .if_op(&mut body, bit, &[q1], outer_then, outer_else)
            .unwrap();
        b.return_wire(&mut body, q0).unwrap();
        b.return_wire(&mut body, outs[0]).unwrap();
        b.ret(&mut body, &[bit]);
        let kernel = b.finish(body);

        let (arena, _, body, _) = DependencyAnalysisEngine::new(&kernel).run().unwrap();
        let outer = body.graph().containers().first().unwrap();
        let ifn = match &arena[outer].kind {
            NodeKind::If(ifn) => ifn,
            other => panic!("expected a conditional, got {other:?}"),
        };
        // Condition, one wire, and the shadowed bit.
        assert_eq!(arena[outer].dependencies.len(), 3);
        assert_eq!(ifn.freevars.len(), 1);
        assert_eq!(ifn.then_block.graph().containers().len(), 1);
    }
}
