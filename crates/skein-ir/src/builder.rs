//! Builder for constructing kernels in linear value form.

use crate::block::{Block, Kernel};
use crate::error::{IrError, IrResult};
use crate::gate::GateKind;
use crate::op::{OpKind, Operation};
use crate::value::{Ty, ValueId};

/// Incrementally builds a [`Kernel`], creating values in the kernel's
/// type table and appending type-checked operations to blocks.
///
/// Blocks under construction are plain [`Block`] values; all
/// op-emitting methods take the target block explicitly so nested
/// conditional arms can be built with the same builder.
pub struct KernelBuilder {
    kernel: Kernel,
}

impl KernelBuilder {
    /// Create a builder for a kernel with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            kernel: Kernel::new(name),
        }
    }

    /// Create a fresh value of the given type.
    pub fn new_value(&mut self, ty: Ty) -> ValueId {
        self.kernel.new_value(ty)
    }

    /// Get the type of a value.
    pub fn ty(&self, value: ValueId) -> Ty {
        self.kernel.ty(value)
    }

    /// Create a block with `num_wires` fresh wire arguments.
    pub fn block_with_wire_args(&mut self, num_wires: usize) -> Block {
        let args = (0..num_wires)
            .map(|_| self.kernel.new_value(Ty::Wire))
            .collect();
        Block::new(args)
    }

    fn expect_ty(&self, value: ValueId, expected: Ty) -> IrResult<()> {
        let got = self.kernel.ty(value);
        if got != expected {
            return Err(IrError::TypeMismatch {
                value,
                expected,
                got,
            });
        }
        Ok(())
    }

    /// Borrow a wire from the named wire set.
    pub fn borrow_wire(&mut self, block: &mut Block, set: impl Into<String>, slot: u32) -> ValueId {
        let wire = self.kernel.new_value(Ty::Wire);
        block.ops.push(Operation::new(
            OpKind::BorrowWire {
                set: set.into(),
                slot,
            },
            vec![],
            vec![wire],
        ));
        wire
    }

    /// Return a borrowed wire.
    pub fn return_wire(&mut self, block: &mut Block, wire: ValueId) -> IrResult<()> {
        self.expect_ty(wire, Ty::Wire)?;
        block
            .ops
            .push(Operation::new(OpKind::ReturnWire, vec![wire], vec![]));
        Ok(())
    }

    /// Apply a gate, returning the fresh wire results.
    pub fn gate(
        &mut self,
        block: &mut Block,
        gate: GateKind,
        params: &[ValueId],
        wires: &[ValueId],
    ) -> IrResult<Vec<ValueId>> {
        if wires.len() != gate.num_wires() {
            return Err(IrError::WireCountMismatch {
                gate_name: gate.name().to_string(),
                expected: gate.num_wires(),
                got: wires.len(),
            });
        }
        if params.len() != gate.num_params() {
            return Err(IrError::ParamCountMismatch {
                gate_name: gate.name().to_string(),
                expected: gate.num_params(),
                got: params.len(),
            });
        }
        for &p in params {
            self.expect_ty(p, Ty::Float)?;
        }
        for &w in wires {
            self.expect_ty(w, Ty::Wire)?;
        }
        let results: Vec<ValueId> = wires.iter().map(|_| self.kernel.new_value(Ty::Wire)).collect();
        let mut operands = params.to_vec();
        operands.extend_from_slice(wires);
        block
            .ops
            .push(Operation::new(OpKind::Gate(gate), operands, results.clone()));
        Ok(results)
    }

    /// Apply a parameterless single-wire gate.
    pub fn gate1(&mut self, block: &mut Block, gate: GateKind, wire: ValueId) -> IrResult<ValueId> {
        Ok(self.gate(block, gate, &[], &[wire])?[0])
    }

    /// Measure a wire, returning `(meas, wire)`.
    pub fn measure(&mut self, block: &mut Block, wire: ValueId) -> IrResult<(ValueId, ValueId)> {
        self.expect_ty(wire, Ty::Wire)?;
        let meas = self.kernel.new_value(Ty::Meas);
        let out = self.kernel.new_value(Ty::Wire);
        block
            .ops
            .push(Operation::new(OpKind::Measure, vec![wire], vec![meas, out]));
        Ok((meas, out))
    }

    /// Discriminate a measurement token into a bit.
    pub fn discriminate(&mut self, block: &mut Block, meas: ValueId) -> IrResult<ValueId> {
        self.expect_ty(meas, Ty::Meas)?;
        let bit = self.kernel.new_value(Ty::Bit);
        block
            .ops
            .push(Operation::new(OpKind::Discriminate, vec![meas], vec![bit]));
        Ok(bit)
    }

    /// Materialize a float constant.
    pub fn const_float(&mut self, block: &mut Block, value: f64) -> ValueId {
        let v = self.kernel.new_value(Ty::Float);
        block
            .ops
            .push(Operation::new(OpKind::ConstFloat(value), vec![], vec![v]));
        v
    }

    /// Materialize an integer constant.
    pub fn const_int(&mut self, block: &mut Block, value: i64) -> ValueId {
        let v = self.kernel.new_value(Ty::Int);
        block
            .ops
            .push(Operation::new(OpKind::ConstInt(value), vec![], vec![v]));
        v
    }

    /// Emit a structured conditional over `wires`, returning the fresh
    /// wire results. Both arms must yield the same number of wires as
    /// flow in.
    pub fn if_op(
        &mut self,
        block: &mut Block,
        condition: ValueId,
        wires: &[ValueId],
        then_blk: Block,
        else_blk: Block,
    ) -> IrResult<Vec<ValueId>> {
        self.expect_ty(condition, Ty::Bit)?;
        for &w in wires {
            self.expect_ty(w, Ty::Wire)?;
        }
        let then_wires = then_blk.terminator().map_or(0, |t| t.operands.len());
        let else_wires = else_blk.terminator().map_or(0, |t| t.operands.len());
        if then_wires != else_wires {
            return Err(IrError::BranchSignatureMismatch {
                then_wires,
                else_wires,
            });
        }
        let results: Vec<ValueId> = wires.iter().map(|_| self.kernel.new_value(Ty::Wire)).collect();
        let mut operands = vec![condition];
        operands.extend_from_slice(wires);
        block.ops.push(Operation::new(
            OpKind::If { then_blk, else_blk },
            operands,
            results.clone(),
        ));
        Ok(results)
    }

    /// Terminate a conditional arm, yielding wires to the parent.
    pub fn yield_wires(&mut self, block: &mut Block, wires: &[ValueId]) {
        block
            .ops
            .push(Operation::new(OpKind::Yield, wires.to_vec(), vec![]));
    }

    /// Terminate the kernel body, returning classical results.
    pub fn ret(&mut self, block: &mut Block, values: &[ValueId]) {
        self.kernel.result_tys = values.iter().map(|&v| self.kernel.ty(v)).collect();
        block
            .ops
            .push(Operation::new(OpKind::Return, values.to_vec(), vec![]));
    }

    /// Emit a non-borrow wire allocation (rejected by the allocator).
    pub fn alloc_wire(&mut self, block: &mut Block) -> ValueId {
        let wire = self.kernel.new_value(Ty::Wire);
        block
            .ops
            .push(Operation::new(OpKind::AllocWire, vec![], vec![wire]));
        wire
    }

    /// Emit a call (rejected by the allocator).
    pub fn call(&mut self, block: &mut Block, callee: impl Into<String>) {
        block.ops.push(Operation::new(
            OpKind::Call {
                callee: callee.into(),
            },
            vec![],
            vec![],
        ));
    }

    /// Emit a classical store (warned about by the allocator).
    pub fn store(&mut self, block: &mut Block, value: ValueId) {
        block
            .ops
            .push(Operation::new(OpKind::Store, vec![value], vec![]));
    }

    /// Emit a structured loop (rejected by the allocator).
    pub fn loop_op(&mut self, block: &mut Block, body: Block) {
        block
            .ops
            .push(Operation::new(OpKind::Loop { body }, vec![], vec![]));
    }

    /// Finish the kernel, installing `body` as its top-level block.
    pub fn finish(mut self, body: Block) -> Kernel {
        self.kernel.body = body;
        self.kernel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_bell_like_kernel() {
        let mut b = KernelBuilder::new("bell");
        let mut body = Block::default();
        let q0 = b.borrow_wire(&mut body, "wires", 0);
        let q1 = b.borrow_wire(&mut body, "wires", 1);
        let q0 = b.gate1(&mut body, GateKind::H, q0).unwrap();
        let out = b.gate(&mut body, GateKind::CX, &[], &[q0, q1]).unwrap();
        let (m0, q0) = b.measure(&mut body, out[0]).unwrap();
        let (m1, q1) = b.measure(&mut body, out[1]).unwrap();
        let b0 = b.discriminate(&mut body, m0).unwrap();
        let b1 = b.discriminate(&mut body, m1).unwrap();
        b.return_wire(&mut body, q0).unwrap();
        b.return_wire(&mut body, q1).unwrap();
        b.ret(&mut body, &[b0, b1]);
        let kernel = b.finish(body);

        assert_eq!(kernel.body.num_ops(), 11);
        assert_eq!(kernel.result_tys, vec![Ty::Bit, Ty::Bit]);
        assert!(kernel.has_results());
    }

    #[test]
    fn test_gate_arity_checked() {
        let mut b = KernelBuilder::new("k");
        let mut body = Block::default();
        let q = b.borrow_wire(&mut body, "wires", 0);
        let err = b.gate(&mut body, GateKind::CX, &[], &[q]);
        assert!(matches!(err, Err(IrError::WireCountMismatch { .. })));
    }

    #[test]
    fn test_rotation_param_typed() {
        let mut b = KernelBuilder::new("k");
        let mut body = Block::default();
        let q = b.borrow_wire(&mut body, "wires", 0);
        let theta = b.const_float(&mut body, 1.5);
        let q = b.gate(&mut body, GateKind::Rx, &[theta], &[q]).unwrap()[0];
        b.return_wire(&mut body, q).unwrap();
        // Wrong param type is rejected.
        let i = b.const_int(&mut body, 3);
        let err = b.gate(&mut body, GateKind::Rz, &[i], &[q]);
        assert!(matches!(err, Err(IrError::TypeMismatch { .. })));
    }

    #[test]
    fn test_branch_signature_mismatch() {
        let mut b = KernelBuilder::new("k");
        let mut body = Block::default();
        let q = b.borrow_wire(&mut body, "wires", 0);
        let (m, q) = b.measure(&mut body, q).unwrap();
        let cond = b.discriminate(&mut body, m).unwrap();

        let mut then_blk = b.block_with_wire_args(1);
        let ta = then_blk.args[0];
        b.yield_wires(&mut then_blk, &[ta]);
        let else_blk = b.block_with_wire_args(1);
        // Else arm has no terminator, so signatures disagree.
        let err = b.if_op(&mut body, cond, &[q], then_blk, else_blk);
        assert!(matches!(err, Err(IrError::BranchSignatureMismatch { .. })));
    }
}
