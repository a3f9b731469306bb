//! Kernel operations.

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::gate::GateKind;
use crate::value::ValueId;

/// The kind of a kernel operation.
///
/// Wire-touching operations are in linear form: every wire operand is
/// consumed and a fresh wire result is produced for the wire's
/// post-operation state. Classical operands always precede wire
/// operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    /// Borrow a wire from a named wire set. Result: one wire.
    ///
    /// On input kernels `slot` is the wire's identity within the set;
    /// after qubit allocation it is the assigned physical qubit slot.
    BorrowWire {
        /// The wire set this wire belongs to.
        set: String,
        /// Identity (input) or physical slot (output) within the set.
        slot: u32,
    },
    /// Return a borrowed wire. Operand: one wire. No results.
    ReturnWire,
    /// A standard gate. Operands: `[params.., wires..]`, results: wires.
    Gate(GateKind),
    /// Measure a wire. Operand: one wire, results: `(meas, wire)`.
    Measure,
    /// Convert a measurement token to a bit. Operand: meas, result: bit.
    Discriminate,
    /// A classical float constant. Result: one float.
    ConstFloat(f64),
    /// A classical integer constant. Result: one int.
    ConstInt(i64),
    /// Structured conditional. Operands: `[condition, wires..]`,
    /// results: wires with the same linear signature on both arms.
    If {
        /// Block executed when the condition is true.
        then_blk: Block,
        /// Block executed when the condition is false.
        else_blk: Block,
    },
    /// Block terminator for conditional arms. Operands: yielded wires.
    Yield,
    /// Kernel terminator. Operands: classical kernel results.
    Return,

    // Constructs the allocator rejects, carried so validation has
    // something real to reject.
    /// Stack-style wire allocation (not borrow-based). Result: one wire.
    AllocWire,
    /// Call to another kernel.
    Call {
        /// Name of the callee.
        callee: String,
    },
    /// Structured loop.
    Loop {
        /// The loop body.
        body: Block,
    },
    /// Classical memory store.
    Store,
}

impl OpKind {
    /// Get the name of this operation kind.
    pub fn name(&self) -> &str {
        match self {
            OpKind::BorrowWire { .. } => "borrow_wire",
            OpKind::ReturnWire => "return_wire",
            OpKind::Gate(g) => g.name(),
            OpKind::Measure => "mz",
            OpKind::Discriminate => "discriminate",
            OpKind::ConstFloat(_) => "const_float",
            OpKind::ConstInt(_) => "const_int",
            OpKind::If { .. } => "if",
            OpKind::Yield => "yield",
            OpKind::Return => "return",
            OpKind::AllocWire => "alloc_wire",
            OpKind::Call { .. } => "call",
            OpKind::Loop { .. } => "loop",
            OpKind::Store => "store",
        }
    }

    /// Number of classical operands preceding the wire operands.
    fn num_leading_classical(&self) -> usize {
        match self {
            OpKind::Gate(g) => g.num_params(),
            // The condition comes first.
            OpKind::If { .. } => 1,
            _ => 0,
        }
    }

    /// Given a wire result index, the operand index the wire came in on.
    ///
    /// Measure results are `(meas, wire)`, so every result maps to the
    /// single wire operand. Swap results are crossed.
    pub fn wire_operand_for_result(&self, result_idx: usize) -> usize {
        match self {
            OpKind::Measure => 0,
            OpKind::Gate(GateKind::Swap) => 1 - result_idx,
            _ => result_idx + self.num_leading_classical(),
        }
    }

    /// Given a wire operand index, the result index carrying the wire
    /// out. Inverse of [`wire_operand_for_result`] up to the measure
    /// token result.
    ///
    /// [`wire_operand_for_result`]: OpKind::wire_operand_for_result
    pub fn wire_result_for_operand(&self, operand_idx: usize) -> usize {
        match self {
            OpKind::Measure => 1,
            OpKind::Gate(GateKind::Swap) => 1 - operand_idx,
            _ => operand_idx - self.num_leading_classical(),
        }
    }

    /// Check if this is a terminator kind.
    pub fn is_terminator(&self) -> bool {
        matches!(self, OpKind::Yield | OpKind::Return)
    }
}

/// A complete operation with operands and results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// The kind of operation.
    pub kind: OpKind,
    /// Operand values, classical before quantum.
    pub operands: Vec<ValueId>,
    /// Result values.
    pub results: Vec<ValueId>,
}

impl Operation {
    /// Create an operation.
    pub fn new(kind: OpKind, operands: Vec<ValueId>, results: Vec<ValueId>) -> Self {
        Self {
            kind,
            operands,
            results,
        }
    }

    /// Get the name of this operation.
    pub fn name(&self) -> &str {
        self.kind.name()
    }

    /// Check if this is a terminator.
    pub fn is_terminator(&self) -> bool {
        self.kind.is_terminator()
    }
}
