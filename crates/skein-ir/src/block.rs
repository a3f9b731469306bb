//! Blocks and kernels.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::op::{OpKind, Operation};
use crate::value::{Ty, ValueId};

/// A structured block: wire arguments followed by a straight-line
/// operation list whose final operation is a terminator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Incoming wire argument values.
    pub args: Vec<ValueId>,
    /// Operations in program order; the last one is the terminator.
    pub ops: Vec<Operation>,
}

impl Block {
    /// Create an empty block with the given arguments.
    pub fn new(args: Vec<ValueId>) -> Self {
        Self { args, ops: vec![] }
    }

    /// Get the terminator operation, if the block is complete.
    pub fn terminator(&self) -> Option<&Operation> {
        self.ops.last().filter(|op| op.is_terminator())
    }

    /// Number of operations, excluding nested blocks' contents.
    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }
}

/// A quantum kernel in linear value form.
///
/// The kernel owns the type table for every value created anywhere in
/// its body, including nested blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    /// Kernel name.
    pub name: String,
    /// The single top-level body block.
    pub body: Block,
    /// Value types, indexed by [`ValueId`].
    types: Vec<Ty>,
    /// Types of the kernel's classical results.
    pub result_tys: Vec<Ty>,
    /// Number of physical qubit slots used, set after allocation.
    pub num_qubits: Option<u32>,
}

impl Kernel {
    /// Create an empty kernel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: Block::default(),
            types: vec![],
            result_tys: vec![],
            num_qubits: None,
        }
    }

    /// Create a fresh value of the given type.
    pub fn new_value(&mut self, ty: Ty) -> ValueId {
        let id = ValueId(u32::try_from(self.types.len()).expect("value table overflow"));
        self.types.push(ty);
        id
    }

    /// Get the type of a value.
    pub fn ty(&self, value: ValueId) -> Ty {
        self.types[value.0 as usize]
    }

    /// Number of values created in this kernel.
    pub fn num_values(&self) -> usize {
        self.types.len()
    }

    /// Check if the kernel declares classical results.
    pub fn has_results(&self) -> bool {
        !self.result_tys.is_empty()
    }
}

fn fmt_op(op: &Operation, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    let pad = "  ".repeat(indent);
    write!(f, "{pad}")?;
    if !op.results.is_empty() {
        let results: Vec<String> = op.results.iter().map(ToString::to_string).collect();
        write!(f, "{} = ", results.join(", "))?;
    }
    write!(f, "{}", op.name())?;
    match &op.kind {
        OpKind::BorrowWire { set, slot } => write!(f, "<{set}[{slot}]>")?,
        OpKind::ConstFloat(v) => write!(f, "<{v}>")?,
        OpKind::ConstInt(v) => write!(f, "<{v}>")?,
        OpKind::Call { callee } => write!(f, "<{callee}>")?,
        _ => {}
    }
    let operands: Vec<String> = op.operands.iter().map(ToString::to_string).collect();
    writeln!(f, " {}", operands.join(", "))?;
    match &op.kind {
        OpKind::If { then_blk, else_blk } => {
            writeln!(f, "{pad}then:")?;
            fmt_block(then_blk, f, indent + 1)?;
            writeln!(f, "{pad}else:")?;
            fmt_block(else_blk, f, indent + 1)?;
        }
        OpKind::Loop { body } => {
            writeln!(f, "{pad}body:")?;
            fmt_block(body, f, indent + 1)?;
        }
        _ => {}
    }
    Ok(())
}

fn fmt_block(block: &Block, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    let pad = "  ".repeat(indent);
    if !block.args.is_empty() {
        let args: Vec<String> = block.args.iter().map(ToString::to_string).collect();
        writeln!(f, "{pad}args: {}", args.join(", "))?;
    }
    for op in &block.ops {
        fmt_op(op, f, indent)?;
    }
    Ok(())
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "kernel @{}:", self.name)?;
        fmt_block(&self.body, f, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_value_types() {
        let mut k = Kernel::new("k");
        let w = k.new_value(Ty::Wire);
        let b = k.new_value(Ty::Bit);
        assert_eq!(k.ty(w), Ty::Wire);
        assert_eq!(k.ty(b), Ty::Bit);
        assert_eq!(k.num_values(), 2);
    }

    #[test]
    fn test_terminator_lookup() {
        let mut block = Block::default();
        assert!(block.terminator().is_none());
        block
            .ops
            .push(Operation::new(OpKind::Return, vec![], vec![]));
        assert!(block.terminator().is_some());
    }
}
