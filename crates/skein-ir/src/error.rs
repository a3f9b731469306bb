//! Error types for the IR crate.

use thiserror::Error;

use crate::value::{Ty, ValueId};

/// Errors that can occur while building or inspecting kernels.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IrError {
    /// Gate requires a different number of wires.
    #[error("Gate '{gate_name}' requires {expected} wires, got {got}")]
    WireCountMismatch {
        /// Name of the gate.
        gate_name: String,
        /// Expected number of wires.
        expected: usize,
        /// Actual number provided.
        got: usize,
    },

    /// Gate requires a different number of parameters.
    #[error("Gate '{gate_name}' requires {expected} parameters, got {got}")]
    ParamCountMismatch {
        /// Name of the gate.
        gate_name: String,
        /// Expected number of parameters.
        expected: usize,
        /// Actual number provided.
        got: usize,
    },

    /// A value had an unexpected type.
    #[error("Value {value} has type {got}, expected {expected}")]
    TypeMismatch {
        /// The offending value.
        value: ValueId,
        /// The expected type.
        expected: Ty,
        /// The actual type.
        got: Ty,
    },

    /// Conditional arms disagree on their linear signature.
    #[error("Conditional arms have mismatched wire signatures: then yields {then_wires}, else yields {else_wires}")]
    BranchSignatureMismatch {
        /// Wires yielded by the then arm.
        then_wires: usize,
        /// Wires yielded by the else arm.
        else_wires: usize,
    },
}

/// Result type for IR operations.
pub type IrResult<T> = Result<T, IrError>;
