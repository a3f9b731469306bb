//! Standard gate set for linear-value kernels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A standard quantum gate.
///
/// Gates act on wires in linear form: each wire operand is consumed
/// and a fresh wire value is produced for its post-gate state.
/// Rotation gates take their angle as a preceding classical float
/// operand rather than an inline attribute, so classical operands
/// always precede quantum operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateKind {
    /// Hadamard gate.
    H,
    /// Pauli-X gate.
    X,
    /// Pauli-Y gate.
    Y,
    /// Pauli-Z gate.
    Z,
    /// S gate (sqrt(Z)).
    S,
    /// T gate.
    T,
    /// X-axis rotation, one angle parameter.
    Rx,
    /// Y-axis rotation, one angle parameter.
    Ry,
    /// Z-axis rotation, one angle parameter.
    Rz,
    /// Controlled-X gate.
    CX,
    /// Controlled-Z gate.
    CZ,
    /// Swap gate. Result `i` carries the wire from operand `1 - i`.
    Swap,
    /// Reset a wire to |0>.
    Reset,
}

impl GateKind {
    /// Get the lowercase name of this gate.
    pub fn name(self) -> &'static str {
        match self {
            GateKind::H => "h",
            GateKind::X => "x",
            GateKind::Y => "y",
            GateKind::Z => "z",
            GateKind::S => "s",
            GateKind::T => "t",
            GateKind::Rx => "rx",
            GateKind::Ry => "ry",
            GateKind::Rz => "rz",
            GateKind::CX => "cx",
            GateKind::CZ => "cz",
            GateKind::Swap => "swap",
            GateKind::Reset => "reset",
        }
    }

    /// Number of wire operands (and wire results) of this gate.
    pub fn num_wires(self) -> usize {
        match self {
            GateKind::CX | GateKind::CZ | GateKind::Swap => 2,
            _ => 1,
        }
    }

    /// Number of classical angle parameters of this gate.
    pub fn num_params(self) -> usize {
        match self {
            GateKind::Rx | GateKind::Ry | GateKind::Rz => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_arity() {
        assert_eq!(GateKind::H.num_wires(), 1);
        assert_eq!(GateKind::CX.num_wires(), 2);
        assert_eq!(GateKind::Rz.num_params(), 1);
        assert_eq!(GateKind::X.num_params(), 0);
    }

    #[test]
    fn test_gate_name() {
        assert_eq!(GateKind::Swap.name(), "swap");
        assert_eq!(format!("{}", GateKind::Rx), "rx");
    }
}
