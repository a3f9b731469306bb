//! Value identifiers and types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an SSA value within a kernel.
///
/// Values are created once by the defining operation and, for wire
/// values, consumed exactly once (linear value semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl From<u32> for ValueId {
    fn from(id: u32) -> Self {
        ValueId(id)
    }
}

/// The type of a kernel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    /// A quantum wire. Linear: consumed exactly once.
    Wire,
    /// An opaque measurement token produced by a measure op.
    Meas,
    /// A classical boolean.
    Bit,
    /// A classical integer.
    Int,
    /// A classical float.
    Float,
}

impl Ty {
    /// Check if this is the quantum wire type.
    #[inline]
    pub fn is_quantum(self) -> bool {
        matches!(self, Ty::Wire)
    }

    /// Check if this is a classical type (anything but a wire).
    #[inline]
    pub fn is_classical(self) -> bool {
        !self.is_quantum()
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Ty::Wire => "wire",
            Ty::Meas => "meas",
            Ty::Bit => "bit",
            Ty::Int => "int",
            Ty::Float => "float",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", ValueId(3)), "%3");
    }

    #[test]
    fn test_ty_classification() {
        assert!(Ty::Wire.is_quantum());
        assert!(!Ty::Wire.is_classical());
        assert!(Ty::Bit.is_classical());
        assert!(Ty::Meas.is_classical());
    }
}
