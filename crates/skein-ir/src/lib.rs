//! Skein Linear-Value Kernel IR
//!
//! This crate defines the intermediate representation consumed and
//! produced by the skein qubit allocation passes. Kernels are in
//! *linear value form*: every quantum wire value is consumed exactly
//! once, and every operation touching a wire produces a fresh value
//! for the wire's post-operation state. Control flow is structured —
//! a single top-level block plus nested `if`/`else` conditionals with
//! matching linear signatures on both arms.
//!
//! # Example
//!
//! ```rust
//! use skein_ir::{Block, GateKind, KernelBuilder};
//!
//! let mut b = KernelBuilder::new("flip");
//! let mut body = Block::default();
//! let q = b.borrow_wire(&mut body, "wires", 0);
//! let q = b.gate1(&mut body, GateKind::X, q).unwrap();
//! let (m, q) = b.measure(&mut body, q).unwrap();
//! let bit = b.discriminate(&mut body, m).unwrap();
//! b.return_wire(&mut body, q).unwrap();
//! b.ret(&mut body, &[bit]);
//! let kernel = b.finish(body);
//! assert!(kernel.has_results());
//! ```

pub mod block;
pub mod builder;
pub mod error;
pub mod gate;
pub mod op;
pub mod value;

pub use block::{Block, Kernel};
pub use builder::KernelBuilder;
pub use error::{IrError, IrResult};
pub use gate::GateKind;
pub use op::{OpKind, Operation};
pub use value::{Ty, ValueId};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_serde_roundtrip() {
        let mut b = KernelBuilder::new("roundtrip");
        let mut body = Block::default();
        let q = b.borrow_wire(&mut body, "wires", 0);
        let (m, q) = b.measure(&mut body, q).unwrap();
        let bit = b.discriminate(&mut body, m).unwrap();
        b.return_wire(&mut body, q).unwrap();
        b.ret(&mut body, &[bit]);
        let kernel = b.finish(body);

        let json = serde_json::to_string(&kernel).unwrap();
        let back: Kernel = serde_json::from_str(&json).unwrap();
        assert_eq!(kernel, back);
    }

    #[test]
    fn test_kernel_display_dump() {
        let mut b = KernelBuilder::new("dump");
        let mut body = Block::default();
        let q = b.borrow_wire(&mut body, "wires", 0);
        let q = b.gate1(&mut body, GateKind::H, q).unwrap();
        b.return_wire(&mut body, q).unwrap();
        b.ret(&mut body, &[]);
        let kernel = b.finish(body);

        let text = kernel.to_string();
        assert!(text.contains("kernel @dump"));
        assert!(text.contains("borrow_wire<wires[0]>"));
        assert!(text.contains("h %0"));
    }
}
