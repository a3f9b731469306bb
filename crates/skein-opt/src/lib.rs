//! Skein Qubit Allocation and Scheduling
//!
//! This crate maps the virtual wires of a kernel onto a minimal set of
//! physical qubit slots. It builds a dependency DAG over the kernel's
//! linear-value operations, schedules every quantum operation to a
//! cycle, measures per-wire lifetimes, and reuses physical slots whose
//! lifetimes do not overlap. Conditionals are handled by lifting
//! common work out of both branches and by contracting branch-local
//! allocations into the branch that uses them.
//!
//! # Overview
//!
//! The pass runs in stages over one kernel:
//! 1. **Construction**: a single forward walk of the body builds one
//!    dependency node per operation ([`engine`]).
//! 2. **Contraction**: allocations used only inside one conditional
//!    are sunk into it ([`DependencyBlock::contract_allocs_pass`]).
//! 3. **Analysis**: inside-out over nested conditionals, branches are
//!    analyzed, their allocations lifted to the parent, common prefix
//!    and suffix operations hoisted out, then the block is scheduled
//!    and its wires mapped to physical slots
//!    ([`DependencyBlock::perform_analysis`]).
//! 4. **Regeneration**: the kernel is re-emitted cycle by cycle with
//!    `borrow_wire` allocations naming physical slots
//!    ([`DependencyBlock::codegen`]).
//!
//! # Example
//!
//! ```rust
//! use skein_ir::{Block, GateKind, KernelBuilder};
//! use skein_opt::{allocate_qubits, WIRE_SET};
//!
//! let mut b = KernelBuilder::new("flip");
//! let mut body = Block::default();
//! let q = b.borrow_wire(&mut body, WIRE_SET, 0);
//! let q = b.gate1(&mut body, GateKind::X, q).unwrap();
//! let (m, q) = b.measure(&mut body, q).unwrap();
//! let bit = b.discriminate(&mut body, m).unwrap();
//! b.return_wire(&mut body, q).unwrap();
//! b.ret(&mut body, &[bit]);
//! let mut kernel = b.finish(body);
//!
//! allocate_qubits(&mut kernel).unwrap();
//! assert_eq!(kernel.num_qubits, Some(1));
//! ```
//!
//! Kernels the analysis cannot handle (loops, calls, non-borrow
//! allocation, non-linear wire use) are rejected with an
//! [`AnalysisError`]; the [`QubitAllocationPass`] wrapper downgrades
//! the rejection to a warning and leaves such kernels untouched.

pub mod block;
pub mod cond;
pub mod engine;
pub mod error;
pub mod graph;
pub mod lifetime;
pub mod node;
pub mod pass;

pub use block::DependencyBlock;
pub use engine::DependencyAnalysisEngine;
pub use error::{AnalysisError, AnalysisResult};
pub use graph::DependencyGraph;
pub use lifetime::{LifeTime, LifetimePool};
pub use node::{Arena, NodeId, PhysicalQid, VirtualQid};
pub use pass::{allocate_qubits, Pass, PassKind, QubitAllocationPass, WIRE_SET};
