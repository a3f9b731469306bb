//! Pass trait and the top-level qubit allocation driver.

use tracing::{debug, warn};

use skein_ir::Kernel;

use crate::engine::DependencyAnalysisEngine;
use crate::error::{AnalysisError, AnalysisResult};
use crate::lifetime::LifetimePool;

/// Name of the topology-agnostic wire set regenerated allocations
/// borrow from.
pub const WIRE_SET: &str = "wires";

/// The kind of compilation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Analysis pass that reads but does not modify the kernel.
    Analysis,
    /// Transformation pass that rewrites the kernel.
    Transformation,
}

/// A compilation pass that operates on a kernel.
pub trait Pass: Send + Sync {
    /// Get the name of this pass.
    fn name(&self) -> &str;

    /// Get the kind of this pass.
    fn kind(&self) -> PassKind;

    /// Run the pass on the given kernel.
    fn run(&self, kernel: &mut Kernel) -> AnalysisResult<()>;

    /// Check if this pass should run based on current state.
    ///
    /// This can be overridden to skip passes that are not needed.
    fn should_run(&self, _kernel: &Kernel) -> bool {
        true
    }
}

/// Map every virtual wire of a kernel onto a physical qubit slot and
/// rewrite the kernel into its scheduled form.
///
/// The input kernel is only modified on success; any [`AnalysisError`]
/// leaves it untouched.
pub fn allocate_qubits(kernel: &mut Kernel) -> AnalysisResult<()> {
    if !kernel.has_results() {
        return Err(AnalysisError::NoResults);
    }

    let (mut arena, mut counter, mut body, vallocs) =
        DependencyAnalysisEngine::new(kernel).run()?;
    debug!(
        "analyzing kernel '{}' with {vallocs} virtual wires",
        kernel.name
    );

    let mut set = LifetimePool::new(WIRE_SET);
    // Sink allocations into the conditionals that exclusively use
    // them before lifetimes are measured, so a branch-local wire
    // cannot hold a qubit across the whole conditional.
    body.contract_allocs_pass(&mut arena, &mut counter);
    body.perform_analysis(&mut arena, &mut set);
    set.dump();

    arena.reset_codegen();
    let mut out = Kernel::new(kernel.name.clone());
    out.body = body.codegen(&mut arena, &mut out, &set);
    out.result_tys = kernel.result_tys.clone();
    out.num_qubits = Some(u32::try_from(set.count()).expect("qubit count overflow"));
    *kernel = out;
    Ok(())
}

/// The qubit allocation and scheduling pass.
///
/// Kernels the analysis cannot handle are skipped with a warning and
/// survive unchanged; later stages tolerate untreated kernels.
#[derive(Debug, Default)]
pub struct QubitAllocationPass;

impl QubitAllocationPass {
    /// Create the pass.
    pub fn new() -> Self {
        Self
    }
}

impl Pass for QubitAllocationPass {
    fn name(&self) -> &str {
        "qubit-allocation"
    }

    fn kind(&self) -> PassKind {
        PassKind::Transformation
    }

    fn should_run(&self, kernel: &Kernel) -> bool {
        kernel.has_results()
    }

    fn run(&self, kernel: &mut Kernel) -> AnalysisResult<()> {
        match allocate_qubits(kernel) {
            Ok(()) => Ok(()),
            Err(AnalysisError::NoResults) => {
                debug!(
                    "kernel '{}' returns no results, qubit allocation skipped",
                    kernel.name
                );
                Ok(())
            }
            Err(err) => {
                warn!("skipping kernel '{}': {err}", kernel.name);
                Ok(())
            }
        }
    }
}
