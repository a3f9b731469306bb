//! Error types for the allocation passes.

use thiserror::Error;

/// Reasons an input kernel is rejected by the allocator.
///
/// Rejection is not fatal: the offending kernel is skipped and left
/// in its pre-pass form. Internal invariant violations, by contrast,
/// are bugs in the pass and panic.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AnalysisError {
    /// A quantum operation is not in linear value form.
    #[error("operation '{0}' is not in linear value form")]
    NonLinearOp(String),

    /// Loops are not supported.
    #[error("loops are not supported")]
    LoopUnsupported,

    /// Function calls are not supported.
    #[error("function calls are not supported")]
    CallUnsupported,

    /// Only borrow-based wire allocation is supported.
    #[error("'{0}' is not a borrow-based wire allocation")]
    NonBorrowAlloc(String),

    /// Kernel declares no results, so qubit management is skipped.
    #[error("kernel declares no results")]
    NoResults,
}

/// Result type for the allocation passes.
pub type AnalysisResult<T> = Result<T, AnalysisError>;
