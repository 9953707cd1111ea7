//! Unified error types for the dopt ecosystem
//!
//! [`DoptError`] carries every failure class the transcription pipeline can
//! produce. Configuration and linking errors are raised while a transcription
//! is being built and abort it; solver failures carry the wall-clock time
//! spent in the solver so callers can report it.
//!
//! # Example
//!
//! ```ignore
//! use dopt_core::{DoptError, DoptResult};
//!
//! fn build(n_e: usize) -> DoptResult<()> {
//!     if n_e == 0 {
//!         return Err(DoptError::Configuration("mesh needs at least one element".into()));
//!     }
//!     Ok(())
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// Unified error type for all dopt operations.
#[derive(Error, Debug)]
pub enum DoptError {
    /// Invalid options: unknown scheme, blocking factors not matching the
    /// element count, unknown update parameter, malformed mesh.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A phase link names a state or parameter the model does not declare.
    #[error("Linking error: '{name}' not found in model")]
    Linking { name: String },

    /// A named variable is absent from measurement data or from the
    /// state/algebraic/control blocks.
    #[error("Variable not found: '{name}'")]
    VariableNotFound { name: String },

    /// The NLP solver reported non-convergence or infeasibility.
    #[error("Solver failure after {elapsed:?}: {message}")]
    SolverFailure { message: String, elapsed: Duration },

    /// Decision-vector accounting did not reach the expected length.
    #[error("Assembly invariant violated: expected {expected} decision variables, laid out {actual}")]
    AssemblyInvariant { expected: usize, actual: usize },

    /// I/O errors (result files, measurement tables)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing errors
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenience type alias for Results using DoptError.
pub type DoptResult<T> = Result<T, DoptError>;

impl DoptError {
    pub fn config(msg: impl Into<String>) -> Self {
        DoptError::Configuration(msg.into())
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        DoptError::VariableNotFound { name: name.into() }
    }

    /// Configuration and linking errors are unrecoverable for the current run.
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(
            self,
            DoptError::Configuration(_) | DoptError::Linking { .. } | DoptError::AssemblyInvariant { .. }
        )
    }
}

impl From<anyhow::Error> for DoptError {
    fn from(err: anyhow::Error) -> Self {
        DoptError::Parse(err.to_string())
    }
}
