//! Error taxonomy of the solver
//!
//! Every fatal check is collective in behavior: each process evaluates the
//! same condition on the same inputs and returns the same error, so no
//! error state ever needs to cross the communicator.
use thiserror::Error;

/// Errors reported by topology, switch and solver construction or execution
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("Green's function evaluator: {0}")]
    Kernel(String),

    #[error("unsupported combination: {0}")]
    Unsupported(String),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SolverError>;

/// Shorthand for configuration errors
pub fn config_err<T>(msg: impl Into<String>) -> Result<T> {
    Err(SolverError::Config(msg.into()))
}

/// Shorthand for invariant violations
pub fn invariant_err<T>(msg: impl Into<String>) -> Result<T> {
    Err(SolverError::Invariant(msg.into()))
}
