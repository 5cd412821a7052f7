//! Error types for the execution engine

use thiserror::Error;

/// Structural worker-pool errors.
///
/// Job outcomes are never errors; the runner always resolves with a
/// [`crate::events::RunResult`]. The pool rejects only for structural
/// reasons, and the display strings below are the wire-visible reasons.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Pool is shutting down")]
    ShuttingDown,

    #[error("No workers available")]
    NoWorkers,

    #[error("Queue overflow")]
    QueueOverflow,
}

/// Errors surfaced at the executor facade boundary
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Missing or malformed input; surfaced before any task is created.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Task not found: {0}")]
    TaskNotFound(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_error_reasons_match_wire_contract() {
        assert_eq!(PoolError::ShuttingDown.to_string(), "Pool is shutting down");
        assert_eq!(PoolError::NoWorkers.to_string(), "No workers available");
        assert_eq!(PoolError::QueueOverflow.to_string(), "Queue overflow");
    }
}
