//! Error types for the dispatch engine

use std::sync::Arc;

use thiserror::Error;

/// Errors that settle a submission's result handle
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("task cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("task failed: {0}")]
    Task(Arc<eyre::Report>),

    #[error("dispatcher dropped before the task settled")]
    HandleDropped,
}

impl DispatchError {
    /// Build a cancellation error with the default reason
    pub fn cancelled() -> Self {
        DispatchError::Cancelled {
            reason: "cancellation token fired".to_string(),
        }
    }

    /// Wrap a task failure
    pub fn task(report: eyre::Report) -> Self {
        DispatchError::Task(Arc::new(report))
    }

    /// Check if this rejection came from a cancellation token
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled { .. })
    }

    /// Check if this rejection came from the task body itself
    pub fn is_task_failure(&self) -> bool {
        matches!(self, DispatchError::Task(_))
    }
}

/// Errors surfaced by [`crate::Emitter::emit`]
#[derive(Debug, Error)]
pub enum EmitError {
    /// The error event was emitted with zero error listeners
    #[error("error event emitted with no listeners attached")]
    UnhandledError,

    /// A listener failed and capture-failures could not redirect it
    #[error("listener failed: {0}")]
    Listener(eyre::Report),
}
