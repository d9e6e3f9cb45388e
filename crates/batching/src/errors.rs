//! Errors raised when starting the coalescer or its timer.
//!
//! Per-call failures (`NotStarted`, `CorrelationMismatch`, ...) are
//! [`pipeline::PipelineError`] values delivered to each call's completion.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// `start`/`schedule` was called outside a Tokio runtime.
    #[error("No Tokio runtime is available to drive the batch timer")]
    NoRuntime,

    /// The flush interval must be greater than zero.
    #[error("Batch interval must be greater than zero")]
    InvalidInterval,
}
