//! Core error types.
//!
//! All execution-core subsystems surface errors through [`CoreError`], which
//! is the single error type returned by every public API in this crate.
//! Runtime failures inside an event's work are *not* errors at this level --
//! they are recorded in the event's terminal `Execution` so that sibling
//! events can make progress.

/// Unified error type for the agentflow execution core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    // -- Processor errors ---------------------------------------------------
    /// The admission queue is at capacity and rejected the enqueue.
    ///
    /// This is the documented denial policy for the direct enqueue path;
    /// callers that prefer buffering should go through `Executor::append`.
    #[error("queue is full (capacity {capacity})")]
    QueueFull {
        /// The configured `queue_capacity`.
        capacity: usize,
    },

    /// The processor has been stopped and will not accept new work.
    #[error("processor is stopped")]
    ProcessorStopped,

    /// A configuration value failed construction-time validation.
    #[error("invalid processor config: {reason}")]
    InvalidConfig { reason: String },

    // -- Executor errors ----------------------------------------------------
    /// The executor enforces an event kind and the appended event did not
    /// match it.
    #[error("event kind mismatch: expected `{expected}`, got `{actual}`")]
    EventKindMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;
