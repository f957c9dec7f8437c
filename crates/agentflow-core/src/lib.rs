//! agentflow execution core.
//!
//! This crate provides the event execution machinery that the higher-level
//! agent orchestration layers submit work into:
//!
//! - **[`event`]** -- Uniform asynchronous unit of work ([`Event`]) with a
//!   Pending/Processing/Completed/Failed/Cancelled lifecycle and a terminal
//!   [`Execution`] record.  Invocation is at-most-once; failures are
//!   captured, never propagated.
//! - **[`processor`]** -- Capacity-bounded FIFO queue with a
//!   check-then-decrement admission gate over optional request/token
//!   budgets, driven by a tokio worker loop.
//! - **[`executor`]** -- Owns one processor plus an event pile for result
//!   readback, and a periodic budget replenisher for rate-limited use.
//! - **[`api`]** -- [`ApiCalling`] event over a caller-supplied
//!   [`Endpoint`] trait, with lazily computed token requirements.
//! - **[`error`]** -- Unified core error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a tokio
//! runtime.  Concurrency is cooperative: CPU-bound work inside an event
//! blocks the loop and should be offloaded by the caller.

pub mod api;
pub mod error;
pub mod event;
pub mod executor;
pub mod processor;

// Re-export the most commonly used types at the crate root for convenience.
pub use api::{ApiCalling, Endpoint};
pub use error::{CoreError, Result};
pub use event::{Event, EventId, EventMeta, EventStatus, Execution};
pub use executor::Executor;
pub use processor::{Processor, ProcessorConfig, ProcessorState};
