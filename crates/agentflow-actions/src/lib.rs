//! agentflow action layer.
//!
//! Tool registration and function-call dispatch on top of
//! [`agentflow_core`]'s event machinery:
//!
//! - **[`tool`]** -- A named async callable with a JSON-schema description,
//!   derived required/minimum field sets, a toggleable strict mode, and
//!   optional pre/post processors.
//! - **[`request`]** -- The inbound request shapes (name/arguments pair,
//!   provider-style JSON value, typed call) and their resolution.
//! - **[`function_calling`]** -- The [`Event`](agentflow_core::Event) that
//!   binds one tool to concrete arguments and runs the
//!   preprocess/call/postprocess pipeline.
//! - **[`manager`]** -- Per-instance tool registry with match/invoke entry
//!   points and a pluggable [`ExecutionSink`] for finished invocations.
//! - **[`policy`]** -- Retry, backoff and per-attempt timeout
//!   configuration shared by all dispatch paths.
//! - **[`dispatch`]** -- Sequential, concurrent and batch strategies over
//!   a slice of requests; order-preserving, with default substitution and
//!   per-failure-kind recovery hooks.
//! - **[`error`]** -- Structural error types via [`thiserror`].

pub mod dispatch;
pub mod error;
pub mod function_calling;
pub mod manager;
pub mod policy;
pub mod request;
pub mod tool;

pub use dispatch::{
    dispatch, DispatchErrorKind, DispatchOptions, DispatchStrategy, ErrorHook, ErrorMap,
};
pub use error::{ActionError, Result};
pub use function_calling::FunctionCalling;
pub use manager::{ActionManager, ExecutionSink};
pub use policy::{call_with_policy, AttemptError, RetryPolicy};
pub use request::{ActionCall, ActionRequest};
pub use tool::{JsonMap, Tool, ToolBuilder, ToolSchema};
