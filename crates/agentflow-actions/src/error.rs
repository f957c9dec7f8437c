//! Action dispatch error types.
//!
//! These are *structural* errors: bad registrations, unknown names,
//! argument-contract violations.  They surface immediately on the
//! single-item APIs.  Runtime failures inside a tool callable are not
//! errors at this level -- they are captured into the event's terminal
//! `Execution` record so that batch dispatch can make partial progress.

/// Unified error type for the agentflow action layer.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The supplied arguments violate the tool's field rules.
    ///
    /// Strict tools require the argument set to exactly equal
    /// `required_fields`; non-strict tools require a superset of
    /// `minimum_acceptable_fields`.
    #[error("argument mismatch for tool `{tool}`: {reason}")]
    ArgumentMismatch { tool: String, reason: String },

    /// No tool with this name is registered.
    #[error("tool `{name}` is not registered")]
    UnknownTool { name: String },

    /// A tool with this name is already registered and `update` was not
    /// set.
    #[error("tool `{name}` is already registered")]
    DuplicateTool { name: String },

    /// An inbound request value did not have the expected
    /// `function`/`arguments` shape.
    #[error("malformed action request: {reason}")]
    MalformedRequest { reason: String },
}

/// Convenience alias used throughout the actions crate.
pub type Result<T> = std::result::Result<T, ActionError>;
