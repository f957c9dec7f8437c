//! Tool registry and action dispatcher.
//!
//! Each [`ActionManager`] owns its registry -- there is no process-global
//! tool table.  The manager resolves inbound [`ActionRequest`]s to
//! registered tools, produces [`FunctionCalling`] events, and drives them.
//! Structural errors (unknown tool, duplicate registration, bad arguments)
//! raise immediately; runtime failures from the callable are recovered into
//! the returned [`Execution`] record.

use std::sync::Arc;

use agentflow_core::{Event, Execution};
use dashmap::DashMap;

use crate::error::{ActionError, Result};
use crate::function_calling::FunctionCalling;
use crate::request::ActionRequest;
use crate::tool::{Tool, ToolSchema};

/// Receives every finished invocation.  Injected collaborator -- the
/// manager reports executions, it does not own their storage.
pub trait ExecutionSink: Send + Sync {
    fn record(&self, function: &str, execution: &Execution);
}

/// Default sink: structured log lines via `tracing`.
struct TracingSink;

impl ExecutionSink for TracingSink {
    fn record(&self, function: &str, execution: &Execution) {
        match &execution.error {
            None => tracing::info!(
                function = %function,
                status = %execution.status,
                duration = ?execution.duration,
                "action executed"
            ),
            Some(error) => tracing::warn!(
                function = %function,
                status = %execution.status,
                error = %error,
                "action failed"
            ),
        }
    }
}

/// Name-keyed registry of [`Tool`]s plus the matching/invocation entry
/// points.
pub struct ActionManager {
    registry: DashMap<String, Arc<Tool>>,
    sink: Arc<dyn ExecutionSink>,
}

impl ActionManager {
    /// An empty manager with the default tracing sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: DashMap::new(),
            sink: Arc::new(TracingSink),
        }
    }

    /// An empty manager reporting executions to `sink`.
    pub fn with_sink(sink: Arc<dyn ExecutionSink>) -> Self {
        Self {
            registry: DashMap::new(),
            sink,
        }
    }

    /// Register a tool by name.
    ///
    /// A duplicate name fails with [`ActionError::DuplicateTool`] unless
    /// `update` is set, in which case the existing tool is replaced.
    pub fn register(&self, tool: Tool, update: bool) -> Result<()> {
        let name = tool.name().to_string();
        if !update && self.registry.contains_key(&name) {
            return Err(ActionError::DuplicateTool { name });
        }
        tracing::info!(tool = %name, update = update, "tool registered");
        self.registry.insert(name, Arc::new(tool));
        Ok(())
    }

    /// Register several tools with one `update` policy.
    pub fn register_many(
        &self,
        tools: impl IntoIterator<Item = Tool>,
        update: bool,
    ) -> Result<()> {
        for tool in tools {
            self.register(tool, update)?;
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.registry.get(name).map(|t| Arc::clone(t.value()))
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Schemas of all registered tools, for prompt assembly by callers.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.registry
            .iter()
            .map(|t| t.value().schema().clone())
            .collect()
    }

    /// Resolve a request to its registered tool and produce an unexecuted
    /// [`FunctionCalling`].
    ///
    /// Errors: [`ActionError::MalformedRequest`],
    /// [`ActionError::UnknownTool`], [`ActionError::ArgumentMismatch`].
    pub fn match_tool(&self, request: &ActionRequest) -> Result<FunctionCalling> {
        let call = request.resolve()?;
        let tool = self
            .get(&call.function)
            .ok_or(ActionError::UnknownTool {
                name: call.function.clone(),
            })?;
        FunctionCalling::new(tool, call.arguments)
    }

    /// Match and invoke a single request, returning the terminal record.
    ///
    /// Structural errors raise; a failing callable does not -- the failure
    /// is inside the returned record.
    pub async fn invoke(&self, request: &ActionRequest) -> Result<Execution> {
        let event = self.match_tool(request)?;
        let function = event.tool().name().to_string();
        event.invoke().await;
        let execution = event.meta().execution();
        self.sink.record(&function, &execution);
        Ok(execution)
    }

    pub(crate) fn record_execution(&self, function: &str, execution: &Execution) {
        self.sink.record(function, execution);
    }
}

impl Default for ActionManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
