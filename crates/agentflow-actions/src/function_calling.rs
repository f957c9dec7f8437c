//! The event that invokes one tool with bound arguments.
//!
//! A [`FunctionCalling`] is created by the manager from a matched tool and
//! a validated argument map.  Its single-shot pipeline is
//! validate (at construction) -> preprocess -> call -> postprocess ->
//! record; any failure along the way is swallowed into the terminal
//! execution record so sibling calls in a batch can proceed.

use std::sync::Arc;

use agentflow_core::{Event, EventMeta};
use async_trait::async_trait;

use crate::error::Result;
use crate::tool::{JsonMap, Tool};

/// An [`Event`] binding one [`Tool`] with concrete arguments.
///
/// The tool is shared, not owned -- its lifetime belongs to the registry.
pub struct FunctionCalling {
    meta: EventMeta,
    tool: Arc<Tool>,
    arguments: JsonMap,
}

impl FunctionCalling {
    /// Bind a tool and arguments, validating against the tool's field
    /// rules.  Violations fail here, at construction -- no partial event is
    /// ever left behind.
    pub fn new(tool: Arc<Tool>, arguments: JsonMap) -> Result<Self> {
        tool.validate_arguments(&arguments)?;
        Ok(Self {
            meta: EventMeta::new(),
            tool,
            arguments,
        })
    }

    pub fn tool(&self) -> &Arc<Tool> {
        &self.tool
    }

    pub fn arguments(&self) -> &JsonMap {
        &self.arguments
    }
}

#[async_trait]
impl Event for FunctionCalling {
    fn meta(&self) -> &EventMeta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "function_calling"
    }

    async fn perform(&self) -> std::result::Result<serde_json::Value, String> {
        let mut arguments = self.arguments.clone();
        if let Some(preprocessor) = self.tool.preprocessor() {
            arguments = preprocessor(arguments).await?;
        }

        let mut result = (self.tool.handler())(arguments).await?;

        if let Some(postprocessor) = self.tool.postprocessor() {
            result = postprocessor(result).await?;
        }
        Ok(result)
    }
}

impl std::fmt::Debug for FunctionCalling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionCalling")
            .field("id", &self.meta.id())
            .field("tool", &self.tool.name())
            .field("status", &self.meta.status())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActionError;
    use agentflow_core::EventStatus;

    fn echo_tool() -> Arc<Tool> {
        Arc::new(
            Tool::builder("echo", |args: JsonMap| async move {
                Ok(args.get("msg").cloned().unwrap_or(serde_json::Value::Null))
            })
            .parameters(serde_json::json!({
                "type": "object",
                "properties": { "msg": { "type": "string" } }
            }))
            .build(),
        )
    }

    fn args(msg: &str) -> JsonMap {
        let mut map = JsonMap::new();
        map.insert("msg".into(), serde_json::json!(msg));
        map
    }

    #[tokio::test]
    async fn pipeline_runs_pre_call_post() {
        let tool = Arc::new(
            Tool::builder("shout", |args: JsonMap| async move {
                let msg = args.get("msg").and_then(|v| v.as_str()).unwrap_or("");
                Ok(serde_json::json!(msg.to_uppercase()))
            })
            .parameters(serde_json::json!({
                "type": "object",
                "properties": { "msg": { "type": "string" } }
            }))
            .preprocessor(|mut args: JsonMap| async move {
                let msg = args
                    .get("msg")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                args.insert("msg".into(), serde_json::json!(format!("{msg}!")));
                Ok(args)
            })
            .postprocessor(|value: serde_json::Value| async move {
                Ok(serde_json::json!(format!(
                    "<{}>",
                    value.as_str().unwrap_or("")
                )))
            })
            .build(),
        );

        let event = FunctionCalling::new(tool, args("hey")).expect("valid arguments");
        event.invoke().await;

        let exec = event.meta().execution();
        assert_eq!(exec.status, EventStatus::Completed);
        assert_eq!(exec.response, Some(serde_json::json!("<HEY!>")));
    }

    #[tokio::test]
    async fn preprocessor_failure_is_captured() {
        let tool = Arc::new(
            Tool::builder("t", |_args: JsonMap| async { Ok(serde_json::Value::Null) })
                .preprocessor(|_args: JsonMap| async { Err("bad input".to_string()) })
                .build(),
        );

        let event = FunctionCalling::new(tool, JsonMap::new()).expect("valid arguments");
        event.invoke().await;

        let exec = event.meta().execution();
        assert_eq!(exec.status, EventStatus::Failed);
        assert_eq!(exec.error.as_deref(), Some("bad input"));
    }

    #[test]
    fn construction_rejects_bad_arguments() {
        let tool = echo_tool();
        tool.set_strict(true);

        let result = FunctionCalling::new(Arc::clone(&tool), JsonMap::new());
        assert!(matches!(
            result,
            Err(ActionError::ArgumentMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn invoke_is_single_shot() {
        let tool = echo_tool();
        let event = FunctionCalling::new(tool, args("one")).expect("valid arguments");

        event.invoke().await;
        let first = event.meta().execution();
        event.invoke().await;
        let second = event.meta().execution();

        assert_eq!(first.status, EventStatus::Completed);
        assert_eq!(first.response, second.response);
        assert_eq!(first.duration, second.duration);
    }
}
