//! Inbound action request shapes.
//!
//! Callers hand the manager one of three shapes: a name/arguments pair, a
//! raw JSON value with `"function"`/`"arguments"` keys (the shape LLM
//! providers emit), or an already-typed [`ActionCall`].  [`ActionRequest`]
//! is the explicit tagged union of those shapes; resolution is a single
//! pattern match, not runtime type dispatch.

use serde::{Deserialize, Serialize};

use crate::error::{ActionError, Result};
use crate::tool::JsonMap;

/// A validated, typed action request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCall {
    /// Name of the tool to invoke.
    pub function: String,
    /// Arguments keyed by parameter name.
    #[serde(default)]
    pub arguments: JsonMap,
}

/// One inbound action request, in any of the supported shapes.
#[derive(Debug, Clone)]
pub enum ActionRequest {
    /// A bare name/arguments pair.
    Parts { function: String, arguments: JsonMap },
    /// A raw JSON object with `"function"` and (optionally) `"arguments"`
    /// keys, as emitted by provider tool-call responses.
    Value(serde_json::Value),
    /// A pre-validated typed request.
    Call(ActionCall),
}

impl ActionRequest {
    pub fn from_parts(function: impl Into<String>, arguments: JsonMap) -> Self {
        Self::Parts {
            function: function.into(),
            arguments,
        }
    }

    /// Resolve any shape down to a typed [`ActionCall`].
    ///
    /// `Value` shapes must be an object whose `"function"` is a string;
    /// a missing `"arguments"` key means an empty argument map.
    pub fn resolve(&self) -> Result<ActionCall> {
        match self {
            Self::Parts {
                function,
                arguments,
            } => Ok(ActionCall {
                function: function.clone(),
                arguments: arguments.clone(),
            }),
            Self::Call(call) => Ok(call.clone()),
            Self::Value(value) => {
                let object = value.as_object().ok_or_else(|| ActionError::MalformedRequest {
                    reason: "request value is not an object".to_string(),
                })?;
                let function = object
                    .get("function")
                    .and_then(|f| f.as_str())
                    .ok_or_else(|| ActionError::MalformedRequest {
                        reason: "missing string `function` key".to_string(),
                    })?
                    .to_string();
                let arguments = match object.get("arguments") {
                    None => JsonMap::new(),
                    Some(serde_json::Value::Object(map)) => map.clone(),
                    Some(_) => {
                        return Err(ActionError::MalformedRequest {
                            reason: "`arguments` is not an object".to_string(),
                        })
                    }
                };
                Ok(ActionCall {
                    function,
                    arguments,
                })
            }
        }
    }
}

impl From<ActionCall> for ActionRequest {
    fn from(call: ActionCall) -> Self {
        Self::Call(call)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_resolve_directly() {
        let mut args = JsonMap::new();
        args.insert("x".into(), serde_json::json!(1));

        let call = ActionRequest::from_parts("add", args).resolve().expect("resolve");
        assert_eq!(call.function, "add");
        assert_eq!(call.arguments.get("x"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn value_shape_resolves() {
        let request = ActionRequest::Value(serde_json::json!({
            "function": "add",
            "arguments": { "x": 5 }
        }));
        let call = request.resolve().expect("resolve");
        assert_eq!(call.function, "add");
        assert_eq!(call.arguments.get("x"), Some(&serde_json::json!(5)));
    }

    #[test]
    fn value_shape_defaults_missing_arguments() {
        let request = ActionRequest::Value(serde_json::json!({ "function": "ping" }));
        let call = request.resolve().expect("resolve");
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn malformed_values_are_rejected() {
        for value in [
            serde_json::json!("not an object"),
            serde_json::json!({ "arguments": {} }),
            serde_json::json!({ "function": 42 }),
            serde_json::json!({ "function": "f", "arguments": [1, 2] }),
        ] {
            let result = ActionRequest::Value(value).resolve();
            assert!(matches!(result, Err(ActionError::MalformedRequest { .. })));
        }
    }
}
