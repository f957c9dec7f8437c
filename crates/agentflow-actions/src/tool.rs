//! Tool contracts: a registered callable plus its calling rules.
//!
//! A [`Tool`] wraps one async handler together with a JSON-Schema
//! description of its parameters, the derived field rules, and optional
//! pre/post processors.  Everything is resolved once at construction --
//! the handler and processors are boxed async functions, so there is no
//! per-call sync/async detection.  A built tool is immutable except for
//! its `strict` flag.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::{ActionError, Result};

/// Argument map passed to tool handlers.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// The wrapped callable: arguments in, JSON value or failure message out.
pub type ToolHandler =
    Arc<dyn Fn(JsonMap) -> BoxFuture<'static, std::result::Result<serde_json::Value, String>> + Send + Sync>;

/// Rewrites the argument map before the handler runs.
pub type Preprocessor =
    Arc<dyn Fn(JsonMap) -> BoxFuture<'static, std::result::Result<JsonMap, String>> + Send + Sync>;

/// Rewrites the raw result after the handler runs.
pub type Postprocessor = Arc<
    dyn Fn(serde_json::Value) -> BoxFuture<'static, std::result::Result<serde_json::Value, String>>
        + Send
        + Sync,
>;

/// Structured description of a tool: name, human-readable description, and
/// a JSON Schema for its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Machine-readable tool name (e.g. `fs_read_file`, `add`).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema describing the tool's input parameters.
    pub parameters: serde_json::Value,
}

/// A registered callable plus its calling contract.
pub struct Tool {
    schema: ToolSchema,
    handler: ToolHandler,
    required_fields: BTreeSet<String>,
    minimum_acceptable_fields: BTreeSet<String>,
    preprocessor: Option<Preprocessor>,
    postprocessor: Option<Postprocessor>,
    strict: AtomicBool,
}

impl Tool {
    /// Start building a tool around an async handler.
    pub fn builder<F, Fut>(name: impl Into<String>, handler: F) -> ToolBuilder
    where
        F: Fn(JsonMap) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<serde_json::Value, String>>
            + Send
            + 'static,
    {
        ToolBuilder::new(name.into(), Arc::new(move |args| Box::pin(handler(args))))
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    /// Parameter names the schema declares.  Under `strict`, calls must
    /// supply exactly this set.
    pub fn required_fields(&self) -> &BTreeSet<String> {
        &self.required_fields
    }

    /// Parameter names without a default value; always required, even in
    /// non-strict mode.
    pub fn minimum_acceptable_fields(&self) -> &BTreeSet<String> {
        &self.minimum_acceptable_fields
    }

    pub fn strict(&self) -> bool {
        self.strict.load(Ordering::Acquire)
    }

    /// The one mutable knob on an otherwise immutable tool.
    pub fn set_strict(&self, strict: bool) {
        self.strict.store(strict, Ordering::Release);
    }

    pub(crate) fn handler(&self) -> &ToolHandler {
        &self.handler
    }

    pub(crate) fn preprocessor(&self) -> Option<&Preprocessor> {
        self.preprocessor.as_ref()
    }

    pub(crate) fn postprocessor(&self) -> Option<&Postprocessor> {
        self.postprocessor.as_ref()
    }

    /// Check an argument set against this tool's field rules.
    pub fn validate_arguments(&self, arguments: &JsonMap) -> Result<()> {
        let supplied: BTreeSet<String> = arguments.keys().cloned().collect();

        if self.strict() {
            if supplied != self.required_fields {
                return Err(ActionError::ArgumentMismatch {
                    tool: self.schema.name.clone(),
                    reason: format!(
                        "strict tool expects exactly {:?}, got {:?}",
                        self.required_fields, supplied
                    ),
                });
            }
            return Ok(());
        }

        let missing: Vec<&String> = self
            .minimum_acceptable_fields
            .difference(&supplied)
            .collect();
        if !missing.is_empty() {
            return Err(ActionError::ArgumentMismatch {
                tool: self.schema.name.clone(),
                reason: format!("missing required arguments {missing:?}"),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.schema.name)
            .field("required_fields", &self.required_fields)
            .field(
                "minimum_acceptable_fields",
                &self.minimum_acceptable_fields,
            )
            .field("strict", &self.strict())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Tool`].  Field sets are derived from the parameter schema
/// at [`ToolBuilder::build`] unless explicitly overridden.
pub struct ToolBuilder {
    name: String,
    description: String,
    parameters: serde_json::Value,
    required_override: Option<BTreeSet<String>>,
    minimum_override: Option<BTreeSet<String>>,
    handler: ToolHandler,
    preprocessor: Option<Preprocessor>,
    postprocessor: Option<Postprocessor>,
    strict: bool,
}

impl ToolBuilder {
    fn new(name: String, handler: ToolHandler) -> Self {
        Self {
            name,
            description: String::new(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
            required_override: None,
            minimum_override: None,
            handler,
            preprocessor: None,
            postprocessor: None,
            strict: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// JSON Schema for the tool's parameters.  Every key under
    /// `properties` is treated as a declared parameter; a property with a
    /// `default` is optional in non-strict mode.
    pub fn parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Override the derived required-field set.
    pub fn required_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.required_override = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Override the derived minimum-acceptable-field set.
    pub fn minimum_acceptable_fields(
        mut self,
        fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.minimum_override = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn preprocessor<F, Fut>(mut self, preprocessor: F) -> Self
    where
        F: Fn(JsonMap) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<JsonMap, String>> + Send + 'static,
    {
        self.preprocessor = Some(Arc::new(move |args| Box::pin(preprocessor(args))));
        self
    }

    pub fn postprocessor<F, Fut>(mut self, postprocessor: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<serde_json::Value, String>>
            + Send
            + 'static,
    {
        self.postprocessor = Some(Arc::new(move |value| Box::pin(postprocessor(value))));
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Derive the field sets and finish the tool.
    pub fn build(self) -> Tool {
        let properties = self
            .parameters
            .get("properties")
            .and_then(|p| p.as_object());

        let required_fields = self.required_override.unwrap_or_else(|| {
            properties
                .map(|p| p.keys().cloned().collect())
                .unwrap_or_default()
        });

        let minimum_acceptable_fields = self.minimum_override.unwrap_or_else(|| {
            properties
                .map(|p| {
                    p.iter()
                        .filter(|(_, schema)| schema.get("default").is_none())
                        .map(|(name, _)| name.clone())
                        .collect()
                })
                .unwrap_or_default()
        });

        Tool {
            schema: ToolSchema {
                name: self.name,
                description: self.description,
                parameters: self.parameters,
            },
            handler: self.handler,
            required_fields,
            minimum_acceptable_fields,
            preprocessor: self.preprocessor,
            postprocessor: self.postprocessor,
            strict: AtomicBool::new(self.strict),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
