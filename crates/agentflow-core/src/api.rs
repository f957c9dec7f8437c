//! Rate-limit-aware API call events.
//!
//! [`ApiCalling`] is the [`Event`] shape for outbound provider calls.  The
//! provider itself lives behind the [`Endpoint`] trait, supplied and owned
//! by the caller -- this crate never talks to the network directly.  An
//! endpoint that meters tokens reports a per-payload cost through
//! [`Endpoint::calculate_tokens`], which the admission gate reads via
//! [`Event::required_tokens`].

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::event::{Event, EventMeta};

/// An outbound call target.  Implemented by external collaborators (HTTP
/// providers, mocks, caches); shared between events by reference.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Whether this endpoint meters token usage.
    fn requires_tokens(&self) -> bool {
        false
    }

    /// Estimated token cost of a payload.  Only consulted when
    /// [`Endpoint::requires_tokens`] is true.
    fn calculate_tokens(&self, _payload: &serde_json::Value) -> u64 {
        0
    }

    /// Perform the call.
    async fn call(
        &self,
        payload: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> std::result::Result<serde_json::Value, String>;

    /// Perform the call through the endpoint's cache, if it has one.
    /// Defaults to an uncached call.
    async fn call_cached(
        &self,
        payload: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> std::result::Result<serde_json::Value, String> {
        self.call(payload, headers).await
    }
}

/// An [`Event`] that invokes one [`Endpoint`] with a fixed payload.
pub struct ApiCalling {
    meta: EventMeta,
    payload: serde_json::Value,
    headers: HashMap<String, String>,
    endpoint: Arc<dyn Endpoint>,
    is_cached: bool,
    should_invoke_endpoint: bool,
    required_tokens: OnceLock<Option<u64>>,
}

impl ApiCalling {
    pub fn new(
        endpoint: Arc<dyn Endpoint>,
        payload: serde_json::Value,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            meta: EventMeta::new(),
            payload,
            headers,
            endpoint,
            is_cached: false,
            should_invoke_endpoint: true,
            required_tokens: OnceLock::new(),
        }
    }

    /// Route the call through the endpoint's cache.
    pub fn cached(mut self) -> Self {
        self.is_cached = true;
        self
    }

    /// Skip the endpoint entirely; the event completes by echoing its
    /// payload.  Used by callers that assemble requests without sending
    /// them (dry runs, offline replay).
    pub fn without_invocation(mut self) -> Self {
        self.should_invoke_endpoint = false;
        self
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn is_cached(&self) -> bool {
        self.is_cached
    }
}

#[async_trait]
impl Event for ApiCalling {
    fn meta(&self) -> &EventMeta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "api_calling"
    }

    /// Token cost, computed from the payload on first access and cached for
    /// the lifetime of the event.
    fn required_tokens(&self) -> Option<u64> {
        *self.required_tokens.get_or_init(|| {
            if self.endpoint.requires_tokens() {
                Some(self.endpoint.calculate_tokens(&self.payload))
            } else {
                None
            }
        })
    }

    async fn perform(&self) -> std::result::Result<serde_json::Value, String> {
        if !self.should_invoke_endpoint {
            return Ok(self.payload.clone());
        }
        tracing::debug!(endpoint = %self.endpoint.name(), cached = self.is_cached, "api call");
        if self.is_cached {
            self.endpoint.call_cached(&self.payload, &self.headers).await
        } else {
            self.endpoint.call(&self.payload, &self.headers).await
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
