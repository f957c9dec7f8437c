//! Concurrency dispatch strategies.
//!
//! Three ways to run a slice of action requests through one
//! [`ActionManager`]:
//!
//! - **sequential** -- one at a time, in order.
//! - **concurrent** -- all at once, optionally semaphore-bounded
//!   (`max_concurrent`) and with a minimum spacing between task starts
//!   (`throttle_period`).
//! - **batch** -- chunks of `batch_size`, concurrent within a chunk,
//!   chunks one after another.
//!
//! All strategies share the [`RetryPolicy`] semantics and the same failure
//! contract: N requests in, N [`Execution`] records out, in input order.
//! One failing item never drops or reorders its siblings.  When retries
//! are exhausted the configured `default` value is substituted into the
//! failed record's response, and the matching [`ErrorMap`] hook fires once
//! per terminal failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agentflow_core::{Event, Execution};
use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::error::ActionError;
use crate::function_calling::FunctionCalling;
use crate::manager::ActionManager;
use crate::policy::{call_with_policy, AttemptError, RetryPolicy};
use crate::request::ActionRequest;

/// How a slice of requests is scheduled.
#[derive(Debug, Clone)]
pub enum DispatchStrategy {
    /// Invoke requests one at a time, in order.
    Sequential,
    /// Invoke all requests as interleaved tasks; the result list preserves
    /// input order even though completion order is unspecified.
    Concurrent {
        /// Upper bound on simultaneously running items.
        max_concurrent: Option<usize>,
        /// Minimum spacing between task starts.
        throttle_period: Option<Duration>,
    },
    /// Chunks of `batch_size` with concurrent semantics inside a chunk;
    /// chunks run sequentially.
    Batch {
        batch_size: usize,
        max_concurrent: Option<usize>,
        throttle_period: Option<Duration>,
    },
}

/// Classification of a terminal dispatch failure, used to key [`ErrorMap`]
/// hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchErrorKind {
    /// The final attempt exceeded the per-attempt timeout.
    Timeout,
    /// The callable (or a pre/post processor) failed on the final attempt.
    ExecutionFailed,
    /// The requested function name is not registered.
    UnknownTool,
    /// The arguments violate the tool's field rules.
    ArgumentMismatch,
    /// The request value did not have the expected shape.
    MalformedRequest,
}

/// Side-effecting recovery hook, invoked once per terminal failure with
/// the failure message.
pub type ErrorHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Failure-kind -> hook table.
#[derive(Clone, Default)]
pub struct ErrorMap {
    handlers: HashMap<DispatchErrorKind, ErrorHook>,
}

impl ErrorMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a hook for one failure kind.
    pub fn on<F>(mut self, kind: DispatchErrorKind, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(hook));
        self
    }

    fn handle(&self, kind: DispatchErrorKind, message: &str) {
        if let Some(hook) = self.handlers.get(&kind) {
            hook(message);
        }
    }
}

impl std::fmt::Debug for ErrorMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorMap")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Full configuration surface for [`dispatch`].
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub strategy: DispatchStrategy,
    pub policy: RetryPolicy,
    /// Substituted into the response of items whose retries are exhausted,
    /// instead of propagating the failure to the caller.
    pub default: Option<serde_json::Value>,
    pub error_map: ErrorMap,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            strategy: DispatchStrategy::Sequential,
            policy: RetryPolicy::default(),
            default: None,
            error_map: ErrorMap::new(),
        }
    }
}

impl DispatchOptions {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn concurrent() -> Self {
        Self {
            strategy: DispatchStrategy::Concurrent {
                max_concurrent: None,
                throttle_period: None,
            },
            ..Self::default()
        }
    }

    pub fn batch(batch_size: usize) -> Self {
        Self {
            strategy: DispatchStrategy::Batch {
                batch_size,
                max_concurrent: None,
                throttle_period: None,
            },
            ..Self::default()
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_error_map(mut self, error_map: ErrorMap) -> Self {
        self.error_map = error_map;
        self
    }

    pub fn with_max_concurrent(mut self, limit: usize) -> Self {
        match &mut self.strategy {
            DispatchStrategy::Concurrent { max_concurrent, .. }
            | DispatchStrategy::Batch { max_concurrent, .. } => *max_concurrent = Some(limit),
            DispatchStrategy::Sequential => {}
        }
        self
    }

    pub fn with_throttle_period(mut self, period: Duration) -> Self {
        match &mut self.strategy {
            DispatchStrategy::Concurrent {
                throttle_period, ..
            }
            | DispatchStrategy::Batch {
                throttle_period, ..
            } => *throttle_period = Some(period),
            DispatchStrategy::Sequential => {}
        }
        self
    }
}

/// Run every request under the configured strategy and policy.
///
/// Always yields exactly `requests.len()` records, in input order.
pub async fn dispatch(
    manager: &ActionManager,
    requests: &[ActionRequest],
    options: &DispatchOptions,
) -> Vec<Execution> {
    match &options.strategy {
        DispatchStrategy::Sequential => {
            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                results.push(dispatch_one(manager, request, options, None, Duration::ZERO).await);
            }
            results
        }
        DispatchStrategy::Concurrent {
            max_concurrent,
            throttle_period,
        } => dispatch_concurrent(manager, requests, options, *max_concurrent, *throttle_period)
            .await,
        DispatchStrategy::Batch {
            batch_size,
            max_concurrent,
            throttle_period,
        } => {
            let chunk = (*batch_size).max(1);
            let mut results = Vec::with_capacity(requests.len());
            for batch in requests.chunks(chunk) {
                results.extend(
                    dispatch_concurrent(manager, batch, options, *max_concurrent, *throttle_period)
                        .await,
                );
            }
            results
        }
    }
}

async fn dispatch_concurrent(
    manager: &ActionManager,
    requests: &[ActionRequest],
    options: &DispatchOptions,
    max_concurrent: Option<usize>,
    throttle_period: Option<Duration>,
) -> Vec<Execution> {
    let semaphore = max_concurrent.map(Semaphore::new);
    let tasks = requests.iter().enumerate().map(|(index, request)| {
        let start_delay = throttle_period
            .map(|period| period * index as u32)
            .unwrap_or(Duration::ZERO);
        dispatch_one(manager, request, options, semaphore.as_ref(), start_delay)
    });
    join_all(tasks).await
}

/// Drive one request to a terminal record: resolve, validate, then retry
/// the invocation under the policy.  Structural errors are not retried.
async fn dispatch_one(
    manager: &ActionManager,
    request: &ActionRequest,
    options: &DispatchOptions,
    semaphore: Option<&Semaphore>,
    start_delay: Duration,
) -> Execution {
    if !start_delay.is_zero() {
        tokio::time::sleep(start_delay).await;
    }
    let _permit = match semaphore {
        Some(s) => s.acquire().await.ok(),
        None => None,
    };

    let call = match request.resolve() {
        Ok(call) => call,
        Err(error) => {
            return terminal_failure(options, DispatchErrorKind::MalformedRequest, error.to_string())
        }
    };
    let Some(tool) = manager.get(&call.function) else {
        let error = ActionError::UnknownTool {
            name: call.function.clone(),
        };
        return terminal_failure(options, DispatchErrorKind::UnknownTool, error.to_string());
    };
    if let Err(error) = tool.validate_arguments(&call.arguments) {
        return terminal_failure(options, DispatchErrorKind::ArgumentMismatch, error.to_string());
    }

    let outcome = call_with_policy(&options.policy, || {
        let tool = Arc::clone(&tool);
        let arguments = call.arguments.clone();
        async move {
            // Validation passed above and tools are immutable apart from
            // the strict flag, so construction here only re-checks.
            let event = FunctionCalling::new(tool, arguments).map_err(|e| e.to_string())?;
            event.invoke().await;
            let execution = event.meta().execution();
            if execution.error.is_some() {
                Err(execution.error.unwrap_or_default())
            } else {
                Ok(execution)
            }
        }
    })
    .await;

    let execution = match outcome {
        Ok(execution) => execution,
        Err(error @ AttemptError::Timeout { .. }) => {
            terminal_failure(options, DispatchErrorKind::Timeout, error.to_string())
        }
        Err(AttemptError::Failed(message)) => {
            terminal_failure(options, DispatchErrorKind::ExecutionFailed, message)
        }
    };
    manager.record_execution(&call.function, &execution);
    execution
}

fn terminal_failure(
    options: &DispatchOptions,
    kind: DispatchErrorKind,
    message: String,
) -> Execution {
    tracing::debug!(kind = ?kind, error = %message, "dispatch item failed terminally");
    options.error_map.handle(kind, &message);
    let mut execution = Execution::failed(message);
    if let Some(default) = &options.default {
        execution.response = Some(default.clone());
    }
    execution
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{JsonMap, Tool};
    use agentflow_core::EventStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    /// A tool that fails when `fail` is true, sleeps `sleep_ms`, and
    /// otherwise echoes `value`.  Tracks peak concurrency.
    fn probe_tool(active: Arc<AtomicU32>, peak: Arc<AtomicU32>) -> Tool {
        Tool::builder("probe", move |args: JsonMap| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                let sleep_ms = args.get("sleep_ms").and_then(|v| v.as_u64()).unwrap_or(0);
                if sleep_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                }
                active.fetch_sub(1, Ordering::SeqCst);

                if args.get("fail").and_then(|v| v.as_bool()).unwrap_or(false) {
                    Err("probe failed".to_string())
                } else {
                    Ok(args.get("value").cloned().unwrap_or(serde_json::Value::Null))
                }
            }
        })
        .build()
    }

    fn manager_with_probe() -> (ActionManager, Arc<AtomicU32>) {
        let manager = ActionManager::new();
        let active = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        manager
            .register(probe_tool(active, Arc::clone(&peak)), false)
            .expect("register");
        (manager, peak)
    }

    fn probe(args: serde_json::Value) -> ActionRequest {
        ActionRequest::Value(serde_json::json!({ "function": "probe", "arguments": args }))
    }

    #[tokio::test]
    async fn concurrent_preserves_order_and_substitutes_default() {
        let (manager, _) = manager_with_probe();
        let requests = vec![
            probe(serde_json::json!({ "value": 1 })),
            probe(serde_json::json!({ "fail": true })),
            probe(serde_json::json!({ "value": 3 })),
        ];
        let options = DispatchOptions::concurrent().with_default(serde_json::json!("X"));

        let results = dispatch(&manager, &requests, &options).await;
        assert_eq!(results.len(), 3);

        let responses: Vec<_> = results.iter().map(|e| e.response.clone()).collect();
        assert_eq!(
            responses,
            vec![
                Some(serde_json::json!(1)),
                Some(serde_json::json!("X")),
                Some(serde_json::json!(3)),
            ]
        );
        assert_eq!(results[0].status, EventStatus::Completed);
        assert_eq!(results[1].status, EventStatus::Failed);
        assert_eq!(results[1].error.as_deref(), Some("probe failed"));
        assert_eq!(results[2].status, EventStatus::Completed);
    }

    #[tokio::test]
    async fn sequential_continues_past_failures() {
        let (manager, peak) = manager_with_probe();
        let requests = vec![
            probe(serde_json::json!({ "fail": true })),
            probe(serde_json::json!({ "value": "after", "sleep_ms": 10 })),
        ];

        let results = dispatch(&manager, &requests, &DispatchOptions::sequential()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, EventStatus::Failed);
        assert_eq!(results[1].response, Some(serde_json::json!("after")));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_runs_chunks_sequentially_and_items_concurrently() {
        let (manager, peak) = manager_with_probe();
        let requests: Vec<_> = (0..5)
            .map(|i| probe(serde_json::json!({ "value": i, "sleep_ms": 50 })))
            .collect();

        let start = Instant::now();
        let results = dispatch(&manager, &requests, &DispatchOptions::batch(2)).await;
        let elapsed = start.elapsed();

        assert_eq!(results.len(), 5);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.response, Some(serde_json::json!(i)));
        }
        // Chunks of 2, 2, 1 run one after another: at least 3x the item
        // latency.  Items inside a chunk overlap.
        assert!(elapsed >= Duration::from_millis(150), "elapsed {elapsed:?}");
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn max_concurrent_bounds_parallelism() {
        let (manager, peak) = manager_with_probe();
        let requests: Vec<_> = (0..6)
            .map(|i| probe(serde_json::json!({ "value": i, "sleep_ms": 20 })))
            .collect();
        let options = DispatchOptions::concurrent().with_max_concurrent(2);

        let results = dispatch(&manager, &requests, &options).await;
        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn throttle_period_spaces_task_starts() {
        let (manager, _) = manager_with_probe();
        let requests: Vec<_> = (0..3).map(|i| probe(serde_json::json!({ "value": i }))).collect();
        let options =
            DispatchOptions::concurrent().with_throttle_period(Duration::from_millis(50));

        let start = Instant::now();
        let results = dispatch(&manager, &requests, &options).await;
        // The third task may not start before 2 * 50ms.
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn retries_apply_per_item() {
        let manager = ActionManager::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        manager
            .register(
                Tool::builder("flaky", move |_args: JsonMap| {
                    let counter = Arc::clone(&counter);
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err("not yet".to_string())
                        } else {
                            Ok(serde_json::json!("finally"))
                        }
                    }
                })
                .build(),
                false,
            )
            .expect("register");

        let options = DispatchOptions::sequential().with_policy(
            RetryPolicy::default()
                .with_retries(3)
                .with_retry_delay(Duration::from_millis(10)),
        );
        let requests = vec![ActionRequest::from_parts("flaky", JsonMap::new())];

        let results = dispatch(&manager, &requests, &options).await;
        assert_eq!(results[0].status, EventStatus::Completed);
        assert_eq!(results[0].response, Some(serde_json::json!("finally")));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn error_map_fires_once_per_terminal_failure() {
        let (manager, _) = manager_with_probe();
        let fired = Arc::new(AtomicU32::new(0));
        let hook_counter = Arc::clone(&fired);
        let options = DispatchOptions::concurrent()
            .with_policy(RetryPolicy::default().with_retries(3))
            .with_error_map(ErrorMap::new().on(DispatchErrorKind::ExecutionFailed, move |_msg| {
                hook_counter.fetch_add(1, Ordering::SeqCst);
            }));

        let requests = vec![
            probe(serde_json::json!({ "fail": true })),
            probe(serde_json::json!({ "value": "ok" })),
            probe(serde_json::json!({ "fail": true })),
        ];

        let results = dispatch(&manager, &requests, &options).await;
        assert_eq!(results.len(), 3);
        // Retried 3 times each, but the hook fires once per terminal
        // failure, not once per attempt.
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_tool_in_a_batch_is_a_failed_record() {
        let (manager, _) = manager_with_probe();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let messages = Arc::clone(&seen);
        let options = DispatchOptions::sequential()
            .with_default(serde_json::json!("fallback"))
            .with_error_map(ErrorMap::new().on(DispatchErrorKind::UnknownTool, move |msg| {
                messages.lock().expect("lock").push(msg.to_string());
            }));

        let requests = vec![
            ActionRequest::from_parts("nonexistent", JsonMap::new()),
            probe(serde_json::json!({ "value": "ok" })),
        ];

        let results = dispatch(&manager, &requests, &options).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, EventStatus::Failed);
        assert_eq!(results[0].response, Some(serde_json::json!("fallback")));
        assert_eq!(results[1].response, Some(serde_json::json!("ok")));

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("nonexistent"));
    }

    #[tokio::test]
    async fn timeout_produces_a_timeout_failure() {
        let (manager, _) = manager_with_probe();
        let options = DispatchOptions::sequential().with_policy(
            RetryPolicy::default()
                .with_retries(2)
                .with_timeout(Duration::from_millis(20)),
        );

        let requests = vec![probe(serde_json::json!({ "sleep_ms": 500 }))];
        let results = dispatch(&manager, &requests, &options).await;

        assert_eq!(results[0].status, EventStatus::Failed);
        // The recorded message is exactly the policy error's rendering.
        let expected = AttemptError::Timeout {
            limit: Duration::from_millis(20),
        }
        .to_string();
        assert_eq!(results[0].error.as_deref(), Some(expected.as_str()));
    }
}
