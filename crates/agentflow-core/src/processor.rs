//! Admission-controlled event queue.
//!
//! The [`Processor`] owns a bounded FIFO of [`Event`]s and a background
//! worker loop that pulls the head event only once [`Processor::request_permission`]
//! grants it.  Admission is a check-then-decrement gate over optional
//! request/token budgets; denial is backpressure, not an error -- the worker
//! holds the head, sleeps one `capacity_refresh_time`, and retries.  Strict
//! FIFO: there is no head-of-line bypass.
//!
//! # State machine
//!
//! ```text
//! Created  -->  Running  -->  Stopped
//! ```
//!
//! `stop()` signals the worker to exit after the current admission check;
//! in-flight invocations are not forcibly cancelled, they run to completion.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{CoreError, Result};
use crate::event::{Event, EventStatus};

/// Poll period for `join()` while waiting on in-flight work.
const JOIN_POLL: Duration = Duration::from_millis(20);

/// Configuration for a [`Processor`], validated at construction.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Maximum number of queued events.
    pub queue_capacity: usize,
    /// Worker backoff period, and the fallback capacity-check interval.
    pub capacity_refresh_time: Duration,
    /// Budget replenishment period for rate-limited executors.
    pub interval: Option<Duration>,
    /// Maximum requests admitted per interval.  `None` = unlimited.
    pub limit_requests: Option<u64>,
    /// Maximum token budget per interval.  `None` = unlimited.
    pub limit_tokens: Option<u64>,
    /// Maximum simultaneously-running events.  `None` = unbounded.
    pub concurrency_limit: Option<usize>,
}

impl ProcessorConfig {
    /// A config with only the two mandatory knobs set.
    pub fn new(queue_capacity: usize, capacity_refresh_time: Duration) -> Self {
        Self {
            queue_capacity,
            capacity_refresh_time,
            interval: None,
            limit_requests: None,
            limit_tokens: None,
            concurrency_limit: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_limit_requests(mut self, limit: u64) -> Self {
        self.limit_requests = Some(limit);
        self
    }

    pub fn with_limit_tokens(mut self, limit: u64) -> Self {
        self.limit_tokens = Some(limit);
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.queue_capacity < 1 {
            return Err(CoreError::InvalidConfig {
                reason: "queue_capacity must be at least 1".to_string(),
            });
        }
        if self.capacity_refresh_time.is_zero() {
            return Err(CoreError::InvalidConfig {
                reason: "capacity_refresh_time must be non-zero".to_string(),
            });
        }
        if let Some(interval) = self.interval {
            if interval.is_zero() {
                return Err(CoreError::InvalidConfig {
                    reason: "interval must be non-zero".to_string(),
                });
            }
        }
        if self.concurrency_limit == Some(0) {
            return Err(CoreError::InvalidConfig {
                reason: "concurrency_limit must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Lifecycle state of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorState {
    /// Constructed, worker not yet started.
    Created,
    /// Worker loop is driving the queue.
    Running,
    /// Worker loop has exited.
    Stopped,
}

/// Request/token budgets.  `None` means the corresponding limit is not
/// configured and never constrains admission.
#[derive(Debug)]
struct Budget {
    available_request: Option<u64>,
    available_token: Option<u64>,
}

/// Bounded FIFO event queue with an admission-control gate.
pub struct Processor {
    config: ProcessorConfig,
    queue: Mutex<VecDeque<Arc<dyn Event>>>,
    budget: Mutex<Budget>,
    state: Mutex<ProcessorState>,
    shutdown: AtomicBool,
    notify: Notify,
    in_flight: AtomicUsize,
    semaphore: Option<Arc<Semaphore>>,
}

impl Processor {
    /// Create a processor.  Budgets start at their configured limits.
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            budget: Mutex::new(Budget {
                available_request: config.limit_requests,
                available_token: config.limit_tokens,
            }),
            semaphore: config
                .concurrency_limit
                .map(|n| Arc::new(Semaphore::new(n))),
            config,
            queue: Mutex::new(VecDeque::new()),
            state: Mutex::new(ProcessorState::Created),
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
            in_flight: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of events currently queued.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Remaining request budget, if a request limit is configured.
    pub fn available_request(&self) -> Option<u64> {
        self.budget
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .available_request
    }

    /// Remaining token budget, if a token limit is configured.
    pub fn available_token(&self) -> Option<u64> {
        self.budget
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .available_token
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Enqueue an event, rejecting with [`CoreError::QueueFull`] at
    /// capacity.
    ///
    /// This is the documented denial policy for the direct enqueue path.
    /// `Executor::append` layers a buffering policy on top for callers that
    /// must never be rejected.
    pub fn try_enqueue(&self, event: Arc<dyn Event>) -> Result<()> {
        if self.is_stopped() {
            return Err(CoreError::ProcessorStopped);
        }
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            if queue.len() >= self.config.queue_capacity {
                return Err(CoreError::QueueFull {
                    capacity: self.config.queue_capacity,
                });
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// The admission gate: check-then-decrement under one short lock.
    ///
    /// - No limits configured: permit while the queue is within capacity.
    /// - Request limit: permit only if `available_request > 0` (decrement);
    ///   a token requirement additionally needs `available_token >=
    ///   required_tokens` (decrement both, or neither).
    /// - Token limit only: a token requirement needs `available_token >=
    ///   required_tokens` (decrement); no requirement always permits.
    ///
    /// Denial leaves all counters unchanged.  Counters never go negative.
    pub fn request_permission(&self, required_tokens: Option<u64>) -> bool {
        if self.config.limit_requests.is_none() && self.config.limit_tokens.is_none() {
            // The head under consideration is still queued, so the bound is
            // inclusive.
            return self.queue_len() <= self.config.queue_capacity;
        }

        let mut budget = self.budget.lock().unwrap_or_else(|e| e.into_inner());

        let request_ok = match budget.available_request {
            Some(available) => available > 0,
            None => true,
        };
        let token_ok = match (budget.available_token, required_tokens) {
            (Some(available), Some(required)) => available >= required,
            _ => true,
        };

        if !(request_ok && token_ok) {
            return false;
        }

        if let Some(available) = budget.available_request.as_mut() {
            *available -= 1;
        }
        if let (Some(available), Some(required)) = (budget.available_token.as_mut(), required_tokens)
        {
            *available -= required;
        }
        true
    }

    /// Reset budgets for a new interval.
    ///
    /// Tokens return to the full limit; the request budget is the limit
    /// minus the queued backlog, so already-queued-but-not-yet-run work is
    /// accounted for.
    pub fn replenish(&self) {
        let queued = self.queue_len() as u64;
        let mut budget = self.budget.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(limit) = self.config.limit_tokens {
            budget.available_token = Some(limit);
        }
        if let Some(limit) = self.config.limit_requests {
            budget.available_request = Some(limit.saturating_sub(queued));
        }
        tracing::trace!(
            available_request = ?budget.available_request,
            available_token = ?budget.available_token,
            "budgets replenished"
        );
    }

    /// Spawn the worker loop onto the tokio runtime.
    ///
    /// Returns a [`JoinHandle`] that resolves once the processor is stopped
    /// and the loop has exited.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let processor = Arc::clone(self);
        tokio::spawn(async move {
            processor.set_state(ProcessorState::Running);
            tracing::info!("processor worker started");
            processor.worker_loop().await;
            processor.set_state(ProcessorState::Stopped);
            tracing::info!("processor worker stopped");
        })
    }

    /// Signal the worker to stop.  Queued events stay queued; in-flight
    /// invocations run to completion.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Wait until the queue is drained and no invocation is in flight.
    pub async fn join(&self) {
        loop {
            if self.queue_len() == 0 && self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            tokio::time::sleep(JOIN_POLL).await;
        }
    }

    fn set_state(&self, state: ProcessorState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Pop the head only if it is the expected event.  The worker is the
    /// sole consumer, so this always succeeds in practice.
    fn pop_head(&self) -> Option<Arc<dyn Event>> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn peek_head(&self) -> Option<Arc<dyn Event>> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .front()
            .cloned()
    }

    async fn worker_loop(self: &Arc<Self>) {
        loop {
            if self.is_stopped() {
                break;
            }

            let Some(head) = self.peek_head() else {
                // Park until new work arrives or stop is signalled.
                self.notify.notified().await;
                continue;
            };

            // Events cancelled while queued are discarded without admission.
            if head.meta().status() != EventStatus::Pending {
                tracing::debug!(event_id = %head.meta().id(), "discarding non-pending queued event");
                self.pop_head();
                continue;
            }

            if self.request_permission(head.required_tokens()) {
                self.pop_head();
                self.spawn_invoke(head);
            } else {
                // Backpressure: hold the head and retry after one refresh
                // period.  Strict FIFO, no bypass.
                tracing::trace!(event_id = %head.meta().id(), "admission denied, backing off");
                tokio::time::sleep(self.config.capacity_refresh_time).await;
            }
        }
    }

    fn spawn_invoke(self: &Arc<Self>, event: Arc<dyn Event>) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let processor = Arc::clone(self);
        let semaphore = self.semaphore.clone();
        tokio::spawn(async move {
            let _permit = match semaphore {
                Some(s) => s.acquire_owned().await.ok(),
                None => None,
            };
            event.invoke().await;
            processor.in_flight.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
