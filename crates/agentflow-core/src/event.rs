//! Asynchronous unit of work with a status lifecycle.
//!
//! An [`Event`] is anything that can be invoked once and leaves behind a
//! terminal [`Execution`] record.  The lifecycle is:
//!
//! ```text
//! Pending  -->  Processing  -->  Completed
//!                          \->  Failed
//! Pending  -->  Cancelled
//! ```
//!
//! [`Event::invoke`] is the only state-mutating operation.  It runs at most
//! once per event instance: the Pending -> Processing transition is claimed
//! atomically, and any later call is an idempotent no-op.  Failures from the
//! underlying work are swallowed into the execution record, never re-raised,
//! so a batch of events can proceed past one failure.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique, time-ordered event identifier (UUID v7).
pub type EventId = Uuid;

/// Lifecycle state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Created but not yet started.
    Pending,
    /// Currently executing.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before execution began.
    Cancelled,
}

impl EventStatus {
    /// True for `Completed`, `Failed`, and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal record of one event invocation.
///
/// After the owning event reaches a terminal status this record is
/// immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// The status at the time the snapshot was taken.
    pub status: EventStatus,
    /// Wall-clock time spent inside the work, if it ran.
    pub duration: Option<Duration>,
    /// The final result of the work, if it completed.
    pub response: Option<serde_json::Value>,
    /// The failure message, if the work failed.
    pub error: Option<String>,
}

impl Execution {
    /// A fresh record for a just-created event.
    pub fn pending() -> Self {
        Self {
            status: EventStatus::Pending,
            duration: None,
            response: None,
            error: None,
        }
    }

    /// A synthetic failed record, used when an event could not even be
    /// constructed (e.g. an unknown tool name inside a batch).
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: EventStatus::Failed,
            duration: None,
            response: None,
            error: Some(error.into()),
        }
    }
}

/// Identity and execution record shared by every event implementation.
///
/// Embed one `EventMeta` per event and return it from [`Event::meta`]; the
/// provided [`Event::invoke`] drives all state transitions through it.
#[derive(Debug)]
pub struct EventMeta {
    id: EventId,
    created_at: DateTime<Utc>,
    record: RwLock<Execution>,
}

impl EventMeta {
    /// Create a fresh Pending record with a time-ordered id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            record: RwLock::new(Execution::pending()),
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current status.
    pub fn status(&self) -> EventStatus {
        self.record.read().unwrap_or_else(|e| e.into_inner()).status
    }

    /// Snapshot of the execution record.
    pub fn execution(&self) -> Execution {
        self.record
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Claim the Pending -> Processing transition.
    ///
    /// Returns `false` if the event is already processing or terminal, in
    /// which case the caller must not run the work again.
    pub fn try_begin(&self) -> bool {
        let mut record = self.record.write().unwrap_or_else(|e| e.into_inner());
        if record.status != EventStatus::Pending {
            return false;
        }
        record.status = EventStatus::Processing;
        true
    }

    /// Record a successful completion.
    pub fn complete(&self, response: serde_json::Value, duration: Duration) {
        let mut record = self.record.write().unwrap_or_else(|e| e.into_inner());
        if record.status != EventStatus::Processing {
            return;
        }
        record.status = EventStatus::Completed;
        record.response = Some(response);
        record.duration = Some(duration);
    }

    /// Record a failure.
    pub fn fail(&self, error: impl Into<String>, duration: Duration) {
        let mut record = self.record.write().unwrap_or_else(|e| e.into_inner());
        if record.status != EventStatus::Processing {
            return;
        }
        record.status = EventStatus::Failed;
        record.error = Some(error.into());
        record.duration = Some(duration);
    }

    /// Cancel an event that has not started.
    ///
    /// Returns `true` if the event was Pending and is now Cancelled.
    pub fn cancel(&self) -> bool {
        let mut record = self.record.write().unwrap_or_else(|e| e.into_inner());
        if record.status != EventStatus::Pending {
            return false;
        }
        record.status = EventStatus::Cancelled;
        true
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// An asynchronous unit of work with a status lifecycle.
///
/// Implementations provide [`Event::perform`]; the provided
/// [`Event::invoke`] wraps it with the at-most-once guard, timing, and
/// terminal-record bookkeeping.
#[async_trait]
pub trait Event: Send + Sync {
    /// The shared identity/record for this event.
    fn meta(&self) -> &EventMeta;

    /// A short machine-readable kind tag, used by executors that restrict
    /// what may be enqueued.
    fn kind(&self) -> &'static str {
        "event"
    }

    /// Token budget this event will consume, if the driving processor is
    /// token-limited.  `None` means no token requirement.
    fn required_tokens(&self) -> Option<u64> {
        None
    }

    /// The actual work.  Failures are reported as `Err(message)` and end up
    /// in the execution record.
    async fn perform(&self) -> std::result::Result<serde_json::Value, String>;

    /// Run the event once, recording the outcome.
    ///
    /// Idempotent: invoking a processing or terminal event is a no-op.
    async fn invoke(&self) {
        if !self.meta().try_begin() {
            tracing::debug!(event_id = %self.meta().id(), "invoke skipped: event already started");
            return;
        }

        let start = Instant::now();
        match self.perform().await {
            Ok(response) => {
                self.meta().complete(response, start.elapsed());
                tracing::debug!(event_id = %self.meta().id(), "event completed");
            }
            Err(error) => {
                self.meta().fail(error.clone(), start.elapsed());
                tracing::warn!(event_id = %self.meta().id(), error = %error, "event failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingEvent {
        meta: EventMeta,
        calls: AtomicU32,
        fail: bool,
    }

    impl CountingEvent {
        fn new(fail: bool) -> Self {
            Self {
                meta: EventMeta::new(),
                calls: AtomicU32::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl Event for CountingEvent {
        fn meta(&self) -> &EventMeta {
            &self.meta
        }

        async fn perform(&self) -> std::result::Result<serde_json::Value, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("boom".to_string())
            } else {
                Ok(serde_json::json!(42))
            }
        }
    }

    #[tokio::test]
    async fn successful_invoke_records_response_and_duration() {
        let event = CountingEvent::new(false);
        event.invoke().await;

        let exec = event.meta().execution();
        assert_eq!(exec.status, EventStatus::Completed);
        assert_eq!(exec.response, Some(serde_json::json!(42)));
        assert!(exec.duration.is_some());
        assert!(exec.error.is_none());
    }

    #[tokio::test]
    async fn failed_invoke_records_error() {
        let event = CountingEvent::new(true);
        event.invoke().await;

        let exec = event.meta().execution();
        assert_eq!(exec.status, EventStatus::Failed);
        assert_eq!(exec.error.as_deref(), Some("boom"));
        assert!(exec.response.is_none());
        assert!(exec.duration.is_some());
    }

    #[tokio::test]
    async fn second_invoke_is_a_no_op() {
        let event = CountingEvent::new(false);
        event.invoke().await;
        event.invoke().await;

        assert_eq!(event.calls.load(Ordering::SeqCst), 1);
        assert_eq!(event.meta().status(), EventStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_only_works_before_start() {
        let event = CountingEvent::new(false);
        assert!(event.meta().cancel());
        assert_eq!(event.meta().status(), EventStatus::Cancelled);

        // Invoke after cancel does nothing.
        event.invoke().await;
        assert_eq!(event.calls.load(Ordering::SeqCst), 0);
        assert_eq!(event.meta().status(), EventStatus::Cancelled);

        // Cancel after completion fails.
        let event = CountingEvent::new(false);
        event.invoke().await;
        assert!(!event.meta().cancel());
    }

    #[test]
    fn terminal_record_is_immutable() {
        let meta = EventMeta::new();
        assert!(meta.try_begin());
        meta.complete(serde_json::json!("done"), Duration::from_millis(1));

        // Later transitions are ignored.
        meta.fail("late failure", Duration::from_millis(2));
        let exec = meta.execution();
        assert_eq!(exec.status, EventStatus::Completed);
        assert_eq!(exec.response, Some(serde_json::json!("done")));
        assert!(exec.error.is_none());
    }

    #[test]
    fn ids_are_time_ordered() {
        let a = EventMeta::new();
        let b = EventMeta::new();
        assert!(a.id() < b.id());
    }
}
