//! Event executor: a [`Processor`] plus an event pile.
//!
//! The [`Executor`] owns exactly one processor and tracks every appended
//! event in a concurrent pile keyed by id, so callers can read back
//! terminal [`Execution`](crate::event::Execution) records after the fact.
//! `append` never rejects -- backpressure from a full queue is absorbed by
//! buffering in the pile and re-forwarding on the next [`Executor::forward`]
//! pass.
//!
//! When the config carries an `interval` and at least one budget limit,
//! [`Executor::start`] also spawns a replenisher task that resets the
//! processor's budgets every interval.  [`Executor::stop`] cancels that task
//! and awaits both background tasks before returning, so no task outlives
//! the executor's lifecycle.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::error::{CoreError, Result};
use crate::event::{Event, EventId, EventStatus};
use crate::processor::{Processor, ProcessorConfig};

/// Drives events through an admission-controlled processor and retains them
/// for result readback.
pub struct Executor {
    processor: Arc<Processor>,
    pile: DashMap<EventId, Arc<dyn Event>>,
    pending: Mutex<VecDeque<EventId>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    replenisher: Mutex<Option<JoinHandle<()>>>,
    strict_kind: Option<&'static str>,
}

impl Executor {
    /// Create an executor with a freshly constructed processor.
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        Ok(Self {
            processor: Arc::new(Processor::new(config)?),
            pile: DashMap::new(),
            pending: Mutex::new(VecDeque::new()),
            worker: Mutex::new(None),
            replenisher: Mutex::new(None),
            strict_kind: None,
        })
    }

    /// Restrict appends to events of one kind (see [`Event::kind`]).
    pub fn with_event_kind(mut self, kind: &'static str) -> Self {
        self.strict_kind = Some(kind);
        self
    }

    /// The owned processor.
    pub fn processor(&self) -> &Arc<Processor> {
        &self.processor
    }

    /// Add an event to the pile and mark it pending for the next forward
    /// pass.  Never rejected for capacity reasons.
    pub fn append(&self, event: Arc<dyn Event>) -> Result<()> {
        if let Some(expected) = self.strict_kind {
            if event.kind() != expected {
                return Err(CoreError::EventKindMismatch {
                    expected,
                    actual: event.kind(),
                });
            }
        }
        let id = event.meta().id();
        self.pile.insert(id, event);
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(id);
        tracing::debug!(event_id = %id, "event appended");
        Ok(())
    }

    /// Move pending events into the processor queue, in append order, until
    /// the queue fills.  Events that do not fit stay pending.
    pub fn forward(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(id) = pending.front().copied() {
            let Some(event) = self.pile.get(&id).map(|e| Arc::clone(e.value())) else {
                pending.pop_front();
                continue;
            };
            match self.processor.try_enqueue(event) {
                Ok(()) => {
                    pending.pop_front();
                }
                Err(CoreError::QueueFull { .. }) | Err(CoreError::ProcessorStopped) => break,
                Err(_) => break,
            }
        }
    }

    /// Start the worker loop, and the budget replenisher when the config
    /// asks for one.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_none() {
            *worker = Some(self.processor.start());
        }

        let config = self.processor.config().clone();
        let wants_replenisher = config.interval.is_some()
            && (config.limit_requests.is_some() || config.limit_tokens.is_some());
        if wants_replenisher {
            let mut replenisher = self.replenisher.lock().unwrap_or_else(|e| e.into_inner());
            if replenisher.is_none() {
                let processor = Arc::clone(&self.processor);
                let interval = config.interval.unwrap_or(config.capacity_refresh_time);
                *replenisher = Some(tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(interval).await;
                        processor.replenish();
                    }
                }));
                tracing::info!(interval = ?interval, "replenisher started");
            }
        }
    }

    /// Stop the processor, cancel the replenisher, and await both tasks.
    ///
    /// In-flight invocations are not forcibly cancelled; queued events are
    /// left queued with their status untouched.
    pub async fn stop(&self) {
        self.processor.stop();

        let replenisher = self
            .replenisher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = replenisher {
            handle.abort();
            // Await the cancellation so the task cannot leak past stop().
            let _ = handle.await;
            tracing::info!("replenisher cancelled");
        }

        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
    }

    /// Forward everything and wait until the queue is drained and no
    /// invocation is in flight.
    pub async fn drain(&self) {
        loop {
            self.forward();
            self.processor.join().await;
            let pending_empty = self
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_empty();
            if pending_empty {
                return;
            }
        }
    }

    /// Look up an event by id.
    pub fn get(&self, id: EventId) -> Option<Arc<dyn Event>> {
        self.pile.get(&id).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.pile.contains_key(&id)
    }

    /// Number of events ever appended (pile size).
    pub fn len(&self) -> usize {
        self.pile.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pile.is_empty()
    }

    /// Snapshot of events currently in the given status.
    pub fn events_with_status(&self, status: EventStatus) -> Vec<Arc<dyn Event>> {
        self.pile
            .iter()
            .filter(|e| e.value().meta().status() == status)
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    pub fn completed_events(&self) -> Vec<Arc<dyn Event>> {
        self.events_with_status(EventStatus::Completed)
    }

    pub fn failed_events(&self) -> Vec<Arc<dyn Event>> {
        self.events_with_status(EventStatus::Failed)
    }

    pub fn pending_events(&self) -> Vec<Arc<dyn Event>> {
        self.events_with_status(EventStatus::Pending)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
