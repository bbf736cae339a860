//! Tracked events and the handlers they are delivered to.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// A decoded contract event. Identity is `(transaction_hash, log_index)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEvent {
    pub name: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
    pub return_values: BTreeMap<String, Value>,
    /// Block timestamp, when the tracker resolves it.
    pub timestamp: Option<u64>,
}

impl TrackedEvent {
    pub fn id(&self) -> (&str, u64) {
        (&self.transaction_hash, self.log_index)
    }
}

/// Consumer of tracked events.
///
/// Delivery is at-least-once and in `(block_number, log_index)` order: a
/// window whose delivery fails is re-scanned, so implementations must be
/// idempotent on [TrackedEvent::id].
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &TrackedEvent) -> anyhow::Result<()>;
}

/// Runs handlers one after another; the first error stops the chain.
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }
}

#[async_trait]
impl EventHandler for HandlerChain {
    async fn handle(&self, event: &TrackedEvent) -> anyhow::Result<()> {
        for handler in &self.handlers {
            handler.handle(event).await?;
        }
        Ok(())
    }
}

/// Bounded in-memory record of the most recent events. All data is lost
/// when the process exits.
pub struct EventLog {
    capacity: usize,
    inner: Mutex<EventLogInner>,
}

#[derive(Default)]
struct EventLogInner {
    events: VecDeque<TrackedEvent>,
    seen: HashSet<(String, u64)>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(EventLogInner::default()),
        }
    }

    /// Record an event. Returns `false` if it was already recorded.
    pub fn record(&self, event: TrackedEvent) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let (tx_hash, log_index) = event.id();
        if !inner.seen.insert((tx_hash.to_owned(), log_index)) {
            return false;
        }
        if inner.events.len() >= self.capacity {
            if let Some(old) = inner.events.pop_front() {
                inner.seen.remove(&(old.transaction_hash, old.log_index));
            }
        }
        inner.events.push_back(event);
        true
    }

    /// Recorded events, oldest first.
    pub fn list(&self) -> Vec<TrackedEvent> {
        self.inner.lock().unwrap().events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventHandler for EventLog {
    async fn handle(&self, event: &TrackedEvent) -> anyhow::Result<()> {
        if !self.record(event.clone()) {
            tracing::debug!(
                tx_hash = %event.transaction_hash,
                log_index = event.log_index,
                "event already recorded"
            );
        }
        Ok(())
    }
}
