//! Events emitted by the expiry engine for UI and observability.
//!
//! This is intentionally lightweight so engine operations can publish
//! without blocking on slow consumers.

use crate::task::Task;
use tokio::sync::broadcast;

/// Buffered events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 64;

/// How the stored task collection changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A new task was created.
    Added,
    /// An existing task's fields were edited.
    Updated,
    /// A task record was removed entirely.
    Deleted,
    /// A task was pushed forward by a snooze.
    Snoozed,
    /// A task was dismissed without rescheduling.
    Cancelled,
}

/// Events that describe what the engine is doing "right now".
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A task crossed its effective time and now holds the pending slot.
    TaskExpired(Task),
    /// The stored task collection changed; consumers should re-render.
    TasksChanged(ChangeKind),
}

/// Fan-out channel for engine events.
///
/// Publishing never blocks. Events published with no live subscribers are
/// dropped, and a subscriber that falls more than the channel capacity
/// behind loses the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Open a new subscription; only events published after this call are
    /// observed.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
