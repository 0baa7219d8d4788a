//! One-way notification bus.
//!
//! The core emits data-only events; UI and log sinks subscribe and render
//! them however they like. Emission never blocks and never fails — if no
//! subscriber is listening the event is dropped.

use tokio::sync::broadcast;

use crate::validation::ValidationStatus;

// ─── Event Types ─────────────────────────────────────────────────────────────

/// Lifecycle status of a tool call, for external observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Started,
    InProgress,
    Completed,
    Failed,
    Timeout,
}

/// A notification emitted by the orchestration core.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// A validation pass finished for a server.
    ValidationCompleted {
        server: String,
        status: ValidationStatus,
        error: Option<String>,
    },
    /// A tool call changed lifecycle state.
    ToolCallStatusChanged {
        call_id: String,
        tool: String,
        status: ToolCallStatus,
    },
    /// A server started, stopped, or crashed.
    StatusChanged {
        server: String,
        is_running: bool,
        message: Option<String>,
    },
}

// ─── Bus ─────────────────────────────────────────────────────────────────────

/// Broadcast channel capacity. Slow subscribers that fall further behind
/// than this lose the oldest events (broadcast lag), which is acceptable
/// for display-only notifications.
const BUS_CAPACITY: usize = 256;

/// Fan-out notification bus backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Notification>,
}

impl EventBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all future notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Emit a notification. Dropped silently when nobody is subscribed.
    pub fn emit(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
