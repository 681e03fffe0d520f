//! Instrumentation events — decoupled notification of what the engine does.
//!
//! The engine reports paired tool start/end events and a linear stream of
//! newly generated items to an [`InstrumentationSink`]. [`EventBus`] is the
//! broadcast implementation; tracing consumers implement the trait directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::item::{ItemKind, RunItem, ToolCategory};

/// How a dispatched tool call ended, from the instrumentation's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEventOutcome {
    Completed,
    Failed,
    Rejected,
    GuardrailRejected,
    TimedOut,
    /// The execution raised a fatal error or was cancelled.
    Aborted,
}

/// All instrumentation events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A tool call is about to run (or be short-circuited).
    ToolStarted {
        agent: String,
        tool_name: String,
        call_id: String,
        category: ToolCategory,
        timestamp: DateTime<Utc>,
    },

    /// The matching end of a `ToolStarted`.
    ToolFinished {
        agent: String,
        tool_name: String,
        call_id: String,
        outcome: ToolEventOutcome,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A new item was appended to the run's history.
    ItemGenerated {
        index: usize,
        kind: ItemKind,
        item: RunItem,
        timestamp: DateTime<Utc>,
    },

    /// A model turn is starting.
    TurnStarted {
        agent: String,
        turn: u32,
        timestamp: DateTime<Utc>,
    },

    /// Control moved between agents.
    AgentHandoff {
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },
}

/// Receives instrumentation events.
pub trait InstrumentationSink: Send + Sync {
    fn record(&self, event: DomainEvent);
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl InstrumentationSink for EventBus {
    fn record(&self, event: DomainEvent) {
        self.publish(event);
    }
}
