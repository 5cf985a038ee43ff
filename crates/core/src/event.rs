//! Domain event system: decoupled communication between bounded contexts.
//!
//! The learning side publishes when lessons and workflows change; the
//! coordinator publishes when a run finishes. Subscribers (CLI, review
//! surfaces, tests) react without the publishers knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A lesson entered review
    LessonProposed {
        lesson_id: String,
        text_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A reviewer approved, rejected or archived a lesson
    LessonStatusChanged {
        lesson_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent-scoped lesson crossed the promotion thresholds
    LessonPromoted {
        lesson_id: String,
        usage_count: u32,
        success_ratio: f32,
        timestamp: DateTime<Utc>,
    },

    /// A workflow template was saved from a successful run
    WorkflowSaved {
        workflow_id: String,
        goal_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A run reached a terminal state
    RunFinished {
        run_id: String,
        status: String,
        subtasks: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// First 80 characters of `text`, for event previews.
pub fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}
