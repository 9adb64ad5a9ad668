//! Push events keyed by task id.
//!
//! Delivery is best-effort: a subscriber that goes away or falls behind is
//! dropped, and the pipeline never waits on it.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// Client-visible event for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Progress { message: String, percent: u8 },
    Log { message: String, level: LogLevel },
    Error { message: String },
    Completion {
        preview_url: String,
        download_url: String,
    },
}

impl TaskEvent {
    pub fn progress(message: impl Into<String>, percent: u8) -> Self {
        Self::Progress {
            message: message.into(),
            percent: percent.min(100),
        }
    }

    pub fn log(message: impl Into<String>, level: LogLevel) -> Self {
        Self::Log {
            message: message.into(),
            level,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn completion(task_id: Uuid) -> Self {
        Self::Completion {
            preview_url: format!("/api/preview/{task_id}/"),
            download_url: format!("/api/download/{task_id}"),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Completion { .. })
    }
}

/// Destination for task events.
pub trait EventSink: Send + Sync {
    /// Publish without blocking. Failures are swallowed.
    fn publish(&self, task_id: Uuid, event: TaskEvent);

    /// The task is gone for good; release anything held for it.
    fn forget(&self, _task_id: Uuid) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _task_id: Uuid, _event: TaskEvent) {}
}

/// One bounded channel per subscribed task.
#[derive(Debug)]
pub struct PushHub {
    channels: DashMap<Uuid, mpsc::Sender<TaskEvent>>,
    buffer: usize,
}

impl PushHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Attach a receiver for `task_id`, replacing any previous one.
    pub fn subscribe(&self, task_id: Uuid) -> mpsc::Receiver<TaskEvent> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.channels.insert(task_id, tx);
        rx
    }

    pub fn unsubscribe(&self, task_id: Uuid) {
        self.channels.remove(&task_id);
    }

    pub fn is_subscribed(&self, task_id: Uuid) -> bool {
        self.channels.contains_key(&task_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for PushHub {
    fn publish(&self, task_id: Uuid, event: TaskEvent) {
        let terminal = event.is_terminal();
        let failed = match self.channels.get(&task_id) {
            Some(tx) => tx.try_send(event).is_err(),
            None => return,
        };
        if failed {
            // Closed or full: drop the association, never retry.
            self.channels.remove(&task_id);
            tracing::debug!(%task_id, "push subscriber dropped");
        } else if terminal {
            // Buffered events stay readable after the sender is gone.
            self.channels.remove(&task_id);
        }
    }

    fn forget(&self, task_id: Uuid) {
        self.unsubscribe(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(TaskEvent::progress("planning", 10)).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["percent"], 10);

        let json = serde_json::to_value(TaskEvent::log("hi", LogLevel::Warning)).unwrap();
        assert_eq!(json["type"], "log");
        assert_eq!(json["level"], "warning");

        let id = Uuid::nil();
        let json = serde_json::to_value(TaskEvent::completion(id)).unwrap();
        assert_eq!(json["type"], "completion");
        assert_eq!(json["preview_url"], format!("/api/preview/{id}/"));
        assert_eq!(json["download_url"], format!("/api/download/{id}"));
    }

    #[tokio::test]
    async fn hub_delivers_in_order() {
        let hub = PushHub::new(8);
        let id = Uuid::new_v4();
        let mut rx = hub.subscribe(id);

        hub.publish(id, TaskEvent::progress("a", 1));
        hub.publish(id, TaskEvent::progress("b", 2));

        assert_eq!(rx.recv().await, Some(TaskEvent::progress("a", 1)));
        assert_eq!(rx.recv().await, Some(TaskEvent::progress("b", 2)));
    }

    #[test]
    fn closed_receiver_drops_association() {
        let hub = PushHub::new(8);
        let id = Uuid::new_v4();
        drop(hub.subscribe(id));

        hub.publish(id, TaskEvent::error("x"));
        assert!(!hub.is_subscribed(id));
    }

    #[test]
    fn full_buffer_drops_association() {
        let hub = PushHub::new(1);
        let id = Uuid::new_v4();
        let _rx = hub.subscribe(id);

        hub.publish(id, TaskEvent::progress("a", 1));
        assert!(hub.is_subscribed(id));
        hub.publish(id, TaskEvent::progress("b", 2));
        assert!(!hub.is_subscribed(id));
    }

    #[tokio::test]
    async fn terminal_event_releases_the_channel() {
        let hub = PushHub::new(8);
        let receivers: Vec<_> = (0..100)
            .map(|_| {
                let id = Uuid::new_v4();
                (id, hub.subscribe(id))
            })
            .collect();

        for (id, _) in &receivers {
            hub.publish(*id, TaskEvent::progress("almost", 99));
            hub.publish(*id, TaskEvent::completion(*id));
        }
        assert_eq!(hub.subscriber_count(), 0);

        for (id, mut rx) in receivers {
            assert_eq!(rx.recv().await, Some(TaskEvent::progress("almost", 99)));
            assert_eq!(rx.recv().await, Some(TaskEvent::completion(id)));
            assert_eq!(rx.recv().await, None);
        }
    }

    #[test]
    fn forget_drops_the_subscriber() {
        let hub = PushHub::new(8);
        let id = Uuid::new_v4();
        let _rx = hub.subscribe(id);
        hub.forget(id);
        assert!(!hub.is_subscribed(id));
    }

    #[test]
    fn publish_without_subscriber_is_ok() {
        let hub = PushHub::default();
        hub.publish(Uuid::new_v4(), TaskEvent::error("nobody listening"));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
