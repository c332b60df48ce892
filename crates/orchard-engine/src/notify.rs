//! Outbound signals about task progress: real-time events to the owner and
//! best-effort notifications to a topic.

use async_trait::async_trait;
use orchard_core::model::{Guid, Task, TaskState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub owner: String,
    pub guid: Guid,
    pub state: TaskState,
    pub job_status: Option<String>,
    pub message: Option<String>,
}

impl From<&Task> for TaskEvent {
    fn from(task: &Task) -> Self {
        Self {
            owner: task.owner.clone(),
            guid: task.guid.clone(),
            state: task.state,
            job_status: task.job_status.clone(),
            message: task.message.clone(),
        }
    }
}

/// Real-time task updates for connected clients.
pub trait PushChannel: Send + Sync {
    fn notify(&self, username: &str, event: TaskEvent);
}

/// Fans events out to every subscriber. Sending with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastChannel {
    sender: broadcast::Sender<TaskEvent>,
}

impl BroadcastChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

impl PushChannel for BroadcastChannel {
    fn notify(&self, username: &str, event: TaskEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No subscribers for events of '{}'", username);
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, topic: &str, subject: &str, body: &str) -> std::io::Result<()>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn publish(&self, topic: &str, subject: &str, body: &str) -> std::io::Result<()> {
        tracing::info!(topic, "{}: {}", subject, body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let channel = BroadcastChannel::new(4);
        let mut rx = channel.subscribe();
        let event = TaskEvent {
            owner: "alice".into(),
            guid: Guid::from("t1"),
            state: TaskState::Running,
            job_status: Some("PENDING".into()),
            message: None,
        };
        channel.notify("alice", event.clone());
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn test_notify_without_subscribers_is_silent() {
        let channel = BroadcastChannel::default();
        channel.notify(
            "alice",
            TaskEvent {
                owner: "alice".into(),
                guid: Guid::from("t1"),
                state: TaskState::Created,
                job_status: None,
                message: None,
            },
        );
    }
}
