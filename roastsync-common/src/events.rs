//! Notification hub
//!
//! User-addressed notifications (production task triggers, reminders)
//! fanned out over a tokio broadcast channel. Subscribers filter by their
//! own user id; the hub itself never blocks a publisher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Envelope delivered to notification subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    /// Always `"notification"`
    #[serde(rename = "type")]
    pub kind: String,
    /// e.g. `production_task`, `production_task_reminder`
    pub event_type: String,
    pub payload: serde_json::Value,
    pub target_user_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(event_type: &str, target_user_id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            kind: "notification".to_string(),
            event_type: event_type.to_string(),
            payload,
            target_user_id,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast hub addressed by user id
#[derive(Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<Notification>,
    capacity: usize,
}

impl NotificationHub {
    /// Creates a hub buffering up to `capacity` undelivered notifications
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Publish to whoever is listening
    ///
    /// Returns the number of live subscribers; zero is not an error since a
    /// user with no open stream simply misses the live push (history rows
    /// keep the record).
    pub fn publish(&self, notification: Notification) -> usize {
        match self.tx.send(notification) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(n)) => {
                debug!("No subscribers for {} to user {}", n.event_type, n.target_user_id);
                0
            }
        }
    }

    /// Convenience for publish(Notification::new(..))
    pub fn notify(&self, event_type: &str, user_id: Uuid, payload: serde_json::Value) -> usize {
        self.publish(Notification::new(event_type, user_id, payload))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(256)
    }
}
