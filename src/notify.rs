use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::limits::MAX_NOTIFICATIONS_PER_USER;
use crate::model::{Notification, NotificationKind};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification write failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Notification sink: per-user message rows plus a live broadcast channel
/// per recipient. Delivery to end users (polling, push, email) is the
/// embedding layer's concern; the engine only writes rows here.
pub struct NotificationCenter {
    inbox: DashMap<Ulid, Vec<Notification>>,
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self {
            inbox: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// Append a notification row for `user_id` and fan out to any live
    /// subscribers. Fails only when the recipient's inbox is at capacity;
    /// callers treat that as best-effort and must not roll back on it.
    pub fn push(
        &self,
        user_id: Ulid,
        kind: NotificationKind,
        title: String,
        message: String,
        payload: serde_json::Value,
    ) -> Result<Notification, NotifyError> {
        let notification = Notification {
            id: Ulid::new(),
            user_id,
            kind,
            title,
            message,
            read: false,
            payload,
            created_at: Utc::now(),
        };

        let mut rows = self.inbox.entry(user_id).or_default();
        if rows.len() >= MAX_NOTIFICATIONS_PER_USER {
            return Err(NotifyError(format!(
                "inbox full for user {user_id}"
            )));
        }
        rows.push(notification.clone());
        drop(rows);

        // No-op if nobody is listening.
        if let Some(sender) = self.channels.get(&user_id) {
            let _ = sender.send(notification.clone());
        }

        Ok(notification)
    }

    /// Subscribe to live notifications for a user. Creates the channel if needed.
    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    pub fn for_user(&self, user_id: Ulid) -> Vec<Notification> {
        self.inbox
            .get(&user_id)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    pub fn unread_count(&self, user_id: Ulid) -> usize {
        self.inbox
            .get(&user_id)
            .map(|rows| rows.iter().filter(|n| !n.read).count())
            .unwrap_or(0)
    }

    /// Mark one notification read. Returns false if it doesn't exist.
    pub fn mark_read(&self, user_id: Ulid, notification_id: Ulid) -> bool {
        if let Some(mut rows) = self.inbox.get_mut(&user_id)
            && let Some(n) = rows.iter_mut().find(|n| n.id == notification_id) {
                n.read = true;
                return true;
            }
        false
    }

    /// Mark everything read for a user, returning how many rows flipped.
    pub fn mark_all_read(&self, user_id: Ulid) -> usize {
        let Some(mut rows) = self.inbox.get_mut(&user_id) else {
            return 0;
        };
        let mut flipped = 0;
        for n in rows.iter_mut().filter(|n| !n.read) {
            n.read = true;
            flipped += 1;
        }
        flipped
    }
}
