use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::BookingStatus;

const CHANNEL_CAPACITY: usize = 256;

/// Who a notification is for. `Admins` is the broadcast to every administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "userId", rename_all = "camelCase")]
pub enum Audience {
    User(Ulid),
    Admins,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMeta {
    pub booking_id: Ulid,
    pub space_id: Ulid,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub audience: Audience,
    pub title: String,
    pub message: String,
    pub meta: NotificationMeta,
}

#[derive(Debug)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification dispatch failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Outbound notification seam. Callers treat delivery as best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// In-process broadcast hub, one channel per audience.
pub struct NotifyHub {
    channels: DashMap<Audience, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to an audience. Creates the channel if needed.
    pub fn subscribe(&self, audience: Audience) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(audience)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn remove(&self, audience: &Audience) {
        self.channels.remove(audience);
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    /// No-op when nobody is listening.
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        if let Some(sender) = self.channels.get(&notification.audience) {
            let _ = sender.send(notification);
        }
        Ok(())
    }
}
