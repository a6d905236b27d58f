use crate::domain::ports::{Notification, Notifier};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Emits notifications as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, recipient: &str, notification: Notification) {
        match serde_json::to_string(&notification) {
            Ok(payload) => tracing::info!(recipient, %payload, "notification"),
            Err(e) => tracing::warn!(recipient, error = %e, "unserializable notification"),
        }
    }
}

/// Keeps every notification in memory, in delivery order.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(String, Notification)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &str, notification: Notification) {
        self.sent.lock().push((recipient.to_string(), notification));
    }
}
