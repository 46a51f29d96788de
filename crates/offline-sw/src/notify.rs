//! Notification display collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Failure to display a notification.
#[derive(Error, Debug, Clone)]
pub enum NotificationError {
    #[error("Notification permission denied")]
    PermissionDenied,
}

/// Options passed alongside a notification title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
}

/// Shows system notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn show_notification(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<(), NotificationError>;
}

/// Sink that writes notifications to the log, for headless hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn show_notification(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<(), NotificationError> {
        info!(
            title = %title,
            body = %options.body,
            icon = %options.icon,
            badge = %options.badge,
            "Notification"
        );
        Ok(())
    }
}
