//! Notification delivery.
//!
//! Sessions and the credential cache report through a [`NotificationSink`].
//! Two sinks are provided:
//!
//! - [`TelegramSink`]: Telegram Bot API, one chat per user plus an admin chat
//! - [`BroadcastSink`]: in-process fan-out of [`NotificationEvent`]s

mod broadcast;
pub mod events;
mod telegram;

pub use broadcast::BroadcastSink;
pub use events::{NotificationEvent, NotificationPriority};
pub use telegram::{TelegramConfig, TelegramSink};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::session::SessionStatus;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification sink unavailable: {0}")]
    Unavailable(String),

    #[error("Notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Notification API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Notification rate limit exceeded after {0} attempts")]
    RateLimited(u32),

    #[error("No recipient configured for {0}")]
    NoRecipient(String),
}

/// Receives found-item, error, status and admin events.
///
/// Implementors only need [`NotificationSink::deliver`]; the `send_*`
/// operations wrap their arguments into a [`NotificationEvent`].
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sink name for logs.
    fn name(&self) -> &'static str;

    async fn deliver(&self, event: NotificationEvent) -> Result<(), NotificationError>;

    /// Whether the sink can currently deliver.
    fn is_available(&self) -> bool {
        true
    }

    /// Try to bring an unavailable sink back. Returns the new availability.
    async fn reinitialize(&self) -> bool {
        self.is_available()
    }

    async fn send_message(&self, user: &str, text: &str) -> Result<(), NotificationError> {
        self.deliver(NotificationEvent::Message {
            user: user.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }

    async fn send_products_found(
        &self,
        user: &str,
        count: usize,
        query: &str,
    ) -> Result<(), NotificationError> {
        self.deliver(NotificationEvent::ProductsFound {
            user: user.to_string(),
            count,
            query: query.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }

    async fn send_error(&self, user: &str, message: &str) -> Result<(), NotificationError> {
        self.deliver(NotificationEvent::Error {
            user: user.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }

    async fn send_status(
        &self,
        user: &str,
        status: SessionStatus,
        details: &str,
    ) -> Result<(), NotificationError> {
        self.deliver(NotificationEvent::Status {
            user: user.to_string(),
            status,
            details: details.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }

    async fn send_image(&self, user: &str, url: &str, caption: &str) -> Result<(), NotificationError> {
        self.deliver(NotificationEvent::Image {
            user: user.to_string(),
            url: url.to_string(),
            caption: caption.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }

    async fn send_admin(&self, message: &str) -> Result<(), NotificationError> {
        self.deliver(NotificationEvent::Admin {
            message: message.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }
}
