//! Notification events.
//!
//! Every sink operation is expressed as one [`NotificationEvent`], so sinks
//! that forward structured events (broadcast) and sinks that render text
//! (Telegram) share one vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::SessionStatus;

/// Priority level of a notification.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    Message {
        user: String,
        text: String,
        timestamp: DateTime<Utc>,
    },
    ProductsFound {
        user: String,
        count: usize,
        query: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        user: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Status {
        user: String,
        status: SessionStatus,
        details: String,
        timestamp: DateTime<Utc>,
    },
    Image {
        user: String,
        url: String,
        caption: String,
        timestamp: DateTime<Utc>,
    },
    /// Operator-facing message, not tied to a user.
    Admin {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl NotificationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::ProductsFound { .. } => "products_found",
            Self::Error { .. } => "error",
            Self::Status { .. } => "status",
            Self::Image { .. } => "image",
            Self::Admin { .. } => "admin",
        }
    }

    pub fn priority(&self) -> NotificationPriority {
        match self {
            Self::Message { .. } | Self::Status { .. } => NotificationPriority::Low,
            Self::ProductsFound { .. } | Self::Image { .. } => NotificationPriority::Normal,
            Self::Error { .. } => NotificationPriority::High,
            Self::Admin { .. } => NotificationPriority::Critical,
        }
    }

    /// Recipient user, `None` for admin events.
    pub fn user(&self) -> Option<&str> {
        match self {
            Self::Message { user, .. }
            | Self::ProductsFound { user, .. }
            | Self::Error { user, .. }
            | Self::Status { user, .. }
            | Self::Image { user, .. } => Some(user),
            Self::Admin { .. } => None,
        }
    }

    /// Plain-text rendering.
    pub fn text(&self) -> String {
        match self {
            Self::Message { text, .. } => text.clone(),
            Self::ProductsFound { count, query, .. } => {
                format!("🔔 {} new item(s) for \"{}\"", count, query)
            }
            Self::Error { message, .. } => format!("⚠️ {}", message),
            Self::Status {
                status, details, ..
            } => {
                if details.is_empty() {
                    format!("Session is now {}", status)
                } else {
                    format!("Session is now {}\n{}", status, details)
                }
            }
            Self::Image { caption, url, .. } => format!("{}\n{}", caption, url),
            Self::Admin { message, .. } => format!("🚨 {}", message),
        }
    }
}
