use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Polling settings shared by sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Authentication domain whose credentials sign the calls.
    pub domain: String,
    /// Seconds between iterations.
    pub poll_interval_secs: u64,
    /// Random spread applied to the interval, as a fraction of it (0.0..=1.0).
    pub jitter_ratio: f64,
    /// Results requested per query.
    pub rows_per_page: u32,
    /// Send the item image with each announcement.
    pub notify_images: bool,
    /// Cap on individual announcements per query and iteration.
    pub max_announcements: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            domain: "goofish.com".to_string(),
            poll_interval_secs: 60,
            jitter_ratio: 0.2,
            rows_per_page: 30,
            notify_images: true,
            max_announcements: 5,
        }
    }
}

impl SessionSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}
