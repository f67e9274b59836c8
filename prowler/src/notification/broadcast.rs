use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use super::{NotificationError, NotificationEvent, NotificationSink};

/// Default channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Fans events out to in-process subscribers.
///
/// Delivery never fails for lack of subscribers; slow subscribers lag and
/// lose the oldest events.
pub struct BroadcastSink {
    sender: broadcast::Sender<NotificationEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn deliver(&self, event: NotificationEvent) -> Result<(), NotificationError> {
        let event_type = event.event_type();
        let receivers = self.sender.send(event).unwrap_or(0);
        trace!(event_type, receivers, "Notification broadcast");
        Ok(())
    }
}
