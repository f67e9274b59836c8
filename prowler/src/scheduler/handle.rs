//! Worker handle for type-safe message passing with backpressure support.
//!
//! The `SessionHandle` provides a way to send messages to a worker with:
//! - Backpressure awareness (try_send with timeout fallback)
//! - A priority lane for stop
//! - Lock-free snapshot reads through a watch channel

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::messages::SessionMessage;
use crate::session::{SessionError, SessionSnapshot};

/// Default mailbox capacity for workers.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 32;

/// Priority mailbox capacity.
pub const PRIORITY_MAILBOX_CAPACITY: usize = 4;

/// Default timeout for send operations when mailbox is full.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Default timeout for request/reply commands.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for send operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("Worker has stopped")]
    WorkerStopped,
    #[error("Send operation timed out")]
    Timeout,
}

/// A handle to a running session worker.
#[derive(Clone)]
pub struct SessionHandle {
    user_id: String,
    sender: mpsc::Sender<SessionMessage>,
    priority_sender: mpsc::Sender<SessionMessage>,
    cancellation_token: CancellationToken,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn new(
        user_id: impl Into<String>,
        sender: mpsc::Sender<SessionMessage>,
        priority_sender: mpsc::Sender<SessionMessage>,
        cancellation_token: CancellationToken,
        snapshot: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            sender,
            priority_sender,
            cancellation_token,
            snapshot,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Latest snapshot published by the worker.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Send a message with backpressure awareness.
    pub async fn send(&self, msg: SessionMessage) -> Result<(), SendError> {
        Self::send_on(&self.sender, msg, DEFAULT_SEND_TIMEOUT).await
    }

    /// Send through the priority lane.
    pub async fn send_priority(&self, msg: SessionMessage) -> Result<(), SendError> {
        Self::send_on(&self.priority_sender, msg, DEFAULT_SEND_TIMEOUT).await
    }

    async fn send_on(
        sender: &mpsc::Sender<SessionMessage>,
        msg: SessionMessage,
        timeout: Duration,
    ) -> Result<(), SendError> {
        // Fast path: try non-blocking send first
        match sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                // Slow path: wait for permit with timeout
                match tokio::time::timeout(timeout, sender.reserve()).await {
                    Ok(Ok(permit)) => {
                        permit.send(msg);
                        Ok(())
                    }
                    Ok(Err(_)) => Err(SendError::WorkerStopped),
                    Err(_) => Err(SendError::Timeout),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::WorkerStopped),
        }
    }

    /// Send a command built around a reply channel and wait for the answer.
    pub async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<(), SessionError>>) -> SessionMessage,
    ) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx))
            .await
            .map_err(|_| SessionError::WorkerUnavailable(self.user_id.clone()))?;

        match tokio::time::timeout(DEFAULT_REPLY_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            _ => Err(SessionError::WorkerUnavailable(self.user_id.clone())),
        }
    }

    /// Cancel the worker.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }
}
