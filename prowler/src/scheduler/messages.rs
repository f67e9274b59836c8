//! Commands accepted by a session worker.

use tokio::sync::oneshot;

use crate::session::SessionError;

/// Reply channel for commands that can be rejected by the session.
pub type Reply = oneshot::Sender<Result<(), SessionError>>;

#[derive(Debug)]
pub enum SessionMessage {
    /// RUNNING → PAUSED; the worker keeps its timer but skips iterations.
    Pause { reply: Reply },
    /// PAUSED → RUNNING.
    Resume { reply: Reply },
    /// Replace the query list.
    UpdateQueries { queries: Vec<String>, reply: Reply },
    /// Clear counters and history.
    Reset { reply: Reply },
    /// Exit the worker loop. Sent through the priority lane.
    Stop,
}

impl SessionMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pause { .. } => "pause",
            Self::Resume { .. } => "resume",
            Self::UpdateQueries { .. } => "update_queries",
            Self::Reset { .. } => "reset",
            Self::Stop => "stop",
        }
    }
}
