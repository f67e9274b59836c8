use thiserror::Error;

use super::status::SessionStatus;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session for {user} needs at least one query")]
    EmptyQueries { user: String },

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Session for {0} is already running")]
    AlreadyRunning(String),

    #[error("No session for {0}")]
    NotFound(String),

    /// A stop is in flight; the session is parked once it completes.
    #[error("Session for {0} is stopping")]
    Stopping(String),

    /// The worker stopped accepting commands.
    #[error("Worker for {0} is not responding")]
    WorkerUnavailable(String),
}
