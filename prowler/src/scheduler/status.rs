//! Aggregate reports.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::credentials::DomainStatus;
use crate::session::{SessionSnapshot, SessionStatus};

/// Point-in-time view of the whole supervisor.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub generated_at: DateTime<Utc>,
    pub running: usize,
    pub paused: usize,
    pub stopped: usize,
    pub total_requests: u64,
    pub total_products_found: u64,
    pub total_errors: u64,
    pub sink_available: bool,
    /// Sorted by user id.
    pub sessions: Vec<SessionSnapshot>,
    pub credentials: Vec<DomainStatus>,
}

impl SupervisorStatus {
    pub fn from_parts(
        mut sessions: Vec<SessionSnapshot>,
        credentials: Vec<DomainStatus>,
        sink_available: bool,
    ) -> Self {
        sessions.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        let count = |status: SessionStatus| sessions.iter().filter(|s| s.status == status).count();

        Self {
            generated_at: Utc::now(),
            running: count(SessionStatus::Running),
            paused: count(SessionStatus::Paused),
            stopped: count(SessionStatus::Stopped),
            total_requests: sessions.iter().map(|s| s.requests).sum(),
            total_products_found: sessions.iter().map(|s| s.products_found).sum(),
            total_errors: sessions.iter().map(|s| s.errors).sum(),
            sink_available,
            sessions,
            credentials,
        }
    }

    /// Domains currently served a degraded set.
    pub fn degraded_domains(&self) -> Vec<&str> {
        self.credentials
            .iter()
            .filter(|c| c.source.is_degraded())
            .map(|c| c.domain.as_str())
            .collect()
    }
}

/// Result of a supervisor shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Number of workers at shutdown start.
    pub total_workers: usize,
    /// Number of workers that stopped gracefully.
    pub graceful_stops: usize,
    /// Number of workers that were aborted or crashed.
    pub forced_terminations: usize,
    /// Number of Stop messages that failed to send.
    pub stop_message_failures: usize,
}

impl ShutdownReport {
    /// Check if all workers stopped gracefully.
    pub fn all_graceful(&self) -> bool {
        self.forced_terminations == 0
    }
}

/// Outcome of one health monitor pass.
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    /// Workers found dead and removed.
    pub reaped: Vec<String>,
    pub sink_available: bool,
    /// The sink was unavailable and came back during this pass.
    pub sink_recovered: bool,
    /// Domains at or above the failure alert threshold.
    pub failing_domains: Vec<String>,
    /// Admin alerts sent during this pass.
    pub alerts_sent: usize,
    /// Panics seen by the process-wide hook so far.
    pub panics: u64,
}
