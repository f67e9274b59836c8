//! Consecutive refresh failure tracking per domain.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Tracks refresh failures per authentication domain.
///
/// Used to gate admin notifications and to surface degraded domains in the
/// health report.
#[derive(Default)]
pub struct RefreshFailureTracker {
    failures: DashMap<String, FailureRecord>,
}

#[derive(Clone)]
struct FailureRecord {
    count: u32,
    first_failure: DateTime<Utc>,
    last_failure: DateTime<Utc>,
    last_error: String,
}

impl RefreshFailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the updated count.
    pub fn record_failure(&self, domain: &str, error: &str) -> u32 {
        let now = Utc::now();

        let mut entry = self
            .failures
            .entry(domain.to_string())
            .or_insert(FailureRecord {
                count: 0,
                first_failure: now,
                last_failure: now,
                last_error: String::new(),
            });

        entry.count += 1;
        entry.last_failure = now;
        entry.last_error = error.to_string();

        entry.count
    }

    /// Clear failures on success.
    pub fn clear(&self, domain: &str) {
        self.failures.remove(domain);
    }

    pub fn failure_count(&self, domain: &str) -> u32 {
        self.failures.get(domain).map(|r| r.count).unwrap_or(0)
    }

    /// Domains whose consecutive failure count reached `threshold`.
    pub fn domains_at_or_above(&self, threshold: u32) -> Vec<(String, FailureInfo)> {
        let mut domains: Vec<_> = self
            .failures
            .iter()
            .filter(|r| r.count >= threshold)
            .map(|r| {
                (
                    r.key().clone(),
                    FailureInfo {
                        count: r.count,
                        first_failure: r.first_failure,
                        last_failure: r.last_failure,
                        last_error: r.last_error.clone(),
                    },
                )
            })
            .collect();
        domains.sort_by(|a, b| a.0.cmp(&b.0));
        domains
    }
}

/// Information about failures for a domain.
#[derive(Debug, Clone)]
pub struct FailureInfo {
    /// Number of consecutive failures.
    pub count: u32,
    /// Time of first failure in this sequence.
    pub first_failure: DateTime<Utc>,
    /// Time of most recent failure.
    pub last_failure: DateTime<Utc>,
    /// Error message from last failure.
    pub last_error: String,
}
