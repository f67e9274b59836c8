//! Credential error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during credential operations.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Fewer than the minimum number of required keys are present.
    #[error("Invalid credentials for {domain}: {present} of {required} required keys present")]
    Validation {
        domain: String,
        present: usize,
        required: usize,
    },

    /// The fetcher could not produce a set.
    #[error("Credential fetch failed for {domain}: {reason}")]
    Fetch { domain: String, reason: String },

    /// The fetcher did not answer in time.
    #[error("Credential fetch for {domain} timed out after {timeout:?}")]
    FetchTimeout { domain: String, timeout: Duration },

    /// No fetcher is configured.
    #[error("Credential fetcher unavailable: {0}")]
    FetcherUnavailable(String),

    /// Durable store failure.
    #[error("Credential store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CredentialError {
    pub fn fetch(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is transient and may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::FetchTimeout { .. } | Self::Io(_))
    }
}
