//! Credential acquisition.
//!
//! Fetching is slow and fallible (it may drive a real browser), so the cache
//! only talks to it through [`CredentialFetcher`].

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::error::CredentialError;
use super::types::{CredentialSet, CredentialSource};

/// How the fetcher may interact with the operator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// No operator involvement.
    Headless,
    /// The operator may complete a login or challenge.
    Interactive,
}

impl FetchMode {
    pub fn from_force_interactive(force_interactive: bool) -> Self {
        if force_interactive {
            Self::Interactive
        } else {
            Self::Headless
        }
    }
}

/// Acquires a fresh credential set for a domain.
///
/// Implementations may return a partial set; the cache validates it before use.
#[async_trait]
pub trait CredentialFetcher: Send + Sync {
    async fn fetch(&self, domain: &str, mode: FetchMode) -> Result<CredentialSet, CredentialError>;
}

/// Runs an external command that prints a cookie header on stdout.
///
/// Invoked as `<program> <args…> <domain> <mode>`.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandFetcher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl CredentialFetcher for CommandFetcher {
    #[instrument(skip(self), fields(program = %self.program.display()))]
    async fn fetch(&self, domain: &str, mode: FetchMode) -> Result<CredentialSet, CredentialError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(domain)
            .arg(mode.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CredentialError::fetch(domain, format!("failed to spawn fetcher: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, stderr = %stderr.trim(), "Fetcher command failed");
            return Err(CredentialError::fetch(
                domain,
                format!("fetcher exited with {}", output.status),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let header = stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .unwrap_or_default();

        if header.is_empty() {
            return Err(CredentialError::fetch(domain, "fetcher printed no cookies"));
        }

        let set = CredentialSet::from_cookie_header(domain, header, CredentialSource::LiveFetch);
        debug!(cookies = set.len(), "Fetcher returned cookies");
        Ok(set)
    }
}

/// Used when no fetcher is configured; every fetch fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableFetcher;

#[async_trait]
impl CredentialFetcher for UnavailableFetcher {
    async fn fetch(&self, domain: &str, _mode: FetchMode) -> Result<CredentialSet, CredentialError> {
        Err(CredentialError::FetcherUnavailable(format!(
            "no fetcher configured for {}",
            domain
        )))
    }
}
