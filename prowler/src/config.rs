//! Application configuration.
//!
//! Loaded from an optional JSON file named by `PROWLER_CONFIG`, then
//! overridden from the environment (after `.env` is read).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use mtop_sign::MtopCall;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::credentials::{CredentialCacheConfig, CredentialValidator};
use crate::notification::TelegramConfig;
use crate::scheduler::SupervisorConfig;
use crate::search::DEFAULT_GATEWAY_URL;
use crate::session::SessionSettings;
use crate::utils::http_client::DEFAULT_USER_AGENT;
use crate::{Error, Result};

/// Environment variable naming the JSON config file.
pub const CONFIG_PATH_ENV: &str = "PROWLER_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub ttl_secs: u64,
    /// Lifetime of degraded sets, so the fetcher is retried soon.
    pub fallback_ttl_secs: u64,
    pub fetch_timeout_secs: u64,
    pub required_keys: Vec<String>,
    /// Number of required keys that must be present (K).
    pub min_required: usize,
    /// Cookies added with a fixed value when absent.
    pub placeholders: BTreeMap<String, String>,
    /// Cookie header strings keyed by domain.
    pub static_cookies: HashMap<String, String>,
    pub failure_alert_threshold: u32,
    /// Cookie carrying the signing token.
    pub token_cookie: String,
    /// Durable store file, relative to `data_dir` unless absolute.
    pub store_file: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        let placeholders = [
            ("xlly_s", "1"),
            ("_tb_token_", "placeholder"),
            ("sgcookie", "placeholder"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            ttl_secs: 30 * 60,
            fallback_ttl_secs: 60,
            fetch_timeout_secs: 120,
            required_keys: ["_m_h5_tk", "_m_h5_tk_enc", "cna", "t", "cookie2"]
                .into_iter()
                .map(String::from)
                .collect(),
            min_required: 3,
            placeholders,
            static_cookies: HashMap::new(),
            failure_alert_threshold: 3,
            token_cookie: "_m_h5_tk".to_string(),
            store_file: PathBuf::from("credentials.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub gateway_url: String,
    pub call: MtopCall,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub proxy_url: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            call: MtopCall::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 30,
            proxy_url: None,
        }
    }
}

/// External command producing cookie strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

/// A session started at boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialSession {
    pub user_id: String,
    pub queries: Vec<String>,
    /// Overrides the default session settings for this user.
    #[serde(default)]
    pub settings: Option<SessionSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Filter applied after startup, replacing `RUST_LOG` and the default.
    pub log_filter: Option<String>,
    pub credentials: CredentialsConfig,
    pub search: SearchConfig,
    pub supervisor: SupervisorConfig,
    /// Defaults for sessions started without explicit settings.
    pub session: SessionSettings,
    pub telegram: Option<TelegramConfig>,
    pub fetcher: Option<FetcherConfig>,
    pub sessions: Vec<InitialSession>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            log_filter: None,
            credentials: CredentialsConfig::default(),
            search: SearchConfig::default(),
            supervisor: SupervisorConfig::default(),
            session: SessionSettings::default(),
            telegram: None,
            fetcher: None,
            sessions: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load from `.env`, the optional config file and the process environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => {
                debug!("{} not set, using built-in defaults", CONFIG_PATH_ENV);
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&raw)?;
        info!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::config(format!("Invalid config JSON: {}", e)))
    }

    /// Apply `PROWLER_*` and `TELEGRAM_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PROWLER_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("PROWLER_LOG_DIR") {
            self.log_dir = PathBuf::from(v);
        }
        if let Some(v) = get("PROWLER_LOG_FILTER") {
            self.log_filter = Some(v);
        }

        let creds = &mut self.credentials;
        if let Some(v) = get("PROWLER_CREDENTIAL_TTL_SECS") {
            creds.ttl_secs = parse_number("PROWLER_CREDENTIAL_TTL_SECS", &v)?;
        }
        if let Some(v) = get("PROWLER_FALLBACK_TTL_SECS") {
            creds.fallback_ttl_secs = parse_number("PROWLER_FALLBACK_TTL_SECS", &v)?;
        }
        if let Some(v) = get("PROWLER_FETCH_TIMEOUT_SECS") {
            creds.fetch_timeout_secs = parse_number("PROWLER_FETCH_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("PROWLER_REQUIRED_KEYS") {
            creds.required_keys = split_list(&v);
        }
        if let Some(v) = get("PROWLER_MIN_REQUIRED") {
            creds.min_required = parse_number("PROWLER_MIN_REQUIRED", &v)?;
        }
        if let Some(v) = get("PROWLER_FAILURE_ALERT_THRESHOLD") {
            creds.failure_alert_threshold = parse_number("PROWLER_FAILURE_ALERT_THRESHOLD", &v)?;
        }
        // Static cookie header for the default session domain.
        if let Some(v) = get("PROWLER_COOKIES") {
            creds
                .static_cookies
                .insert(self.session.domain.clone(), v.trim().to_string());
        }

        if let Some(v) = get("PROWLER_APP_KEY") {
            self.search.call.app_key = v;
        }
        if let Some(v) = get("PROWLER_GATEWAY_URL") {
            self.search.gateway_url = v;
        }
        if let Some(v) = get("PROWLER_PROXY_URL") {
            self.search.proxy_url = Some(v);
        }

        if let Some(v) = get("PROWLER_POLL_INTERVAL_SECS") {
            self.session.poll_interval_secs = parse_number("PROWLER_POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("PROWLER_SHUTDOWN_TIMEOUT_SECS") {
            self.supervisor.shutdown_timeout_secs =
                parse_number("PROWLER_SHUTDOWN_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("PROWLER_HEALTH_INTERVAL_SECS") {
            self.supervisor.health_interval_secs =
                parse_number("PROWLER_HEALTH_INTERVAL_SECS", &v)?;
        }

        if let Some(program) = get("PROWLER_FETCH_COMMAND") {
            let args = get("PROWLER_FETCH_ARGS")
                .map(|v| v.split_whitespace().map(String::from).collect())
                .unwrap_or_default();
            self.fetcher = Some(FetcherConfig {
                program: PathBuf::from(program),
                args,
            });
        }

        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            let telegram = self.telegram.get_or_insert_with(TelegramConfig::default);
            telegram.bot_token = token;
        }
        if let Some(chat) = get("TELEGRAM_ADMIN_CHAT_ID")
            && let Some(telegram) = self.telegram.as_mut()
        {
            telegram.admin_chat_id = Some(chat);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let creds = &self.credentials;
        if creds.ttl_secs == 0 {
            return Err(Error::config("credentials.ttl_secs must be positive"));
        }
        if creds.required_keys.is_empty() {
            return Err(Error::config("credentials.required_keys must not be empty"));
        }
        if creds.min_required == 0 || creds.min_required > creds.required_keys.len() {
            return Err(Error::config(format!(
                "credentials.min_required must be between 1 and {}",
                creds.required_keys.len()
            )));
        }
        if creds.token_cookie.is_empty() {
            return Err(Error::config("credentials.token_cookie must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.session.jitter_ratio) {
            return Err(Error::config("session.jitter_ratio must be within 0.0..=1.0"));
        }
        if let Some(telegram) = &self.telegram
            && telegram.bot_token.is_empty()
        {
            return Err(Error::config("telegram.bot_token must not be empty"));
        }
        for session in &self.sessions {
            if session.user_id.trim().is_empty() {
                return Err(Error::config("sessions[].user_id must not be empty"));
            }
            if session.queries.iter().all(|q| q.trim().is_empty()) {
                return Err(Error::config(format!(
                    "sessions[{}] has no queries",
                    session.user_id
                )));
            }
        }
        Ok(())
    }

    /// Durable credential store path.
    pub fn store_path(&self) -> PathBuf {
        if self.credentials.store_file.is_absolute() {
            self.credentials.store_file.clone()
        } else {
            self.data_dir.join(&self.credentials.store_file)
        }
    }

    pub fn cache_config(&self) -> CredentialCacheConfig {
        let creds = &self.credentials;
        CredentialCacheConfig {
            ttl: Duration::from_secs(creds.ttl_secs),
            fallback_ttl: Duration::from_secs(creds.fallback_ttl_secs),
            fetch_timeout: Duration::from_secs(creds.fetch_timeout_secs),
            failure_alert_threshold: creds.failure_alert_threshold,
        }
    }

    pub fn validator(&self) -> CredentialValidator {
        let creds = &self.credentials;
        CredentialValidator::new(
            creds.required_keys.clone(),
            creds.min_required,
            creds
                .placeholders
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.search.request_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("{key} must be a number, got {value:?}")))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
