//! Telegram Bot API sink.
//!
//! Users are addressed by their chat id. Sends go through `sendMessage` or
//! `sendPhoto`; 429 responses are retried after the `parameters.retry_after`
//! the API returns. Availability is checked with `getMe`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{NotificationError, NotificationEvent, NotificationPriority, NotificationSink};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Telegram `sendMessage` text limit (UTF-8 characters).
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Telegram `sendPhoto` caption limit.
const TELEGRAM_CAPTION_LIMIT: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Telegram Bot API token.
    pub bot_token: String,
    /// Chat receiving admin messages.
    pub admin_chat_id: Option<String>,
    /// API base, overridable for local Bot API servers.
    pub api_base: String,
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Events below this priority are dropped.
    pub min_priority: NotificationPriority,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            admin_chat_id: None,
            api_base: "https://api.telegram.org".to_string(),
            request_timeout: Duration::from_secs(30),
            min_priority: NotificationPriority::Low,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

pub struct TelegramSink {
    config: TelegramConfig,
    client: Client,
    available: AtomicBool,
}

impl TelegramSink {
    /// Create the sink. It starts unavailable until [`NotificationSink::reinitialize`]
    /// succeeds.
    pub fn new(config: TelegramConfig) -> Self {
        crate::utils::http_client::install_rustls_provider();
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build Telegram client, using defaults");
                Client::new()
            });

        Self {
            config,
            client,
            available: AtomicBool::new(false),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    fn is_configured(&self) -> bool {
        !self.config.bot_token.is_empty()
    }

    /// Send request with rate limit handling.
    async fn call_with_retry(&self, method: &str, payload: &Value) -> Result<(), NotificationError> {
        let url = self.method_url(method);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = match self.client.post(&url).json(payload).send().await {
                Ok(response) => response,
                Err(e) => {
                    if e.is_connect() {
                        self.available.store(false, Ordering::Relaxed);
                    }
                    return Err(e.into());
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                let body: Value = response.json().await.unwrap_or_default();
                let retry_after = body
                    .pointer("/parameters/retry_after")
                    .and_then(Value::as_u64)
                    .map(Duration::from_secs);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        method,
                        ?retry_after,
                        "Telegram rate limit: max retries ({}) exceeded",
                        MAX_RATE_LIMIT_RETRIES
                    );
                    return Err(NotificationError::RateLimited(attempts));
                }

                let wait_duration = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    method,
                    "Telegram rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait_duration,
                    attempts,
                    MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait_duration).await;
                continue;
            }

            if status.as_u16() == 401 {
                self.available.store(false, Ordering::Relaxed);
            }

            let body = response.text().await.unwrap_or_default();
            warn!(method, %status, %body, "Telegram call failed");
            return Err(NotificationError::Api {
                status: status.as_u16(),
                body,
            });
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, event: NotificationEvent) -> Result<(), NotificationError> {
        let priority = event.priority();
        if priority < self.config.min_priority {
            debug!(
                event_type = event.event_type(),
                %priority,
                min_priority = %self.config.min_priority,
                "Skipping Telegram notification below minimum priority"
            );
            return Ok(());
        }

        if !self.is_available() {
            return Err(NotificationError::Unavailable("telegram".to_string()));
        }

        let chat_id = match event.user() {
            Some(user) => user.to_string(),
            None => self
                .config
                .admin_chat_id
                .clone()
                .ok_or_else(|| NotificationError::NoRecipient("admin".to_string()))?,
        };

        match &event {
            NotificationEvent::Image { url, caption, .. } => {
                let payload = json!({
                    "chat_id": chat_id,
                    "photo": url,
                    "caption": truncate_message(caption, TELEGRAM_CAPTION_LIMIT),
                    "disable_notification": priority == NotificationPriority::Low,
                });
                self.call_with_retry("sendPhoto", &payload).await?;
            }
            _ => {
                let payload = json!({
                    "chat_id": chat_id,
                    "text": truncate_message(&event.text(), TELEGRAM_MESSAGE_LIMIT),
                    "disable_web_page_preview": true,
                    "disable_notification": priority == NotificationPriority::Low,
                });
                self.call_with_retry("sendMessage", &payload).await?;
            }
        }

        debug!(event_type = event.event_type(), "Telegram notification sent");
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.is_configured() && self.available.load(Ordering::Relaxed)
    }

    async fn reinitialize(&self) -> bool {
        if !self.is_configured() {
            return false;
        }

        let ok = match self.client.get(self.method_url("getMe")).send().await {
            Ok(response) if response.status().is_success() => {
                let body: Value = response.json().await.unwrap_or_default();
                body.get("ok").and_then(Value::as_bool).unwrap_or(false)
            }
            Ok(response) => {
                warn!(status = %response.status(), "Telegram getMe rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "Telegram getMe failed");
                false
            }
        };

        let was = self.available.swap(ok, Ordering::Relaxed);
        if ok && !was {
            info!("Telegram sink available");
        }
        ok
    }
}

/// Truncate a message to fit within a Telegram character limit.
fn truncate_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let suffix = "\n\n[truncated]";
    let budget = limit - suffix.len();
    let truncated: String = text.chars().take(budget).collect();
    format!("{truncated}{suffix}")
}
