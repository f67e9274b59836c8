use std::time::Duration;

use thiserror::Error;

/// Failures reported by the remote search API or the transport below it.
#[derive(Debug, Error)]
pub enum RemoteApiError {
    #[error("Rate limited by remote API (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Forbidden by remote API: {0}")]
    Forbidden(String),

    #[error("Unauthorized by remote API: {0}")]
    Unauthorized(String),

    #[error("Signing token expired: {0}")]
    TokenExpired(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Non-success envelope that is not a credential problem.
    #[error("Remote API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl RemoteApiError {
    /// Whether the failure suggests the credential set is stale or burned.
    pub fn is_credential_signal(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Forbidden(_) | Self::Unauthorized(_) | Self::TokenExpired(_)
        )
    }

    /// Map a non-success HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let body = body.into();
        match status {
            401 => Self::Unauthorized(body),
            403 => Self::Forbidden(body),
            429 => Self::RateLimited { retry_after },
            _ => Self::Http { status, body },
        }
    }

    /// Map an envelope `ret` entry such as `FAIL_SYS_TOKEN_EXOIRED::令牌过期`.
    pub fn from_ret_code(code: &str, message: &str) -> Self {
        match code {
            "FAIL_SYS_TOKEN_EXOIRED" | "FAIL_SYS_TOKEN_EXPIRED" | "FAIL_SYS_TOKEN_EMPTY"
            | "FAIL_SYS_ILLEGAL_ACCESS" => Self::TokenExpired(format!("{}: {}", code, message)),
            "FAIL_SYS_SESSION_EXPIRED" => Self::Unauthorized(format!("{}: {}", code, message)),
            "RGV587_ERROR" | "FAIL_SYS_USER_VALIDATE" => {
                Self::Forbidden(format!("{}: {}", code, message))
            }
            "FAIL_SYS_FLOWLIMIT" | "FAIL_SYS_TRAFFIC_LIMIT" => Self::RateLimited { retry_after: None },
            _ => Self::Api {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}
