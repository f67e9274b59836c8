//! Request signature computation.

use md5::{Digest, Md5};
use serde::Serialize;
use tracing::warn;

/// Separator between the token and the expiry part of the token cookie.
pub const TOKEN_DELIMITER: char = '_';

/// Lower-case hex MD5 digest of `input`.
pub fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compute the request signature.
///
/// The signature is the MD5 digest of `token&timestamp&app_key&payload`.
/// It is a pure function of its inputs.
pub fn sign(token: &str, timestamp_ms: i64, app_key: &str, payload: &str) -> String {
    md5_hex(&format!("{}&{}&{}&{}", token, timestamp_ms, app_key, payload))
}

/// A token derived from the token cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// The value used for signing.
    pub value: &'a str,
    /// Whether the cookie had the expected `token_expiry` shape.
    pub well_formed: bool,
}

/// Derive the signing token from the raw token cookie value.
///
/// The cookie looks like `<token>_<expiry-ms>`; the token is the part before
/// the first delimiter. A value without delimiter is used whole and a warning
/// is logged, signing still proceeds.
pub fn extract_token(raw: &str) -> Token<'_> {
    match raw.split_once(TOKEN_DELIMITER) {
        Some((prefix, _)) => Token {
            value: prefix,
            well_formed: true,
        },
        None => {
            warn!(
                len = raw.len(),
                "Token cookie has no '{}' delimiter, signing with the whole value", TOKEN_DELIMITER
            );
            Token {
                value: raw,
                well_formed: false,
            }
        }
    }
}

/// A fully signed request. Derived data, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedRequest {
    pub token: String,
    pub timestamp_ms: i64,
    pub app_key: String,
    pub payload: String,
    pub signature: String,
}

impl SignedRequest {
    /// Sign `payload` using the token derived from `token_cookie`.
    pub fn new(
        token_cookie: &str,
        timestamp_ms: i64,
        app_key: &str,
        payload: impl Into<String>,
    ) -> Self {
        let payload = payload.into();
        let token = extract_token(token_cookie).value.to_string();
        let signature = sign(&token, timestamp_ms, app_key, &payload);

        Self {
            token,
            timestamp_ms,
            app_key: app_key.to_string(),
            payload,
            signature,
        }
    }
}
