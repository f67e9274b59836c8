//! Fixed gateway call parameters.

use serde::{Deserialize, Serialize};

use crate::signature::SignedRequest;

/// Application key used by the web client.
pub const DEFAULT_APP_KEY: &str = "34839810";

/// Parameters shared by every call to one gateway API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MtopCall {
    /// Gateway API name, e.g. `mtop.taobao.idlemtopsearch.pc.search`.
    pub api: String,
    /// API version.
    pub version: String,
    /// Client SDK version.
    pub jsv: String,
    /// Application key mixed into the signature.
    pub app_key: String,
    /// Response envelope type.
    pub response_type: String,
    pub data_type: String,
    /// Server-side timeout in milliseconds.
    pub timeout_ms: u32,
    pub account_site: String,
    pub session_option: String,
}

impl Default for MtopCall {
    fn default() -> Self {
        Self {
            api: "mtop.taobao.idlemtopsearch.pc.search".to_string(),
            version: "1.0".to_string(),
            jsv: "2.7.2".to_string(),
            app_key: DEFAULT_APP_KEY.to_string(),
            response_type: "originaljson".to_string(),
            data_type: "json".to_string(),
            timeout_ms: 20_000,
            account_site: "xianyu".to_string(),
            session_option: "AutoLoginOnly".to_string(),
        }
    }
}

impl MtopCall {
    /// Sign a payload for this call.
    pub fn sign(
        &self,
        token_cookie: &str,
        payload: impl Into<String>,
        timestamp_ms: i64,
    ) -> SignedRequest {
        SignedRequest::new(token_cookie, timestamp_ms, &self.app_key, payload)
    }

    /// Endpoint path for this call below the gateway base URL.
    pub fn endpoint(&self, base_url: &str) -> String {
        format!(
            "{}/h5/{}/{}/",
            base_url.trim_end_matches('/'),
            self.api,
            self.version
        )
    }

    /// Query parameters of a signed call. The payload travels separately
    /// in the `data` form field, see [`MtopCall::form_pairs`].
    pub fn query_pairs(&self, signed: &SignedRequest) -> Vec<(&'static str, String)> {
        vec![
            ("jsv", self.jsv.clone()),
            ("appKey", signed.app_key.clone()),
            ("t", signed.timestamp_ms.to_string()),
            ("sign", signed.signature.clone()),
            ("v", self.version.clone()),
            ("type", self.response_type.clone()),
            ("accountSite", self.account_site.clone()),
            ("dataType", self.data_type.clone()),
            ("timeout", self.timeout_ms.to_string()),
            ("api", self.api.clone()),
            ("sessionOption", self.session_option.clone()),
        ]
    }

    /// Form body of a signed call.
    pub fn form_pairs(&self, signed: &SignedRequest) -> Vec<(&'static str, String)> {
        vec![("data", signed.payload.clone())]
    }
}
