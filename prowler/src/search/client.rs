//! `reqwest` transport for the marketplace gateway.

use std::time::Duration;

use async_trait::async_trait;
use mtop_sign::MtopCall;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, ORIGIN, REFERER, RETRY_AFTER};
use serde_json::Value;
use tracing::{debug, instrument};

use super::error::RemoteApiError;
use super::types::{FoundItem, SearchCall, extract_items};
use super::SearchTransport;

/// Default gateway base URL.
pub const DEFAULT_GATEWAY_URL: &str = "https://h5api.m.goofish.com";

const SITE_ORIGIN: &str = "https://www.goofish.com";

/// Issues signed search calls over HTTP.
pub struct MtopSearchClient {
    client: reqwest::Client,
    call: MtopCall,
    base_url: String,
}

impl MtopSearchClient {
    pub fn new(client: reqwest::Client, call: MtopCall, base_url: impl Into<String>) -> Self {
        Self {
            client,
            call,
            base_url: base_url.into(),
        }
    }

    fn headers(cookie_header: &str) -> Result<HeaderMap, RemoteApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_static(SITE_ORIGIN));
        headers.insert(REFERER, HeaderValue::from_static("https://www.goofish.com/"));
        if !cookie_header.is_empty() {
            let value = HeaderValue::from_str(cookie_header)
                .map_err(|e| RemoteApiError::Decode(format!("cookie header: {}", e)))?;
            headers.insert(COOKIE, value);
        }
        Ok(headers)
    }
}

/// Check the gateway envelope and return its `data` object.
///
/// The envelope carries a `ret` list such as `["SUCCESS::调用成功"]`.
pub fn check_envelope(body: &Value) -> Result<&Value, RemoteApiError> {
    let ret = body
        .get("ret")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteApiError::Decode("response has no ret field".to_string()))?;

    let (code, message) = ret.split_once("::").unwrap_or((ret, ""));
    if code != "SUCCESS" {
        return Err(RemoteApiError::from_ret_code(code, message));
    }

    body.get("data")
        .ok_or_else(|| RemoteApiError::Decode("response has no data field".to_string()))
}

#[async_trait]
impl SearchTransport for MtopSearchClient {
    #[instrument(skip(self, call), fields(query = %call.query))]
    async fn search(&self, call: &SearchCall) -> Result<Vec<FoundItem>, RemoteApiError> {
        let response = self
            .client
            .post(self.call.endpoint(&self.base_url))
            .headers(Self::headers(&call.cookie_header())?)
            .query(&self.call.query_pairs(&call.signed))
            .form(&self.call.form_pairs(&call.signed))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteApiError::from_status(
                status.as_u16(),
                truncate(&body, 200),
                retry_after,
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RemoteApiError::Decode(e.to_string()))?;

        let data = check_envelope(&body)?;
        let items = extract_items(data);
        debug!(items = items.len(), "Search call succeeded");
        Ok(items)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
