//! Core credential types.

use chrono::{DateTime, Utc};
use mtop_sign::cookie::{format_cookie_header, parse_cookie_header};
use serde::{Deserialize, Serialize};

/// Where a credential set came from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CredentialSource {
    /// Cookies configured statically for the domain.
    StaticConfig,
    /// Freshly acquired through the credential fetcher.
    LiveFetch,
    /// Last set persisted to the durable store.
    DurableFallback,
    /// Nothing usable was available.
    Empty,
}

impl CredentialSource {
    /// Degraded sources are served but retried sooner.
    #[inline]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::DurableFallback | Self::Empty)
    }
}

/// An immutable, ordered set of cookies for one authentication domain.
///
/// A refresh always produces a new set; existing sets are never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    domain: String,
    cookies: Vec<(String, String)>,
    obtained_at: DateTime<Utc>,
    source: CredentialSource,
}

impl CredentialSet {
    /// Create a set from ordered `(name, value)` pairs.
    pub fn new(
        domain: impl Into<String>,
        cookies: Vec<(String, String)>,
        source: CredentialSource,
    ) -> Self {
        Self {
            domain: domain.into(),
            cookies,
            obtained_at: Utc::now(),
            source,
        }
    }

    /// Create a set from a `name=value; name=value` header.
    pub fn from_cookie_header(
        domain: impl Into<String>,
        header: &str,
        source: CredentialSource,
    ) -> Self {
        Self::new(domain, parse_cookie_header(header), source)
    }

    /// The last-resort empty set.
    pub fn empty(domain: impl Into<String>) -> Self {
        Self::new(domain, Vec::new(), CredentialSource::Empty)
    }

    /// Override the acquisition time (used when loading persisted sets).
    pub fn with_obtained_at(mut self, obtained_at: DateTime<Utc>) -> Self {
        self.obtained_at = obtained_at;
        self
    }

    /// Copy of this set attributed to another source.
    pub fn with_source(&self, source: CredentialSource) -> Self {
        Self {
            source,
            ..self.clone()
        }
    }

    /// New set with `extra` pairs filled in. Names holding a value are skipped;
    /// blank values are replaced in place, absent names appended.
    pub fn with_additional(&self, extra: &[(String, String)]) -> Self {
        let mut cookies = self.cookies.clone();
        for (name, value) in extra {
            if self.has_value(name) {
                continue;
            }
            match cookies.iter_mut().find(|(k, _)| k == name) {
                Some(entry) => entry.1 = value.clone(),
                None => cookies.push((name.clone(), value.clone())),
            }
        }

        Self {
            cookies,
            ..self.clone()
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn obtained_at(&self) -> DateTime<Utc> {
        self.obtained_at
    }

    /// Value of a cookie, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Whether `name` is present with a non-empty value.
    #[inline]
    pub fn has_value(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Iterate over `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render as a `name=value; name=value` header.
    pub fn cookie_header(&self) -> String {
        format_cookie_header(self.iter())
    }
}

/// Credential event for admin notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialEvent {
    /// A fresh set was committed.
    Refreshed {
        domain: String,
        source: CredentialSource,
        timestamp: DateTime<Utc>,
    },
    /// A refresh attempt failed; the previous set stays in place.
    RefreshFailed {
        domain: String,
        error: String,
        failure_count: u32,
        timestamp: DateTime<Utc>,
    },
    /// The domain is being served a degraded set.
    Degraded {
        domain: String,
        source: CredentialSource,
        timestamp: DateTime<Utc>,
    },
}

impl CredentialEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Refreshed { .. } => "credential_refreshed",
            Self::RefreshFailed { .. } => "credential_refresh_failed",
            Self::Degraded { .. } => "credential_degraded",
        }
    }

    /// Generate a human-readable message for notifications.
    pub fn to_message(&self) -> String {
        match self {
            Self::Refreshed { domain, source, .. } => {
                format!("✅ Credentials for {} refreshed ({})", domain, source)
            }
            Self::RefreshFailed {
                domain,
                error,
                failure_count,
                ..
            } => {
                format!(
                    "⚠️ Credential refresh for {} failed (attempt {})\n\
                     Error: {}\n\
                     Action: run a forced refresh if this persists",
                    domain, failure_count, error
                )
            }
            Self::Degraded { domain, source, .. } => {
                format!(
                    "🚫 {} is running on degraded credentials ({})",
                    domain, source
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cookie_header_keeps_order() {
        let set = CredentialSet::from_cookie_header(
            "goofish.com",
            "t=1; cna=abc; _m_h5_tk=tok_9",
            CredentialSource::LiveFetch,
        );
        let names: Vec<_> = set.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["t", "cna", "_m_h5_tk"]);
        assert_eq!(set.cookie_header(), "t=1; cna=abc; _m_h5_tk=tok_9");
    }

    #[test]
    fn test_has_value_rejects_blank() {
        let set = CredentialSet::from_cookie_header("d", "a=1; b=; c=  ", CredentialSource::LiveFetch);
        assert!(set.has_value("a"));
        assert!(!set.has_value("b"));
        assert!(!set.has_value("c"));
        assert!(!set.has_value("missing"));
    }

    #[test]
    fn test_with_additional_does_not_touch_original() {
        let set = CredentialSet::from_cookie_header("d", "a=1", CredentialSource::LiveFetch);
        let extended = set.with_additional(&[
            ("a".to_string(), "override".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);

        assert_eq!(set.len(), 1);
        assert_eq!(extended.get("a"), Some("1"));
        assert_eq!(extended.get("b"), Some("2"));
    }

    #[test]
    fn test_with_additional_fills_blank_values_in_place() {
        let set = CredentialSet::from_cookie_header("d", "a=1; xlly_s=; t=2", CredentialSource::LiveFetch);
        let extended = set.with_additional(&[("xlly_s".to_string(), "1".to_string())]);

        assert_eq!(extended.len(), 3);
        assert_eq!(extended.cookie_header(), "a=1; xlly_s=1; t=2");
    }

    #[test]
    fn test_source_display() {
        assert_eq!(CredentialSource::DurableFallback.to_string(), "durable_fallback");
        assert!(CredentialSource::Empty.is_degraded());
        assert!(!CredentialSource::LiveFetch.is_degraded());
    }
}
