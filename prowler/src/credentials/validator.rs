//! Credential validation and placeholder synthesis.

use tracing::warn;

use super::error::CredentialError;
use super::types::CredentialSet;

/// Decides whether a candidate set is usable.
///
/// A set is valid when at least `min_required` of `required_keys` are present
/// with non-empty values. Extra keys never matter.
#[derive(Debug, Clone)]
pub struct CredentialValidator {
    required_keys: Vec<String>,
    min_required: usize,
    placeholders: Vec<(String, String)>,
}

impl CredentialValidator {
    /// Create a validator.
    ///
    /// `min_required` is clamped to the number of required keys. Placeholder
    /// entries naming a required key are dropped: a placeholder never stands in
    /// for a required key.
    pub fn new(
        required_keys: Vec<String>,
        min_required: usize,
        placeholders: Vec<(String, String)>,
    ) -> Self {
        let min_required = min_required.min(required_keys.len());
        let placeholders = placeholders
            .into_iter()
            .filter(|(name, _)| {
                let required = required_keys.contains(name);
                if required {
                    warn!(key = %name, "Ignoring placeholder for a required credential key");
                }
                !required
            })
            .collect();

        Self {
            required_keys,
            min_required,
            placeholders,
        }
    }

    pub fn required_keys(&self) -> &[String] {
        &self.required_keys
    }

    pub fn min_required(&self) -> usize {
        self.min_required
    }

    /// Number of required keys present with a non-empty value.
    pub fn present_required(&self, candidate: &CredentialSet) -> usize {
        self.required_keys
            .iter()
            .filter(|key| candidate.has_value(key))
            .count()
    }

    /// Whether the candidate has enough required keys.
    pub fn validate(&self, candidate: &CredentialSet) -> bool {
        self.present_required(candidate) >= self.min_required
    }

    /// Validate, returning a typed error on failure.
    pub fn check(&self, candidate: &CredentialSet) -> Result<(), CredentialError> {
        let present = self.present_required(candidate);
        if present >= self.min_required {
            Ok(())
        } else {
            Err(CredentialError::Validation {
                domain: candidate.domain().to_string(),
                present,
                required: self.min_required,
            })
        }
    }

    /// Validate and fill in missing optional keys with placeholders.
    ///
    /// Returns a new set; the candidate is left untouched.
    pub fn prepare(&self, candidate: &CredentialSet) -> Result<CredentialSet, CredentialError> {
        self.check(candidate)?;

        let missing: Vec<(String, String)> = self
            .placeholders
            .iter()
            .filter(|(name, _)| !candidate.has_value(name))
            .cloned()
            .collect();

        if missing.is_empty() {
            return Ok(candidate.clone());
        }

        warn!(
            domain = %candidate.domain(),
            keys = ?missing.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            "Synthesizing placeholder values for optional credential keys"
        );

        Ok(candidate.with_additional(&missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSource;

    fn validator(keys: &[&str], k: usize) -> CredentialValidator {
        CredentialValidator::new(keys.iter().map(|s| s.to_string()).collect(), k, Vec::new())
    }

    fn set(header: &str) -> CredentialSet {
        CredentialSet::from_cookie_header("d", header, CredentialSource::LiveFetch)
    }

    #[test]
    fn test_two_of_three_is_enough() {
        let v = validator(&["a", "b", "c"], 2);
        assert!(v.validate(&set("a=1; c=3")));
    }

    #[test]
    fn test_one_of_three_fails() {
        let v = validator(&["a", "b", "c"], 2);
        assert!(!v.validate(&set("a=1; x=2; y=3; z=4")));
        let err = v.check(&set("a=1")).unwrap_err();
        assert!(matches!(
            err,
            CredentialError::Validation {
                present: 1,
                required: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_values_do_not_count() {
        let v = validator(&["a", "b", "c"], 2);
        assert!(!v.validate(&set("a=1; b=; c=  ")));
    }

    #[test]
    fn test_min_required_is_clamped() {
        let v = validator(&["a"], 5);
        assert_eq!(v.min_required(), 1);
        assert!(v.validate(&set("a=1")));
    }

    #[test]
    fn test_prepare_adds_placeholders_for_missing_optional_keys() {
        let v = CredentialValidator::new(
            vec!["a".to_string(), "b".to_string()],
            1,
            vec![
                ("opt".to_string(), "placeholder".to_string()),
                ("present".to_string(), "placeholder".to_string()),
            ],
        );

        let candidate = set("a=1; present=real");
        let prepared = v.prepare(&candidate).unwrap();
        assert_eq!(prepared.get("opt"), Some("placeholder"));
        assert_eq!(prepared.get("present"), Some("real"));
        assert_eq!(candidate.get("opt"), None);
    }

    #[test]
    fn test_prepare_replaces_blank_optional_keys() {
        let v = CredentialValidator::new(
            vec!["a".to_string()],
            1,
            vec![("xlly_s".to_string(), "1".to_string())],
        );

        let prepared = v.prepare(&set("a=1; xlly_s=")).unwrap();
        assert_eq!(prepared.get("xlly_s"), Some("1"));
        assert_eq!(prepared.len(), 2);
    }

    #[test]
    fn test_placeholder_never_substitutes_required_key() {
        let v = CredentialValidator::new(
            vec!["a".to_string(), "b".to_string()],
            2,
            vec![("b".to_string(), "placeholder".to_string())],
        );

        assert!(v.prepare(&set("a=1")).is_err());
    }
}
