//! Durable credential persistence.
//!
//! The cache writes every committed set here and reads it back as the last
//! fallback when neither static configuration nor the fetcher can help.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::error::CredentialError;
use super::types::{CredentialSet, CredentialSource};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Most recently persisted set for `domain`, if any.
    async fn load(&self, domain: &str) -> Result<Option<CredentialSet>, CredentialError>;

    /// Persist `set` as the latest for its domain.
    async fn save(&self, set: &CredentialSet) -> Result<(), CredentialError>;
}

/// Rich per-domain dump stored next to the plain cookie string.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialDump {
    last_updated: DateTime<Utc>,
    source: CredentialSource,
    cookies: BTreeMap<String, String>,
    /// Milliseconds since the Unix epoch.
    timestamp: i64,
}

/// JSON-file key/value store.
///
/// Keys are `<domain>.cookies` (a `name=value; …` string) and `<domain>.dump`.
/// Each write replaces the file atomically through a temp file.
pub struct FileCredentialStore {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl FileCredentialStore {
    /// Open (or create) the store at `path`.
    ///
    /// Fails if the file exists but is not a JSON object, or if the location
    /// is not writable.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Map::new(),
            Ok(content) => match serde_json::from_str::<Value>(&content)? {
                Value::Object(map) => map,
                other => {
                    return Err(CredentialError::Store(format!(
                        "{} must contain a JSON object, found {}",
                        path.display(),
                        json_kind(&other)
                    )));
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        let store = Self {
            path,
            entries: Mutex::new(entries),
        };

        // Check writability up front so a broken location fails at startup.
        {
            let entries = store.entries.lock().await;
            store.persist(&entries).await?;
        }

        info!(path = %store.path.display(), "Credential store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cookies_key(domain: &str) -> String {
        format!("{}.cookies", domain)
    }

    fn dump_key(domain: &str) -> String {
        format!("{}.dump", domain)
    }

    async fn persist(&self, entries: &Map<String, Value>) -> Result<(), CredentialError> {
        let json = serde_json::to_string_pretty(entries)?;

        // Write atomically using a temp file
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    #[instrument(skip(self))]
    async fn load(&self, domain: &str) -> Result<Option<CredentialSet>, CredentialError> {
        let entries = self.entries.lock().await;

        let Some(header) = entries
            .get(&Self::cookies_key(domain))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
        else {
            debug!("No persisted credentials");
            return Ok(None);
        };

        let mut set = CredentialSet::from_cookie_header(domain, header, CredentialSource::DurableFallback);

        match entries
            .get(&Self::dump_key(domain))
            .cloned()
            .map(serde_json::from_value::<CredentialDump>)
        {
            Some(Ok(dump)) => set = set.with_obtained_at(dump.last_updated),
            Some(Err(e)) => warn!(error = %e, "Ignoring unreadable credential dump"),
            None => {}
        }

        Ok(Some(set))
    }

    #[instrument(skip(self, set), fields(domain = %set.domain(), source = %set.source()))]
    async fn save(&self, set: &CredentialSet) -> Result<(), CredentialError> {
        let now = Utc::now();
        let dump = CredentialDump {
            last_updated: now,
            source: set.source(),
            cookies: set
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timestamp: now.timestamp_millis(),
        };

        let mut entries = self.entries.lock().await;
        // Memory only changes once the file does.
        let mut updated = entries.clone();
        updated.insert(
            Self::cookies_key(set.domain()),
            Value::String(set.cookie_header()),
        );
        updated.insert(Self::dump_key(set.domain()), serde_json::to_value(&dump)?);
        self.persist(&updated).await?;
        *entries = updated;

        debug!("Credentials persisted");
        Ok(())
    }
}

/// In-memory store, for tests and for running without a data directory.
#[derive(Default)]
pub struct MemoryCredentialStore {
    sets: parking_lot::Mutex<std::collections::HashMap<String, CredentialSet>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a set was persisted for `domain`.
    pub fn contains(&self, domain: &str) -> bool {
        self.sets.lock().contains_key(domain)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, domain: &str) -> Result<Option<CredentialSet>, CredentialError> {
        Ok(self
            .sets
            .lock()
            .get(domain)
            .map(|set| set.with_source(CredentialSource::DurableFallback)))
    }

    async fn save(&self, set: &CredentialSet) -> Result<(), CredentialError> {
        self.sets.lock().insert(set.domain().to_string(), set.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_then_load_returns_durable_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path().join("credentials.json"))
            .await
            .unwrap();

        let set = CredentialSet::from_cookie_header(
            "goofish.com",
            "cna=abc; _m_h5_tk=tok_1",
            CredentialSource::LiveFetch,
        );
        store.save(&set).await.unwrap();

        let loaded = store.load("goofish.com").await.unwrap().unwrap();
        assert_eq!(loaded.source(), CredentialSource::DurableFallback);
        assert_eq!(loaded.cookie_header(), "cna=abc; _m_h5_tk=tok_1");
        assert!(store.load("other.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_layout_uses_domain_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileCredentialStore::open(&path).await.unwrap();

        let set = CredentialSet::from_cookie_header("d.com", "a=1; b=2", CredentialSource::StaticConfig);
        store.save(&set).await.unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["d.com.cookies"], "a=1; b=2");
        assert_eq!(raw["d.com.dump"]["source"], "static_config");
        assert_eq!(raw["d.com.dump"]["cookies"]["b"], "2");
        assert!(raw["d.com.dump"]["timestamp"].is_i64());
        assert!(raw["d.com.dump"]["last_updated"].is_string());
    }

    #[tokio::test]
    async fn test_reopen_reads_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        {
            let store = FileCredentialStore::open(&path).await.unwrap();
            let set = CredentialSet::from_cookie_header("d.com", "a=1", CredentialSource::LiveFetch);
            store.save(&set).await.unwrap();
        }

        let reopened = FileCredentialStore::open(&path).await.unwrap();
        let loaded = reopened.load("d.com").await.unwrap().unwrap();
        assert_eq!(loaded.get("a"), Some("1"));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let store = FileCredentialStore::open(nested.join("credentials.json"))
            .await
            .unwrap();
        std::fs::remove_dir_all(&nested).unwrap();

        let set = CredentialSet::from_cookie_header("d.com", "a=1", CredentialSource::LiveFetch);
        assert!(store.save(&set).await.is_err());
        assert!(store.load("d.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_rejects_non_object_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let result = FileCredentialStore::open(&path).await;
        assert!(matches!(result, Err(CredentialError::Store(_))));
    }
}
