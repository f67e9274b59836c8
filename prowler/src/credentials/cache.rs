//! Per-domain credential cache with single-flight refresh.
//!
//! Every domain has at most one outstanding resolution or refresh. A caller
//! that already has a cached set never waits on another caller's refresh; it
//! is handed the previous set. Callers with nothing cached wait on the refresh
//! lock and pick up whatever the in-flight resolution committed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::error::CredentialError;
use super::fetcher::{CredentialFetcher, FetchMode};
use super::store::CredentialStore;
use super::tracker::RefreshFailureTracker;
use super::types::{CredentialEvent, CredentialSet, CredentialSource};
use super::validator::CredentialValidator;
use crate::notification::NotificationSink;

/// Cache timing settings.
#[derive(Debug, Clone)]
pub struct CredentialCacheConfig {
    /// Lifetime of a set from static configuration or a live fetch.
    pub ttl: Duration,
    /// Lifetime of a degraded set (durable fallback or empty).
    pub fallback_ttl: Duration,
    /// Upper bound on a single fetcher call.
    pub fetch_timeout: Duration,
    /// Consecutive failures after which a domain is reported as degraded.
    pub failure_alert_threshold: u32,
}

impl Default for CredentialCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            fallback_ttl: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(120),
            failure_alert_threshold: 3,
        }
    }
}

struct CacheEntry {
    set: Arc<CredentialSet>,
    cached_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    #[inline]
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.cached_at) < self.ttl
    }
}

/// Outcome of the last explicit refresh for a domain.
#[derive(Debug, Clone, Copy, Default)]
struct RefreshEpoch {
    completed: u64,
    succeeded: bool,
}

/// Point-in-time view of one cached domain.
#[derive(Debug, Clone, Serialize)]
pub struct DomainStatus {
    pub domain: String,
    pub source: CredentialSource,
    pub cookie_count: usize,
    pub obtained_at: chrono::DateTime<Utc>,
    pub age_secs: u64,
    pub fresh: bool,
    pub refreshing: bool,
    pub consecutive_failures: u32,
}

/// Shared credential cache.
pub struct CredentialCache {
    config: CredentialCacheConfig,
    validator: CredentialValidator,
    fetcher: Arc<dyn CredentialFetcher>,
    store: Arc<dyn CredentialStore>,
    /// Statically configured cookie headers, by domain.
    static_cookies: HashMap<String, String>,
    entries: DashMap<String, CacheEntry>,
    /// Per-domain locks to prevent concurrent refreshes
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    refresh_epochs: DashMap<String, RefreshEpoch>,
    failure_tracker: Arc<RefreshFailureTracker>,
    notifier: Option<Arc<dyn NotificationSink>>,
}

impl CredentialCache {
    pub fn new(
        config: CredentialCacheConfig,
        validator: CredentialValidator,
        fetcher: Arc<dyn CredentialFetcher>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            config,
            validator,
            fetcher,
            store,
            static_cookies: HashMap::new(),
            entries: DashMap::new(),
            refresh_locks: DashMap::new(),
            refresh_epochs: DashMap::new(),
            failure_tracker: Arc::new(RefreshFailureTracker::new()),
            notifier: None,
        }
    }

    /// Statically configured cookie headers, tried before the fetcher.
    pub fn with_static_cookies(mut self, cookies: HashMap<String, String>) -> Self {
        self.static_cookies = cookies;
        self
    }

    /// Admin notifications for refresh failures.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &CredentialCacheConfig {
        &self.config
    }

    pub fn validator(&self) -> &CredentialValidator {
        &self.validator
    }

    pub fn failure_tracker(&self) -> Arc<RefreshFailureTracker> {
        self.failure_tracker.clone()
    }

    /// Whether `candidate` has enough required keys.
    pub fn validate(&self, candidate: &CredentialSet) -> bool {
        self.validator.validate(candidate)
    }

    /// Currently cached set, fresh or not, without resolving.
    pub fn peek(&self, domain: &str) -> Option<Arc<CredentialSet>> {
        self.entries.get(domain).map(|e| e.set.clone())
    }

    /// A usable credential set for `domain`.
    ///
    /// Fresh entries are returned without touching the fetcher. Never fails:
    /// the last resort is an empty set.
    #[instrument(skip(self))]
    pub async fn get(&self, domain: &str) -> Arc<CredentialSet> {
        if let Some(set) = self.fresh(domain) {
            return set;
        }

        let lock = self.get_refresh_lock(domain);

        if let Some(prior) = self.peek(domain) {
            // Stale-while-refresh: never queue behind someone else's refresh.
            let Ok(_guard) = lock.try_lock_owned() else {
                debug!(source = %prior.source(), "Refresh in flight, serving previous set");
                return prior;
            };

            if let Some(set) = self.fresh(domain) {
                return set;
            }
            return self.resolve(domain).await;
        }

        let _guard = lock.lock().await;

        // Double-check after acquiring lock (another task may have resolved)
        if let Some(set) = self.fresh(domain) {
            return set;
        }
        self.resolve(domain).await
    }

    /// Force a fetch for `domain`, bypassing the TTL.
    ///
    /// Commits only a set that validates; on any failure the cache is left
    /// untouched and `false` is returned. A call that arrives while another
    /// refresh is running waits for it and reports its outcome.
    #[instrument(skip(self))]
    pub async fn refresh(&self, domain: &str, force_interactive: bool) -> bool {
        let observed = self.epoch(domain).completed;

        let lock = self.get_refresh_lock(domain);
        let _guard = lock.lock().await;

        let current = self.epoch(domain);
        if current.completed != observed {
            debug!(succeeded = current.succeeded, "Joined in-flight refresh");
            return current.succeeded;
        }

        self.refresh_locked(domain, FetchMode::from_force_interactive(force_interactive))
            .await
    }

    /// Start a background refresh unless one is already running.
    ///
    /// Returns whether a refresh was started.
    pub fn spawn_refresh(self: &Arc<Self>, domain: &str) -> bool {
        let lock = self.get_refresh_lock(domain);
        let Ok(guard) = lock.try_lock_owned() else {
            debug!(domain, "Refresh already in flight, not spawning another");
            return false;
        };

        let cache = Arc::clone(self);
        let domain = domain.to_string();
        tokio::spawn(async move {
            let _guard = guard;
            cache.refresh_locked(&domain, FetchMode::Headless).await;
        });
        true
    }

    /// Drop the cached entry so the next `get` re-resolves.
    pub fn invalidate(&self, domain: &str) {
        if self.entries.remove(domain).is_some() {
            info!(domain, "Credential cache entry invalidated");
        }
    }

    /// Snapshot of every cached domain, sorted by domain.
    pub fn status(&self) -> Vec<DomainStatus> {
        let now = Instant::now();
        let mut status: Vec<_> = self
            .entries
            .iter()
            .map(|entry| {
                let domain = entry.key().clone();
                let refreshing = self
                    .refresh_locks
                    .get(&domain)
                    .is_some_and(|lock| lock.try_lock().is_err());
                DomainStatus {
                    source: entry.set.source(),
                    cookie_count: entry.set.len(),
                    obtained_at: entry.set.obtained_at(),
                    age_secs: now.saturating_duration_since(entry.cached_at).as_secs(),
                    fresh: entry.is_fresh(now),
                    refreshing,
                    consecutive_failures: self.failure_tracker.failure_count(&domain),
                    domain,
                }
            })
            .collect();
        status.sort_by(|a, b| a.domain.cmp(&b.domain));
        status
    }

    fn fresh(&self, domain: &str) -> Option<Arc<CredentialSet>> {
        let now = Instant::now();
        self.entries
            .get(domain)
            .filter(|e| e.is_fresh(now))
            .map(|e| e.set.clone())
    }

    fn epoch(&self, domain: &str) -> RefreshEpoch {
        self.refresh_epochs
            .get(domain)
            .map(|e| *e)
            .unwrap_or_default()
    }

    /// Get or create a refresh lock for a domain.
    fn get_refresh_lock(&self, domain: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Walk the source chain. Caller holds the refresh lock.
    async fn resolve(&self, domain: &str) -> Arc<CredentialSet> {
        if let Some(header) = self.static_cookies.get(domain) {
            let candidate = CredentialSet::from_cookie_header(domain, header, CredentialSource::StaticConfig);
            match self.validator.prepare(&candidate) {
                Ok(set) => return self.commit(set).await,
                Err(e) => warn!(error = %e, "Static credentials rejected"),
            }
        }

        match self.fetch_validated(domain, FetchMode::Headless).await {
            Ok(set) => {
                self.record_success(domain);
                return self.commit(set).await;
            }
            Err(e) => self.record_failure(domain, &e),
        }

        match self.store.load(domain).await {
            Ok(Some(candidate)) => {
                let candidate = candidate.with_source(CredentialSource::DurableFallback);
                match self.validator.prepare(&candidate) {
                    Ok(set) => {
                        warn!("Serving credentials from durable fallback");
                        return self.commit(set).await;
                    }
                    Err(e) => warn!(error = %e, "Persisted credentials rejected"),
                }
            }
            Ok(None) => debug!("Nothing persisted"),
            Err(e) => warn!(error = %e, "Failed to load persisted credentials"),
        }

        error!("No usable credentials, serving empty set");
        self.commit(CredentialSet::empty(domain)).await
    }

    /// Explicit refresh. Caller holds the refresh lock.
    async fn refresh_locked(&self, domain: &str, mode: FetchMode) -> bool {
        info!(domain, %mode, "Starting credential refresh");

        let succeeded = match self.fetch_validated(domain, mode).await {
            Ok(set) => {
                self.record_success(domain);
                self.commit(set).await;
                info!(domain, "Credential refresh successful");
                true
            }
            Err(e) => {
                self.record_failure(domain, &e);
                false
            }
        };

        let mut epoch = self.refresh_epochs.entry(domain.to_string()).or_default();
        epoch.completed += 1;
        epoch.succeeded = succeeded;

        succeeded
    }

    async fn fetch_validated(
        &self,
        domain: &str,
        mode: FetchMode,
    ) -> Result<CredentialSet, CredentialError> {
        let fetched = tokio::time::timeout(self.config.fetch_timeout, self.fetcher.fetch(domain, mode))
            .await
            .map_err(|_| CredentialError::FetchTimeout {
                domain: domain.to_string(),
                timeout: self.config.fetch_timeout,
            })??;

        self.validator
            .prepare(&fetched.with_source(CredentialSource::LiveFetch))
    }

    /// Replace the entry for the set's domain and persist non-degraded sets.
    async fn commit(&self, set: CredentialSet) -> Arc<CredentialSet> {
        let source = set.source();
        let ttl = if source.is_degraded() {
            self.config.fallback_ttl
        } else {
            self.config.ttl
        };

        let was_degraded = self
            .entries
            .get(set.domain())
            .map(|e| e.set.source().is_degraded());
        if source.is_degraded() && was_degraded != Some(true) {
            self.maybe_notify(CredentialEvent::Degraded {
                domain: set.domain().to_string(),
                source,
                timestamp: Utc::now(),
            });
        }

        let set = Arc::new(set);
        self.entries.insert(
            set.domain().to_string(),
            CacheEntry {
                set: set.clone(),
                cached_at: Instant::now(),
                ttl,
            },
        );
        debug!(domain = %set.domain(), %source, ttl_secs = ttl.as_secs(), "Credentials committed");

        if !source.is_degraded()
            && let Err(e) = self.store.save(&set).await
        {
            warn!(error = %e, "Failed to persist credentials (non-fatal)");
        }

        set
    }

    fn record_success(&self, domain: &str) {
        let previous = self.failure_tracker.failure_count(domain);
        self.failure_tracker.clear(domain);

        if previous > 0 {
            self.maybe_notify(CredentialEvent::Refreshed {
                domain: domain.to_string(),
                source: CredentialSource::LiveFetch,
                timestamp: Utc::now(),
            });
        }
    }

    fn record_failure(&self, domain: &str, error: &CredentialError) {
        let failure_count = self.failure_tracker.record_failure(domain, &error.to_string());
        warn!(%error, %failure_count, "Credential fetch failed");

        self.maybe_notify(CredentialEvent::RefreshFailed {
            domain: domain.to_string(),
            error: error.to_string(),
            failure_count,
            timestamp: Utc::now(),
        });
    }

    fn maybe_notify(&self, event: CredentialEvent) {
        let Some(notifier) = self.notifier.as_ref().cloned() else {
            return;
        };

        // Basic anti-spam gating for recurring failures.
        if let CredentialEvent::RefreshFailed { failure_count, .. } = &event {
            let should_notify = *failure_count == 1 || *failure_count % 3 == 0;
            if !should_notify {
                return;
            }
        }

        tokio::spawn(async move {
            if let Err(e) = notifier.send_admin(&event.to_message()).await {
                warn!(error = %e, event = event.event_name(), "Failed to dispatch credential notification");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::future::join_all;

    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::notification::{BroadcastSink, NotificationEvent};

    /// Fetcher returning a queue of canned headers, then repeating the last.
    struct ScriptedFetcher {
        headers: Vec<&'static str>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedFetcher {
        fn new(headers: Vec<&'static str>) -> Self {
            Self {
                headers,
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialFetcher for ScriptedFetcher {
        async fn fetch(&self, domain: &str, _mode: FetchMode) -> Result<CredentialSet, CredentialError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.headers.get(n).or(self.headers.last()) {
                Some(&"FAIL") | None => Err(CredentialError::fetch(domain, "blocked")),
                Some(header) => Ok(CredentialSet::from_cookie_header(
                    domain,
                    header,
                    CredentialSource::LiveFetch,
                )),
            }
        }
    }

    fn validator() -> CredentialValidator {
        CredentialValidator::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            2,
            Vec::new(),
        )
    }

    fn cache(fetcher: Arc<ScriptedFetcher>, store: Arc<MemoryCredentialStore>) -> CredentialCache {
        CredentialCache::new(CredentialCacheConfig::default(), validator(), fetcher, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_controls_refetch() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec!["a=A; b=A", "a=B; b=B"]));
        let cache = cache(fetcher.clone(), Arc::new(MemoryCredentialStore::new()));

        let first = cache.get("d.com").await;
        assert_eq!(first.get("a"), Some("A"));
        assert_eq!(fetcher.calls(), 1);

        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        let second = cache.get("d.com").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fetcher.calls(), 1);

        tokio::time::advance(Duration::from_secs(21 * 60)).await;
        let third = cache.get("d.com").await;
        assert_eq!(third.get("a"), Some("B"));
        assert_eq!(fetcher.calls(), 2);

        let fourth = cache.get("d.com").await;
        assert!(Arc::ptr_eq(&third, &fourth));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cold_gets_fetch_once() {
        let fetcher = Arc::new(
            ScriptedFetcher::new(vec!["a=1; b=2"]).with_delay(Duration::from_secs(5)),
        );
        let cache = Arc::new(cache(fetcher.clone(), Arc::new(MemoryCredentialStore::new())));

        let results = join_all((0..8).map(|_| {
            let cache = cache.clone();
            async move { cache.get("d.com").await }
        }))
        .await;

        assert_eq!(fetcher.calls(), 1);
        assert!(results.iter().all(|set| Arc::ptr_eq(set, &results[0])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_readers_get_previous_set_during_refresh() {
        let fetcher = Arc::new(
            ScriptedFetcher::new(vec!["a=A; b=A", "a=B; b=B"]).with_delay(Duration::from_secs(5)),
        );
        let cache = Arc::new(cache(fetcher.clone(), Arc::new(MemoryCredentialStore::new())));
        let first = cache.get("d.com").await;

        tokio::time::advance(Duration::from_secs(31 * 60)).await;

        let results = join_all((0..5).map(|_| {
            let cache = cache.clone();
            async move { cache.get("d.com").await }
        }))
        .await;

        assert_eq!(fetcher.calls(), 2);
        let refreshed = results.iter().filter(|s| s.get("a") == Some("B")).count();
        let stale = results.iter().filter(|s| Arc::ptr_eq(s, &first)).count();
        assert_eq!(refreshed, 1);
        assert_eq!(stale, 4);
    }

    #[tokio::test]
    async fn test_static_config_wins_and_is_persisted() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec!["a=F; b=F"]));
        let store = Arc::new(MemoryCredentialStore::new());
        let cache = cache(fetcher.clone(), store.clone()).with_static_cookies(HashMap::from([(
            "d.com".to_string(),
            "a=S; c=S".to_string(),
        )]));

        let set = cache.get("d.com").await;
        assert_eq!(set.source(), CredentialSource::StaticConfig);
        assert_eq!(fetcher.calls(), 0);
        assert!(store.contains("d.com"));
    }

    #[tokio::test]
    async fn test_invalid_static_falls_through_to_fetcher() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec!["a=F; b=F"]));
        let cache = cache(fetcher.clone(), Arc::new(MemoryCredentialStore::new()))
            .with_static_cookies(HashMap::from([("d.com".to_string(), "a=S".to_string())]));

        let set = cache.get("d.com").await;
        assert_eq!(set.source(), CredentialSource::LiveFetch);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_uses_durable_fallback_without_persisting() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec!["FAIL"]));
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .save(&CredentialSet::from_cookie_header("d.com", "a=P; b=P", CredentialSource::LiveFetch))
            .await
            .unwrap();
        let cache = cache(fetcher.clone(), store);

        let set = cache.get("d.com").await;
        assert_eq!(set.source(), CredentialSource::DurableFallback);
        assert_eq!(set.get("a"), Some("P"));
        assert_eq!(cache.failure_tracker().failure_count("d.com"), 1);
    }

    #[tokio::test]
    async fn test_nothing_available_yields_empty_set() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec!["a=only"]));
        let store = Arc::new(MemoryCredentialStore::new());
        let cache = cache(fetcher, store.clone());

        let set = cache.get("d.com").await;
        assert_eq!(set.source(), CredentialSource::Empty);
        assert!(set.is_empty());
        assert!(!store.contains("d.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_notice_only_on_entering_degraded_state() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec!["FAIL", "FAIL", "a=1; b=2", "FAIL"]));
        let sink = Arc::new(BroadcastSink::new());
        let mut rx = sink.subscribe();
        let cache = cache(fetcher.clone(), Arc::new(MemoryCredentialStore::new()))
            .with_notifier(sink.clone());

        let mut degraded_notices = || {
            let mut count = 0;
            while let Ok(event) = rx.try_recv() {
                if let NotificationEvent::Admin { message, .. } = event
                    && message.contains("degraded credentials")
                {
                    count += 1;
                }
            }
            count
        };

        assert_eq!(cache.get("d.com").await.source(), CredentialSource::Empty);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(degraded_notices(), 1);

        // Still degraded after the entry expires: no repeat.
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("d.com").await.source(), CredentialSource::Empty);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(degraded_notices(), 0);

        // Recovered, then degraded again.
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("d.com").await.source(), CredentialSource::LiveFetch);
        cache.invalidate("d.com");
        assert_eq!(cache.get("d.com").await.source(), CredentialSource::DurableFallback);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(degraded_notices(), 1);
        assert_eq!(fetcher.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_entry_expires_after_fallback_ttl() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec!["FAIL", "a=1; b=2"]));
        let cache = cache(fetcher.clone(), Arc::new(MemoryCredentialStore::new()));

        assert_eq!(cache.get("d.com").await.source(), CredentialSource::Empty);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.get("d.com").await.source(), CredentialSource::Empty);
        assert_eq!(fetcher.calls(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get("d.com").await.source(), CredentialSource::LiveFetch);
        assert_eq!(cache.failure_tracker().failure_count("d.com"), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_cache_untouched() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec!["a=1; b=2", "a=1"]));
        let cache = cache(fetcher.clone(), Arc::new(MemoryCredentialStore::new()));

        let before = cache.get("d.com").await;
        assert!(!cache.refresh("d.com", false).await);

        let after = cache.peek("d.com").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_bypasses_ttl() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec!["a=A; b=A", "a=B; b=B"]));
        let cache = cache(fetcher.clone(), Arc::new(MemoryCredentialStore::new()));

        cache.get("d.com").await;
        assert!(cache.refresh("d.com", true).await);
        assert_eq!(cache.get("d.com").await.get("a"), Some("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_join() {
        let fetcher = Arc::new(
            ScriptedFetcher::new(vec!["a=1; b=2"]).with_delay(Duration::from_secs(5)),
        );
        let cache = Arc::new(cache(fetcher.clone(), Arc::new(MemoryCredentialStore::new())));

        let results = join_all((0..4).map(|_| {
            let cache = cache.clone();
            async move { cache.refresh("d.com", false).await }
        }))
        .await;

        assert!(results.into_iter().all(|ok| ok));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_counts_as_failure() {
        let fetcher = Arc::new(
            ScriptedFetcher::new(vec!["a=1; b=2"]).with_delay(Duration::from_secs(600)),
        );
        let cache = cache(fetcher, Arc::new(MemoryCredentialStore::new()));

        assert!(!cache.refresh("d.com", false).await);
        assert!(cache.peek("d.com").is_none());
        assert_eq!(cache.failure_tracker().failure_count("d.com"), 1);
    }

    #[tokio::test]
    async fn test_spawn_refresh_is_noop_while_refreshing() {
        let fetcher = Arc::new(
            ScriptedFetcher::new(vec!["a=1; b=2"]).with_delay(Duration::from_millis(50)),
        );
        let cache = Arc::new(cache(fetcher.clone(), Arc::new(MemoryCredentialStore::new())));

        assert!(cache.spawn_refresh("d.com"));
        assert!(!cache.spawn_refresh("d.com"));

        // Wait for the background refresh to commit.
        let lock = cache.get_refresh_lock("d.com");
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(lock.lock().await);

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.peek("d.com").unwrap().source(), CredentialSource::LiveFetch);
    }

    #[tokio::test]
    async fn test_invalidate_and_status() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec!["a=1; b=2"]));
        let cache = cache(fetcher.clone(), Arc::new(MemoryCredentialStore::new()));

        cache.get("d.com").await;
        let status = cache.status();
        assert_eq!(status.len(), 1);
        assert!(status[0].fresh);
        assert!(!status[0].refreshing);
        assert_eq!(status[0].source, CredentialSource::LiveFetch);

        cache.invalidate("d.com");
        assert!(cache.status().is_empty());
        cache.get("d.com").await;
        assert_eq!(fetcher.calls(), 2);
    }
}
