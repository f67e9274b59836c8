//! Integration tests for the session supervisor.
//!
//! Workers run against an in-process transport and fetcher; the clock is
//! paused so poll intervals elapse instantly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use prowler::credentials::{
    CredentialCache, CredentialCacheConfig, CredentialError, CredentialFetcher, CredentialSet,
    CredentialSource, CredentialValidator, FetchMode, MemoryCredentialStore, UnavailableFetcher,
};
use prowler::notification::{BroadcastSink, NotificationError, NotificationEvent, NotificationSink};
use prowler::scheduler::{SessionSupervisor, SupervisorConfig, WorkerDeps};
use prowler::search::{FoundItem, RemoteApiError, SearchCall, SearchTransport};
use prowler::session::{SessionError, SessionSettings, SessionStatus};
use tokio_util::sync::CancellationToken;

const DOMAIN: &str = "goofish.com";

struct FakeFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl CredentialFetcher for FakeFetcher {
    async fn fetch(&self, domain: &str, _mode: FetchMode) -> Result<CredentialSet, CredentialError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let header = format!("_m_h5_tk=token{n}_1700000000000; cna=c{n}; t=t{n}");
        Ok(CredentialSet::from_cookie_header(domain, &header, CredentialSource::LiveFetch))
    }
}

#[derive(Default)]
struct FakeTransport {
    calls: AtomicUsize,
    expired: AtomicBool,
    failing: AtomicBool,
    items: Mutex<Vec<FoundItem>>,
    cookies_seen: Mutex<Vec<String>>,
}

#[async_trait]
impl SearchTransport for FakeTransport {
    async fn search(&self, call: &SearchCall) -> Result<Vec<FoundItem>, RemoteApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cookies_seen.lock().push(call.cookie_header());
        if self.expired.load(Ordering::SeqCst) {
            return Err(RemoteApiError::TokenExpired(
                "FAIL_SYS_TOKEN_EXOIRED".to_string(),
            ));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteApiError::Http {
                status: 500,
                body: "upstream down".to_string(),
            });
        }
        Ok(self.items.lock().clone())
    }
}

fn item(id: &str) -> FoundItem {
    FoundItem {
        id: id.to_string(),
        title: format!("Item {id}"),
        price: Some("100".to_string()),
        ..Default::default()
    }
}

/// Sink that takes far longer than the stop timeout to deliver anything.
#[derive(Default)]
struct SlowSink {
    started: AtomicUsize,
}

#[async_trait]
impl NotificationSink for SlowSink {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn deliver(&self, _event: NotificationEvent) -> Result<(), NotificationError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

struct Harness {
    supervisor: Arc<SessionSupervisor>,
    transport: Arc<FakeTransport>,
    fetcher: Arc<FakeFetcher>,
    sink: Arc<BroadcastSink>,
}

fn harness_with(fetcher: Arc<dyn CredentialFetcher>, fake_fetcher: Arc<FakeFetcher>) -> Harness {
    let sink = Arc::new(BroadcastSink::new());
    let (supervisor, transport) = build_supervisor(fetcher, sink.clone());
    Harness {
        supervisor,
        transport,
        fetcher: fake_fetcher,
        sink,
    }
}

fn build_supervisor(
    fetcher: Arc<dyn CredentialFetcher>,
    sink: Arc<dyn NotificationSink>,
) -> (Arc<SessionSupervisor>, Arc<FakeTransport>) {
    let validator = CredentialValidator::new(
        vec!["_m_h5_tk".to_string(), "cna".to_string(), "t".to_string()],
        2,
        Vec::new(),
    );
    let cache = Arc::new(CredentialCache::new(
        CredentialCacheConfig::default(),
        validator,
        fetcher,
        Arc::new(MemoryCredentialStore::new()),
    ));

    let transport = Arc::new(FakeTransport::default());
    *transport.items.lock() = vec![item("2"), item("1")];

    let deps = WorkerDeps {
        cache,
        transport: transport.clone(),
        sink,
        call: Arc::new(mtop_sign::MtopCall::default()),
        token_cookie: "_m_h5_tk".to_string(),
    };
    let settings = SessionSettings {
        poll_interval_secs: 5,
        jitter_ratio: 0.0,
        ..Default::default()
    };

    let supervisor = Arc::new(SessionSupervisor::new(
        deps,
        settings,
        SupervisorConfig::default(),
        CancellationToken::new(),
    ));

    (supervisor, transport)
}

fn harness() -> Harness {
    let fetcher = Arc::new(FakeFetcher {
        calls: AtomicUsize::new(0),
    });
    harness_with(fetcher.clone(), fetcher)
}

fn queries(q: &[&str]) -> Vec<String> {
    q.iter().map(|s| s.to_string()).collect()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test(start_paused = true)]
async fn test_start_pause_resume_stop_restart() {
    let h = harness();
    let sup = &h.supervisor;

    let snapshot = sup.start("alice", queries(&["camera"]), None).unwrap();
    assert_eq!(snapshot.status, SessionStatus::Running);
    assert_eq!(sup.active_users(), vec!["alice"]);

    wait_until(|| sup.snapshot("alice").unwrap().products_found == 2).await;
    let snapshot = sup.snapshot("alice").unwrap();
    assert_eq!(snapshot.recent_products[0].item.id, "2");
    assert_eq!(snapshot.recent_products[1].item.id, "1");
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);

    sup.pause("alice").await.unwrap();
    assert!(sup.snapshot("alice").unwrap().paused);
    assert!(matches!(
        sup.pause("alice").await,
        Err(SessionError::InvalidTransition { .. })
    ));

    let calls_while_paused = h.transport.calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.transport.calls.load(Ordering::SeqCst), calls_while_paused);

    sup.resume("alice").await.unwrap();
    assert_eq!(sup.snapshot("alice").unwrap().status, SessionStatus::Running);

    let stopped = sup.stop("alice").await.unwrap();
    assert_eq!(stopped.status, SessionStatus::Stopped);
    assert!(sup.active_users().is_empty());
    assert!(matches!(
        sup.stop("alice").await,
        Err(SessionError::InvalidTransition { .. })
    ));

    // Restart keeps counters and the seen set.
    let requests_before = stopped.requests;
    sup.start("alice", queries(&["camera"]), None).unwrap();
    wait_until(|| sup.snapshot("alice").unwrap().requests > requests_before).await;
    assert_eq!(sup.snapshot("alice").unwrap().products_found, 2);

    sup.stop("alice").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_rejections() {
    let h = harness();
    let sup = &h.supervisor;

    assert!(matches!(
        sup.start("bob", queries(&["", "  "]), None),
        Err(SessionError::EmptyQueries { .. })
    ));

    sup.start("bob", queries(&["lens"]), None).unwrap();
    assert!(matches!(
        sup.start("bob", queries(&["lens"]), None),
        Err(SessionError::AlreadyRunning(_))
    ));

    assert!(matches!(sup.pause("nobody").await, Err(SessionError::NotFound(_))));
    assert!(matches!(sup.stop("nobody").await, Err(SessionError::NotFound(_))));
    assert!(matches!(sup.snapshot("nobody"), Err(SessionError::NotFound(_))));

    sup.stop("bob").await.unwrap();
    assert!(matches!(
        sup.resume("bob").await,
        Err(SessionError::InvalidTransition { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_update_queries_and_reset() {
    let h = harness();
    let sup = &h.supervisor;

    sup.start("carol", queries(&["camera"]), None).unwrap();
    wait_until(|| sup.snapshot("carol").unwrap().products_found == 2).await;

    sup.update_queries("carol", queries(&[" lens ", "tripod"]))
        .await
        .unwrap();
    assert_eq!(sup.snapshot("carol").unwrap().queries, vec!["lens", "tripod"]);
    assert!(matches!(
        sup.update_queries("carol", Vec::new()).await,
        Err(SessionError::EmptyQueries { .. })
    ));

    sup.reset("carol").await.unwrap();
    let snapshot = sup.snapshot("carol").unwrap();
    assert_eq!(snapshot.status, SessionStatus::Running);
    assert_eq!(snapshot.products_found, 0);
    assert!(snapshot.recent_products.is_empty());

    // Parked sessions accept the same commands.
    sup.stop("carol").await.unwrap();
    sup.update_queries("carol", queries(&["flash"])).await.unwrap();
    sup.reset("carol").await.unwrap();
    let snapshot = sup.snapshot("carol").unwrap();
    assert_eq!(snapshot.queries, vec!["flash"]);
    assert_eq!(snapshot.requests, 0);
    assert_eq!(snapshot.status, SessionStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_found_items_are_announced() {
    let h = harness();
    let mut events = h.sink.subscribe();

    h.supervisor
        .start("dave", queries(&["camera"]), None)
        .unwrap();

    let mut found = None;
    for _ in 0..10 {
        match tokio::time::timeout(Duration::from_secs(10), events.recv()).await {
            Ok(Ok(NotificationEvent::ProductsFound { user, count, query, .. })) => {
                found = Some((user, count, query));
                break;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }
    assert_eq!(
        found,
        Some(("dave".to_string(), 2, "camera".to_string()))
    );

    h.supervisor.stop("dave").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_credential_signal_triggers_refresh() {
    let h = harness();
    h.transport.expired.store(true, Ordering::SeqCst);

    h.supervisor
        .start("erin", queries(&["camera"]), None)
        .unwrap();

    wait_until(|| h.fetcher.calls.load(Ordering::SeqCst) >= 2).await;
    wait_until(|| h.supervisor.snapshot("erin").unwrap().errors >= 1).await;

    // The next search carries the refreshed cookies.
    h.transport.expired.store(false, Ordering::SeqCst);
    wait_until(|| {
        h.transport
            .cookies_seen
            .lock()
            .iter()
            .any(|c| c.contains("cna=c2"))
    })
    .await;
    // Workers keep running through errors.
    assert_eq!(
        h.supervisor.snapshot("erin").unwrap().status,
        SessionStatus::Running
    );

    h.supervisor.stop("erin").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_parks_every_session() {
    let h = harness();
    let sup = &h.supervisor;

    for user in ["u1", "u2", "u3"] {
        sup.start(user, queries(&["camera"]), None).unwrap();
    }
    sup.pause("u2").await.unwrap();

    let report = sup.shutdown().await;
    assert_eq!(report.total_workers, 3);
    assert_eq!(report.graceful_stops, 3);
    assert!(report.all_graceful());
    assert!(sup.is_shutting_down());

    let status = sup.status();
    assert_eq!(status.stopped, 3);
    assert_eq!(status.running, 0);
    assert_eq!(
        status.sessions.iter().map(|s| s.user_id.as_str()).collect::<Vec<_>>(),
        vec!["u1", "u2", "u3"]
    );

    assert!(matches!(
        sup.start("u4", queries(&["camera"]), None),
        Err(SessionError::WorkerUnavailable(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_health_check_alerts_once_per_failure_count() {
    let unused = Arc::new(FakeFetcher {
        calls: AtomicUsize::new(0),
    });
    let h = harness_with(Arc::new(UnavailableFetcher), unused);
    let mut events = h.sink.subscribe();

    for _ in 0..3 {
        assert!(!h.supervisor.refresh_credentials(DOMAIN, false).await);
    }

    let report = h.supervisor.health_check().await;
    assert_eq!(report.failing_domains, vec![DOMAIN.to_string()]);
    assert_eq!(report.alerts_sent, 1);
    assert!(report.sink_available);

    let event = events.recv().await.unwrap();
    assert!(matches!(event, NotificationEvent::Admin { ref message, .. } if message.contains(DOMAIN)));

    let report = h.supervisor.health_check().await;
    assert_eq!(report.alerts_sent, 0);

    assert!(!h.supervisor.refresh_credentials(DOMAIN, false).await);
    let report = h.supervisor.health_check().await;
    assert_eq!(report.alerts_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_sink_does_not_hold_up_stop() {
    let fetcher = Arc::new(FakeFetcher {
        calls: AtomicUsize::new(0),
    });
    let sink = Arc::new(SlowSink::default());
    let (sup, _transport) = build_supervisor(fetcher, sink.clone());

    sup.start("gina", queries(&["camera"]), None).unwrap();
    wait_until(|| sup.snapshot("gina").unwrap().products_found == 2).await;
    wait_until(|| sink.started.load(Ordering::SeqCst) >= 2).await;

    // Announcements are still in flight; the worker must answer anyway.
    let stopped = sup.stop("gina").await.unwrap();
    assert_eq!(stopped.status, SessionStatus::Stopped);
    assert_eq!(stopped.products_found, 2);

    let parked = sup.snapshot("gina").unwrap();
    assert_eq!(parked.status, SessionStatus::Stopped);
    assert_eq!(parked.products_found, 2);

    sup.start("gina", queries(&["camera"]), None).unwrap();
    assert_eq!(sup.snapshot("gina").unwrap().products_found, 2);
    sup.stop("gina").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_during_stop_is_rejected() {
    let h = harness();
    let sup = &h.supervisor;

    sup.start("ivan", queries(&["camera"]), None).unwrap();
    wait_until(|| sup.snapshot("ivan").unwrap().products_found == 2).await;

    // The stop is polled first and parks on the worker; the rest run meanwhile.
    let (stopped, started, paused, snapshot, second_stop) = tokio::join!(
        sup.stop("ivan"),
        async { sup.start("ivan", queries(&["lens"]), None) },
        sup.pause("ivan"),
        async { sup.snapshot("ivan") },
        sup.stop("ivan"),
    );

    assert_eq!(stopped.unwrap().products_found, 2);
    assert!(matches!(started, Err(SessionError::Stopping(_))));
    assert!(matches!(paused, Err(SessionError::Stopping(_))));
    assert_eq!(snapshot.unwrap().products_found, 2);
    assert!(matches!(second_stop, Err(SessionError::Stopping(_))));

    // The parked session survived and is reused.
    let parked = sup.snapshot("ivan").unwrap();
    assert_eq!(parked.status, SessionStatus::Stopped);
    assert_eq!(parked.queries, vec!["camera"]);

    let restarted = sup.start("ivan", queries(&["lens"]), None).unwrap();
    assert_eq!(restarted.products_found, 2);
    assert_eq!(restarted.queries, vec!["lens"]);
    sup.stop("ivan").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_search_errors_reach_the_user_gated() {
    let h = harness();
    let sup = &h.supervisor;
    let mut events = h.sink.subscribe();
    h.transport.failing.store(true, Ordering::SeqCst);

    let mut error_events = || {
        let mut messages = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let NotificationEvent::Error { user, message, .. } = event {
                assert_eq!(user, "judy");
                messages.push(message);
            }
        }
        messages
    };

    sup.start("judy", queries(&["camera"]), None).unwrap();
    wait_until(|| sup.snapshot("judy").unwrap().errors >= 3).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let messages = error_events();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("camera"));
    assert!(messages[0].contains("500"));

    // A success ends the streak; the next failure is reported again.
    h.transport.failing.store(false, Ordering::SeqCst);
    wait_until(|| sup.snapshot("judy").unwrap().products_found == 2).await;
    h.transport.failing.store(true, Ordering::SeqCst);
    wait_until(|| sup.snapshot("judy").unwrap().errors >= 4).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(error_events().len(), 1);
    sup.stop("judy").await.unwrap();
}
