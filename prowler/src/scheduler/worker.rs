//! Session worker.
//!
//! One worker task per running session. The worker owns its [`UserSession`]
//! outright, mutates it on every iteration and command, and publishes
//! snapshots through a watch channel. When it exits it hands the session back
//! so the supervisor can park it.

use std::sync::Arc;

use chrono::Utc;
use mtop_sign::MtopCall;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use super::handle::{DEFAULT_MAILBOX_CAPACITY, PRIORITY_MAILBOX_CAPACITY, SessionHandle};
use super::messages::SessionMessage;
use super::schedule::PollSchedule;
use crate::credentials::CredentialCache;
use crate::notification::NotificationSink;
use crate::search::{FoundItem, RemoteApiError, SearchCall, SearchTransport, search_payload};
use crate::session::{RecentProduct, SessionSnapshot, UserSession};

/// After the first failure in a streak, every Nth one is reported to the user.
const ERROR_NOTIFY_EVERY: u32 = 10;

/// Shared services every worker needs.
#[derive(Clone)]
pub struct WorkerDeps {
    pub cache: Arc<CredentialCache>,
    pub transport: Arc<dyn SearchTransport>,
    pub sink: Arc<dyn NotificationSink>,
    /// Signing parameters of the search call.
    pub call: Arc<MtopCall>,
    /// Name of the cookie carrying the signing token.
    pub token_cookie: String,
}

pub struct SessionWorker {
    session: UserSession,
    deps: WorkerDeps,
    mailbox: mpsc::Receiver<SessionMessage>,
    priority_mailbox: mpsc::Receiver<SessionMessage>,
    cancellation_token: CancellationToken,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    schedule: PollSchedule,
    consecutive_errors: u32,
}

impl SessionWorker {
    /// Create a worker and its handle. The session must already be RUNNING.
    pub fn new(
        session: UserSession,
        deps: WorkerDeps,
        cancellation_token: CancellationToken,
    ) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::channel(DEFAULT_MAILBOX_CAPACITY);
        let (priority_tx, priority_rx) = mpsc::channel(PRIORITY_MAILBOX_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

        let settings = session.settings();
        let schedule = PollSchedule::new(settings.poll_interval(), settings.jitter_ratio);

        let handle = SessionHandle::new(
            session.user_id(),
            tx,
            priority_tx,
            cancellation_token.clone(),
            snapshot_rx,
        );

        let worker = Self {
            session,
            deps,
            mailbox: rx,
            priority_mailbox: priority_rx,
            cancellation_token,
            snapshot_tx,
            schedule,
            consecutive_errors: 0,
        };

        (worker, handle)
    }

    /// Run until stopped or cancelled, then return the stopped session.
    #[instrument(skip(self), fields(user = %self.session.user_id()))]
    pub async fn run(mut self) -> UserSession {
        info!(queries = self.session.queries().len(), "Session worker starting");
        self.notify_status(format!("Watching: {}", self.session.queries().join(", ")));

        let mut next_at = Instant::now();

        loop {
            // Drain priority messages before anything else
            if let Ok(msg) = self.priority_mailbox.try_recv() {
                if self.handle_message(msg) {
                    break;
                }
                continue;
            }

            tokio::select! {
                biased;

                Some(msg) = self.priority_mailbox.recv() => {
                    if self.handle_message(msg) {
                        break;
                    }
                }

                _ = self.cancellation_token.cancelled() => {
                    debug!("Session worker cancelled");
                    break;
                }

                Some(msg) = self.mailbox.recv() => {
                    if self.handle_message(msg) {
                        break;
                    }
                }

                _ = tokio::time::sleep_until(next_at) => {
                    if self.session.paused() {
                        debug!("Session paused, skipping iteration");
                    } else {
                        self.run_iteration().await;
                    }
                    next_at = Instant::now() + self.schedule.next_delay();
                }
            }
        }

        if let Err(e) = self.session.stop() {
            warn!(error = %e, "Session was not running at worker exit");
        }
        self.publish();
        self.notify_status("Stopped".to_string());
        info!(
            requests = self.session.requests(),
            products_found = self.session.products_found(),
            errors = self.session.errors(),
            "Session worker stopped"
        );

        self.session
    }

    /// Handle one command. Returns true when the worker should exit.
    fn handle_message(&mut self, msg: SessionMessage) -> bool {
        debug!(message = msg.name(), "Handling session message");

        match msg {
            SessionMessage::Pause { reply } => {
                let result = self.session.pause();
                if result.is_ok() {
                    self.notify_status("Paused".to_string());
                }
                let _ = reply.send(result);
            }
            SessionMessage::Resume { reply } => {
                let result = self.session.resume();
                if result.is_ok() {
                    self.notify_status("Resumed".to_string());
                }
                let _ = reply.send(result);
            }
            SessionMessage::UpdateQueries { queries, reply } => {
                let result = self.session.update_queries(queries);
                if result.is_ok() {
                    info!(queries = ?self.session.queries(), "Queries updated");
                }
                let _ = reply.send(result);
            }
            SessionMessage::Reset { reply } => {
                self.session.reset();
                info!("Session reset");
                let _ = reply.send(Ok(()));
            }
            SessionMessage::Stop => {
                debug!("Stop requested");
                return true;
            }
        }

        self.publish();
        false
    }

    /// One pass over every query.
    async fn run_iteration(&mut self) {
        self.session.mark_iteration();
        let queries = self.session.queries().to_vec();

        for query in queries {
            if self.cancellation_token.is_cancelled() {
                debug!("Cancelled between queries");
                break;
            }

            self.session.record_request();
            let result = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break,
                result = self.search(&query) => result,
            };

            match result {
                Ok(items) => {
                    self.consecutive_errors = 0;
                    self.handle_items(&query, items);
                }
                Err(e) => self.handle_search_error(&query, e),
            }
            self.publish();
        }

        self.publish();
    }

    async fn search(&self, query: &str) -> Result<Vec<FoundItem>, RemoteApiError> {
        let settings = self.session.settings();
        let credentials = self.deps.cache.get(&settings.domain).await;

        let token_cookie = credentials.get(&self.deps.token_cookie).unwrap_or_default();
        let payload = search_payload(query, 1, settings.rows_per_page);
        let signed = self
            .deps
            .call
            .sign(token_cookie, payload, Utc::now().timestamp_millis());

        let call = SearchCall {
            query: query.to_string(),
            signed,
            credentials,
        };
        self.deps.transport.search(&call).await
    }

    fn handle_search_error(&mut self, query: &str, error: RemoteApiError) {
        self.session.record_error();
        self.consecutive_errors += 1;
        warn!(
            %query,
            %error,
            errors = self.session.errors(),
            consecutive = self.consecutive_errors,
            "Search failed"
        );

        let mut refreshing = false;
        if error.is_credential_signal() {
            let domain = &self.session.settings().domain;
            refreshing = self.deps.cache.spawn_refresh(domain);
            if refreshing {
                info!(%domain, "Stale credentials suspected, refresh started");
            }
        }

        if self.consecutive_errors == 1 || self.consecutive_errors % ERROR_NOTIFY_EVERY == 0 {
            let mut message = format!(
                "Search for \"{}\" failed ({} in a row): {}",
                query, self.consecutive_errors, error
            );
            if refreshing {
                message.push_str("\nRefreshing credentials.");
            }
            self.notify_error(message);
        }
    }

    fn handle_items(&mut self, query: &str, items: Vec<FoundItem>) {
        let new_items: Vec<FoundItem> = items
            .into_iter()
            .filter(|item| self.session.mark_seen(&item.id))
            .collect();

        if new_items.is_empty() {
            return;
        }

        let found_at = Utc::now();
        self.session.add_products_found(new_items.len() as u64);
        // Results arrive newest first; insert oldest first so the head stays newest.
        for item in new_items.iter().rev() {
            self.session.add_recent_product(RecentProduct {
                item: item.clone(),
                query: query.to_string(),
                found_at,
            });
        }
        info!(%query, count = new_items.len(), "New items found");

        self.announce(query, &new_items);
    }

    /// Send the found-items summary and the first few items in the background.
    /// Sends stay ordered; a slow sink never holds up the worker.
    fn announce(&self, query: &str, items: &[FoundItem]) {
        let sink = self.deps.sink.clone();
        if !sink.is_available() {
            debug!(sink = sink.name(), "Sink unavailable, skipping announcements");
            return;
        }

        let user = self.session.user_id().to_string();
        let query = query.to_string();
        let count = items.len();
        let settings = self.session.settings();
        let notify_images = settings.notify_images;
        let items: Vec<FoundItem> = items
            .iter()
            .take(settings.max_announcements)
            .cloned()
            .collect();

        tokio::spawn(
            async move {
                if let Err(e) = sink.send_products_found(&user, count, &query).await {
                    warn!(error = %e, "Failed to send found-items notification");
                    return;
                }

                for item in &items {
                    let link = item.url.as_deref().unwrap_or_default();
                    let text = format!("{}\n{}", item.summary(), link);
                    let result = match item.image_url.as_deref() {
                        Some(image) if notify_images => sink.send_image(&user, image, &text).await,
                        _ => sink.send_message(&user, &text).await,
                    };
                    if let Err(e) = result {
                        warn!(error = %e, item = %item.id, "Failed to announce item");
                    }
                }
            }
            .in_current_span(),
        );
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.session.snapshot());
    }

    /// Fire-and-forget status notification; never delays the worker.
    fn notify_status(&self, details: String) {
        let sink = self.deps.sink.clone();
        if !sink.is_available() {
            return;
        }

        let user = self.session.user_id().to_string();
        let status = self.session.status();
        tokio::spawn(
            async move {
                if let Err(e) = sink.send_status(&user, status, &details).await {
                    warn!(error = %e, "Failed to send status notification");
                }
            }
            .in_current_span(),
        );
    }

    /// Fire-and-forget error notification.
    fn notify_error(&self, message: String) {
        let sink = self.deps.sink.clone();
        if !sink.is_available() {
            return;
        }

        let user = self.session.user_id().to_string();
        tokio::spawn(
            async move {
                if let Err(e) = sink.send_error(&user, &message).await {
                    warn!(error = %e, "Failed to send error notification");
                }
            }
            .in_current_span(),
        );
    }
}
