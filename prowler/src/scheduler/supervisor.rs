//! Supervisor for session lifecycle.
//!
//! The `SessionSupervisor` is responsible for:
//! - Starting workers and parking their sessions when they stop
//! - Routing commands to the owning worker (or the parked session)
//! - Aggregating status across sessions and the credential cache
//! - A periodic health monitor
//! - Coordinating graceful shutdown

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::handle::SessionHandle;
use super::messages::SessionMessage;
use super::registry::{RunningSession, SessionRegistry};
use super::status::{HealthReport, ShutdownReport, SupervisorStatus};
use super::worker::{SessionWorker, WorkerDeps};
use crate::session::{SessionError, SessionSettings, SessionSnapshot, SessionStatus, UserSession};

/// Configuration for the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How long `stop` waits for a worker to exit.
    pub stop_timeout_secs: u64,
    /// How long `shutdown` waits before aborting workers.
    pub shutdown_timeout_secs: u64,
    /// Health monitor period.
    pub health_interval_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 10,
            shutdown_timeout_secs: 10,
            health_interval_secs: 300,
        }
    }
}

impl SupervisorConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }
}

/// Owns every session and its worker.
pub struct SessionSupervisor {
    deps: WorkerDeps,
    default_settings: Arc<SessionSettings>,
    config: SupervisorConfig,
    registry: Mutex<SessionRegistry>,
    cancellation_token: CancellationToken,
    health_task: Mutex<Option<JoinHandle<()>>>,
    /// Failure count last alerted per domain.
    alerted_failures: Mutex<HashMap<String, u32>>,
}

impl SessionSupervisor {
    pub fn new(
        deps: WorkerDeps,
        default_settings: SessionSettings,
        config: SupervisorConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            deps,
            default_settings: Arc::new(default_settings),
            config,
            registry: Mutex::new(SessionRegistry::new()),
            cancellation_token,
            health_task: Mutex::new(None),
            alerted_failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_settings(&self) -> Arc<SessionSettings> {
        self.default_settings.clone()
    }

    /// Start (or restart) polling for `user_id`.
    ///
    /// A parked session is reused with its counters and history; otherwise a
    /// new one is created. `settings` defaults to the supervisor's.
    #[instrument(skip(self, queries, settings))]
    pub fn start(
        &self,
        user_id: &str,
        queries: Vec<String>,
        settings: Option<Arc<SessionSettings>>,
    ) -> Result<SessionSnapshot, SessionError> {
        if self.cancellation_token.is_cancelled() {
            return Err(SessionError::WorkerUnavailable(user_id.to_string()));
        }
        let settings = settings.unwrap_or_else(|| self.default_settings.clone());

        let mut registry = self.registry.lock();
        if registry.is_running(user_id) {
            return Err(SessionError::AlreadyRunning(user_id.to_string()));
        }
        if registry.is_stopping(user_id) {
            return Err(SessionError::Stopping(user_id.to_string()));
        }
        // A dead worker may still be registered.
        if registry.take_running(user_id).is_some() {
            warn!("Replacing finished worker entry");
        }

        let mut session = match registry.take_parked(user_id) {
            Some(session) => session,
            None => UserSession::new(user_id, queries.clone(), settings.clone())?,
        };

        if let Err(e) = session.update_queries(queries) {
            registry.park(session);
            return Err(e);
        }
        session.set_settings(settings);
        if let Err(e) = session.start() {
            registry.park(session);
            return Err(e);
        }

        let token = self.cancellation_token.child_token();
        let (worker, handle) = SessionWorker::new(session, self.deps.clone(), token);
        let snapshot = handle.snapshot();
        let task = tokio::spawn(worker.run());

        registry.insert_running(user_id.to_string(), RunningSession { handle, task });
        info!(queries = ?snapshot.queries, "Session started");

        Ok(snapshot)
    }

    /// Stop polling for `user_id` and park the session.
    ///
    /// Until the worker hands its session back, the user is in the stopping
    /// set: `start` and commands are rejected with [`SessionError::Stopping`].
    #[instrument(skip(self))]
    pub async fn stop(&self, user_id: &str) -> Result<SessionSnapshot, SessionError> {
        let running = {
            let mut registry = self.registry.lock();
            match registry.begin_stop(user_id) {
                Some(running) => running,
                None if registry.is_stopping(user_id) => {
                    return Err(SessionError::Stopping(user_id.to_string()));
                }
                None if registry.is_parked(user_id) => {
                    return Err(SessionError::InvalidTransition {
                        from: SessionStatus::Stopped,
                        to: SessionStatus::Stopped,
                    });
                }
                None => return Err(SessionError::NotFound(user_id.to_string())),
            }
        };

        let RunningSession { handle, mut task } = running;
        if let Err(e) = handle.send_priority(SessionMessage::Stop).await {
            debug!(error = %e, "Stop message not delivered, relying on cancellation");
        }
        handle.cancel();

        let outcome = tokio::time::timeout(self.config.stop_timeout(), &mut task).await;
        let mut registry = self.registry.lock();
        match outcome {
            Ok(Ok(session)) => {
                let snapshot = session.snapshot();
                registry.finish_stop(user_id, Some(session));
                info!("Session stopped");
                Ok(snapshot)
            }
            Ok(Err(e)) => {
                registry.finish_stop(user_id, None);
                error!(error = %e, "Session worker crashed while stopping");
                Err(SessionError::WorkerUnavailable(user_id.to_string()))
            }
            Err(_) => {
                registry.finish_stop(user_id, None);
                warn!(timeout = ?self.config.stop_timeout(), "Session worker did not stop in time, aborting");
                task.abort();
                Err(SessionError::WorkerUnavailable(user_id.to_string()))
            }
        }
    }

    /// Lookup for commands that only a live worker can serve.
    fn running_handle(&self, user_id: &str, to: SessionStatus) -> Result<SessionHandle, SessionError> {
        let registry = self.registry.lock();
        match registry.handle(user_id) {
            Some(handle) => Ok(handle.clone()),
            None if registry.is_stopping(user_id) => Err(SessionError::Stopping(user_id.to_string())),
            None if registry.is_parked(user_id) => Err(SessionError::InvalidTransition {
                from: SessionStatus::Stopped,
                to,
            }),
            None => Err(SessionError::NotFound(user_id.to_string())),
        }
    }

    #[instrument(skip(self))]
    pub async fn pause(&self, user_id: &str) -> Result<(), SessionError> {
        let handle = self.running_handle(user_id, SessionStatus::Paused)?;
        handle
            .request(|reply| SessionMessage::Pause { reply })
            .await
    }

    #[instrument(skip(self))]
    pub async fn resume(&self, user_id: &str) -> Result<(), SessionError> {
        let handle = self.running_handle(user_id, SessionStatus::Running)?;
        handle
            .request(|reply| SessionMessage::Resume { reply })
            .await
    }

    /// Replace the queries of a running or parked session.
    #[instrument(skip(self, queries))]
    pub async fn update_queries(&self, user_id: &str, queries: Vec<String>) -> Result<(), SessionError> {
        let handle = {
            let mut registry = self.registry.lock();
            match registry.handle(user_id) {
                Some(handle) => handle.clone(),
                None if registry.is_stopping(user_id) => {
                    return Err(SessionError::Stopping(user_id.to_string()));
                }
                None => {
                    return match registry.parked_mut(user_id) {
                        Some(session) => session.update_queries(queries),
                        None => Err(SessionError::NotFound(user_id.to_string())),
                    };
                }
            }
        };

        handle
            .request(|reply| SessionMessage::UpdateQueries { queries, reply })
            .await
    }

    /// Clear counters, history and seen items of a running or parked session.
    #[instrument(skip(self))]
    pub async fn reset(&self, user_id: &str) -> Result<(), SessionError> {
        let handle = {
            let mut registry = self.registry.lock();
            match registry.handle(user_id) {
                Some(handle) => handle.clone(),
                None if registry.is_stopping(user_id) => {
                    return Err(SessionError::Stopping(user_id.to_string()));
                }
                None => {
                    return match registry.parked_mut(user_id) {
                        Some(session) => {
                            session.reset();
                            Ok(())
                        }
                        None => Err(SessionError::NotFound(user_id.to_string())),
                    };
                }
            }
        };

        handle.request(|reply| SessionMessage::Reset { reply }).await
    }

    /// Latest snapshot of one session. Never waits on the worker.
    pub fn snapshot(&self, user_id: &str) -> Result<SessionSnapshot, SessionError> {
        let registry = self.registry.lock();
        if let Some(handle) = registry
            .handle(user_id)
            .or_else(|| registry.stopping_handle(user_id))
        {
            return Ok(handle.snapshot());
        }
        registry
            .parked_sessions()
            .find(|s| s.user_id() == user_id)
            .map(UserSession::snapshot)
            .ok_or_else(|| SessionError::NotFound(user_id.to_string()))
    }

    /// Users with a running or paused worker, sorted.
    pub fn active_users(&self) -> Vec<String> {
        self.registry.lock().running_ids()
    }

    pub fn status(&self) -> SupervisorStatus {
        let sessions = {
            let registry = self.registry.lock();
            registry
                .handles()
                .iter()
                .map(SessionHandle::snapshot)
                .chain(registry.stopping_handles().map(SessionHandle::snapshot))
                .chain(registry.parked_sessions().map(UserSession::snapshot))
                .collect()
        };

        SupervisorStatus::from_parts(
            sessions,
            self.deps.cache.status(),
            self.deps.sink.is_available(),
        )
    }

    /// Operator remediation: force a credential refresh for `domain`.
    pub async fn refresh_credentials(&self, domain: &str, force_interactive: bool) -> bool {
        self.deps.cache.refresh(domain, force_interactive).await
    }

    /// Spawn the periodic health monitor. A second call replaces nothing and
    /// returns false.
    pub fn start_health_monitor(self: &Arc<Self>) -> bool {
        let mut slot = self.health_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return false;
        }

        let supervisor = Arc::clone(self);
        let token = self.cancellation_token.child_token();
        let period = self.config.health_interval();

        *slot = Some(tokio::spawn(async move {
            info!(?period, "Health monitor started");
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        supervisor.health_check().await;
                    }
                }
            }
            debug!("Health monitor stopped");
        }));
        true
    }

    /// One health pass: reap dead workers, log aggregate status, revive the
    /// sink and alert about failing credential domains.
    pub async fn health_check(&self) -> HealthReport {
        let mut report = HealthReport {
            reaped: self.registry.lock().reap_finished(),
            panics: crate::panic_hook::panic_count(),
            ..Default::default()
        };
        for user_id in &report.reaped {
            warn!(%user_id, "Session worker exited unexpectedly");
        }

        let status = self.status();
        info!(
            running = status.running,
            paused = status.paused,
            stopped = status.stopped,
            requests = status.total_requests,
            products_found = status.total_products_found,
            errors = status.total_errors,
            degraded_domains = ?status.degraded_domains(),
            panics = report.panics,
            "Health check"
        );

        let sink = &self.deps.sink;
        report.sink_available = sink.is_available();
        if !report.sink_available {
            warn!(sink = sink.name(), "Notification sink unavailable, reinitializing");
            report.sink_available = sink.reinitialize().await;
            report.sink_recovered = report.sink_available;
            if report.sink_recovered {
                info!(sink = sink.name(), "Notification sink recovered");
            }
        }

        let threshold = self.deps.cache.config().failure_alert_threshold;
        let failing = self.deps.cache.failure_tracker().domains_at_or_above(threshold);

        let to_alert: Vec<_> = {
            let mut alerted = self.alerted_failures.lock();
            alerted.retain(|domain, _| failing.iter().any(|(d, _)| d == domain));
            failing
                .iter()
                .filter(|(domain, info)| {
                    let last = alerted.get(domain.as_str()).copied().unwrap_or(0);
                    if info.count > last {
                        alerted.insert(domain.clone(), info.count);
                        true
                    } else {
                        false
                    }
                })
                .map(|(domain, info)| {
                    format!(
                        "Credentials for {} failed to refresh {} times in a row (since {}).\nLast error: {}",
                        domain,
                        info.count,
                        info.first_failure.format("%Y-%m-%d %H:%M:%S UTC"),
                        info.last_error
                    )
                })
                .collect()
        };
        report.failing_domains = failing.into_iter().map(|(d, _)| d).collect();

        if report.sink_available {
            for message in to_alert {
                match sink.send_admin(&message).await {
                    Ok(()) => report.alerts_sent += 1,
                    Err(e) => warn!(error = %e, "Failed to send admin alert"),
                }
            }
        }

        report
    }

    /// Stop every worker, waiting up to the shutdown timeout before aborting.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!("Initiating supervisor shutdown");

        if let Some(task) = self.health_task.lock().take() {
            task.abort();
        }

        let running = self.registry.lock().drain_running();
        let mut report = ShutdownReport {
            total_workers: running.len(),
            ..Default::default()
        };

        // Phase 1: Stop messages via the priority lane
        for (user_id, running) in &running {
            if let Err(e) = running.handle.send_priority(SessionMessage::Stop).await {
                debug!(%user_id, error = %e, "Failed to send Stop");
                report.stop_message_failures += 1;
            }
        }
        self.cancellation_token.cancel();

        // Phase 2: wait with a shared deadline, abort stragglers
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout();
        let outcomes = join_all(running.into_iter().map(|(user_id, running)| async move {
            let mut task = running.task;
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(session)) => (user_id, Some(session)),
                Ok(Err(e)) => {
                    warn!(%user_id, error = %e, "Worker crashed during shutdown");
                    (user_id, None)
                }
                Err(_) => {
                    warn!(%user_id, "Worker did not stop before deadline, aborting");
                    task.abort();
                    (user_id, None)
                }
            }
        }))
        .await;

        let mut registry = self.registry.lock();
        for (_, session) in outcomes {
            match session {
                Some(session) => {
                    report.graceful_stops += 1;
                    registry.park(session);
                }
                None => report.forced_terminations += 1,
            }
        }

        info!(
            "Shutdown complete: {} total, {} graceful, {} forced, {} message failures",
            report.total_workers,
            report.graceful_stops,
            report.forced_terminations,
            report.stop_message_failures
        );

        report
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
