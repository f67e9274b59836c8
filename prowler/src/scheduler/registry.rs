//! Session registry for tracking workers and parked sessions.
//!
//! The `SessionRegistry` provides centralized bookkeeping:
//! - Running workers by user id, each with its handle and join handle
//! - Workers being stopped, until their session is parked
//! - Parked (stopped) sessions kept for the next start
//!
//! The registry itself never awaits; the supervisor takes entries out and
//! awaits them outside its lock.

use std::collections::HashMap;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::handle::SessionHandle;
use crate::session::UserSession;

/// A spawned worker.
pub struct RunningSession {
    pub handle: SessionHandle,
    pub task: JoinHandle<UserSession>,
}

#[derive(Default)]
pub struct SessionRegistry {
    running: HashMap<String, RunningSession>,
    stopping: HashMap<String, SessionHandle>,
    parked: HashMap<String, UserSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live worker exists for `user_id`.
    pub fn is_running(&self, user_id: &str) -> bool {
        self.running
            .get(user_id)
            .is_some_and(|r| !r.task.is_finished())
    }

    pub fn is_stopping(&self, user_id: &str) -> bool {
        self.stopping.contains_key(user_id)
    }

    pub fn stopping_handle(&self, user_id: &str) -> Option<&SessionHandle> {
        self.stopping.get(user_id)
    }

    /// Handles of workers being stopped.
    pub fn stopping_handles(&self) -> impl Iterator<Item = &SessionHandle> {
        self.stopping.values()
    }

    /// Move a running worker into the stopping set, handing back its entry.
    pub fn begin_stop(&mut self, user_id: &str) -> Option<RunningSession> {
        let running = self.running.remove(user_id)?;
        self.stopping
            .insert(user_id.to_string(), running.handle.clone());
        Some(running)
    }

    /// Leave the stopping set, parking the session when the worker returned it.
    pub fn finish_stop(&mut self, user_id: &str, session: Option<UserSession>) {
        self.stopping.remove(user_id);
        if let Some(session) = session {
            self.park(session);
        }
    }

    pub fn is_parked(&self, user_id: &str) -> bool {
        self.parked.contains_key(user_id)
    }

    pub fn handle(&self, user_id: &str) -> Option<&SessionHandle> {
        self.running.get(user_id).map(|r| &r.handle)
    }

    /// Clones of every running handle, sorted by user id.
    pub fn handles(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<_> = self.running.values().map(|r| r.handle.clone()).collect();
        handles.sort_by(|a, b| a.user_id().cmp(b.user_id()));
        handles
    }

    /// Running user ids, sorted.
    pub fn running_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.running.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn parked_sessions(&self) -> impl Iterator<Item = &UserSession> {
        self.parked.values()
    }

    pub fn insert_running(&mut self, user_id: String, running: RunningSession) {
        debug!(%user_id, "Registering session worker");
        self.running.insert(user_id, running);
    }

    pub fn take_running(&mut self, user_id: &str) -> Option<RunningSession> {
        self.running.remove(user_id)
    }

    pub fn drain_running(&mut self) -> Vec<(String, RunningSession)> {
        self.running.drain().collect()
    }

    pub fn park(&mut self, session: UserSession) {
        debug!(user_id = %session.user_id(), "Parking session");
        self.parked.insert(session.user_id().to_string(), session);
    }

    pub fn take_parked(&mut self, user_id: &str) -> Option<UserSession> {
        self.parked.remove(user_id)
    }

    pub fn parked_mut(&mut self, user_id: &str) -> Option<&mut UserSession> {
        self.parked.get_mut(user_id)
    }

    /// Remove workers whose task already ended without being stopped.
    ///
    /// Sessions returned by a clean exit are parked; a panicked worker loses
    /// its session. Returns the affected user ids.
    pub fn reap_finished(&mut self) -> Vec<String> {
        let finished: Vec<String> = self
            .running
            .iter()
            .filter(|(_, r)| r.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for user_id in &finished {
            let Some(running) = self.running.remove(user_id) else {
                continue;
            };
            match running.task.now_or_never() {
                Some(Ok(session)) => self.park(session),
                Some(Err(e)) => error!(%user_id, error = %e, "Session worker crashed"),
                None => {}
            }
        }

        finished
    }
}
