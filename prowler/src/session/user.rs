//! Per-user session state.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::SessionError;
use super::settings::SessionSettings;
use super::status::SessionStatus;
use crate::search::FoundItem;

/// Number of found items kept in the history.
pub const RECENT_PRODUCTS_CAPACITY: usize = 100;

/// Number of item ids remembered for de-duplication.
pub const SEEN_ITEMS_CAPACITY: usize = 5_000;

/// One entry of the found-item history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentProduct {
    pub item: FoundItem,
    pub query: String,
    pub found_at: DateTime<Utc>,
}

/// Insertion-ordered id set that forgets its oldest ids beyond a capacity.
#[derive(Debug, Clone, Default)]
struct SeenItems {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenItems {
    /// Returns true if `id` was not seen before.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > SEEN_ITEMS_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn clear(&mut self) {
        self.ids.clear();
        self.order.clear();
    }
}

/// State of one user's polling session.
///
/// Owned by exactly one worker; everyone else reads [`SessionSnapshot`]s.
#[derive(Debug, Clone)]
pub struct UserSession {
    user_id: String,
    queries: Vec<String>,
    settings: Arc<SessionSettings>,
    status: SessionStatus,
    requests: u64,
    products_found: u64,
    errors: u64,
    recent: VecDeque<RecentProduct>,
    seen: SeenItems,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    last_iteration_at: Option<DateTime<Utc>>,
    last_product_found_at: Option<DateTime<Utc>>,
}

impl UserSession {
    /// Create a stopped session. Fails on an empty query list.
    pub fn new(
        user_id: impl Into<String>,
        queries: Vec<String>,
        settings: Arc<SessionSettings>,
    ) -> Result<Self, SessionError> {
        let user_id = user_id.into();
        let queries = normalize_queries(queries);
        if queries.is_empty() {
            return Err(SessionError::EmptyQueries { user: user_id });
        }

        Ok(Self {
            user_id,
            queries,
            settings,
            status: SessionStatus::Stopped,
            requests: 0,
            products_found: 0,
            errors: 0,
            recent: VecDeque::with_capacity(RECENT_PRODUCTS_CAPACITY),
            seen: SeenItems::default(),
            started_at: None,
            ended_at: None,
            last_iteration_at: None,
            last_product_found_at: None,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    pub fn settings(&self) -> &Arc<SessionSettings> {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: Arc<SessionSettings>) {
        self.settings = settings;
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// True while running or paused.
    pub fn running(&self) -> bool {
        self.status.is_running()
    }

    pub fn paused(&self) -> bool {
        self.status.is_paused()
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn products_found(&self) -> u64 {
        self.products_found
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn last_iteration_at(&self) -> Option<DateTime<Utc>> {
        self.last_iteration_at
    }

    pub fn last_product_found_at(&self) -> Option<DateTime<Utc>> {
        self.last_product_found_at
    }

    /// History, newest first.
    pub fn recent_products(&self) -> impl Iterator<Item = &RecentProduct> {
        self.recent.iter()
    }

    fn transition(&mut self, to: SessionStatus) -> Result<(), SessionError> {
        if !self.status.can_transition_to(to) {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// STOPPED → RUNNING.
    pub fn start(&mut self) -> Result<(), SessionError> {
        self.transition(SessionStatus::Running)?;
        self.started_at = Some(Utc::now());
        self.ended_at = None;
        Ok(())
    }

    /// RUNNING | PAUSED → STOPPED.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        self.transition(SessionStatus::Stopped)?;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// RUNNING → PAUSED.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        self.transition(SessionStatus::Paused)
    }

    /// PAUSED → RUNNING.
    pub fn resume(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::Paused {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to: SessionStatus::Running,
            });
        }
        self.transition(SessionStatus::Running)
    }

    pub fn add_products_found(&mut self, count: u64) {
        if count == 0 {
            return;
        }
        self.products_found += count;
        self.last_product_found_at = Some(Utc::now());
    }

    /// Prepend to the history, evicting the oldest entry beyond capacity.
    pub fn add_recent_product(&mut self, product: RecentProduct) {
        self.recent.push_front(product);
        self.recent.truncate(RECENT_PRODUCTS_CAPACITY);
    }

    /// Remember `item_id`. Returns true the first time an id is seen.
    pub fn mark_seen(&mut self, item_id: &str) -> bool {
        self.seen.insert(item_id)
    }

    /// Replace the query list. An empty list is rejected and the current
    /// queries are kept.
    pub fn update_queries(&mut self, queries: Vec<String>) -> Result<(), SessionError> {
        let queries = normalize_queries(queries);
        if queries.is_empty() {
            return Err(SessionError::EmptyQueries {
                user: self.user_id.clone(),
            });
        }
        self.queries = queries;
        Ok(())
    }

    /// Clear counters, history, timestamps and seen ids. Status is kept.
    pub fn reset(&mut self) {
        self.requests = 0;
        self.products_found = 0;
        self.errors = 0;
        self.recent.clear();
        self.seen.clear();
        self.started_at = self.running().then(Utc::now);
        self.ended_at = None;
        self.last_iteration_at = None;
        self.last_product_found_at = None;
    }

    pub fn record_request(&mut self) {
        self.requests += 1;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn mark_iteration(&mut self) {
        self.last_iteration_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user_id: self.user_id.clone(),
            status: self.status,
            running: self.running(),
            paused: self.paused(),
            queries: self.queries.clone(),
            domain: self.settings.domain.clone(),
            requests: self.requests,
            products_found: self.products_found,
            errors: self.errors,
            seen_items: self.seen.len(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            last_iteration_at: self.last_iteration_at,
            last_product_found_at: self.last_product_found_at,
            recent_products: self.recent.iter().cloned().collect(),
        }
    }
}

fn normalize_queries(queries: Vec<String>) -> Vec<String> {
    queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect()
}

/// Read-only copy of a session for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub user_id: String,
    pub status: SessionStatus,
    pub running: bool,
    pub paused: bool,
    pub queries: Vec<String>,
    pub domain: String,
    pub requests: u64,
    pub products_found: u64,
    pub errors: u64,
    pub seen_items: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_iteration_at: Option<DateTime<Utc>>,
    pub last_product_found_at: Option<DateTime<Utc>>,
    /// Newest first.
    pub recent_products: Vec<RecentProduct>,
}
