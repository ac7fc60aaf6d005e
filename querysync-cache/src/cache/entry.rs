//! Cache entries and the snapshots published to subscribers.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use querysync_core::{CacheKey, EntityPolicy, QueryFetcher, SyncError};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::freshness::Freshness;
use super::generation::{Generation, RequestKind};

/// Lifecycle status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Created but never requested.
    Idle,
    /// First request in flight, no data yet.
    Loading,
    Success,
    /// Last request failed. Earlier data, if any, is kept.
    Error,
    /// Invalidated while holding data.
    Stale,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

/// Point-in-time view of one entry.
///
/// `data` survives errors and reloads: once a request has succeeded, the
/// last good value stays visible until a newer one replaces it.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub key: CacheKey,
    pub status: EntryStatus,
    pub data: Option<Arc<Value>>,
    pub error: Option<SyncError>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub subscriber_count: usize,
    /// A request is in flight.
    pub is_fetching: bool,
    /// Generation of the most recently issued request.
    pub generation: Generation,
}

impl EntrySnapshot {
    /// First load with nothing to show yet.
    pub fn is_loading(&self) -> bool {
        self.status == EntryStatus::Loading
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

pub(crate) struct InFlightRequest {
    pub(crate) generation: Generation,
    pub(crate) kind: RequestKind,
    pub(crate) started_at: Instant,
    pub(crate) abort: AbortHandle,
}

/// The user-visible part of an entry, saved before an optimistic write.
#[derive(Debug, Clone)]
pub(crate) struct EntryState {
    status: EntryStatus,
    data: Option<Arc<Value>>,
    error: Option<SyncError>,
    last_fetched_at: Option<DateTime<Utc>>,
    fetched_at: Option<Instant>,
    invalidated: bool,
}

pub(crate) struct CacheEntry {
    pub(crate) key: CacheKey,
    pub(crate) status: EntryStatus,
    pub(crate) data: Option<Arc<Value>>,
    pub(crate) error: Option<SyncError>,
    pub(crate) last_fetched_at: Option<DateTime<Utc>>,
    fetched_at: Option<Instant>,
    pub(crate) invalidated: bool,
    pub(crate) subscriber_count: usize,
    /// Last issued generation.
    pub(crate) generation: Generation,
    pub(crate) in_flight: Option<InFlightRequest>,
    pub(crate) fetcher: Option<Arc<dyn QueryFetcher>>,
    pub(crate) policy: EntityPolicy,
    pub(crate) idle_since: Option<Instant>,
    /// Token of the eviction timer watching this entry, if one is armed.
    pub(crate) eviction_timer: Option<u64>,
    notify: watch::Sender<EntrySnapshot>,
}

impl CacheEntry {
    pub(crate) fn new(key: CacheKey, policy: EntityPolicy, now: Instant) -> Self {
        let initial = EntrySnapshot {
            key: key.clone(),
            status: EntryStatus::Idle,
            data: None,
            error: None,
            last_fetched_at: None,
            subscriber_count: 0,
            is_fetching: false,
            generation: Generation::ZERO,
        };
        let (notify, _) = watch::channel(initial);

        Self {
            key,
            status: EntryStatus::Idle,
            data: None,
            error: None,
            last_fetched_at: None,
            fetched_at: None,
            invalidated: false,
            subscriber_count: 0,
            generation: Generation::ZERO,
            in_flight: None,
            fetcher: None,
            policy,
            idle_since: Some(now),
            eviction_timer: None,
            notify,
        }
    }

    pub(crate) fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            key: self.key.clone(),
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            last_fetched_at: self.last_fetched_at,
            subscriber_count: self.subscriber_count,
            is_fetching: self.in_flight.is_some(),
            generation: self.generation,
        }
    }

    /// Push the current state to every watcher.
    pub(crate) fn publish(&self) {
        self.notify.send_replace(self.snapshot());
    }

    pub(crate) fn watch(&self) -> watch::Receiver<EntrySnapshot> {
        self.notify.subscribe()
    }

    pub(crate) fn freshness(&self, now: Instant) -> Freshness {
        Freshness::evaluate(
            self.fetched_at,
            self.invalidated,
            self.status == EntryStatus::Error,
            self.policy.stale_time,
            now,
        )
    }

    /// Record a newly issued request. Replaces (and thereby supersedes) any
    /// request already in flight.
    pub(crate) fn begin_request(
        &mut self,
        generation: Generation,
        kind: RequestKind,
        abort: AbortHandle,
        now: Instant,
    ) {
        self.generation = generation;
        self.in_flight = Some(InFlightRequest {
            generation,
            kind,
            started_at: now,
            abort,
        });
        if self.data.is_none() {
            self.status = EntryStatus::Loading;
            self.error = None;
        }
    }

    pub(crate) fn complete_success(&mut self, value: Value, now: Instant) {
        self.status = EntryStatus::Success;
        self.data = Some(Arc::new(value));
        self.error = None;
        self.last_fetched_at = Some(Utc::now());
        self.fetched_at = Some(now);
        self.invalidated = false;
    }

    /// Keep whatever data the entry had.
    pub(crate) fn complete_error(&mut self, error: SyncError) {
        self.status = EntryStatus::Error;
        self.error = Some(error);
    }

    /// Flag for refetch. Entries holding data become `Stale`.
    pub(crate) fn mark_stale(&mut self) {
        self.invalidated = true;
        if self.data.is_some() {
            self.status = EntryStatus::Stale;
            self.error = None;
        }
    }

    /// Abort the in-flight request, if any, so its response is never applied.
    pub(crate) fn cancel_in_flight(&mut self) -> Option<Generation> {
        let request = self.in_flight.take()?;
        request.abort.abort();
        if self.data.is_none() && self.status == EntryStatus::Loading {
            self.status = EntryStatus::Idle;
        }
        Some(request.generation)
    }

    /// Idle, quiet and past the grace window.
    pub(crate) fn is_evictable(&self, now: Instant) -> bool {
        self.subscriber_count == 0
            && self.in_flight.is_none()
            && self
                .idle_since
                .is_some_and(|since| now.saturating_duration_since(since) >= self.policy.grace_window)
    }

    pub(crate) fn save_state(&self) -> EntryState {
        EntryState {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            last_fetched_at: self.last_fetched_at,
            fetched_at: self.fetched_at,
            invalidated: self.invalidated,
        }
    }

    pub(crate) fn restore_state(&mut self, state: EntryState) {
        let reloading = self.in_flight.is_some() && state.data.is_none();
        self.status = if reloading {
            EntryStatus::Loading
        } else {
            state.status
        };
        self.data = state.data;
        self.error = if reloading { None } else { state.error };
        self.last_fetched_at = state.last_fetched_at;
        self.fetched_at = state.fetched_at;
        self.invalidated = state.invalidated;
    }

    /// Overwrite the data as if a request had just succeeded.
    pub(crate) fn write_data(&mut self, value: Value, now: Instant) {
        self.complete_success(value, now);
    }
}

impl EntryState {
    /// State of an entry that never held anything.
    pub(crate) fn empty() -> Self {
        Self {
            status: EntryStatus::Idle,
            data: None,
            error: None,
            last_fetched_at: None,
            fetched_at: None,
            invalidated: false,
        }
    }
}
