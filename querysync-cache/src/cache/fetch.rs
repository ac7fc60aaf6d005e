//! Fetch units.
//!
//! A [`FetchUnit`] is one consumer's view of one key: it subscribes while
//! enabled, decodes the cached JSON into `T` and exposes loading, fetching
//! and error flags. A unit that is disabled, or whose key lacks a required
//! param, issues nothing and reports neither loading nor error.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use querysync_core::{CacheError, CacheKey, QueryFetcher, SyncError, SyncResult};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::entry::{EntrySnapshot, EntryStatus};
use super::generation::Generation;
use super::registry::{QueryCache, Subscription};

/// Options applied when a unit is mounted.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    enabled: bool,
    required: Vec<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            required: Vec::new(),
        }
    }
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Stay disabled until the key carries `param`.
    pub fn require(mut self, param: impl Into<String>) -> Self {
        self.required.push(param.into());
        self
    }
}

/// What a consumer sees.
#[derive(Debug, Clone)]
pub struct FetchState<T> {
    pub data: Option<T>,
    pub error: Option<SyncError>,
    pub status: EntryStatus,
    /// First load, nothing to show yet.
    pub is_loading: bool,
    /// Any request in flight, including background refreshes.
    pub is_fetching: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl<T> FetchState<T> {
    /// State of a unit that is not subscribed.
    pub fn disabled() -> Self {
        Self {
            data: None,
            error: None,
            status: EntryStatus::Idle,
            is_loading: false,
            is_fetching: false,
            last_fetched_at: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == EntryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl<T: DeserializeOwned> FetchState<T> {
    fn from_snapshot(snapshot: &EntrySnapshot) -> Self {
        let mut error = snapshot.error.clone();
        let data = match snapshot.data.as_deref() {
            Some(value) => match serde_json::from_value::<T>(value.clone()) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    error = Some(
                        CacheError::Decode {
                            entity_type: snapshot.key.entity_type().to_string(),
                            reason: e.to_string(),
                        }
                        .into(),
                    );
                    None
                }
            },
            None => None,
        };

        Self {
            data,
            error,
            status: snapshot.status,
            is_loading: snapshot.is_loading(),
            is_fetching: snapshot.is_fetching,
            last_fetched_at: snapshot.last_fetched_at,
        }
    }
}

/// Declarative read of one key.
pub struct FetchUnit<T> {
    cache: QueryCache,
    key: CacheKey,
    fetcher: Arc<dyn QueryFetcher>,
    options: FetchOptions,
    subscription: Option<Subscription>,
    _data: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> FetchUnit<T> {
    /// Mount an always-enabled unit.
    pub fn new(cache: &QueryCache, key: CacheKey, fetcher: Arc<dyn QueryFetcher>) -> SyncResult<Self> {
        Self::mount(cache, key, fetcher, FetchOptions::default())
    }

    /// Mount a unit, subscribing if its options allow.
    pub fn mount(
        cache: &QueryCache,
        key: CacheKey,
        fetcher: Arc<dyn QueryFetcher>,
        options: FetchOptions,
    ) -> SyncResult<Self> {
        let mut unit = Self {
            cache: cache.clone(),
            key,
            fetcher,
            options,
            subscription: None,
            _data: PhantomData,
        };
        unit.sync_subscription()?;
        Ok(unit)
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Enabled and every required param present.
    pub fn is_enabled(&self) -> bool {
        self.options.enabled && self.options.required.iter().all(|p| self.key.has_param(p))
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Turn the unit on or off. Turning it off unsubscribes.
    pub fn set_enabled(&mut self, enabled: bool) -> SyncResult<()> {
        self.options.enabled = enabled;
        self.sync_subscription()
    }

    fn sync_subscription(&mut self) -> SyncResult<()> {
        match (self.is_enabled(), self.subscription.is_some()) {
            (true, false) => {
                let subscription = self
                    .cache
                    .subscribe(self.key.clone(), Arc::clone(&self.fetcher))?;
                self.subscription = Some(subscription);
            }
            (false, true) => {
                self.subscription = None;
            }
            (false, false) => {
                debug!(key = %self.key, "Fetch unit disabled");
            }
            (true, true) => {}
        }
        Ok(())
    }

    /// Current state, decoded.
    pub fn state(&self) -> FetchState<T> {
        match &self.subscription {
            Some(subscription) => FetchState::from_snapshot(&subscription.snapshot()),
            None => FetchState::disabled(),
        }
    }

    /// Ask for fresh data. No-op while disabled.
    pub fn refetch(&self) -> Option<Generation> {
        self.subscription.as_ref()?.refetch()
    }

    /// Wait for the next change. A disabled unit returns its state at once.
    pub async fn changed(&mut self) -> SyncResult<FetchState<T>> {
        match self.subscription.as_mut() {
            Some(subscription) => {
                let snapshot = subscription.changed().await?;
                Ok(FetchState::from_snapshot(&snapshot))
            }
            None => Ok(FetchState::disabled()),
        }
    }

    /// Wait until no request is in flight.
    pub async fn settled(&mut self) -> SyncResult<FetchState<T>> {
        match self.subscription.as_mut() {
            Some(subscription) => {
                let snapshot = subscription.settled().await?;
                Ok(FetchState::from_snapshot(&snapshot))
            }
            None => Ok(FetchState::disabled()),
        }
    }
}

impl<T> fmt::Debug for FetchUnit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchUnit")
            .field("key", &self.key)
            .field("options", &self.options)
            .field("subscribed", &self.subscription.is_some())
            .finish_non_exhaustive()
    }
}
