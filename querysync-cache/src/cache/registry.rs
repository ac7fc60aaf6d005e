//! The query cache registry.
//!
//! [`QueryCache`] owns one entry per [`CacheKey`]. Entries are created on
//! first subscription, shared by every subscriber of the same key, and
//! evicted once they have had no subscribers for their grace window.
//!
//! Requests run as tasks on the runtime captured at construction. Each one
//! carries the generation it was issued under; when it completes, the
//! response is applied only if the entry is still waiting for that
//! generation. The state lock is never held across an await.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use querysync_core::{CacheConfig, CacheError, CacheKey, QueryFetcher, SyncResult};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::entry::{CacheEntry, EntrySnapshot, EntryState};
use super::generation::{Generation, RequestKind};
use super::invalidation::{InvalidationReport, InvalidationRule};
use super::lock::mutex_lock;
use super::stats::{CacheStats, StatsCounters};

const LOCK_TARGET: &str = "cache::registry";

/// Shared handle to the cache. Cloning is cheap; all clones see the same
/// entries.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    config: CacheConfig,
    runtime: Handle,
    state: Mutex<CacheState>,
    stats: StatsCounters,
    closed: AtomicBool,
    timer_seq: AtomicU64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
}

/// Data written ahead of a mutation, with what it replaced.
#[derive(Debug)]
pub(crate) struct OptimisticWrite {
    key: CacheKey,
    previous: EntryState,
    generation: Generation,
}

impl QueryCache {
    /// Create a cache on the current tokio runtime.
    pub fn create(config: CacheConfig) -> SyncResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
        Ok(Self::with_runtime(config, runtime))
    }

    /// Create a cache whose requests and timers run on `runtime`.
    pub fn with_runtime(config: CacheConfig, runtime: Handle) -> Self {
        info!(
            stale_time_ms = config.stale_time_ms,
            grace_window_ms = config.grace_window_ms,
            entity_overrides = config.entities.len(),
            "Query cache created"
        );
        Self {
            inner: Arc::new(CacheInner {
                config,
                runtime,
                state: Mutex::new(CacheState::default()),
                stats: StatsCounters::default(),
                closed: AtomicBool::new(false),
                timer_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.is_closed() {
            return Err(CacheError::Closed.into());
        }
        Ok(())
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, CacheState> {
        mutex_lock(&self.inner.state, LOCK_TARGET, op)
    }

    fn entry_mut<'s>(
        &self,
        state: &'s mut CacheState,
        key: &CacheKey,
        now: Instant,
    ) -> &'s mut CacheEntry {
        state.entries.entry(key.clone()).or_insert_with(|| {
            let policy = self.inner.config.policy_for(key.entity_type());
            CacheEntry::new(key.clone(), policy, now)
        })
    }

    // ========================================================================
    // SUBSCRIPTIONS
    // ========================================================================

    /// Subscribe to a key.
    ///
    /// Joins a request already in flight for the key, serves fresh data
    /// without a request, or issues a load. The returned [`Subscription`]
    /// unsubscribes when dropped.
    pub fn subscribe(
        &self,
        key: CacheKey,
        fetcher: Arc<dyn QueryFetcher>,
    ) -> SyncResult<Subscription> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut state = self.lock("subscribe");
        self.evict_if_expired(&mut state, &key, now);

        let entry = self.entry_mut(&mut state, &key, now);
        entry.subscriber_count += 1;
        entry.idle_since = None;
        entry.fetcher = Some(fetcher);

        if let Some(generation) = entry.in_flight.as_ref().map(|r| r.generation) {
            StatsCounters::bump(&self.inner.stats.joined);
            debug!(key = %key, generation = %generation, "Joined in-flight request");
        } else {
            let freshness = entry.freshness(now);
            match freshness.reason() {
                Some(reason) => {
                    StatsCounters::bump(&self.inner.stats.misses);
                    debug!(key = %key, reason = ?reason, "Entry stale on subscribe");
                    self.issue(entry, RequestKind::Load, now);
                }
                None => StatsCounters::bump(&self.inner.stats.hits),
            }
        }

        debug!(key = %key, subscribers = entry.subscriber_count, "Subscribed");
        entry.publish();
        let receiver = entry.watch();
        drop(state);

        Ok(Subscription {
            cache: self.clone(),
            key,
            receiver,
        })
    }

    fn unsubscribe(&self, key: &CacheKey) {
        let now = Instant::now();
        let mut state = self.lock("unsubscribe");
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };

        entry.subscriber_count = entry.subscriber_count.saturating_sub(1);
        if entry.subscriber_count == 0 {
            entry.idle_since = Some(now);
            self.arm_eviction(entry, now);
        }
        debug!(key = %key, subscribers = entry.subscriber_count, "Unsubscribed");
        entry.publish();
    }

    // ========================================================================
    // REQUESTS
    // ========================================================================

    /// Issue a request for `entry`, superseding the one in flight.
    ///
    /// Returns `None` when the entry has no fetcher bound yet.
    fn issue(&self, entry: &mut CacheEntry, kind: RequestKind, now: Instant) -> Option<Generation> {
        let fetcher = entry.fetcher.clone()?;
        let generation = entry.generation.next();
        let key = entry.key.clone();
        let cache = Arc::downgrade(&self.inner);

        let task = self.inner.runtime.spawn(async move {
            let result = fetcher.fetch(&key).await;
            if let Some(inner) = cache.upgrade() {
                QueryCache { inner }.settle(&key, generation, result);
            }
        });

        if let Some(previous) = entry.in_flight.as_ref() {
            debug!(
                key = %entry.key,
                superseded = %previous.generation,
                by = %generation,
                "Superseded in-flight request"
            );
        }
        entry.begin_request(generation, kind, task.abort_handle(), now);
        StatsCounters::bump(&self.inner.stats.requests);
        debug!(key = %entry.key, generation = %generation, kind = %kind, "Issued request");
        Some(generation)
    }

    fn settle(&self, key: &CacheKey, generation: Generation, result: SyncResult<Value>) {
        let now = Instant::now();
        let mut state = self.lock("settle");
        let Some(entry) = state.entries.get_mut(key) else {
            StatsCounters::bump(&self.inner.stats.discarded);
            debug!(key = %key, generation = %generation, "Discarded response for evicted entry");
            return;
        };

        let awaited = entry.in_flight.as_ref().map(|r| r.generation);
        if awaited != Some(generation) {
            StatsCounters::bump(&self.inner.stats.discarded);
            debug!(
                key = %key,
                generation = %generation,
                awaited = ?awaited.map(Generation::value),
                "Discarded superseded response"
            );
            return;
        }

        let elapsed_ms = entry
            .in_flight
            .take()
            .map(|r| now.saturating_duration_since(r.started_at).as_millis() as u64)
            .unwrap_or_default();

        match result {
            Ok(value) => {
                entry.complete_success(value, now);
                debug!(key = %key, generation = %generation, elapsed_ms, "Request succeeded");
            }
            Err(error) if error.is_not_found() => {
                entry.complete_success(Value::Null, now);
                debug!(key = %key, generation = %generation, elapsed_ms, "Request found no record");
            }
            Err(error) => {
                warn!(
                    key = %key,
                    generation = %generation,
                    elapsed_ms,
                    error = %error,
                    kept_data = entry.data.is_some(),
                    "Request failed"
                );
                entry.complete_error(error);
            }
        }

        if entry.subscriber_count == 0 {
            self.arm_eviction(entry, now);
        }
        entry.publish();
    }

    /// Refetch a cached key.
    ///
    /// Joins an in-flight refresh. An in-flight load is superseded, so the
    /// returned generation is always one issued at or after this call.
    /// Returns `None` if the key is not cached or the cache is closed.
    pub fn refetch(&self, key: &CacheKey) -> Option<Generation> {
        if self.is_closed() {
            return None;
        }
        let now = Instant::now();
        let mut state = self.lock("refetch");
        let entry = state.entries.get_mut(key)?;

        let joinable = entry
            .in_flight
            .as_ref()
            .filter(|r| r.kind == RequestKind::Refresh)
            .map(|r| r.generation);
        if let Some(generation) = joinable {
            StatsCounters::bump(&self.inner.stats.joined);
            debug!(key = %key, generation = %generation, "Joined in-flight refresh");
            return Some(generation);
        }

        let generation = self.issue(entry, RequestKind::Refresh, now)?;
        entry.publish();
        Some(generation)
    }

    /// Warm a key without subscribing to it.
    ///
    /// Returns the generation issued, or `None` if the entry was fresh or
    /// already loading.
    pub fn prefetch(
        &self,
        key: CacheKey,
        fetcher: Arc<dyn QueryFetcher>,
    ) -> SyncResult<Option<Generation>> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut state = self.lock("prefetch");
        self.evict_if_expired(&mut state, &key, now);

        let entry = self.entry_mut(&mut state, &key, now);
        entry.fetcher = Some(fetcher);
        if entry.in_flight.is_some() || entry.freshness(now).is_fresh() {
            return Ok(None);
        }

        let generation = self.issue(entry, RequestKind::Load, now);
        entry.publish();
        Ok(generation)
    }

    // ========================================================================
    // INVALIDATION AND WRITES
    // ========================================================================

    /// Mark every entry `rule` selects as stale.
    ///
    /// Entries with subscribers get exactly one new request each, superseding
    /// whatever was in flight. Entries without subscribers drop their
    /// in-flight request and reload on next subscription. The whole pass runs
    /// under one lock.
    pub fn invalidate(&self, rule: &InvalidationRule) -> InvalidationReport {
        let mut report = InvalidationReport {
            rule: rule.name().to_string(),
            ..InvalidationReport::default()
        };
        if self.is_closed() {
            return report;
        }

        let now = Instant::now();
        let mut state = self.lock("invalidate");
        for entry in state.entries.values_mut() {
            if !rule.matches(&entry.key) {
                continue;
            }
            entry.mark_stale();
            report.matched.push(entry.key.clone());

            if entry.subscriber_count > 0 {
                if self.issue(entry, RequestKind::Refresh, now).is_some() {
                    report.refetched.push(entry.key.clone());
                }
            } else if entry.cancel_in_flight().is_some() {
                self.arm_eviction(entry, now);
            }
            entry.publish();
        }
        drop(state);

        report.matched.sort_by_cached_key(ToString::to_string);
        report.refetched.sort_by_cached_key(ToString::to_string);
        StatsCounters::bump(&self.inner.stats.invalidations);
        debug!(
            rule = rule.name(),
            matched = report.matched.len(),
            refetched = report.refetched.len(),
            "Applied invalidation"
        );
        report
    }

    /// Replace the cached data for a key as if a request had returned it.
    pub fn set_data(&self, key: CacheKey, value: Value) -> SyncResult<()> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut state = self.lock("set_data");
        self.evict_if_expired(&mut state, &key, now);

        let created = !state.entries.contains_key(&key);
        let entry = self.entry_mut(&mut state, &key, now);
        entry.write_data(value, now);
        if created {
            self.arm_eviction(entry, now);
        }
        entry.publish();
        debug!(key = %key, "Cache data set");
        Ok(())
    }

    /// Write data ahead of a mutation. Any in-flight request is cancelled so
    /// it cannot overwrite the optimistic value.
    pub(crate) fn apply_optimistic(&self, key: CacheKey, value: Value) -> SyncResult<OptimisticWrite> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut state = self.lock("apply_optimistic");
        self.evict_if_expired(&mut state, &key, now);

        let existed = state.entries.contains_key(&key);
        let entry = self.entry_mut(&mut state, &key, now);
        let previous = if existed {
            entry.save_state()
        } else {
            EntryState::empty()
        };
        entry.cancel_in_flight();
        entry.write_data(value, now);
        if !existed {
            self.arm_eviction(entry, now);
        }
        entry.publish();
        debug!(key = %key, "Applied optimistic write");

        Ok(OptimisticWrite {
            generation: entry.generation,
            key,
            previous,
        })
    }

    /// Undo an optimistic write.
    ///
    /// Skipped if a request was issued for the key since the write; that
    /// request brings authoritative data. Returns whether anything was
    /// restored.
    pub(crate) fn rollback(&self, write: OptimisticWrite) -> bool {
        let now = Instant::now();
        let mut state = self.lock("rollback");
        let Some(entry) = state.entries.get_mut(&write.key) else {
            return false;
        };
        if entry.generation != write.generation {
            debug!(key = %write.key, "Skipped rollback, entry already refetched");
            return false;
        }

        entry.restore_state(write.previous);
        if entry.subscriber_count > 0 && entry.in_flight.is_none() && entry.freshness(now).is_stale()
        {
            self.issue(entry, RequestKind::Refresh, now);
        }
        entry.publish();
        debug!(key = %write.key, "Rolled back optimistic write");
        true
    }

    // ========================================================================
    // EVICTION
    // ========================================================================

    /// Schedule eviction at the end of the entry's grace window.
    ///
    /// An entry has at most one timer. A timer that wakes before the current
    /// deadline sleeps again instead of a new one being spawned.
    fn arm_eviction(&self, entry: &mut CacheEntry, now: Instant) {
        if self.is_closed() {
            return;
        }
        let idle_since = *entry.idle_since.get_or_insert(now);
        if entry.eviction_timer.is_some() {
            return;
        }
        let Some(deadline) = idle_since.checked_add(entry.policy.grace_window) else {
            return;
        };

        let token = self.inner.timer_seq.fetch_add(1, Ordering::Relaxed) + 1;
        entry.eviction_timer = Some(token);
        let key = entry.key.clone();
        let cache = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(async move {
            let mut deadline = deadline;
            loop {
                tokio::time::sleep_until(deadline).await;
                let Some(inner) = cache.upgrade() else {
                    return;
                };
                match (QueryCache { inner }).eviction_due(&key, token) {
                    Some(next) => deadline = next,
                    None => return,
                }
            }
        });
    }

    /// Run a woken eviction timer. Returns the deadline to sleep until next,
    /// or `None` once the timer is done.
    fn eviction_due(&self, key: &CacheKey, token: u64) -> Option<Instant> {
        let now = Instant::now();
        let mut state = self.lock("evict");
        let entry = state.entries.get_mut(key)?;
        if entry.eviction_timer != Some(token) {
            return None;
        }

        if entry.is_evictable(now) {
            state.entries.remove(key);
            StatsCounters::bump(&self.inner.stats.evictions);
            debug!(key = %key, "Evicted idle entry");
            return None;
        }

        let next = entry
            .idle_since
            .filter(|_| entry.subscriber_count == 0 && entry.in_flight.is_none())
            .and_then(|since| since.checked_add(entry.policy.grace_window));
        if next.is_none() {
            entry.eviction_timer = None;
        }
        next
    }

    /// Drop an entry whose grace window lapsed before its timer ran.
    fn evict_if_expired(&self, state: &mut CacheState, key: &CacheKey, now: Instant) {
        if state.entries.get(key).is_some_and(|e| e.is_evictable(now)) {
            state.entries.remove(key);
            StatsCounters::bump(&self.inner.stats.evictions);
            debug!(key = %key, "Evicted idle entry on access");
        }
    }

    /// Evict every entry past its grace window. Returns the number removed.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock("evict_idle");
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_evictable(now));
        let evicted = before - state.entries.len();
        for _ in 0..evicted {
            StatsCounters::bump(&self.inner.stats.evictions);
        }
        if evicted > 0 {
            debug!(evicted, "Evicted idle entries");
        }
        evicted
    }

    // ========================================================================
    // INSPECTION AND TEARDOWN
    // ========================================================================

    pub fn snapshot(&self, key: &CacheKey) -> Option<EntrySnapshot> {
        self.lock("snapshot").entries.get(key).map(CacheEntry::snapshot)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock("contains").entries.contains_key(key)
    }

    /// Every cached key, in no particular order.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.lock("keys").entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock("len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entry_count = self.len();
        self.inner.stats.snapshot(entry_count)
    }

    /// Abort all in-flight requests and drop every entry.
    ///
    /// Later subscriptions fail with [`CacheError::Closed`]; responses still
    /// on the wire are never applied.
    pub fn teardown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.lock("teardown");
        let mut aborted = 0_usize;
        for entry in state.entries.values_mut() {
            if entry.cancel_in_flight().is_some() {
                aborted += 1;
            }
        }
        let dropped = state.entries.len();
        state.entries.clear();
        info!(entries = dropped, aborted, "Query cache torn down");
    }
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// A live interest in one key. Dropping it unsubscribes.
pub struct Subscription {
    cache: QueryCache,
    key: CacheKey,
    receiver: watch::Receiver<EntrySnapshot>,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Latest published state of the entry.
    pub fn snapshot(&self) -> EntrySnapshot {
        self.receiver.borrow().clone()
    }

    pub fn refetch(&self) -> Option<Generation> {
        self.cache.refetch(&self.key)
    }

    /// Wait for the next published change.
    pub async fn changed(&mut self) -> SyncResult<EntrySnapshot> {
        self.receiver
            .changed()
            .await
            .map_err(|_| CacheError::Closed)?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the entry satisfies `predicate`, checking the current state
    /// first.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> SyncResult<EntrySnapshot>
    where
        F: FnMut(&EntrySnapshot) -> bool,
    {
        let snapshot = self
            .receiver
            .wait_for(|s| predicate(s))
            .await
            .map(|s| s.clone())
            .map_err(|_| CacheError::Closed)?;
        Ok(snapshot)
    }

    /// Wait until no request is in flight.
    pub async fn settled(&mut self) -> SyncResult<EntrySnapshot> {
        self.wait_for(|s| !s.is_fetching).await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cache.unsubscribe(&self.key);
    }
}
