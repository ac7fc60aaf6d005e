//! Mutation units.
//!
//! A [`MutationUnit`] wraps one write. On success it applies its declared
//! [`InvalidationRule`] to the cache and reports success; on failure it
//! rolls back any optimistic data, reports the error and returns it.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use querysync_core::{CacheError, CacheKey, Mutator, Notifier, NotifyKind, SyncError, SyncResult};
use serde_json::Value;
use tracing::{debug, warn};

use super::invalidation::InvalidationRule;
use super::registry::QueryCache;

type Precondition<I> = Arc<dyn Fn(&I) -> SyncResult<()> + Send + Sync>;
type OptimisticUpdate<I> = Arc<dyn Fn(&I) -> Vec<(CacheKey, Value)> + Send + Sync>;
type SuccessHook<R> = Arc<dyn Fn(&R) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// When the cache reflects a write.
pub enum Completion<I> {
    /// After the write succeeds, through invalidation.
    Pessimistic,
    /// Immediately, with data computed from the input. Undone on failure.
    Optimistic(OptimisticUpdate<I>),
}

impl<I> Clone for Completion<I> {
    fn clone(&self) -> Self {
        match self {
            Self::Pessimistic => Self::Pessimistic,
            Self::Optimistic(update) => Self::Optimistic(Arc::clone(update)),
        }
    }
}

impl<I> fmt::Debug for Completion<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pessimistic => write!(f, "Pessimistic"),
            Self::Optimistic(_) => write!(f, "Optimistic"),
        }
    }
}

#[derive(Clone)]
struct Notification {
    notifier: Arc<dyn Notifier>,
    success: String,
    error_prefix: String,
}

/// Decrements the pending count however the write ends.
struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Declarative write with cache invalidation.
pub struct MutationUnit<I, R>
where
    I: Send + 'static,
    R: Send + 'static,
{
    cache: QueryCache,
    mutator: Arc<dyn Mutator<I, R>>,
    rule: InvalidationRule,
    completion: Completion<I>,
    precondition: Option<Precondition<I>>,
    notification: Option<Notification>,
    on_success: Option<SuccessHook<R>>,
    on_error: Option<ErrorHook>,
    pending: Arc<AtomicUsize>,
}

impl<I, R> Clone for MutationUnit<I, R>
where
    I: Send + 'static,
    R: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            mutator: Arc::clone(&self.mutator),
            rule: self.rule.clone(),
            completion: self.completion.clone(),
            precondition: self.precondition.clone(),
            notification: self.notification.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<I, R> MutationUnit<I, R>
where
    I: Send + 'static,
    R: Send + 'static,
{
    /// A pessimistic unit applying `rule` on success.
    pub fn new(cache: &QueryCache, rule: InvalidationRule, mutator: Arc<dyn Mutator<I, R>>) -> Self {
        Self {
            cache: cache.clone(),
            mutator,
            rule,
            completion: Completion::Pessimistic,
            precondition: None,
            notification: None,
            on_success: None,
            on_error: None,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Write cache data before the remote call.
    pub fn optimistic<F>(mut self, update: F) -> Self
    where
        F: Fn(&I) -> Vec<(CacheKey, Value)> + Send + Sync + 'static,
    {
        self.completion = Completion::Optimistic(Arc::new(update));
        self
    }

    /// Reject input before anything is sent.
    pub fn precondition<F>(mut self, check: F) -> Self
    where
        F: Fn(&I) -> SyncResult<()> + Send + Sync + 'static,
    {
        self.precondition = Some(Arc::new(check));
        self
    }

    /// Report outcomes to `notifier`. Errors are reported as
    /// `"{error_prefix}: {error}"`.
    pub fn notify(
        mut self,
        notifier: Arc<dyn Notifier>,
        success: impl Into<String>,
        error_prefix: impl Into<String>,
    ) -> Self {
        self.notification = Some(Notification {
            notifier,
            success: success.into(),
            error_prefix: error_prefix.into(),
        });
        self
    }

    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&R) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SyncError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        self.rule.name()
    }

    pub fn rule(&self) -> &InvalidationRule {
        &self.rule
    }

    pub fn completion(&self) -> &Completion<I> {
        &self.completion
    }

    /// A write is in flight.
    pub fn is_pending(&self) -> bool {
        self.pending_count() > 0
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Run the write.
    ///
    /// Invalidation happens only after the remote write succeeds, so a
    /// failed write never triggers refetches.
    pub async fn mutate(&self, input: I) -> SyncResult<R> {
        if let Err(error) = self.check(&input) {
            self.report_failure(&error);
            return Err(error);
        }

        let _pending = PendingGuard::enter(&self.pending);
        let rollbacks = match &self.completion {
            Completion::Pessimistic => Vec::new(),
            Completion::Optimistic(update) => {
                let mut writes = Vec::new();
                for (key, value) in update(&input) {
                    writes.push(self.cache.apply_optimistic(key, value)?);
                }
                writes
            }
        };

        debug!(mutation = self.name(), optimistic = !rollbacks.is_empty(), "Mutation started");
        match self.mutator.write(input).await {
            Ok(output) => {
                let report = self.cache.invalidate(&self.rule);
                debug!(
                    mutation = self.name(),
                    matched = report.matched.len(),
                    refetched = report.refetched.len(),
                    "Mutation succeeded"
                );
                if let Some(hook) = &self.on_success {
                    hook(&output);
                }
                if let Some(notification) = &self.notification {
                    notification
                        .notifier
                        .notify(NotifyKind::Success, &notification.success);
                }
                Ok(output)
            }
            Err(error) => {
                let mut restored = 0_usize;
                for write in rollbacks.into_iter().rev() {
                    if self.cache.rollback(write) {
                        restored += 1;
                    }
                }
                warn!(mutation = self.name(), error = %error, restored, "Mutation failed");
                self.report_failure(&error);
                Err(error)
            }
        }
    }

    fn check(&self, input: &I) -> SyncResult<()> {
        if self.cache.is_closed() {
            return Err(CacheError::Closed.into());
        }
        match &self.precondition {
            Some(check) => check(input),
            None => Ok(()),
        }
    }

    fn report_failure(&self, error: &SyncError) {
        if let Some(hook) = &self.on_error {
            hook(error);
        }
        if let Some(notification) = &self.notification {
            notification.notifier.notify(
                NotifyKind::Error,
                &format!("{}: {}", notification.error_prefix, error),
            );
        }
    }
}

impl<I, R> fmt::Debug for MutationUnit<I, R>
where
    I: Send + 'static,
    R: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationUnit")
            .field("rule", &self.rule)
            .field("completion", &self.completion)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}
