//! Freshness evaluation for cache entries.
//!
//! An entry is fresh when it holds a successful result younger than its
//! entity's stale time and nothing has invalidated it since. Everything
//! else is stale, and the reason is kept so it can be logged.

use std::time::Duration;

use tokio::time::Instant;

/// Why an entry needs a new request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// No request has ever succeeded for this entry.
    NeverFetched,
    /// A mutation declared this entry affected.
    Invalidated,
    /// The last successful result is older than the stale time.
    Expired {
        /// Age of the last successful result.
        age: Duration,
    },
    /// The most recent request failed.
    Errored,
}

/// Freshness of a cache entry at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Cached data can be served without a request.
    Fresh {
        /// Age of the cached data.
        age: Duration,
    },
    /// A request is needed before the data can be trusted.
    Stale(StaleReason),
}

impl Freshness {
    /// Evaluate freshness.
    ///
    /// `fetched_at` is when the last successful result landed.
    pub fn evaluate(
        fetched_at: Option<Instant>,
        invalidated: bool,
        errored: bool,
        stale_time: Duration,
        now: Instant,
    ) -> Self {
        let Some(fetched_at) = fetched_at else {
            return Self::Stale(StaleReason::NeverFetched);
        };
        if invalidated {
            return Self::Stale(StaleReason::Invalidated);
        }
        if errored {
            return Self::Stale(StaleReason::Errored);
        }

        let age = now.saturating_duration_since(fetched_at);
        if age >= stale_time {
            Self::Stale(StaleReason::Expired { age })
        } else {
            Self::Fresh { age }
        }
    }

    /// Returns true if the data can be served as is.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh { .. })
    }

    /// Returns true if a request is needed.
    pub fn is_stale(&self) -> bool {
        !self.is_fresh()
    }

    /// The stale reason, if any.
    pub fn reason(&self) -> Option<StaleReason> {
        match self {
            Self::Fresh { .. } => None,
            Self::Stale(reason) => Some(*reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STALE: Duration = Duration::from_secs(30);

    #[test]
    fn test_never_fetched_is_stale() {
        let now = Instant::now();
        let freshness = Freshness::evaluate(None, false, false, STALE, now);
        assert_eq!(freshness.reason(), Some(StaleReason::NeverFetched));
        assert!(freshness.is_stale());
    }

    #[test]
    fn test_recent_fetch_is_fresh() {
        let fetched = Instant::now();
        let now = fetched + Duration::from_secs(10);
        let freshness = Freshness::evaluate(Some(fetched), false, false, STALE, now);
        assert_eq!(
            freshness,
            Freshness::Fresh {
                age: Duration::from_secs(10)
            }
        );
    }

    #[test]
    fn test_expired_at_stale_time() {
        let fetched = Instant::now();
        let now = fetched + STALE;
        let freshness = Freshness::evaluate(Some(fetched), false, false, STALE, now);
        assert_eq!(
            freshness.reason(),
            Some(StaleReason::Expired { age: STALE })
        );
    }

    #[test]
    fn test_zero_stale_time_is_always_stale() {
        let now = Instant::now();
        let freshness = Freshness::evaluate(Some(now), false, false, Duration::ZERO, now);
        assert!(freshness.is_stale());
    }

    #[test]
    fn test_invalidated_wins_over_age() {
        let now = Instant::now();
        let freshness = Freshness::evaluate(Some(now), true, false, STALE, now);
        assert_eq!(freshness.reason(), Some(StaleReason::Invalidated));
    }

    #[test]
    fn test_errored_is_stale() {
        let now = Instant::now();
        let freshness = Freshness::evaluate(Some(now), false, true, STALE, now);
        assert_eq!(freshness.reason(), Some(StaleReason::Errored));
    }
}
