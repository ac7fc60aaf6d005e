//! Request generations.
//!
//! Every request issued for a key gets the next generation for that key.
//! A response is applied only if its generation is still the one the entry
//! is waiting for; anything older was superseded and is dropped.

use std::fmt;

use serde::Serialize;

/// A point in the request history of one cache entry.
///
/// Generations are monotonically increasing per entry and are compared to
/// decide whether a response is still wanted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Generation(u64);

impl Generation {
    /// No request issued yet.
    pub const ZERO: Generation = Generation(0);

    /// The generation after this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Raw sequence number.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Check if this generation was issued after another.
    pub fn is_newer_than(self, other: Generation) -> bool {
        self.0 > other.0
    }

    /// Sequence gap between two generations.
    pub fn gap(self, other: Generation) -> u64 {
        self.0.abs_diff(other.0)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Why a request was issued.
///
/// A `Load` populates an absent or expired entry and is shared by every
/// subscriber that arrives while it runs. A `Refresh` is an explicit
/// refetch or an invalidation-driven reload; it supersedes an in-flight
/// `Load`, whose response may predate the state the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Load,
    Refresh,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "load"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}
