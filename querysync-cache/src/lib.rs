//! querysync cache - the client-side query cache
//!
//! Fetch units subscribe to keyed entries, mutation units write and then
//! invalidate what their rule declares, and the registry keeps one shared
//! entry per key with exactly one request in flight.

pub mod cache;

pub use cache::{
    CacheStats, Completion, EntrySnapshot, EntryStatus, FetchOptions, FetchState, FetchUnit,
    Freshness, Generation, InvalidationReport, InvalidationRouter, InvalidationRule, KeyPattern,
    MutationUnit, QueryCache, RequestKind, StaleReason, Subscription,
};
