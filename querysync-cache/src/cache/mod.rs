//! Query cache with request coalescing and declared invalidation.
//!
//! Staleness is explicit here: every entry knows why it needs a request
//! ([`StaleReason`]), every request carries a [`Generation`], and responses
//! for superseded generations are dropped instead of applied.
//!
//! # Example
//!
//! ```ignore
//! let cache = QueryCache::create(CacheConfig::from_env())?;
//!
//! let mut products: FetchUnit<Vec<Product>> =
//!     FetchUnit::new(&cache, make_key("products", [("category", "art")]), fetcher)?;
//! let state = products.settled().await?;
//!
//! let create = MutationUnit::new(
//!     &cache,
//!     InvalidationRule::new("create-product").entity("products"),
//!     mutator,
//! );
//! create.mutate(input).await?;
//! ```

pub mod entry;
pub mod fetch;
pub mod freshness;
pub mod generation;
pub mod invalidation;
mod lock;
pub mod mutation;
pub mod registry;
pub mod stats;

pub use entry::{EntrySnapshot, EntryStatus};
pub use fetch::{FetchOptions, FetchState, FetchUnit};
pub use freshness::{Freshness, StaleReason};
pub use generation::{Generation, RequestKind};
pub use invalidation::{InvalidationReport, InvalidationRouter, InvalidationRule, KeyPattern};
pub use mutation::{Completion, MutationUnit};
pub use registry::{QueryCache, Subscription};
pub use stats::CacheStats;
