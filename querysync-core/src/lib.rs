//! querysync core - keys, errors, configuration and service traits
//!
//! Everything the cache layer and its consumers share. This crate holds no
//! cache state; see `querysync-cache` for the registry itself.

pub mod config;
pub mod error;
pub mod identity;
pub mod key;
pub mod service;
pub mod telemetry;

pub use config::{CacheConfig, EntityOverride, EntityPolicy};
pub use error::{
    CacheError, ConfigError, NetworkError, StaleWriteError, SyncError, SyncResult,
    ValidationError,
};
pub use identity::{CurrentUser, IdentityProvider, Role, SessionIdentity};
pub use key::{make_key, CacheKey, IntoParam, KeyBuilder, ParamValue};
pub use service::{
    fetcher_fn, mutator_fn, DataService, FnFetcher, FnMutator, Mutator, Notifier, NotifyKind,
    OrderBy, QueryFetcher, QueryTemplate, ReadQuery, ServiceFetcher, TracingNotifier, WriteOp,
    WriteRequest,
};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
