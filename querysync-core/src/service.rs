//! External service interfaces.
//!
//! - [`DataService`]: the remote store, an opaque request/response service
//!   keyed by table and filters.
//! - [`QueryFetcher`] and [`Mutator`]: the read and write functions bound to
//!   fetch and mutation units.
//! - [`Notifier`]: where mutation outcomes are reported for the user.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncResult;
use crate::key::{CacheKey, ParamValue};

// ============================================================================
// REMOTE DATA SERVICE
// ============================================================================

/// Sort order for a read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// A read against one table with equality filters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadQuery {
    pub table: String,
    pub filters: BTreeMap<String, ParamValue>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    /// When set, the service returns one row object, or `NotFound` if no
    /// row matched. Otherwise it returns an array of rows.
    pub expect_single: bool,
}

impl ReadQuery {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: BTreeMap::new(),
            order_by: None,
            limit: None,
            expect_single: false,
        }
    }

    pub fn filter(mut self, column: impl Into<String>, value: ParamValue) -> Self {
        self.filters.insert(column.into(), value);
        self
    }
}

/// Kind of write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOp {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A write against one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteRequest {
    pub table: String,
    pub op: WriteOp,
    /// Row selector for update and delete.
    pub filters: BTreeMap<String, ParamValue>,
    pub payload: Value,
}

impl WriteRequest {
    pub fn insert(table: impl Into<String>, payload: Value) -> Self {
        Self {
            table: table.into(),
            op: WriteOp::Insert,
            filters: BTreeMap::new(),
            payload,
        }
    }

    pub fn update(table: impl Into<String>, payload: Value) -> Self {
        Self {
            op: WriteOp::Update,
            ..Self::insert(table, payload)
        }
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Self {
            op: WriteOp::Delete,
            ..Self::insert(table, Value::Null)
        }
    }

    pub fn filter(mut self, column: impl Into<String>, value: ParamValue) -> Self {
        self.filters.insert(column.into(), value);
        self
    }
}

/// The hosted relational backend.
///
/// No transactional semantics are assumed across calls.
#[async_trait]
pub trait DataService: Send + Sync {
    async fn read(&self, query: ReadQuery) -> SyncResult<Value>;

    async fn write(&self, request: WriteRequest) -> SyncResult<Value>;
}

// ============================================================================
// READ / WRITE FUNCTIONS
// ============================================================================

/// The read function of a fetch unit.
#[async_trait]
pub trait QueryFetcher: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> SyncResult<Value>;
}

/// The write function of a mutation unit.
#[async_trait]
pub trait Mutator<I, R>: Send + Sync
where
    I: Send + 'static,
    R: Send + 'static,
{
    async fn write(&self, input: I) -> SyncResult<R>;
}

/// Closure adapter for [`QueryFetcher`].
pub struct FnFetcher<F>(F);

/// Wrap an async closure as a fetcher.
pub fn fetcher_fn<F, Fut>(f: F) -> Arc<dyn QueryFetcher>
where
    F: Fn(CacheKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<Value>> + Send + 'static,
{
    Arc::new(FnFetcher(f))
}

#[async_trait]
impl<F, Fut> QueryFetcher for FnFetcher<F>
where
    F: Fn(CacheKey) -> Fut + Send + Sync,
    Fut: Future<Output = SyncResult<Value>> + Send,
{
    async fn fetch(&self, key: &CacheKey) -> SyncResult<Value> {
        (self.0)(key.clone()).await
    }
}

/// Closure adapter for [`Mutator`].
pub struct FnMutator<F>(F);

/// Wrap an async closure as a mutator.
pub fn mutator_fn<I, R, F, Fut>(f: F) -> Arc<dyn Mutator<I, R>>
where
    I: Send + 'static,
    R: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<R>> + Send + 'static,
{
    Arc::new(FnMutator(f))
}

#[async_trait]
impl<I, R, F, Fut> Mutator<I, R> for FnMutator<F>
where
    I: Send + 'static,
    R: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = SyncResult<R>> + Send,
{
    async fn write(&self, input: I) -> SyncResult<R> {
        (self.0)(input).await
    }
}

// ============================================================================
// DECLARATIVE FETCHERS
// ============================================================================

/// How a key turns into a [`ReadQuery`].
///
/// Key params become equality filters. A param can be renamed to a column
/// or excluded from the filters entirely.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTemplate {
    pub table: String,
    pub expect_single: bool,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    columns: BTreeMap<String, String>,
    excluded: Vec<String>,
}

impl QueryTemplate {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            expect_single: false,
            order_by: None,
            limit: None,
            columns: BTreeMap::new(),
            excluded: Vec::new(),
        }
    }

    pub fn single(mut self) -> Self {
        self.expect_single = true;
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by = Some(OrderBy {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Filter on `column` for key param `param`.
    pub fn column(mut self, param: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.insert(param.into(), column.into());
        self
    }

    /// Keep a key param out of the filters.
    pub fn exclude(mut self, param: impl Into<String>) -> Self {
        self.excluded.push(param.into());
        self
    }

    /// Build the read for a key.
    pub fn to_query(&self, key: &CacheKey) -> ReadQuery {
        let filters = key
            .params()
            .iter()
            .filter(|(name, _)| !self.excluded.iter().any(|e| e == *name))
            .map(|(name, value)| {
                let column = self.columns.get(name).unwrap_or(name).clone();
                (column, value.clone())
            })
            .collect();

        ReadQuery {
            table: self.table.clone(),
            filters,
            order_by: self.order_by.clone(),
            limit: self.limit,
            expect_single: self.expect_single,
        }
    }
}

/// A [`QueryFetcher`] backed by a [`DataService`] and a [`QueryTemplate`].
pub struct ServiceFetcher {
    service: Arc<dyn DataService>,
    template: QueryTemplate,
}

impl ServiceFetcher {
    pub fn new(service: Arc<dyn DataService>, template: QueryTemplate) -> Self {
        Self { service, template }
    }

    pub fn template(&self) -> &QueryTemplate {
        &self.template
    }
}

#[async_trait]
impl QueryFetcher for ServiceFetcher {
    async fn fetch(&self, key: &CacheKey) -> SyncResult<Value> {
        self.service.read(self.template.to_query(key)).await
    }
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

/// Outcome kind reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    Success,
    Error,
}

/// Sink for user-facing mutation notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NotifyKind, message: &str);
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, kind: NotifyKind, message: &str) {
        match kind {
            NotifyKind::Success => tracing::info!(notification = "success", "{message}"),
            NotifyKind::Error => tracing::warn!(notification = "error", "{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CacheKey;
    use serde_json::json;

    #[test]
    fn test_template_maps_params_to_columns() {
        let template = QueryTemplate::new("transactions")
            .column("user_id", "buyer_id")
            .exclude("view")
            .order_by("created_at", false)
            .limit(50);

        let key = CacheKey::builder("user-transactions")
            .param("user_id", "u1")
            .param("status", "paid")
            .param("view", "compact")
            .build();

        let query = template.to_query(&key);
        assert_eq!(query.table, "transactions");
        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.filters.get("buyer_id"), Some(&ParamValue::Str("u1".into())));
        assert_eq!(query.filters.get("status"), Some(&ParamValue::Str("paid".into())));
        assert!(!query.filters.contains_key("view"));
        assert_eq!(query.limit, Some(50));
        assert!(!query.expect_single);
    }

    #[test]
    fn test_write_request_builders() {
        let update = WriteRequest::update("profiles", json!({"bio": "hi"}))
            .filter("id", ParamValue::Str("u1".into()));
        assert_eq!(update.op, WriteOp::Update);
        assert_eq!(update.filters.len(), 1);

        let delete = WriteRequest::delete("products");
        assert_eq!(delete.op, WriteOp::Delete);
        assert_eq!(delete.payload, Value::Null);
        assert_eq!(WriteOp::Insert.to_string(), "insert");
    }

    #[tokio::test]
    async fn test_fetcher_fn_receives_key() {
        let fetcher = fetcher_fn(|key: CacheKey| async move {
            Ok(json!({ "entity": key.entity_type() }))
        });
        let value = fetcher.fetch(&CacheKey::new("experts")).await.unwrap();
        assert_eq!(value, json!({"entity": "experts"}));
    }

    #[tokio::test]
    async fn test_mutator_fn_passes_input() {
        let mutator = mutator_fn(|n: i64| async move { Ok(n * 2) });
        assert_eq!(mutator.write(21).await.unwrap(), 42);
    }
}
