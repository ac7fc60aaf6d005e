//! querysync Test Utilities
//!
//! Shared test infrastructure for the querysync workspace:
//! - In-memory data service with failure injection
//! - A fetcher whose responses the test releases by hand, in any order
//! - A notifier that records what it was told
//! - Proptest generators for keys and params
//! - Row fixtures for the marketplace tables

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::{oneshot, Notify};
use uuid::Uuid;

pub use querysync_core::{
    make_key, CacheKey, DataService, NetworkError, Notifier, NotifyKind, ParamValue,
    QueryFetcher, ReadQuery, StaleWriteError, SyncError, SyncResult, WriteOp, WriteRequest,
};

fn locked<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCK DATA SERVICE
// ============================================================================

/// In-memory [`DataService`] over JSON rows.
///
/// Reads apply equality filters, ordering and limit. Inserts get a fresh
/// `id` when the payload has none. Updates and deletes that match no row
/// fail with [`StaleWriteError::PreconditionFailed`].
#[derive(Debug, Default)]
pub struct MockDataService {
    tables: Mutex<BTreeMap<String, Vec<Value>>>,
    reads: Mutex<Vec<ReadQuery>>,
    writes: Mutex<Vec<WriteRequest>>,
    read_failures: Mutex<VecDeque<SyncError>>,
    write_failures: Mutex<VecDeque<SyncError>>,
    table_write_failures: Mutex<BTreeMap<String, SyncError>>,
}

impl MockDataService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table.
    pub fn with_rows(self, table: &str, rows: Vec<Value>) -> Self {
        locked(&self.tables)
            .entry(table.to_string())
            .or_default()
            .extend(rows);
        self
    }

    pub fn insert_row(&self, table: &str, row: Value) {
        locked(&self.tables)
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        locked(&self.tables).get(table).cloned().unwrap_or_default()
    }

    /// Fail the next read with `error`. Queued failures are used in order.
    pub fn fail_next_read(&self, error: SyncError) {
        locked(&self.read_failures).push_back(error);
    }

    /// Fail the next write with `error`.
    pub fn fail_next_write(&self, error: SyncError) {
        locked(&self.write_failures).push_back(error);
    }

    /// Fail every write to `table` with `error`, leaving other tables
    /// writable.
    pub fn fail_writes_to(&self, table: &str, error: SyncError) {
        locked(&self.table_write_failures).insert(table.to_string(), error);
    }

    pub fn read_count(&self) -> usize {
        locked(&self.reads).len()
    }

    /// Reads issued against `table`.
    pub fn reads_for(&self, table: &str) -> usize {
        locked(&self.reads).iter().filter(|q| q.table == table).count()
    }

    pub fn write_count(&self) -> usize {
        locked(&self.writes).len()
    }

    pub fn writes(&self) -> Vec<WriteRequest> {
        locked(&self.writes).clone()
    }
}

fn row_matches(row: &Value, filters: &BTreeMap<String, ParamValue>) -> bool {
    filters.iter().all(|(column, value)| {
        row.get(column).unwrap_or(&Value::Null) == &value.to_json()
    })
}

fn compare_json(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => std::cmp::Ordering::Equal,
        (Value::Null, _) => std::cmp::Ordering::Less,
        (_, Value::Null) => std::cmp::Ordering::Greater,
        _ => std::cmp::Ordering::Equal,
    }
}

fn describe_filters(filters: &BTreeMap<String, ParamValue>) -> String {
    filters
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl DataService for MockDataService {
    async fn read(&self, query: ReadQuery) -> SyncResult<Value> {
        locked(&self.reads).push(query.clone());
        if let Some(error) = locked(&self.read_failures).pop_front() {
            return Err(error);
        }

        let mut rows: Vec<Value> = locked(&self.tables)
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row_matches(row, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            rows.sort_by(|a, b| {
                let ordering = compare_json(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        if query.expect_single {
            return rows.into_iter().next().ok_or_else(|| {
                SyncError::not_found(query.table.clone(), describe_filters(&query.filters))
            });
        }
        Ok(Value::Array(rows))
    }

    async fn write(&self, request: WriteRequest) -> SyncResult<Value> {
        locked(&self.writes).push(request.clone());
        if let Some(error) = locked(&self.write_failures).pop_front() {
            return Err(error);
        }
        if let Some(error) = locked(&self.table_write_failures).get(&request.table).cloned() {
            return Err(error);
        }

        let mut tables = locked(&self.tables);
        let rows = tables.entry(request.table.clone()).or_default();
        let precondition_failed = || {
            SyncError::StaleWrite(StaleWriteError::PreconditionFailed {
                entity_type: request.table.clone(),
                precondition: describe_filters(&request.filters),
            })
        };

        match request.op {
            WriteOp::Insert => {
                let mut row = request.payload.clone();
                if let Value::Object(fields) = &mut row {
                    fields
                        .entry("id")
                        .or_insert_with(|| json!(Uuid::now_v7().to_string()));
                }
                rows.push(row.clone());
                Ok(row)
            }
            WriteOp::Update => {
                let mut updated = Vec::new();
                for row in rows.iter_mut() {
                    if !row_matches(row, &request.filters) {
                        continue;
                    }
                    if let (Value::Object(fields), Value::Object(changes)) =
                        (&mut *row, &request.payload)
                    {
                        for (name, value) in changes {
                            fields.insert(name.clone(), value.clone());
                        }
                    }
                    updated.push(row.clone());
                }
                if updated.is_empty() {
                    return Err(precondition_failed());
                }
                Ok(Value::Array(updated))
            }
            WriteOp::Delete => {
                let before = rows.len();
                rows.retain(|row| !row_matches(row, &request.filters));
                let deleted = before - rows.len();
                if deleted == 0 {
                    return Err(precondition_failed());
                }
                Ok(json!({ "deleted": deleted }))
            }
        }
    }
}

// ============================================================================
// CONTROLLED FETCHER
// ============================================================================

struct PendingFetch {
    key: CacheKey,
    responder: oneshot::Sender<SyncResult<Value>>,
}

/// A [`QueryFetcher`] that parks every call until the test answers it.
///
/// Calls are answered oldest-first or newest-first, which is enough to
/// reorder responses against the order requests were issued in.
#[derive(Default)]
pub struct ControlledFetcher {
    pending: Mutex<Vec<PendingFetch>>,
    calls: AtomicUsize,
    arrived: Notify,
}

impl ControlledFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Clone as a trait object for `subscribe`.
    pub fn handle(self: &Arc<Self>) -> Arc<dyn QueryFetcher> {
        Arc::clone(self) as Arc<dyn QueryFetcher>
    }

    /// Calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls still waiting for an answer.
    pub fn pending_count(&self) -> usize {
        locked(&self.pending).len()
    }

    pub fn pending_keys(&self) -> Vec<CacheKey> {
        locked(&self.pending).iter().map(|p| p.key.clone()).collect()
    }

    /// Wait until at least `count` calls have arrived.
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.arrived.notified();
            if self.call_count() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Answer the oldest waiting call. Returns false if none was waiting or
    /// its caller had gone away.
    pub fn resolve_oldest(&self, result: SyncResult<Value>) -> bool {
        let mut pending = locked(&self.pending);
        if pending.is_empty() {
            return false;
        }
        let call = pending.remove(0);
        drop(pending);
        call.responder.send(result).is_ok()
    }

    /// Answer the newest waiting call.
    pub fn resolve_newest(&self, result: SyncResult<Value>) -> bool {
        let call = locked(&self.pending).pop();
        match call {
            Some(call) => call.responder.send(result).is_ok(),
            None => false,
        }
    }

    /// Answer every waiting call with `value`. Returns how many were
    /// delivered.
    pub fn resolve_all(&self, value: Value) -> usize {
        let calls: Vec<PendingFetch> = locked(&self.pending).drain(..).collect();
        calls
            .into_iter()
            .map(|call| call.responder.send(Ok(value.clone())).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }
}

#[async_trait]
impl QueryFetcher for ControlledFetcher {
    async fn fetch(&self, key: &CacheKey) -> SyncResult<Value> {
        let (responder, response) = oneshot::channel();
        locked(&self.pending).push(PendingFetch {
            key: key.clone(),
            responder,
        });
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.arrived.notify_waiters();

        response.await.unwrap_or_else(|_| {
            Err(NetworkError::RequestFailed {
                operation: format!("fetch {key}"),
                reason: "response abandoned".to_string(),
            }
            .into())
        })
    }
}

/// Yield to the runtime until `condition` holds.
///
/// # Panics
///
/// After 10 000 yields without the condition holding.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

// ============================================================================
// RECORDING NOTIFIER
// ============================================================================

/// Notifier that keeps every message.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(NotifyKind, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(NotifyKind, String)> {
        locked(&self.messages).clone()
    }

    pub fn successes(&self) -> Vec<String> {
        self.of_kind(NotifyKind::Success)
    }

    pub fn errors(&self) -> Vec<String> {
        self.of_kind(NotifyKind::Error)
    }

    fn of_kind(&self, kind: NotifyKind) -> Vec<String> {
        locked(&self.messages)
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NotifyKind, message: &str) {
        locked(&self.messages).push((kind, message.to_string()));
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys and params.

    use super::*;
    use proptest::prelude::*;

    /// Entity types used by the marketplace.
    pub fn arb_entity_type() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("user-profile"),
            Just("products"),
            Just("product"),
            Just("experts"),
            Just("community-threads"),
            Just("conversation-messages"),
            Just("user-transactions"),
        ]
        .prop_map(str::to_string)
    }

    pub fn arb_param_name() -> impl Strategy<Value = String> {
        "[a-z_]{1,8}"
    }

    /// Param values without floats, so equality is exact.
    pub fn arb_param_value() -> impl Strategy<Value = ParamValue> {
        prop_oneof![
            Just(ParamValue::Null),
            any::<bool>().prop_map(ParamValue::Bool),
            any::<i64>().prop_map(ParamValue::Int),
            "[a-zA-Z0-9-]{0,12}".prop_map(ParamValue::Str),
        ]
    }

    /// Unique names, each with an optional value.
    pub fn arb_params() -> impl Strategy<Value = Vec<(String, Option<ParamValue>)>> {
        prop::collection::btree_map(arb_param_name(), prop::option::of(arb_param_value()), 0..6)
            .prop_map(|m| m.into_iter().collect())
    }

    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        (arb_entity_type(), arb_params()).prop_map(|(ty, params)| make_key(ty, params))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Marketplace rows as the data service stores them.

    use super::*;

    pub const PROFILES: &str = "profiles";
    pub const PRODUCTS: &str = "products";
    pub const EXPERTS: &str = "experts";
    pub const COMMUNITIES: &str = "communities";
    pub const COMMUNITY_MEMBERS: &str = "community_members";
    pub const COMMUNITY_THREADS: &str = "community_threads";
    pub const THREAD_REPLIES: &str = "thread_replies";
    pub const CONVERSATIONS: &str = "conversations";
    pub const MESSAGES: &str = "messages";
    pub const TRANSACTIONS: &str = "transactions";
    pub const AFFILIATE_LINKS: &str = "affiliate_links";
    pub const AFFILIATE_EARNINGS: &str = "affiliate_earnings";

    const CREATED_AT: &str = "2026-01-15T09:30:00Z";

    pub fn profile_row(id: Uuid, role: &str, full_name: &str) -> Value {
        json!({
            "id": id,
            "email": format!("{}@example.com", full_name.to_lowercase().replace(' ', ".")),
            "full_name": full_name,
            "avatar_url": null,
            "bio": null,
            "role": role,
            "created_at": CREATED_AT,
        })
    }

    pub fn product_row(id: Uuid, seller_id: Uuid, title: &str, price_cents: i64, category: &str) -> Value {
        json!({
            "id": id,
            "seller_id": seller_id,
            "title": title,
            "description": null,
            "price_cents": price_cents,
            "category": category,
            "status": "published",
            "created_at": CREATED_AT,
        })
    }

    pub fn expert_row(id: Uuid, user_id: Uuid, headline: &str, approved: bool) -> Value {
        json!({
            "id": id,
            "user_id": user_id,
            "headline": headline,
            "hourly_rate_cents": 12_000,
            "specialties": ["pricing", "sourcing"],
            "approved": approved,
        })
    }

    pub fn community_row(id: Uuid, owner_id: Uuid, name: &str) -> Value {
        json!({
            "id": id,
            "owner_id": owner_id,
            "name": name,
            "description": null,
            "member_count": 1,
        })
    }

    pub fn member_row(community_id: Uuid, user_id: Uuid, role: &str) -> Value {
        json!({
            "community_id": community_id,
            "user_id": user_id,
            "role": role,
        })
    }

    pub fn thread_row(id: Uuid, community_id: Uuid, author_id: Uuid, title: &str) -> Value {
        json!({
            "id": id,
            "community_id": community_id,
            "author_id": author_id,
            "title": title,
            "body": "First post",
            "created_at": CREATED_AT,
        })
    }

    pub fn conversation_row(id: Uuid, buyer_id: Uuid, seller_id: Uuid) -> Value {
        json!({
            "id": id,
            "buyer_id": buyer_id,
            "seller_id": seller_id,
            "product_id": null,
            "last_message_at": CREATED_AT,
        })
    }

    pub fn message_row(id: Uuid, conversation_id: Uuid, sender_id: Uuid, body: &str) -> Value {
        json!({
            "id": id,
            "conversation_id": conversation_id,
            "sender_id": sender_id,
            "body": body,
            "created_at": CREATED_AT,
        })
    }

    pub fn transaction_row(id: Uuid, buyer_id: Uuid, seller_id: Uuid, product_id: Uuid, amount_cents: i64) -> Value {
        json!({
            "id": id,
            "buyer_id": buyer_id,
            "seller_id": seller_id,
            "product_id": product_id,
            "amount_cents": amount_cents,
            "status": "completed",
            "affiliate_link_id": null,
            "created_at": CREATED_AT,
        })
    }

    pub fn affiliate_link_row(id: Uuid, affiliate_id: Uuid, product_id: Uuid, code: &str) -> Value {
        json!({
            "id": id,
            "affiliate_id": affiliate_id,
            "product_id": product_id,
            "code": code,
            "clicks": 0,
        })
    }

    /// Ids of everything in [`seeded_service`].
    #[derive(Debug, Clone)]
    pub struct MarketFixture {
        pub buyer: Uuid,
        pub seller: Uuid,
        pub expert_user: Uuid,
        pub admin: Uuid,
        pub lamp: Uuid,
        pub chair: Uuid,
        pub expert: Uuid,
        pub community: Uuid,
        pub thread: Uuid,
        pub conversation: Uuid,
        pub affiliate_link: Uuid,
    }

    impl MarketFixture {
        pub fn new() -> Self {
            Self {
                buyer: Uuid::now_v7(),
                seller: Uuid::now_v7(),
                expert_user: Uuid::now_v7(),
                admin: Uuid::now_v7(),
                lamp: Uuid::now_v7(),
                chair: Uuid::now_v7(),
                expert: Uuid::now_v7(),
                community: Uuid::now_v7(),
                thread: Uuid::now_v7(),
                conversation: Uuid::now_v7(),
                affiliate_link: Uuid::now_v7(),
            }
        }
    }

    impl Default for MarketFixture {
        fn default() -> Self {
            Self::new()
        }
    }

    /// A data service holding a small, consistent marketplace.
    pub fn seeded_service(f: &MarketFixture) -> MockDataService {
        MockDataService::new()
            .with_rows(
                PROFILES,
                vec![
                    profile_row(f.buyer, "buyer", "Bea Buyer"),
                    profile_row(f.seller, "seller", "Sam Seller"),
                    profile_row(f.expert_user, "expert", "Eli Expert"),
                    profile_row(f.admin, "admin", "Ada Admin"),
                ],
            )
            .with_rows(
                PRODUCTS,
                vec![
                    product_row(f.lamp, f.seller, "Brass lamp", 4_500, "lighting"),
                    product_row(f.chair, f.seller, "Oak chair", 12_000, "furniture"),
                ],
            )
            .with_rows(EXPERTS, vec![expert_row(f.expert, f.expert_user, "Vintage pricing", false)])
            .with_rows(COMMUNITIES, vec![community_row(f.community, f.seller, "Makers")])
            .with_rows(COMMUNITY_MEMBERS, vec![member_row(f.community, f.seller, "owner")])
            .with_rows(
                COMMUNITY_THREADS,
                vec![thread_row(f.thread, f.community, f.seller, "Welcome")],
            )
            .with_rows(
                CONVERSATIONS,
                vec![conversation_row(f.conversation, f.buyer, f.seller)],
            )
            .with_rows(
                MESSAGES,
                vec![message_row(Uuid::now_v7(), f.conversation, f.buyer, "Is the lamp available?")],
            )
            .with_rows(
                TRANSACTIONS,
                vec![transaction_row(Uuid::now_v7(), f.buyer, f.seller, f.chair, 12_000)],
            )
            .with_rows(
                AFFILIATE_LINKS,
                vec![affiliate_link_row(f.affiliate_link, f.expert_user, f.lamp, "ELI-LAMP")],
            )
    }

    /// An object with only the given fields, for update payloads.
    pub fn patch(fields: &[(&str, Value)]) -> Value {
        let map: Map<String, Value> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use querysync_core::OrderBy;

    #[tokio::test]
    async fn test_mock_read_filters_and_orders() {
        let f = MarketFixture::new();
        let service = seeded_service(&f);

        let mut query = ReadQuery::table(PRODUCTS).filter("seller_id", ParamValue::Str(f.seller.to_string()));
        query.order_by = Some(OrderBy {
            column: "price_cents".into(),
            ascending: false,
        });
        let rows = service.read(query).await.unwrap();
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["title"], "Oak chair");
        assert_eq!(service.reads_for(PRODUCTS), 1);
    }

    #[tokio::test]
    async fn test_mock_single_read_not_found() {
        let service = MockDataService::new();
        let mut query = ReadQuery::table(PROFILES).filter("id", ParamValue::Str("nobody".into()));
        query.expect_single = true;
        assert!(service.read(query).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_mock_write_paths() {
        let service = MockDataService::new();
        let inserted = service
            .write(WriteRequest::insert(MESSAGES, json!({"body": "hi"})))
            .await
            .unwrap();
        let id = inserted["id"].as_str().unwrap().to_string();

        let updated = service
            .write(
                WriteRequest::update(MESSAGES, json!({"body": "edited"}))
                    .filter("id", ParamValue::Str(id.clone())),
            )
            .await
            .unwrap();
        assert_eq!(updated[0]["body"], "edited");

        let missing = service
            .write(WriteRequest::delete(MESSAGES).filter("id", ParamValue::Str("gone".into())))
            .await
            .unwrap_err();
        assert!(matches!(missing, SyncError::StaleWrite(_)));
        assert_eq!(service.write_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let service = MockDataService::new();
        service.fail_next_read(SyncError::request_failed("read", "boom"));
        assert!(service.read(ReadQuery::table(PRODUCTS)).await.is_err());
        assert!(service.read(ReadQuery::table(PRODUCTS)).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_table_write_failure() {
        let service = MockDataService::new();
        service.fail_writes_to(CONVERSATIONS, SyncError::request_failed("update", "locked"));

        assert!(service
            .write(WriteRequest::insert(MESSAGES, json!({"body": "hi"})))
            .await
            .is_ok());
        for _ in 0..2 {
            assert!(service
                .write(WriteRequest::insert(CONVERSATIONS, json!({})))
                .await
                .is_err());
        }
        assert_eq!(service.rows(MESSAGES).len(), 1);
        assert!(service.rows(CONVERSATIONS).is_empty());
    }

    #[tokio::test]
    async fn test_controlled_fetcher_answers_out_of_order() {
        let fetcher = ControlledFetcher::new();
        let first = tokio::spawn({
            let fetcher = fetcher.handle();
            async move { fetcher.fetch(&CacheKey::new("a")).await }
        });
        fetcher.wait_for_calls(1).await;
        let second = tokio::spawn({
            let fetcher = fetcher.handle();
            async move { fetcher.fetch(&CacheKey::new("b")).await }
        });
        fetcher.wait_for_calls(2).await;
        assert_eq!(fetcher.pending_keys(), vec![CacheKey::new("a"), CacheKey::new("b")]);

        assert!(fetcher.resolve_newest(Ok(json!("b"))));
        assert!(fetcher.resolve_oldest(Ok(json!("a"))));
        assert_eq!(second.await.unwrap().unwrap(), json!("b"));
        assert_eq!(first.await.unwrap().unwrap(), json!("a"));
        assert_eq!(fetcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_controlled_fetcher_resolve_all_counts_delivered() {
        let fetcher = ControlledFetcher::new();
        let kept = tokio::spawn({
            let fetcher = fetcher.handle();
            async move { fetcher.fetch(&CacheKey::new("kept")).await }
        });
        let gone = tokio::spawn({
            let fetcher = fetcher.handle();
            async move { fetcher.fetch(&CacheKey::new("gone")).await }
        });
        fetcher.wait_for_calls(2).await;
        gone.abort();
        assert!(gone.await.unwrap_err().is_cancelled());

        assert_eq!(fetcher.resolve_all(json!("all")), 1);
        assert_eq!(kept.await.unwrap().unwrap(), json!("all"));
        assert_eq!(fetcher.pending_count(), 0);
    }

    #[test]
    fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier.notify(NotifyKind::Success, "saved");
        notifier.notify(NotifyKind::Error, "failed");
        assert_eq!(notifier.successes(), vec!["saved".to_string()]);
        assert_eq!(notifier.errors(), vec!["failed".to_string()]);
        assert_eq!(notifier.messages().len(), 2);
    }
}
