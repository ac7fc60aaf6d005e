//! Marketplace units against an in-memory backend.

use std::sync::Arc;

use querysync_cache::{EntryStatus, QueryCache};
use querysync_core::{
    CacheConfig, CurrentUser, Role, SessionIdentity, SyncError, ValidationError,
};
use querysync_market::{entities, Checkout, Marketplace, NewThread, ProductUpdate, ProfileUpdate};
use querysync_test_utils::fixtures::{self, MarketFixture};
use querysync_test_utils::{MockDataService, RecordingNotifier};
use uuid::Uuid;

struct Harness {
    f: MarketFixture,
    service: Arc<MockDataService>,
    identity: Arc<SessionIdentity>,
    notifier: Arc<RecordingNotifier>,
    market: Marketplace,
}

impl Harness {
    fn new() -> Self {
        let f = MarketFixture::new();
        let service = Arc::new(fixtures::seeded_service(&f));
        let identity = Arc::new(SessionIdentity::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let cache = QueryCache::create(CacheConfig::default()).unwrap();
        let market = Marketplace::new(&cache, service.clone(), identity.clone())
            .unwrap()
            .with_notifier(notifier.clone());
        Self {
            f,
            service,
            identity,
            notifier,
            market,
        }
    }

    fn sign_in(&self, id: Uuid, role: Role) {
        self.identity.sign_in(CurrentUser::new(id, role));
    }
}

fn is_identity_required(error: &SyncError) -> bool {
    matches!(
        error,
        SyncError::Validation(ValidationError::IdentityRequired { .. })
    )
}

#[tokio::test]
async fn signed_out_reads_are_disabled_and_writes_rejected() {
    let h = Harness::new();

    let profile = h.market.profile().unwrap();
    let orders = h.market.my_transactions().unwrap();
    let inbox = h.market.conversations().unwrap();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(!profile.is_enabled());
    assert!(!orders.is_enabled());
    assert!(!inbox.is_enabled());
    let state = orders.state();
    assert!(state.data.is_none());
    assert!(state.error.is_none());
    assert!(!state.is_loading);
    assert_eq!(h.service.read_count(), 0);
    assert!(h.market.cache().is_empty());

    assert!(is_identity_required(&h.market.update_profile().unwrap_err()));
    assert!(is_identity_required(&h.market.complete_checkout().unwrap_err()));
    assert!(is_identity_required(
        &h.market.send_message(h.f.conversation).unwrap_err()
    ));
}

#[tokio::test]
async fn profile_loads_for_signed_in_user() {
    let h = Harness::new();
    h.sign_in(h.f.buyer, Role::Buyer);

    let mut profile = h.market.profile().unwrap();
    let state = profile.settled().await.unwrap();

    let loaded = state.data.flatten().unwrap();
    assert_eq!(loaded.id, h.f.buyer);
    assert_eq!(loaded.full_name.as_deref(), Some("Bea Buyer"));
    assert_eq!(loaded.role, Role::Buyer);
}

#[tokio::test]
async fn missing_product_reads_as_none() {
    let h = Harness::new();

    let mut product = h.market.product(Some(Uuid::now_v7())).unwrap();
    let state = product.settled().await.unwrap();

    assert_eq!(state.status, EntryStatus::Success);
    assert!(state.error.is_none());
    assert_eq!(state.data, Some(None));
}

#[tokio::test]
async fn shared_key_is_read_once() {
    let h = Harness::new();

    let mut first = h.market.products(Some("lighting")).unwrap();
    let mut second = h.market.products(Some("lighting")).unwrap();
    let a = first.settled().await.unwrap();
    let b = second.settled().await.unwrap();

    assert_eq!(a.data, b.data);
    assert_eq!(a.data.unwrap().len(), 1);
    assert_eq!(h.service.reads_for(fixtures::PRODUCTS), 1);
}

#[tokio::test]
async fn update_profile_shows_change_then_refetches() {
    let h = Harness::new();
    h.sign_in(h.f.buyer, Role::Buyer);
    let mut profile = h.market.profile().unwrap();
    profile.settled().await.unwrap();

    let update = h.market.update_profile().unwrap();
    let saved = update
        .mutate(ProfileUpdate {
            full_name: Some("Bea B.".into()),
            ..ProfileUpdate::default()
        })
        .await
        .unwrap();
    assert_eq!(saved.full_name.as_deref(), Some("Bea B."));

    let state = profile.settled().await.unwrap();
    assert_eq!(
        state.data.flatten().and_then(|p| p.full_name).as_deref(),
        Some("Bea B.")
    );
    assert_eq!(h.service.reads_for(fixtures::PROFILES), 2);
    assert_eq!(h.notifier.successes(), vec!["Profile updated".to_string()]);
}

#[tokio::test]
async fn invalid_update_never_reaches_backend() {
    let h = Harness::new();
    h.sign_in(h.f.buyer, Role::Buyer);

    let update = h.market.update_profile().unwrap();
    let err = update.mutate(ProfileUpdate::default()).await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::Validation(ValidationError::InvalidPayload { .. })
    ));
    assert_eq!(h.service.write_count(), 0);
    assert_eq!(h.notifier.errors().len(), 1);
}

#[tokio::test]
async fn checkout_credits_affiliate_and_refreshes_purchases() {
    let h = Harness::new();
    h.sign_in(h.f.buyer, Role::Buyer);
    let mut orders = h.market.my_transactions().unwrap();
    assert_eq!(orders.settled().await.unwrap().data.unwrap().len(), 1);

    let checkout = h.market.complete_checkout().unwrap();
    let transaction = checkout
        .mutate(Checkout {
            product_id: h.f.lamp,
            affiliate_code: Some("ELI-LAMP".into()),
        })
        .await
        .unwrap();

    assert_eq!(transaction.amount_cents, 4_500);
    assert_eq!(transaction.seller_id, h.f.seller);
    assert_eq!(transaction.affiliate_link_id, Some(h.f.affiliate_link));

    let earnings = h.service.rows(fixtures::AFFILIATE_EARNINGS);
    assert_eq!(earnings.len(), 1);
    assert_eq!(earnings[0]["amount_cents"], 450);

    let purchases = orders.settled().await.unwrap().data.unwrap();
    assert_eq!(purchases.len(), 2);
    assert!(purchases.iter().any(|t| t.id == transaction.id));
    assert_eq!(h.notifier.successes(), vec!["Purchase complete".to_string()]);
}

#[tokio::test]
async fn checkout_with_unknown_code_fails_cleanly() {
    let h = Harness::new();
    h.sign_in(h.f.buyer, Role::Buyer);

    let checkout = h.market.complete_checkout().unwrap();
    let err = checkout
        .mutate(Checkout {
            product_id: h.f.lamp,
            affiliate_code: Some("NOPE".into()),
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::Validation(ValidationError::InvalidParam { .. })
    ));
    assert!(h.service.rows(fixtures::TRANSACTIONS).len() == 1);
    assert_eq!(h.notifier.errors().len(), 1);
    assert!(h.notifier.errors()[0].starts_with("Checkout failed: "));
}

#[tokio::test]
async fn failed_message_send_is_rolled_back() {
    let h = Harness::new();
    h.sign_in(h.f.buyer, Role::Buyer);
    let mut thread = h.market.conversation_messages(Some(h.f.conversation)).unwrap();
    thread.settled().await.unwrap();

    h.service
        .fail_next_write(SyncError::request_failed("insert messages", "connection reset"));
    let send = h.market.send_message(h.f.conversation).unwrap();
    let err = send.mutate("Still available?".to_string()).await.unwrap_err();

    assert!(err.is_retryable());
    let messages = thread.state().data.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, "Is the lamp available?");
    assert_eq!(h.notifier.errors().len(), 1);
    assert!(!send.is_pending());
}

#[tokio::test]
async fn sent_message_appears_in_thread() {
    let h = Harness::new();
    h.sign_in(h.f.seller, Role::Seller);
    let mut thread = h.market.conversation_messages(Some(h.f.conversation)).unwrap();
    thread.settled().await.unwrap();

    let send = h.market.send_message(h.f.conversation).unwrap();
    let sent = send.mutate("Yes, it is.".to_string()).await.unwrap();
    assert_eq!(sent.sender_id, h.f.seller);

    let messages = thread.settled().await.unwrap().data.unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().any(|m| m.id == sent.id));
}

#[tokio::test]
async fn stored_message_survives_failed_conversation_touch() {
    let h = Harness::new();
    h.sign_in(h.f.buyer, Role::Buyer);
    let mut thread = h.market.conversation_messages(Some(h.f.conversation)).unwrap();
    thread.settled().await.unwrap();

    h.service.fail_writes_to(
        fixtures::CONVERSATIONS,
        SyncError::request_failed("update conversations", "row locked"),
    );
    let send = h.market.send_message(h.f.conversation).unwrap();
    let sent = send.mutate("Still available?".to_string()).await.unwrap();

    let stored = h.service.rows(fixtures::MESSAGES);
    let state = thread.settled().await.unwrap();
    let cached = state.data.unwrap();
    assert_eq!(state.status, EntryStatus::Success);
    assert_eq!(cached.len(), stored.len());
    assert!(cached.iter().any(|m| m.id == sent.id));
    assert_eq!(h.notifier.successes(), vec!["Message sent".to_string()]);
}

#[tokio::test]
async fn sale_survives_failed_affiliate_credit() {
    let h = Harness::new();
    h.sign_in(h.f.buyer, Role::Buyer);
    let mut orders = h.market.my_transactions().unwrap();
    orders.settled().await.unwrap();

    h.service.fail_writes_to(
        fixtures::AFFILIATE_EARNINGS,
        SyncError::request_failed("insert affiliate_earnings", "timeout"),
    );
    let checkout = h.market.complete_checkout().unwrap();
    let transaction = checkout
        .mutate(Checkout {
            product_id: h.f.lamp,
            affiliate_code: Some("ELI-LAMP".into()),
        })
        .await
        .unwrap();

    assert!(h.service.rows(fixtures::AFFILIATE_EARNINGS).is_empty());
    let purchases = orders.settled().await.unwrap().data.unwrap();
    assert_eq!(purchases.len(), h.service.rows(fixtures::TRANSACTIONS).len());
    assert!(purchases.iter().any(|t| t.id == transaction.id));
}

#[tokio::test]
async fn conversations_merge_both_sides() {
    let h = Harness::new();
    h.service.insert_row(
        fixtures::CONVERSATIONS,
        fixtures::conversation_row(Uuid::now_v7(), h.f.seller, h.f.expert_user),
    );
    h.sign_in(h.f.seller, Role::Seller);

    let mut inbox = h.market.conversations().unwrap();
    let conversations = inbox.settled().await.unwrap().data.unwrap();

    assert_eq!(conversations.len(), 2);
    assert!(conversations.iter().any(|c| c.seller_id == h.f.seller));
    assert!(conversations.iter().any(|c| c.buyer_id == h.f.seller));
    assert_eq!(h.service.reads_for(fixtures::CONVERSATIONS), 2);
}

#[tokio::test]
async fn admin_users_gated_by_role() {
    let h = Harness::new();
    h.sign_in(h.f.buyer, Role::Buyer);
    assert!(!h.market.admin_users().unwrap().is_subscribed());

    h.sign_in(h.f.admin, Role::Admin);
    let mut users = h.market.admin_users().unwrap();
    assert_eq!(users.settled().await.unwrap().data.unwrap().len(), 4);
}

#[tokio::test]
async fn expert_approval_requires_admin() {
    let h = Harness::new();
    h.sign_in(h.f.buyer, Role::Buyer);
    let err = h
        .market
        .approve_expert()
        .unwrap()
        .mutate(h.f.expert)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    h.sign_in(h.f.admin, Role::Admin);
    let mut approved = h.market.experts(true).unwrap();
    assert!(approved.settled().await.unwrap().data.unwrap().is_empty());

    let expert = h.market.approve_expert().unwrap().mutate(h.f.expert).await.unwrap();
    assert!(expert.approved);
    let listed = approved.settled().await.unwrap().data.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn reply_refreshes_thread_lists() {
    let h = Harness::new();
    h.sign_in(h.f.buyer, Role::Buyer);
    let mut threads = h.market.community_threads(Some(h.f.community)).unwrap();
    threads.settled().await.unwrap();

    let reply = h.market.reply_thread(h.f.thread).unwrap();
    reply.mutate("Welcome!".to_string()).await.unwrap();
    threads.settled().await.unwrap();

    assert_eq!(h.service.reads_for(fixtures::COMMUNITY_THREADS), 2);
    assert_eq!(h.service.rows(fixtures::THREAD_REPLIES).len(), 1);
}

#[tokio::test]
async fn new_thread_validated_and_listed() {
    let h = Harness::new();
    h.sign_in(h.f.seller, Role::Seller);
    let mut threads = h.market.community_threads(Some(h.f.community)).unwrap();
    threads.settled().await.unwrap();
    let create = h.market.create_thread(h.f.community).unwrap();

    let blank = NewThread {
        title: " ".into(),
        body: "text".into(),
    };
    assert!(create.mutate(blank).await.is_err());

    create
        .mutate(NewThread {
            title: "Show and tell".into(),
            body: "Post your builds".into(),
        })
        .await
        .unwrap();
    let listed = threads.settled().await.unwrap().data.unwrap();
    assert_eq!(listed.len(), 2);
}

#[tokio::test]
async fn product_update_bound_to_its_product() {
    let h = Harness::new();
    h.sign_in(h.f.seller, Role::Seller);
    let mut lamp = h.market.product(Some(h.f.lamp)).unwrap();
    lamp.settled().await.unwrap();

    let edit = h.market.update_product(h.f.lamp).unwrap();
    let mut wrong = ProductUpdate::new(h.f.chair);
    wrong.price_cents = Some(1);
    assert!(edit.mutate(wrong).await.is_err());

    let mut cheaper = ProductUpdate::new(h.f.lamp);
    cheaper.price_cents = Some(3_900);
    edit.mutate(cheaper).await.unwrap();

    let product = lamp.settled().await.unwrap().data.flatten().unwrap();
    assert_eq!(product.price_cents, 3_900);
}

#[tokio::test]
async fn join_twice_is_a_conflict() {
    let h = Harness::new();
    h.sign_in(h.f.buyer, Role::Buyer);
    let join = h.market.join_community(h.f.community).unwrap();

    join.mutate(()).await.unwrap();
    let err = join.mutate(()).await.unwrap_err();
    assert!(matches!(err, SyncError::StaleWrite(_)));
    assert!(!err.is_retryable());
}

#[test]
fn catalog_covers_marketplace_types() {
    let router = querysync_market::catalog().unwrap();
    let graph = router.dependency_graph();
    assert!(graph["complete-checkout"].contains(entities::USER_TRANSACTIONS));
    assert!(graph["send-message"].contains(entities::CONVERSATION_MESSAGES));
}
