//! Invalidation rules, one per marketplace write.
//!
//! Each rule takes the ids known when its mutation unit is built. Passing
//! `None` widens the pattern to the whole entity type, which is how
//! [`catalog`] declares them.

use querysync_cache::{InvalidationRouter, InvalidationRule};
use querysync_core::SyncResult;
use uuid::Uuid;

use crate::entities;

pub const UPDATE_PROFILE: &str = "update-profile";
pub const CREATE_PRODUCT: &str = "create-product";
pub const UPDATE_PRODUCT: &str = "update-product";
pub const DELETE_PRODUCT: &str = "delete-product";
pub const APPROVE_EXPERT: &str = "approve-expert";
pub const JOIN_COMMUNITY: &str = "join-community";
pub const CREATE_THREAD: &str = "create-thread";
pub const REPLY_THREAD: &str = "reply-thread";
pub const SEND_MESSAGE: &str = "send-message";
pub const COMPLETE_CHECKOUT: &str = "complete-checkout";
pub const CREATE_AFFILIATE_LINK: &str = "create-affiliate-link";

pub fn update_profile(user_id: Option<Uuid>) -> InvalidationRule {
    InvalidationRule::new(UPDATE_PROFILE)
        .prefix(&entities::user_profile(user_id))
        .entity(entities::ADMIN_USERS)
}

pub fn create_product(seller_id: Option<Uuid>) -> InvalidationRule {
    InvalidationRule::new(CREATE_PRODUCT)
        .entity(entities::PRODUCTS)
        .prefix(&entities::seller_products(seller_id))
}

pub fn update_product(product_id: Option<Uuid>, seller_id: Option<Uuid>) -> InvalidationRule {
    InvalidationRule::new(UPDATE_PRODUCT)
        .prefix(&entities::product(product_id))
        .entity(entities::PRODUCTS)
        .prefix(&entities::seller_products(seller_id))
}

/// The deleted id is only known at write time, so every single-product
/// entry is staled.
pub fn delete_product(seller_id: Option<Uuid>) -> InvalidationRule {
    InvalidationRule::new(DELETE_PRODUCT)
        .entity(entities::PRODUCT)
        .entity(entities::PRODUCTS)
        .prefix(&entities::seller_products(seller_id))
}

pub fn approve_expert() -> InvalidationRule {
    InvalidationRule::new(APPROVE_EXPERT)
        .entity(entities::EXPERTS)
        .entity(entities::EXPERT)
}

pub fn join_community(community_id: Option<Uuid>) -> InvalidationRule {
    InvalidationRule::new(JOIN_COMMUNITY)
        .prefix(&entities::community_members(community_id))
        .prefix(&entities::community(community_id))
        .entity(entities::COMMUNITIES)
}

pub fn create_thread(community_id: Option<Uuid>) -> InvalidationRule {
    InvalidationRule::new(CREATE_THREAD).prefix(&entities::community_threads(community_id))
}

/// Replies change the thread lists of every community the thread shows up
/// in, so those are matched by predicate.
pub fn reply_thread(thread_id: Option<Uuid>) -> InvalidationRule {
    InvalidationRule::new(REPLY_THREAD)
        .prefix(&entities::thread_replies(thread_id))
        .predicate("thread-lists", |key| {
            key.entity_type() == entities::COMMUNITY_THREADS
        })
}

pub fn send_message(conversation_id: Option<Uuid>) -> InvalidationRule {
    InvalidationRule::new(SEND_MESSAGE)
        .prefix(&entities::conversation_messages(conversation_id))
        .entity(entities::CONVERSATIONS)
}

pub fn complete_checkout() -> InvalidationRule {
    InvalidationRule::new(COMPLETE_CHECKOUT)
        .entity(entities::USER_TRANSACTIONS)
        .entity(entities::SELLER_SALES)
        .entity(entities::AFFILIATE_EARNINGS)
}

pub fn create_affiliate_link(affiliate_id: Option<Uuid>) -> InvalidationRule {
    InvalidationRule::new(CREATE_AFFILIATE_LINK)
        .prefix(&entities::affiliate_links(affiliate_id))
}

/// Every marketplace rule in its type-wide form.
pub fn catalog() -> SyncResult<InvalidationRouter> {
    let mut router = InvalidationRouter::new();
    for rule in [
        update_profile(None),
        create_product(None),
        update_product(None, None),
        delete_product(None),
        approve_expert(),
        join_community(None),
        create_thread(None),
        reply_thread(None),
        send_message(None),
        complete_checkout(),
        create_affiliate_link(None),
    ] {
        router.declare(rule)?;
    }
    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_catalog_declares_every_rule() {
        let router = catalog().unwrap();
        assert_eq!(router.len(), 11);
        for name in [
            UPDATE_PROFILE,
            CREATE_PRODUCT,
            UPDATE_PRODUCT,
            DELETE_PRODUCT,
            APPROVE_EXPERT,
            JOIN_COMMUNITY,
            CREATE_THREAD,
            REPLY_THREAD,
            SEND_MESSAGE,
            COMPLETE_CHECKOUT,
            CREATE_AFFILIATE_LINK,
        ] {
            assert!(router.rule(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_checkout_stales_every_users_transactions() {
        let rule = complete_checkout();
        assert!(rule.matches(&entities::user_transactions(Some(Uuid::now_v7()))));
        assert!(rule.matches(&entities::user_transactions(Some(Uuid::now_v7()))));
        assert!(!rule.matches(&entities::products(None)));
    }

    #[test]
    fn test_scoped_rule_leaves_other_owners() {
        let mine = Uuid::now_v7();
        let rule = send_message(Some(mine));
        assert!(rule.matches(&entities::conversation_messages(Some(mine))));
        assert!(!rule.matches(&entities::conversation_messages(Some(Uuid::now_v7()))));
        assert!(rule.matches(&entities::conversations(Some(Uuid::now_v7()))));
    }

    #[test]
    fn test_reply_predicate_matches_any_community() {
        let rule = reply_thread(Some(Uuid::now_v7()));
        assert!(rule.matches(&entities::community_threads(Some(Uuid::now_v7()))));
        assert!(rule.matches(&entities::community_threads(None)));
        assert!(!rule.matches(&entities::communities()));
    }

    #[test]
    fn test_type_wide_form_matches_every_owner() {
        let rule = update_profile(None);
        assert!(rule.matches(&entities::user_profile(Some(Uuid::now_v7()))));
        assert!(rule.matches(&entities::admin_users()));
    }

    #[test]
    fn test_mutations_affecting() {
        let router = catalog().unwrap();
        assert_eq!(
            router.mutations_affecting(entities::USER_TRANSACTIONS),
            vec![COMPLETE_CHECKOUT]
        );

        let product_writers: BTreeSet<_> = router
            .mutations_affecting(entities::PRODUCTS)
            .into_iter()
            .collect();
        assert_eq!(
            product_writers,
            BTreeSet::from([CREATE_PRODUCT, DELETE_PRODUCT, UPDATE_PRODUCT])
        );
    }

    #[test]
    fn test_predicate_rules_can_affect_any_type() {
        let router = catalog().unwrap();
        assert!(router
            .mutations_affecting(entities::COMMUNITY_THREADS)
            .contains(&REPLY_THREAD));
    }
}
