//! Entity types, their cache keys and how each is read.
//!
//! Every key that identifies a user-owned list takes the owner id as an
//! `Option`. A missing id leaves the param off the key, which keeps the
//! unit disabled until someone signs in.

use querysync_core::{make_key, CacheKey, ParamValue, QueryTemplate};
use uuid::Uuid;

// ============================================================================
// ENTITY TYPES
// ============================================================================

pub const USER_PROFILE: &str = "user-profile";
pub const ADMIN_USERS: &str = "admin-users";
pub const PRODUCTS: &str = "products";
pub const PRODUCT: &str = "product";
pub const SELLER_PRODUCTS: &str = "seller-products";
pub const EXPERTS: &str = "experts";
pub const EXPERT: &str = "expert";
pub const COMMUNITIES: &str = "communities";
pub const COMMUNITY: &str = "community";
pub const COMMUNITY_MEMBERS: &str = "community-members";
pub const COMMUNITY_THREADS: &str = "community-threads";
pub const THREAD_REPLIES: &str = "thread-replies";
pub const CONVERSATIONS: &str = "conversations";
pub const CONVERSATION_MESSAGES: &str = "conversation-messages";
pub const USER_TRANSACTIONS: &str = "user-transactions";
pub const SELLER_SALES: &str = "seller-sales";
pub const AFFILIATE_LINKS: &str = "affiliate-links";
pub const AFFILIATE_EARNINGS: &str = "affiliate-earnings";

/// Every entity type the marketplace caches.
pub const ALL: [&str; 18] = [
    USER_PROFILE,
    ADMIN_USERS,
    PRODUCTS,
    PRODUCT,
    SELLER_PRODUCTS,
    EXPERTS,
    EXPERT,
    COMMUNITIES,
    COMMUNITY,
    COMMUNITY_MEMBERS,
    COMMUNITY_THREADS,
    THREAD_REPLIES,
    CONVERSATIONS,
    CONVERSATION_MESSAGES,
    USER_TRANSACTIONS,
    SELLER_SALES,
    AFFILIATE_LINKS,
    AFFILIATE_EARNINGS,
];

/// Backend table names.
pub mod tables {
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
}

/// Filter value for an id column.
pub fn id_param(id: Uuid) -> ParamValue {
    ParamValue::Str(id.hyphenated().to_string())
}

// ============================================================================
// KEYS
// ============================================================================

pub fn user_profile(user_id: Option<Uuid>) -> CacheKey {
    make_key(USER_PROFILE, [("id", user_id)])
}

pub fn admin_users() -> CacheKey {
    CacheKey::new(ADMIN_USERS)
}

/// All products, optionally narrowed to one category.
pub fn products(category: Option<&str>) -> CacheKey {
    make_key(PRODUCTS, [("category", category)])
}

pub fn product(id: Option<Uuid>) -> CacheKey {
    make_key(PRODUCT, [("id", id)])
}

pub fn seller_products(seller_id: Option<Uuid>) -> CacheKey {
    make_key(SELLER_PRODUCTS, [("seller_id", seller_id)])
}

pub fn experts(approved_only: bool) -> CacheKey {
    make_key(EXPERTS, [("approved", approved_only.then_some(true))])
}

pub fn expert(id: Option<Uuid>) -> CacheKey {
    make_key(EXPERT, [("id", id)])
}

pub fn communities() -> CacheKey {
    CacheKey::new(COMMUNITIES)
}

pub fn community(id: Option<Uuid>) -> CacheKey {
    make_key(COMMUNITY, [("id", id)])
}

pub fn community_members(community_id: Option<Uuid>) -> CacheKey {
    make_key(COMMUNITY_MEMBERS, [("community_id", community_id)])
}

pub fn community_threads(community_id: Option<Uuid>) -> CacheKey {
    make_key(COMMUNITY_THREADS, [("community_id", community_id)])
}

pub fn thread_replies(thread_id: Option<Uuid>) -> CacheKey {
    make_key(THREAD_REPLIES, [("thread_id", thread_id)])
}

pub fn conversations(user_id: Option<Uuid>) -> CacheKey {
    make_key(CONVERSATIONS, [("user_id", user_id)])
}

pub fn conversation_messages(conversation_id: Option<Uuid>) -> CacheKey {
    make_key(CONVERSATION_MESSAGES, [("conversation_id", conversation_id)])
}

pub fn user_transactions(user_id: Option<Uuid>) -> CacheKey {
    make_key(USER_TRANSACTIONS, [("user_id", user_id)])
}

pub fn seller_sales(seller_id: Option<Uuid>) -> CacheKey {
    make_key(SELLER_SALES, [("seller_id", seller_id)])
}

pub fn affiliate_links(affiliate_id: Option<Uuid>) -> CacheKey {
    make_key(AFFILIATE_LINKS, [("affiliate_id", affiliate_id)])
}

pub fn affiliate_earnings(affiliate_id: Option<Uuid>) -> CacheKey {
    make_key(AFFILIATE_EARNINGS, [("affiliate_id", affiliate_id)])
}

// ============================================================================
// READS
// ============================================================================

/// The read behind a table-backed entity type.
///
/// Returns `None` for types that need more than one read.
pub fn template(entity_type: &str) -> Option<QueryTemplate> {
    let template = match entity_type {
        USER_PROFILE => QueryTemplate::new(tables::PROFILES).single(),
        ADMIN_USERS => QueryTemplate::new(tables::PROFILES).order_by("created_at", false),
        PRODUCTS => QueryTemplate::new(tables::PRODUCTS).order_by("created_at", false),
        PRODUCT => QueryTemplate::new(tables::PRODUCTS).single(),
        SELLER_PRODUCTS => QueryTemplate::new(tables::PRODUCTS).order_by("created_at", false),
        EXPERTS => QueryTemplate::new(tables::EXPERTS).order_by("headline", true),
        EXPERT => QueryTemplate::new(tables::EXPERTS).single(),
        COMMUNITIES => QueryTemplate::new(tables::COMMUNITIES).order_by("name", true),
        COMMUNITY => QueryTemplate::new(tables::COMMUNITIES).single(),
        COMMUNITY_MEMBERS => QueryTemplate::new(tables::COMMUNITY_MEMBERS),
        COMMUNITY_THREADS => {
            QueryTemplate::new(tables::COMMUNITY_THREADS).order_by("created_at", false)
        }
        THREAD_REPLIES => QueryTemplate::new(tables::THREAD_REPLIES).order_by("created_at", true),
        CONVERSATION_MESSAGES => QueryTemplate::new(tables::MESSAGES).order_by("created_at", true),
        USER_TRANSACTIONS => QueryTemplate::new(tables::TRANSACTIONS)
            .column("user_id", "buyer_id")
            .order_by("created_at", false),
        SELLER_SALES => QueryTemplate::new(tables::TRANSACTIONS).order_by("created_at", false),
        AFFILIATE_LINKS => QueryTemplate::new(tables::AFFILIATE_LINKS),
        AFFILIATE_EARNINGS => QueryTemplate::new(tables::AFFILIATE_EARNINGS),
        _ => return None,
    };
    Some(template)
}
