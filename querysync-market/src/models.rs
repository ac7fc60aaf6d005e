//! View objects and write inputs.
//!
//! Rows decode leniently: unknown columns are ignored and optional columns
//! may be missing.

use chrono::{DateTime, Utc};
use querysync_core::{Role, SyncResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{HasUpdates, ValidateNonEmpty, ValidatePositive};

// ============================================================================
// PROFILES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Fields a user may change on their own profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

impl HasUpdates for ProfileUpdate {
    fn has_any_updates(&self) -> bool {
        self.full_name.is_some() || self.avatar_url.is_some() || self.bio.is_some()
    }
}

impl ProfileUpdate {
    pub fn validate(&self) -> SyncResult<()> {
        self.validate_has_updates()?;
        if let Some(name) = &self.full_name {
            name.validate_non_empty("full_name")?;
        }
        Ok(())
    }
}

// ============================================================================
// PRODUCTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Draft,
    #[default]
    Published,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_cents: i64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: ProductStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub title: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub category: Option<String>,
}

impl NewProduct {
    pub fn validate(&self) -> SyncResult<()> {
        self.title.validate_non_empty("title")?;
        self.price_cents.validate_positive("price_cents")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductUpdate {
    #[serde(skip)]
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProductStatus>,
}

impl ProductUpdate {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            title: None,
            description: None,
            price_cents: None,
            status: None,
        }
    }

    pub fn validate(&self) -> SyncResult<()> {
        self.validate_has_updates()?;
        if let Some(title) = &self.title {
            title.validate_non_empty("title")?;
        }
        if let Some(price) = self.price_cents {
            price.validate_positive("price_cents")?;
        }
        Ok(())
    }
}

impl HasUpdates for ProductUpdate {
    fn has_any_updates(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.price_cents.is_some()
            || self.status.is_some()
    }
}

// ============================================================================
// EXPERTS AND COMMUNITIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expert {
    pub id: Uuid,
    pub user_id: Uuid,
    pub headline: String,
    pub hourly_rate_cents: i64,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default)]
    pub approved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub member_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Moderator,
    Member,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityMember {
    pub community_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityThread {
    pub id: Uuid,
    pub community_id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewThread {
    pub title: String,
    pub body: String,
}

impl NewThread {
    pub fn validate(&self) -> SyncResult<()> {
        self.title.validate_non_empty("title")?;
        self.body.validate_non_empty("body")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadReply {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

// ============================================================================
// MESSAGING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// The participant who is not `user_id`.
    pub fn counterpart(&self, user_id: Uuid) -> Uuid {
        if self.buyer_id == user_id {
            self.seller_id
        } else {
            self.buyer_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

// ============================================================================
// CHECKOUT AND AFFILIATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub product_id: Uuid,
    pub amount_cents: i64,
    pub status: TransactionStatus,
    #[serde(default)]
    pub affiliate_link_id: Option<Uuid>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Buy one product, optionally through an affiliate link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkout {
    pub product_id: Uuid,
    pub affiliate_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliateLink {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub product_id: Uuid,
    pub code: String,
    #[serde(default)]
    pub clicks: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliateEarning {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub transaction_id: Uuid,
    pub amount_cents: i64,
}
