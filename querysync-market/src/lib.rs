//! querysync marketplace catalog
//!
//! The marketplace's reads and writes declared on top of the query cache:
//! entity keys, view models, one invalidation rule per write, and the
//! [`Marketplace`] façade that hands out fetch and mutation units.
//!
//! ```ignore
//! let cache = QueryCache::create(CacheConfig::from_env())?;
//! let market = Marketplace::new(&cache, service, identity)?;
//!
//! let mut orders = market.my_transactions()?;
//! let state = orders.settled().await?;
//!
//! let checkout = market.complete_checkout()?;
//! checkout.mutate(Checkout { product_id, affiliate_code: None }).await?;
//! ```

pub mod entities;
pub mod marketplace;
pub mod models;
pub mod rules;
pub mod validation;

pub use marketplace::{Marketplace, AFFILIATE_COMMISSION_PERCENT};
pub use models::{
    AffiliateEarning, AffiliateLink, Checkout, Community, CommunityMember, CommunityThread,
    Conversation, Expert, MemberRole, Message, NewProduct, NewThread, Product, ProductStatus,
    ProductUpdate, ProfileUpdate, ThreadReply, Transaction, TransactionStatus, UserProfile,
};
pub use rules::catalog;
