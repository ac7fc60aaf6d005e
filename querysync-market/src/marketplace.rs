//! The marketplace façade.
//!
//! One constructor per read or write the application makes. Reads come
//! back as [`FetchUnit`]s bound to the shared cache; writes as
//! [`MutationUnit`]s carrying their invalidation rule and notifications.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use querysync_cache::{FetchOptions, FetchUnit, InvalidationRouter, MutationUnit, QueryCache};
use querysync_core::{
    mutator_fn, CacheError, CacheKey, CurrentUser, DataService, IdentityProvider, Notifier,
    ParamValue, QueryFetcher, ReadQuery, Role, ServiceFetcher, StaleWriteError, SyncError,
    SyncResult, TracingNotifier, ValidationError, WriteRequest,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::{self, id_param, tables};
use crate::models::{
    AffiliateEarning, AffiliateLink, Checkout, Community, CommunityMember, CommunityThread,
    Conversation, Expert, Message, NewProduct, NewThread, Product, ProductUpdate, ProfileUpdate,
    ThreadReply, Transaction, UserProfile,
};
use crate::rules;
use crate::validation::ValidateNonEmpty;

/// Share of a sale paid to the referring affiliate.
pub const AFFILIATE_COMMISSION_PERCENT: i64 = 10;

/// Entry point for marketplace data.
#[derive(Clone)]
pub struct Marketplace {
    cache: QueryCache,
    service: Arc<dyn DataService>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn Notifier>,
    catalog: Arc<InvalidationRouter>,
}

impl Marketplace {
    /// Build the façade. Notifications go to the log until
    /// [`with_notifier`](Self::with_notifier) is called.
    pub fn new(
        cache: &QueryCache,
        service: Arc<dyn DataService>,
        identity: Arc<dyn IdentityProvider>,
    ) -> SyncResult<Self> {
        let catalog = rules::catalog()?;
        info!(rules = catalog.len(), "Marketplace catalog loaded");
        Ok(Self {
            cache: cache.clone(),
            service,
            identity,
            notifier: Arc::new(TracingNotifier),
            catalog: Arc::new(catalog),
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn catalog(&self) -> &InvalidationRouter {
        &self.catalog
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.identity.current_user()
    }

    fn user_id(&self) -> Option<Uuid> {
        self.identity.current_user_id()
    }

    fn require_user(&self, operation: &str) -> SyncResult<CurrentUser> {
        self.current_user().ok_or_else(|| {
            ValidationError::IdentityRequired {
                operation: operation.to_string(),
            }
            .into()
        })
    }

    fn table_fetcher(&self, entity_type: &str) -> SyncResult<Arc<dyn QueryFetcher>> {
        let template = entities::template(entity_type).ok_or_else(|| {
            SyncError::from(ValidationError::InvalidParam {
                param: "entity_type".to_string(),
                reason: format!("{entity_type} has no table read"),
            })
        })?;
        Ok(Arc::new(ServiceFetcher::new(Arc::clone(&self.service), template)))
    }

    /// Mount a table-backed read, disabled until `required` is on the key.
    fn read<T: DeserializeOwned>(&self, key: CacheKey, required: &[&str]) -> SyncResult<FetchUnit<T>> {
        let fetcher = self.table_fetcher(key.entity_type())?;
        let options = required
            .iter()
            .fold(FetchOptions::new(), |options, param| options.require(*param));
        FetchUnit::mount(&self.cache, key, fetcher, options)
    }

    // ========================================================================
    // PROFILES
    // ========================================================================

    /// The signed-in user's profile. Disabled while signed out.
    pub fn profile(&self) -> SyncResult<FetchUnit<Option<UserProfile>>> {
        self.read(entities::user_profile(self.user_id()), &["id"])
    }

    pub fn profile_of(&self, user_id: Option<Uuid>) -> SyncResult<FetchUnit<Option<UserProfile>>> {
        self.read(entities::user_profile(user_id), &["id"])
    }

    /// Every profile. Enabled for admins only.
    pub fn admin_users(&self) -> SyncResult<FetchUnit<Vec<UserProfile>>> {
        let is_admin = self.current_user().is_some_and(|u| u.is_admin());
        FetchUnit::mount(
            &self.cache,
            entities::admin_users(),
            self.table_fetcher(entities::ADMIN_USERS)?,
            FetchOptions::new().enabled(is_admin),
        )
    }

    /// Merge changed fields into the signed-in user's profile.
    ///
    /// The cached profile shows the change at once and is restored if the
    /// write fails.
    pub fn update_profile(&self) -> SyncResult<MutationUnit<ProfileUpdate, UserProfile>> {
        let user_id = self.require_user(rules::UPDATE_PROFILE)?.id;
        let key = entities::user_profile(Some(user_id));
        let service = Arc::clone(&self.service);
        let cache = self.cache.clone();

        let mutator = mutator_fn(move |update: ProfileUpdate| {
            let service = Arc::clone(&service);
            async move {
                let request = WriteRequest::update(tables::PROFILES, to_payload(&update)?)
                    .filter("id", id_param(user_id));
                let rows = service.write(request).await?;
                decode(entities::USER_PROFILE, first_row(rows)?)
            }
        });

        Ok(MutationUnit::new(&self.cache, rules::update_profile(Some(user_id)), mutator)
            .precondition(ProfileUpdate::validate)
            .optimistic(move |update: &ProfileUpdate| {
                merged(&cache, &key, update)
                    .map(|value| vec![(key.clone(), value)])
                    .unwrap_or_default()
            })
            .notify(Arc::clone(&self.notifier), "Profile updated", "Failed to update profile"))
    }

    // ========================================================================
    // PRODUCTS
    // ========================================================================

    pub fn products(&self, category: Option<&str>) -> SyncResult<FetchUnit<Vec<Product>>> {
        self.read(entities::products(category), &[])
    }

    /// A single product. `None` data means no such product.
    pub fn product(&self, id: Option<Uuid>) -> SyncResult<FetchUnit<Option<Product>>> {
        self.read(entities::product(id), &["id"])
    }

    /// The signed-in seller's listings.
    pub fn seller_products(&self) -> SyncResult<FetchUnit<Vec<Product>>> {
        self.read(entities::seller_products(self.user_id()), &["seller_id"])
    }

    pub fn create_product(&self) -> SyncResult<MutationUnit<NewProduct, Product>> {
        let seller_id = self.require_user(rules::CREATE_PRODUCT)?.id;
        let service = Arc::clone(&self.service);

        let mutator = mutator_fn(move |product: NewProduct| {
            let service = Arc::clone(&service);
            async move {
                let mut payload = to_payload(&product)?;
                payload["seller_id"] = json!(seller_id);
                payload["status"] = json!("published");
                payload["created_at"] = json!(Utc::now());
                let row = service.write(WriteRequest::insert(tables::PRODUCTS, payload)).await?;
                decode(entities::PRODUCT, row)
            }
        });

        Ok(MutationUnit::new(&self.cache, rules::create_product(Some(seller_id)), mutator)
            .precondition(NewProduct::validate)
            .notify(Arc::clone(&self.notifier), "Product created", "Failed to create product"))
    }

    /// Edit one of the signed-in seller's products.
    pub fn update_product(&self, product_id: Uuid) -> SyncResult<MutationUnit<ProductUpdate, Product>> {
        let seller_id = self.require_user(rules::UPDATE_PRODUCT)?.id;
        let service = Arc::clone(&self.service);

        let mutator = mutator_fn(move |update: ProductUpdate| {
            let service = Arc::clone(&service);
            async move {
                let request = WriteRequest::update(tables::PRODUCTS, to_payload(&update)?)
                    .filter("id", id_param(update.id))
                    .filter("seller_id", id_param(seller_id));
                let rows = service.write(request).await?;
                decode(entities::PRODUCT, first_row(rows)?)
            }
        });

        Ok(MutationUnit::new(
            &self.cache,
            rules::update_product(Some(product_id), Some(seller_id)),
            mutator,
        )
        .precondition(move |update: &ProductUpdate| {
            if update.id != product_id {
                return Err(ValidationError::InvalidParam {
                    param: "id".to_string(),
                    reason: format!("unit is bound to product {product_id}"),
                }
                .into());
            }
            update.validate()
        })
        .notify(Arc::clone(&self.notifier), "Product updated", "Failed to update product"))
    }

    /// Delete a product by id. Returns the number of rows removed.
    pub fn delete_product(&self) -> SyncResult<MutationUnit<Uuid, u64>> {
        let seller_id = self.require_user(rules::DELETE_PRODUCT)?.id;
        let service = Arc::clone(&self.service);

        let mutator = mutator_fn(move |product_id: Uuid| {
            let service = Arc::clone(&service);
            async move {
                let request = WriteRequest::delete(tables::PRODUCTS)
                    .filter("id", id_param(product_id))
                    .filter("seller_id", id_param(seller_id));
                let result = service.write(request).await?;
                Ok(result.get("deleted").and_then(Value::as_u64).unwrap_or_default())
            }
        });

        Ok(MutationUnit::new(&self.cache, rules::delete_product(Some(seller_id)), mutator)
            .notify(Arc::clone(&self.notifier), "Product deleted", "Failed to delete product"))
    }

    // ========================================================================
    // EXPERTS
    // ========================================================================

    pub fn experts(&self, approved_only: bool) -> SyncResult<FetchUnit<Vec<Expert>>> {
        self.read(entities::experts(approved_only), &[])
    }

    pub fn expert(&self, id: Option<Uuid>) -> SyncResult<FetchUnit<Option<Expert>>> {
        self.read(entities::expert(id), &["id"])
    }

    /// Approve an expert application. Admins only.
    pub fn approve_expert(&self) -> SyncResult<MutationUnit<Uuid, Expert>> {
        let admin = self.require_user(rules::APPROVE_EXPERT)?;
        let service = Arc::clone(&self.service);

        let mutator = mutator_fn(move |expert_id: Uuid| {
            let service = Arc::clone(&service);
            async move {
                let request = WriteRequest::update(tables::EXPERTS, json!({ "approved": true }))
                    .filter("id", id_param(expert_id));
                let rows = service.write(request).await?;
                decode(entities::EXPERT, first_row(rows)?)
            }
        });

        Ok(MutationUnit::new(&self.cache, rules::approve_expert(), mutator)
            .precondition(move |_: &Uuid| {
                if admin.role != Role::Admin {
                    return Err(ValidationError::InvalidParam {
                        param: "role".to_string(),
                        reason: "approving experts requires the admin role".to_string(),
                    }
                    .into());
                }
                Ok(())
            })
            .notify(Arc::clone(&self.notifier), "Expert approved", "Failed to approve expert"))
    }

    // ========================================================================
    // COMMUNITIES
    // ========================================================================

    pub fn communities(&self) -> SyncResult<FetchUnit<Vec<Community>>> {
        self.read(entities::communities(), &[])
    }

    pub fn community(&self, id: Option<Uuid>) -> SyncResult<FetchUnit<Option<Community>>> {
        self.read(entities::community(id), &["id"])
    }

    pub fn community_members(
        &self,
        community_id: Option<Uuid>,
    ) -> SyncResult<FetchUnit<Vec<CommunityMember>>> {
        self.read(entities::community_members(community_id), &["community_id"])
    }

    pub fn community_threads(
        &self,
        community_id: Option<Uuid>,
    ) -> SyncResult<FetchUnit<Vec<CommunityThread>>> {
        self.read(entities::community_threads(community_id), &["community_id"])
    }

    pub fn thread_replies(&self, thread_id: Option<Uuid>) -> SyncResult<FetchUnit<Vec<ThreadReply>>> {
        self.read(entities::thread_replies(thread_id), &["thread_id"])
    }

    pub fn join_community(&self, community_id: Uuid) -> SyncResult<MutationUnit<(), CommunityMember>> {
        let user_id = self.require_user(rules::JOIN_COMMUNITY)?.id;
        let service = Arc::clone(&self.service);

        let mutator = mutator_fn(move |_: ()| {
            let service = Arc::clone(&service);
            async move {
                let existing = service
                    .read(
                        ReadQuery::table(tables::COMMUNITY_MEMBERS)
                            .filter("community_id", id_param(community_id))
                            .filter("user_id", id_param(user_id)),
                    )
                    .await?;
                if existing.as_array().is_some_and(|rows| !rows.is_empty()) {
                    return Err(StaleWriteError::Conflict {
                        entity_type: entities::COMMUNITY_MEMBERS.to_string(),
                        reason: "already a member".to_string(),
                    }
                    .into());
                }

                let row = service
                    .write(WriteRequest::insert(
                        tables::COMMUNITY_MEMBERS,
                        json!({
                            "community_id": community_id,
                            "user_id": user_id,
                            "role": "member",
                        }),
                    ))
                    .await?;
                decode(entities::COMMUNITY_MEMBERS, row)
            }
        });

        Ok(MutationUnit::new(&self.cache, rules::join_community(Some(community_id)), mutator)
            .notify(Arc::clone(&self.notifier), "Joined community", "Failed to join community"))
    }

    pub fn create_thread(&self, community_id: Uuid) -> SyncResult<MutationUnit<NewThread, CommunityThread>> {
        let author_id = self.require_user(rules::CREATE_THREAD)?.id;
        let service = Arc::clone(&self.service);

        let mutator = mutator_fn(move |thread: NewThread| {
            let service = Arc::clone(&service);
            async move {
                let payload = json!({
                    "community_id": community_id,
                    "author_id": author_id,
                    "title": thread.title,
                    "body": thread.body,
                    "created_at": Utc::now(),
                });
                let row = service
                    .write(WriteRequest::insert(tables::COMMUNITY_THREADS, payload))
                    .await?;
                decode(entities::COMMUNITY_THREADS, row)
            }
        });

        Ok(MutationUnit::new(&self.cache, rules::create_thread(Some(community_id)), mutator)
            .precondition(NewThread::validate)
            .notify(Arc::clone(&self.notifier), "Thread posted", "Failed to post thread"))
    }

    pub fn reply_thread(&self, thread_id: Uuid) -> SyncResult<MutationUnit<String, ThreadReply>> {
        let author_id = self.require_user(rules::REPLY_THREAD)?.id;
        let service = Arc::clone(&self.service);

        let mutator = mutator_fn(move |body: String| {
            let service = Arc::clone(&service);
            async move {
                let payload = json!({
                    "thread_id": thread_id,
                    "author_id": author_id,
                    "body": body,
                    "created_at": Utc::now(),
                });
                let row = service
                    .write(WriteRequest::insert(tables::THREAD_REPLIES, payload))
                    .await?;
                decode(entities::THREAD_REPLIES, row)
            }
        });

        Ok(MutationUnit::new(&self.cache, rules::reply_thread(Some(thread_id)), mutator)
            .precondition(|body: &String| body.validate_non_empty("body"))
            .notify(Arc::clone(&self.notifier), "Reply posted", "Failed to post reply"))
    }

    // ========================================================================
    // MESSAGING
    // ========================================================================

    /// Conversations where the signed-in user is buyer or seller, most
    /// recent first.
    pub fn conversations(&self) -> SyncResult<FetchUnit<Vec<Conversation>>> {
        let fetcher: Arc<dyn QueryFetcher> = Arc::new(ConversationFetcher {
            service: Arc::clone(&self.service),
        });
        FetchUnit::mount(
            &self.cache,
            entities::conversations(self.user_id()),
            fetcher,
            FetchOptions::new().require("user_id"),
        )
    }

    pub fn conversation_messages(
        &self,
        conversation_id: Option<Uuid>,
    ) -> SyncResult<FetchUnit<Vec<Message>>> {
        self.read(entities::conversation_messages(conversation_id), &["conversation_id"])
    }

    /// Send a message. It is appended to the cached thread before the
    /// write and removed again if the write fails.
    pub fn send_message(&self, conversation_id: Uuid) -> SyncResult<MutationUnit<String, Message>> {
        let sender_id = self.require_user(rules::SEND_MESSAGE)?.id;
        let key = entities::conversation_messages(Some(conversation_id));
        let service = Arc::clone(&self.service);
        let cache = self.cache.clone();

        let mutator = mutator_fn(move |body: String| {
            let service = Arc::clone(&service);
            async move {
                let now = Utc::now();
                let row = service
                    .write(WriteRequest::insert(
                        tables::MESSAGES,
                        json!({
                            "conversation_id": conversation_id,
                            "sender_id": sender_id,
                            "body": body,
                            "created_at": now,
                        }),
                    ))
                    .await?;
                // Committed from here on; the timestamp is best effort.
                let touch = WriteRequest::update(tables::CONVERSATIONS, json!({ "last_message_at": now }))
                    .filter("id", id_param(conversation_id));
                if let Err(error) = service.write(touch).await {
                    warn!(
                        conversation = %conversation_id,
                        error = %error,
                        "Message stored but conversation timestamp not updated"
                    );
                }
                decode(entities::CONVERSATION_MESSAGES, row)
            }
        });

        Ok(MutationUnit::new(&self.cache, rules::send_message(Some(conversation_id)), mutator)
            .precondition(|body: &String| body.validate_non_empty("body"))
            .optimistic(move |body: &String| {
                let mut thread = cache
                    .snapshot(&key)
                    .and_then(|s| s.data)
                    .and_then(|data| data.as_array().cloned())
                    .unwrap_or_default();
                thread.push(json!({
                    "id": Uuid::now_v7(),
                    "conversation_id": conversation_id,
                    "sender_id": sender_id,
                    "body": body,
                    "created_at": Utc::now(),
                }));
                vec![(key.clone(), Value::Array(thread))]
            })
            .notify(Arc::clone(&self.notifier), "Message sent", "Failed to send message"))
    }

    // ========================================================================
    // CHECKOUT AND AFFILIATES
    // ========================================================================

    /// The signed-in user's purchases.
    pub fn my_transactions(&self) -> SyncResult<FetchUnit<Vec<Transaction>>> {
        self.read(entities::user_transactions(self.user_id()), &["user_id"])
    }

    /// Sales of the signed-in seller.
    pub fn seller_sales(&self) -> SyncResult<FetchUnit<Vec<Transaction>>> {
        self.read(entities::seller_sales(self.user_id()), &["seller_id"])
    }

    pub fn affiliate_links(&self) -> SyncResult<FetchUnit<Vec<AffiliateLink>>> {
        self.read(entities::affiliate_links(self.user_id()), &["affiliate_id"])
    }

    pub fn affiliate_earnings(&self) -> SyncResult<FetchUnit<Vec<AffiliateEarning>>> {
        self.read(entities::affiliate_earnings(self.user_id()), &["affiliate_id"])
    }

    /// Buy a product.
    ///
    /// Records a completed transaction at the listed price. With an
    /// affiliate code, the link owner is credited
    /// [`AFFILIATE_COMMISSION_PERCENT`] of the amount.
    pub fn complete_checkout(&self) -> SyncResult<MutationUnit<Checkout, Transaction>> {
        let buyer_id = self.require_user(rules::COMPLETE_CHECKOUT)?.id;
        let service = Arc::clone(&self.service);

        let mutator = mutator_fn(move |checkout: Checkout| {
            let service = Arc::clone(&service);
            async move { record_checkout(service.as_ref(), buyer_id, checkout).await }
        });

        Ok(MutationUnit::new(&self.cache, rules::complete_checkout(), mutator)
            .precondition(move |checkout: &Checkout| match &checkout.affiliate_code {
                Some(code) => code.validate_non_empty("affiliate_code"),
                None => Ok(()),
            })
            .notify(Arc::clone(&self.notifier), "Purchase complete", "Checkout failed"))
    }

    pub fn create_affiliate_link(&self) -> SyncResult<MutationUnit<Uuid, AffiliateLink>> {
        let affiliate_id = self.require_user(rules::CREATE_AFFILIATE_LINK)?.id;
        let service = Arc::clone(&self.service);

        let mutator = mutator_fn(move |product_id: Uuid| {
            let service = Arc::clone(&service);
            async move {
                let code = affiliate_code(affiliate_id, product_id);
                let row = service
                    .write(WriteRequest::insert(
                        tables::AFFILIATE_LINKS,
                        json!({
                            "affiliate_id": affiliate_id,
                            "product_id": product_id,
                            "code": code,
                            "clicks": 0,
                        }),
                    ))
                    .await?;
                decode(entities::AFFILIATE_LINKS, row)
            }
        });

        Ok(MutationUnit::new(&self.cache, rules::create_affiliate_link(Some(affiliate_id)), mutator)
            .notify(Arc::clone(&self.notifier), "Affiliate link created", "Failed to create affiliate link"))
    }
}

impl fmt::Debug for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marketplace")
            .field("cache", &self.cache)
            .field("rules", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// FETCHERS
// ============================================================================

/// Reads conversations from both sides of the buyer/seller relation.
struct ConversationFetcher {
    service: Arc<dyn DataService>,
}

#[async_trait]
impl QueryFetcher for ConversationFetcher {
    async fn fetch(&self, key: &CacheKey) -> SyncResult<Value> {
        let user = key.param("user_id").cloned().ok_or_else(|| {
            SyncError::from(ValidationError::RequiredParamMissing {
                entity_type: key.entity_type().to_string(),
                param: "user_id".to_string(),
            })
        })?;

        let mut merged: BTreeMap<String, Value> = BTreeMap::new();
        for column in ["buyer_id", "seller_id"] {
            let rows = self
                .service
                .read(ReadQuery::table(tables::CONVERSATIONS).filter(column, user.clone()))
                .await?;
            for row in rows.as_array().into_iter().flatten() {
                let id = row.get("id").and_then(Value::as_str).unwrap_or_default();
                merged.insert(id.to_string(), row.clone());
            }
        }

        let mut rows: Vec<Value> = merged.into_values().collect();
        rows.sort_by(|a, b| {
            let at = |row: &Value| row.get("last_message_at").and_then(Value::as_str).map(str::to_owned);
            at(b).cmp(&at(a))
        });
        debug!(key = %key, conversations = rows.len(), "Merged conversations");
        Ok(Value::Array(rows))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

async fn record_checkout(
    service: &dyn DataService,
    buyer_id: Uuid,
    checkout: Checkout,
) -> SyncResult<Transaction> {
    let mut product_query = ReadQuery::table(tables::PRODUCTS).filter("id", id_param(checkout.product_id));
    product_query.expect_single = true;
    let product: Product = decode(entities::PRODUCT, service.read(product_query).await?)?;
    if product.seller_id == buyer_id {
        return Err(ValidationError::InvalidPayload {
            reason: "sellers cannot buy their own products".to_string(),
        }
        .into());
    }

    let link = match &checkout.affiliate_code {
        Some(code) => {
            let mut query = ReadQuery::table(tables::AFFILIATE_LINKS)
                .filter("code", ParamValue::Str(code.clone()));
            query.expect_single = true;
            let link: AffiliateLink = match service.read(query).await {
                Ok(row) => decode(entities::AFFILIATE_LINKS, row)?,
                Err(error) if error.is_not_found() => {
                    return Err(ValidationError::InvalidParam {
                        param: "affiliate_code".to_string(),
                        reason: format!("unknown code {code}"),
                    }
                    .into())
                }
                Err(error) => return Err(error),
            };
            (link.product_id == product.id).then_some(link)
        }
        None => None,
    };

    let row = service
        .write(WriteRequest::insert(
            tables::TRANSACTIONS,
            json!({
                "buyer_id": buyer_id,
                "seller_id": product.seller_id,
                "product_id": product.id,
                "amount_cents": product.price_cents,
                "status": "completed",
                "affiliate_link_id": link.as_ref().map(|l| l.id),
                "created_at": Utc::now(),
            }),
        ))
        .await?;
    let transaction: Transaction = decode(entities::USER_TRANSACTIONS, row)?;

    if let Some(link) = link {
        let commission = transaction.amount_cents * AFFILIATE_COMMISSION_PERCENT / 100;
        let earning = WriteRequest::insert(
            tables::AFFILIATE_EARNINGS,
            json!({
                "affiliate_id": link.affiliate_id,
                "transaction_id": transaction.id,
                "amount_cents": commission,
            }),
        );
        // Committed from here on; the credit is best effort.
        match service.write(earning).await {
            Ok(_) => debug!(transaction = %transaction.id, commission, "Credited affiliate"),
            Err(error) => warn!(
                transaction = %transaction.id,
                affiliate = %link.affiliate_id,
                commission,
                error = %error,
                "Sale recorded but affiliate credit failed"
            ),
        }
    }
    Ok(transaction)
}

fn affiliate_code(affiliate_id: Uuid, product_id: Uuid) -> String {
    let a = affiliate_id.simple().to_string();
    let p = product_id.simple().to_string();
    format!("{}-{}", &a[a.len() - 6..], &p[p.len() - 6..]).to_uppercase()
}

fn to_payload<T: serde::Serialize>(input: &T) -> SyncResult<Value> {
    serde_json::to_value(input).map_err(|e| {
        ValidationError::InvalidPayload {
            reason: e.to_string(),
        }
        .into()
    })
}

fn decode<T: DeserializeOwned>(entity_type: &str, value: Value) -> SyncResult<T> {
    serde_json::from_value(value).map_err(|e| {
        CacheError::Decode {
            entity_type: entity_type.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// First row of an update result.
fn first_row(rows: Value) -> SyncResult<Value> {
    match rows {
        Value::Array(rows) => rows
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::not_found("write", "no row returned")),
        row => Ok(row),
    }
}

/// Cached profile with `update` applied, if a profile is cached.
fn merged(cache: &QueryCache, key: &CacheKey, update: &ProfileUpdate) -> Option<Value> {
    let data = cache.snapshot(key)?.data?;
    let mut profile = Value::clone(&data);
    let fields = profile.as_object_mut()?;
    if let Ok(Value::Object(changes)) = serde_json::to_value(update) {
        fields.extend(changes);
    }
    Some(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affiliate_code_shape() {
        let code = affiliate_code(Uuid::now_v7(), Uuid::now_v7());
        assert_eq!(code.len(), 13);
        assert_eq!(code, code.to_uppercase());
    }

    #[test]
    fn test_first_row() {
        assert_eq!(first_row(json!([{"a": 1}, {"a": 2}])).unwrap(), json!({"a": 1}));
        assert_eq!(first_row(json!({"a": 1})).unwrap(), json!({"a": 1}));
        assert!(first_row(json!([])).unwrap_err().is_not_found());
    }

    #[test]
    fn test_decode_failure_names_entity() {
        let err = decode::<Product>(entities::PRODUCT, json!({"id": 1})).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Cache(CacheError::Decode { ref entity_type, .. }) if entity_type == "product"
        ));
    }

    #[tokio::test]
    async fn test_merged_profile() {
        let cache = QueryCache::create(querysync_core::CacheConfig::default()).unwrap();
        let key = entities::user_profile(Some(Uuid::now_v7()));
        let update = ProfileUpdate {
            bio: Some("Collector".into()),
            ..ProfileUpdate::default()
        };
        assert!(merged(&cache, &key, &update).is_none());

        cache
            .set_data(key.clone(), json!({"full_name": "Bea", "bio": null}))
            .unwrap();
        let value = merged(&cache, &key, &update).unwrap();
        assert_eq!(value, json!({"full_name": "Bea", "bio": "Collector"}));
    }
}
