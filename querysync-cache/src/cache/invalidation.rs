//! Declared invalidation rules.
//!
//! Each mutation declares up front which cached entries its success makes
//! stale. A rule is a list of [`KeyPattern`]s; the [`InvalidationRouter`]
//! holds the rules for a whole application so the dependency graph between
//! writes and reads can be inspected in one place.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use querysync_core::{CacheError, CacheKey, ParamValue, SyncResult};
use serde::Serialize;

use super::registry::QueryCache;

type KeyMatcher = Arc<dyn Fn(&CacheKey) -> bool + Send + Sync>;

/// Selects cache keys.
#[derive(Clone)]
pub enum KeyPattern {
    /// Exactly one key.
    Exact(CacheKey),
    /// Keys of one entity type whose params agree with `params`.
    ///
    /// A param is compared only when both the pattern and the key carry it.
    /// An empty `params` selects the whole entity type.
    Prefix {
        entity_type: String,
        params: BTreeMap<String, ParamValue>,
    },
    /// Keys accepted by a named closure.
    Predicate { name: String, matcher: KeyMatcher },
}

impl KeyPattern {
    pub fn exact(key: CacheKey) -> Self {
        Self::Exact(key)
    }

    /// Every key of an entity type.
    pub fn entity(entity_type: impl Into<String>) -> Self {
        Self::Prefix {
            entity_type: entity_type.into(),
            params: BTreeMap::new(),
        }
    }

    /// Prefix pattern taking its entity type and params from a key.
    pub fn prefix(key: &CacheKey) -> Self {
        Self::Prefix {
            entity_type: key.entity_type().to_string(),
            params: key.params().clone(),
        }
    }

    pub fn predicate<F>(name: impl Into<String>, matcher: F) -> Self
    where
        F: Fn(&CacheKey) -> bool + Send + Sync + 'static,
    {
        Self::Predicate {
            name: name.into(),
            matcher: Arc::new(matcher),
        }
    }

    /// Check whether a key is selected.
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::Prefix {
                entity_type,
                params,
            } => {
                entity_type == key.entity_type()
                    && params
                        .iter()
                        .all(|(name, value)| key.param(name).map_or(true, |v| v == value))
            }
            Self::Predicate { matcher, .. } => matcher(key),
        }
    }

    /// The entity type this pattern is confined to. `None` for predicates.
    pub fn entity_type(&self) -> Option<&str> {
        match self {
            Self::Exact(key) => Some(key.entity_type()),
            Self::Prefix { entity_type, .. } => Some(entity_type),
            Self::Predicate { .. } => None,
        }
    }

    /// Whether the pattern could select some key of `entity_type`.
    ///
    /// Predicates are evaluated against the type-wide key.
    pub fn could_affect(&self, entity_type: &str) -> bool {
        match self.entity_type() {
            Some(own) => own == entity_type,
            None => self.matches(&CacheKey::new(entity_type)),
        }
    }
}

impl fmt::Debug for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => f.debug_tuple("Exact").field(key).finish(),
            Self::Prefix {
                entity_type,
                params,
            } => f
                .debug_struct("Prefix")
                .field("entity_type", entity_type)
                .field("params", params)
                .finish(),
            Self::Predicate { name, .. } => f
                .debug_struct("Predicate")
                .field("name", name)
                .finish_non_exhaustive(),
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => write!(f, "={key}"),
            Self::Prefix {
                entity_type,
                params,
            } => {
                write!(f, "{entity_type}")?;
                if !params.is_empty() {
                    let rendered: Vec<String> =
                        params.iter().map(|(k, v)| format!("{k}={v}")).collect();
                    write!(f, "{{{}}}", rendered.join(","))?;
                }
                write!(f, "*")
            }
            Self::Predicate { name, .. } => write!(f, "?{name}"),
        }
    }
}

/// The set of patterns one mutation invalidates on success.
#[derive(Debug, Clone)]
pub struct InvalidationRule {
    name: String,
    patterns: Vec<KeyPattern>,
}

impl InvalidationRule {
    /// An empty rule. Applying it invalidates nothing.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            patterns: Vec::new(),
        }
    }

    pub fn pattern(mut self, pattern: KeyPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn exact(self, key: CacheKey) -> Self {
        self.pattern(KeyPattern::exact(key))
    }

    pub fn entity(self, entity_type: impl Into<String>) -> Self {
        self.pattern(KeyPattern::entity(entity_type))
    }

    pub fn prefix(self, key: &CacheKey) -> Self {
        self.pattern(KeyPattern::prefix(key))
    }

    pub fn predicate<F>(self, name: impl Into<String>, matcher: F) -> Self
    where
        F: Fn(&CacheKey) -> bool + Send + Sync + 'static,
    {
        self.pattern(KeyPattern::predicate(name, matcher))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn patterns(&self) -> &[KeyPattern] {
        &self.patterns
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        self.patterns.iter().any(|p| p.matches(key))
    }

    pub fn could_affect(&self, entity_type: &str) -> bool {
        self.patterns.iter().any(|p| p.could_affect(entity_type))
    }

    /// Entity types named by exact and prefix patterns.
    pub fn entity_types(&self) -> BTreeSet<String> {
        self.patterns
            .iter()
            .filter_map(|p| p.entity_type().map(str::to_string))
            .collect()
    }
}

/// Outcome of one invalidation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub rule: String,
    /// Keys marked stale.
    pub matched: Vec<CacheKey>,
    /// Subset of `matched` that had subscribers and got a new request.
    pub refetched: Vec<CacheKey>,
}

impl InvalidationReport {
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }
}

/// Registry of every declared invalidation rule.
#[derive(Debug, Clone, Default)]
pub struct InvalidationRouter {
    rules: BTreeMap<String, InvalidationRule>,
}

impl InvalidationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. Rule names are unique.
    pub fn declare(&mut self, rule: InvalidationRule) -> SyncResult<()> {
        if self.rules.contains_key(rule.name()) {
            return Err(CacheError::DuplicateRule {
                name: rule.name().to_string(),
            }
            .into());
        }
        self.rules.insert(rule.name().to_string(), rule);
        Ok(())
    }

    /// Look up a rule by name.
    pub fn rule(&self, name: &str) -> SyncResult<&InvalidationRule> {
        self.rules.get(name).ok_or_else(|| {
            CacheError::UnknownRule {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn rules(&self) -> impl Iterator<Item = &InvalidationRule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Keys currently cached that `rule` selects.
    pub fn resolve(rule: &InvalidationRule, cache: &QueryCache) -> HashSet<CacheKey> {
        Self::resolve_keys(rule, cache.keys().iter())
    }

    /// Keys in `keys` that `rule` selects.
    pub fn resolve_keys<'a>(
        rule: &InvalidationRule,
        keys: impl IntoIterator<Item = &'a CacheKey>,
    ) -> HashSet<CacheKey> {
        keys.into_iter()
            .filter(|key| rule.matches(key))
            .cloned()
            .collect()
    }

    /// Names of the rules that can invalidate `entity_type`.
    pub fn mutations_affecting(&self, entity_type: &str) -> Vec<&str> {
        self.rules
            .values()
            .filter(|rule| rule.could_affect(entity_type))
            .map(InvalidationRule::name)
            .collect()
    }

    /// Rule name to the entity types it names.
    pub fn dependency_graph(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.rules
            .values()
            .map(|rule| (rule.name().to_string(), rule.entity_types()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querysync_core::SyncError;

    fn profile(id: &str) -> CacheKey {
        CacheKey::builder("user-profile").param("id", id).build()
    }

    #[test]
    fn test_exact_matches_only_itself() {
        let pattern = KeyPattern::exact(profile("u1"));
        assert!(pattern.matches(&profile("u1")));
        assert!(!pattern.matches(&profile("u2")));
        assert!(!pattern.matches(&CacheKey::new("user-profile")));
    }

    #[test]
    fn test_entity_pattern_matches_all_params() {
        let pattern = KeyPattern::entity("products");
        assert!(pattern.matches(&CacheKey::new("products")));
        assert!(pattern.matches(&CacheKey::builder("products").param("category", "art").build()));
        assert!(!pattern.matches(&CacheKey::new("product")));
    }

    #[test]
    fn test_prefix_ignores_params_absent_on_either_side() {
        let pattern = KeyPattern::prefix(
            &CacheKey::builder("community-threads")
                .param("community_id", "c1")
                .build(),
        );

        let same = CacheKey::builder("community-threads")
            .param("community_id", "c1")
            .param("page", 2)
            .build();
        let other = CacheKey::builder("community-threads")
            .param("community_id", "c2")
            .build();
        let unscoped = CacheKey::builder("community-threads").param("page", 1).build();

        assert!(pattern.matches(&same));
        assert!(!pattern.matches(&other));
        assert!(pattern.matches(&unscoped));
    }

    #[test]
    fn test_predicate_pattern() {
        let pattern = KeyPattern::predicate("admin-any", |k: &CacheKey| {
            k.entity_type().starts_with("admin-")
        });
        assert!(pattern.matches(&CacheKey::new("admin-users")));
        assert!(!pattern.matches(&CacheKey::new("experts")));
        assert_eq!(pattern.entity_type(), None);
        assert!(pattern.could_affect("admin-users"));
        assert_eq!(pattern.to_string(), "?admin-any");
        assert!(format!("{pattern:?}").contains("admin-any"));
    }

    #[test]
    fn test_empty_rule_matches_nothing() {
        let rule = InvalidationRule::new("noop");
        assert!(!rule.matches(&profile("u1")));
        assert!(rule.entity_types().is_empty());
    }

    #[test]
    fn test_rule_matches_any_pattern() {
        let rule = InvalidationRule::new("update-profile")
            .exact(profile("u1"))
            .entity("admin-users");

        assert!(rule.matches(&profile("u1")));
        assert!(rule.matches(&CacheKey::new("admin-users")));
        assert!(!rule.matches(&profile("u2")));
        assert_eq!(
            rule.entity_types().into_iter().collect::<Vec<_>>(),
            vec!["admin-users".to_string(), "user-profile".to_string()]
        );
    }

    #[test]
    fn test_resolve_keys_returns_exact_selection() {
        let rule = InvalidationRule::new("update-profile").exact(profile("u1"));
        let keys = [profile("u1"), profile("u2"), CacheKey::new("products")];
        let selected = InvalidationRouter::resolve_keys(&rule, keys.iter());
        assert_eq!(selected.len(), 1);
        assert!(selected.contains(&profile("u1")));
    }

    #[test]
    fn test_router_rejects_duplicate_names() {
        let mut router = InvalidationRouter::new();
        router.declare(InvalidationRule::new("create-product").entity("products")).unwrap();

        let err = router
            .declare(InvalidationRule::new("create-product"))
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Cache(CacheError::DuplicateRule { .. })
        ));
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn test_router_lookup_and_graph() {
        let mut router = InvalidationRouter::new();
        router
            .declare(
                InvalidationRule::new("create-product")
                    .entity("products")
                    .entity("seller-products"),
            )
            .unwrap();
        router
            .declare(InvalidationRule::new("delete-product").entity("products"))
            .unwrap();
        router
            .declare(InvalidationRule::new("send-message").entity("conversations"))
            .unwrap();

        assert!(router.rule("create-product").is_ok());
        assert!(matches!(
            router.rule("missing"),
            Err(SyncError::Cache(CacheError::UnknownRule { .. }))
        ));

        assert_eq!(
            router.mutations_affecting("products"),
            vec!["create-product", "delete-product"]
        );
        assert!(router.mutations_affecting("experts").is_empty());

        let graph = router.dependency_graph();
        assert_eq!(graph["create-product"].len(), 2);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use querysync_core::make_key;

    fn key_strategy() -> impl Strategy<Value = CacheKey> {
        (
            prop_oneof![Just("products"), Just("product"), Just("experts")],
            prop::collection::btree_map("[a-c]", 0i64..4, 0..3),
        )
            .prop_map(|(entity_type, params)| make_key(entity_type, params))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: a key-derived prefix always selects the key itself.
        #[test]
        fn prop_prefix_selects_source_key(key in key_strategy()) {
            prop_assert!(KeyPattern::prefix(&key).matches(&key));
            prop_assert!(KeyPattern::exact(key.clone()).matches(&key));
        }

        /// Property: a prefix selects every key it is a strict prefix of.
        #[test]
        fn prop_prefix_selects_extensions(key in key_strategy(), extra in 10i64..20) {
            let extended = key.clone().with_param("zz", extra);
            prop_assert!(KeyPattern::prefix(&key).matches(&extended));
        }

        /// Property: resolution is exactly the matching subset.
        #[test]
        fn prop_resolve_is_filter(keys in prop::collection::vec(key_strategy(), 0..12), pattern in key_strategy()) {
            let rule = InvalidationRule::new("sample").prefix(&pattern);
            let selected = InvalidationRouter::resolve_keys(&rule, keys.iter());
            for key in &keys {
                prop_assert_eq!(selected.contains(key), rule.matches(key));
            }
        }
    }
}
