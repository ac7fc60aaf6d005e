//! Deterministic cache keys.
//!
//! A [`CacheKey`] is an entity type plus a set of named scalar parameters.
//! Parameters live in a sorted map, so two keys built from the same values
//! compare equal no matter the order they were supplied in. Absent values
//! (`None`) are dropped at construction: a key built with `id: None` is the
//! same key as one built without `id` at all.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scalar parameter value.
///
/// Numbers compare by value: an integral float such as `1.0` is the same
/// parameter as the integer `1`, and `-0.0` is the same as `0.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Canonical form used for equality and hashing.
#[derive(PartialEq, Eq, Hash)]
enum Canonical<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(&'a str),
}

impl ParamValue {
    fn canonical(&self) -> Canonical<'_> {
        match self {
            Self::Null => Canonical::Null,
            Self::Bool(b) => Canonical::Bool(*b),
            Self::Int(i) => Canonical::Int(*i),
            Self::Float(f) => {
                if f.is_nan() {
                    Canonical::Float(f64::NAN.to_bits())
                } else if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                    Canonical::Int(*f as i64)
                } else {
                    Canonical::Float(f.to_bits())
                }
            }
            Self::Str(s) => Canonical::Str(s),
        }
    }

    /// Returns the string payload, if this is a string parameter.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer payload (including integral floats).
    pub fn as_i64(&self) -> Option<i64> {
        match self.canonical() {
            Canonical::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert into a JSON value for filter payloads.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Str(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for ParamValue {}

impl Hash for ParamValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Conversion into an optional parameter value.
///
/// `None` means "absent": the parameter is not stored in the key.
pub trait IntoParam {
    fn into_param(self) -> Option<ParamValue>;
}

impl IntoParam for ParamValue {
    fn into_param(self) -> Option<ParamValue> {
        Some(self)
    }
}

impl IntoParam for &str {
    fn into_param(self) -> Option<ParamValue> {
        Some(ParamValue::Str(self.to_string()))
    }
}

impl IntoParam for String {
    fn into_param(self) -> Option<ParamValue> {
        Some(ParamValue::Str(self))
    }
}

impl IntoParam for &String {
    fn into_param(self) -> Option<ParamValue> {
        Some(ParamValue::Str(self.clone()))
    }
}

impl IntoParam for bool {
    fn into_param(self) -> Option<ParamValue> {
        Some(ParamValue::Bool(self))
    }
}

impl IntoParam for i32 {
    fn into_param(self) -> Option<ParamValue> {
        Some(ParamValue::Int(i64::from(self)))
    }
}

impl IntoParam for i64 {
    fn into_param(self) -> Option<ParamValue> {
        Some(ParamValue::Int(self))
    }
}

impl IntoParam for u32 {
    fn into_param(self) -> Option<ParamValue> {
        Some(ParamValue::Int(i64::from(self)))
    }
}

impl IntoParam for u64 {
    fn into_param(self) -> Option<ParamValue> {
        Some(match i64::try_from(self) {
            Ok(i) => ParamValue::Int(i),
            Err(_) => ParamValue::Float(self as f64),
        })
    }
}

impl IntoParam for usize {
    fn into_param(self) -> Option<ParamValue> {
        (self as u64).into_param()
    }
}

impl IntoParam for f64 {
    fn into_param(self) -> Option<ParamValue> {
        Some(ParamValue::Float(self))
    }
}

impl IntoParam for Uuid {
    fn into_param(self) -> Option<ParamValue> {
        Some(ParamValue::Str(self.hyphenated().to_string()))
    }
}

impl IntoParam for &Uuid {
    fn into_param(self) -> Option<ParamValue> {
        (*self).into_param()
    }
}

impl<T: IntoParam> IntoParam for Option<T> {
    fn into_param(self) -> Option<ParamValue> {
        self.and_then(IntoParam::into_param)
    }
}

/// A cache key: entity type plus parameters.
///
/// Fields are private so that every key goes through [`make_key`] or the
/// builder, which is where absent parameters get dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey {
    entity_type: String,
    params: BTreeMap<String, ParamValue>,
}

impl CacheKey {
    /// A key with no parameters.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            params: BTreeMap::new(),
        }
    }

    /// Start building a key for the given entity type.
    pub fn builder(entity_type: impl Into<String>) -> KeyBuilder {
        KeyBuilder {
            key: Self::new(entity_type),
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Return a copy of this key with one parameter set (or removed if absent).
    pub fn with_param(mut self, name: impl Into<String>, value: impl IntoParam) -> Self {
        let name = name.into();
        match value.into_param() {
            Some(v) => {
                self.params.insert(name, v);
            }
            None => {
                self.params.remove(&name);
            }
        }
        self
    }

    /// True when `self` has the same entity type as `other` and its
    /// parameters are a subset of `other`'s with equal values.
    ///
    /// Every key is a prefix of itself.
    pub fn is_prefix_of(&self, other: &CacheKey) -> bool {
        self.entity_type == other.entity_type
            && self
                .params
                .iter()
                .all(|(name, value)| other.params.get(name) == Some(value))
    }

    /// The type-wide prefix for this key (entity type, no params).
    pub fn type_prefix(&self) -> CacheKey {
        CacheKey::new(self.entity_type.clone())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity_type)?;
        if self.params.is_empty() {
            return Ok(());
        }
        write!(f, "{{")?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "}}")
    }
}

/// Builder for [`CacheKey`].
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    key: CacheKey,
}

impl KeyBuilder {
    /// Add a parameter. Absent values are skipped.
    pub fn param(mut self, name: impl Into<String>, value: impl IntoParam) -> Self {
        if let Some(v) = value.into_param() {
            self.key.params.insert(name.into(), v);
        }
        self
    }

    pub fn build(self) -> CacheKey {
        self.key
    }
}

/// Build a key from an entity type and (name, value) pairs.
///
/// Pure and deterministic: the same entity type and parameter values give
/// an equal key regardless of order, and `None` values are treated as
/// absent. If a name is repeated the last present value wins.
pub fn make_key<I, K, V>(entity_type: impl Into<String>, params: I) -> CacheKey
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: IntoParam,
{
    let mut builder = CacheKey::builder(entity_type);
    for (name, value) in params {
        builder = builder.param(name, value);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_does_not_matter() {
        let a = make_key("products", [("seller", "s1"), ("category", "books")]);
        let b = make_key("products", [("category", "books"), ("seller", "s1")]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_none_param_is_absent() {
        let with_none = make_key("user-profile", [("a", Some(1i64)), ("b", None)]);
        let without = make_key("user-profile", [("a", 1i64)]);
        assert_eq!(with_none, without);
        assert!(!with_none.has_param("b"));
    }

    #[test]
    fn test_null_is_not_absent() {
        let null = CacheKey::builder("experts").param("category", ParamValue::Null).build();
        let absent = CacheKey::new("experts");
        assert_ne!(null, absent);
    }

    #[test]
    fn test_entity_type_is_case_sensitive() {
        assert_ne!(CacheKey::new("Products"), CacheKey::new("products"));
    }

    #[test]
    fn test_numeric_params_compare_by_value() {
        let int = CacheKey::builder("product").param("page", 2i64).build();
        let float = CacheKey::builder("product").param("page", 2.0f64).build();
        let neg_zero = CacheKey::builder("product").param("offset", -0.0f64).build();
        let zero = CacheKey::builder("product").param("offset", 0i32).build();
        assert_eq!(int, float);
        assert_eq!(neg_zero, zero);
    }

    #[test]
    fn test_uuid_param_matches_string() {
        let id = Uuid::now_v7();
        let a = CacheKey::builder("expert").param("id", id).build();
        let b = CacheKey::builder("expert").param("id", id.to_string()).build();
        assert_eq!(a, b);
    }

    #[test]
    fn test_prefix_relation() {
        let all = CacheKey::new("user-transactions");
        let one = CacheKey::builder("user-transactions").param("user_id", "u1").build();
        let other_type = CacheKey::builder("seller-sales").param("user_id", "u1").build();

        assert!(all.is_prefix_of(&one));
        assert!(one.is_prefix_of(&one));
        assert!(!one.is_prefix_of(&all));
        assert!(!all.is_prefix_of(&other_type));
        assert_eq!(one.type_prefix(), all);
    }

    #[test]
    fn test_with_param_removes_on_none() {
        let key = CacheKey::builder("products").param("q", "lamp").build();
        let cleared = key.with_param("q", None::<String>);
        assert_eq!(cleared, CacheKey::new("products"));
    }

    #[test]
    fn test_display() {
        let key = make_key("conversation-messages", [("conversation_id", "c9")]);
        assert_eq!(key.to_string(), "conversation-messages{conversation_id=\"c9\"}");
        assert_eq!(CacheKey::new("communities").to_string(), "communities");
    }

    #[test]
    fn test_param_value_json() {
        assert_eq!(ParamValue::Int(3).to_json(), serde_json::json!(3));
        assert_eq!(ParamValue::Str("x".into()).to_json(), serde_json::json!("x"));
        assert_eq!(ParamValue::Null.to_json(), serde_json::Value::Null);
        assert_eq!(ParamValue::Float(2.0).as_i64(), Some(2));
    }
}
