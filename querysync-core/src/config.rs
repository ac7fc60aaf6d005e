//! Cache configuration.
//!
//! Defaults can be overridden from the environment or from a TOML file:
//!
//! ```toml
//! stale_time_ms = 30000
//! grace_window_ms = 300000
//!
//! [entities.conversation-messages]
//! stale_time_ms = 0
//!
//! [entities.communities]
//! grace_window_ms = 600000
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SyncResult};

const DEFAULT_STALE_TIME_MS: u64 = 30_000;
const DEFAULT_GRACE_WINDOW_MS: u64 = 300_000;

/// Per-entity-type override. Unset fields fall back to the global default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityOverride {
    pub stale_time_ms: Option<u64>,
    pub grace_window_ms: Option<u64>,
}

/// Effective timing policy for one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityPolicy {
    /// How long a successful fetch counts as fresh.
    pub stale_time: Duration,
    /// How long an entry with no subscribers survives before eviction.
    pub grace_window: Duration,
}

/// Configuration for the query cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default freshness window, in milliseconds.
    pub stale_time_ms: u64,
    /// Default eviction grace window, in milliseconds.
    pub grace_window_ms: u64,
    /// Overrides keyed by entity type.
    pub entities: BTreeMap<String, EntityOverride>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: DEFAULT_STALE_TIME_MS,
            grace_window_ms: DEFAULT_GRACE_WINDOW_MS,
            entities: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default stale time.
    pub fn with_stale_time(mut self, duration: Duration) -> Self {
        self.stale_time_ms = duration_ms(duration);
        self
    }

    /// Set the default grace window.
    pub fn with_grace_window(mut self, duration: Duration) -> Self {
        self.grace_window_ms = duration_ms(duration);
        self
    }

    /// Override timing for one entity type.
    pub fn with_entity_override(
        mut self,
        entity_type: impl Into<String>,
        entity: EntityOverride,
    ) -> Self {
        self.entities.insert(entity_type.into(), entity);
        self
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }

    /// Resolve the effective policy for an entity type.
    pub fn policy_for(&self, entity_type: &str) -> EntityPolicy {
        let entity = self.entities.get(entity_type);
        EntityPolicy {
            stale_time: Duration::from_millis(
                entity
                    .and_then(|e| e.stale_time_ms)
                    .unwrap_or(self.stale_time_ms),
            ),
            grace_window: Duration::from_millis(
                entity
                    .and_then(|e| e.grace_window_ms)
                    .unwrap_or(self.grace_window_ms),
            ),
        }
    }

    /// Create a config from environment variables.
    ///
    /// Environment variables:
    /// - `QUERYSYNC_STALE_TIME_MS`: default freshness window (default: 30000)
    /// - `QUERYSYNC_GRACE_WINDOW_MS`: default eviction grace window (default: 300000)
    pub fn from_env() -> Self {
        let stale_time_ms = std::env::var("QUERYSYNC_STALE_TIME_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_STALE_TIME_MS);

        let grace_window_ms = std::env::var("QUERYSYNC_GRACE_WINDOW_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_GRACE_WINDOW_MS);

        Self {
            stale_time_ms,
            grace_window_ms,
            entities: BTreeMap::new(),
        }
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Unreadable {
            source_name: "toml".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Check entity override names.
    pub fn validate(&self) -> SyncResult<()> {
        for name in self.entities.keys() {
            if name.trim().is_empty() || name.trim() != name {
                return Err(ConfigError::InvalidValue {
                    field: "entities".to_string(),
                    value: name.clone(),
                    reason: "entity type must be non-empty with no surrounding whitespace"
                        .to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.stale_time(), Duration::from_secs(30));
        assert_eq!(config.grace_window(), Duration::from_secs(300));
        assert!(config.entities.is_empty());
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::new()
            .with_stale_time(Duration::from_secs(5))
            .with_grace_window(Duration::from_millis(250))
            .with_entity_override(
                "conversation-messages",
                EntityOverride {
                    stale_time_ms: Some(0),
                    grace_window_ms: None,
                },
            );

        let messages = config.policy_for("conversation-messages");
        assert_eq!(messages.stale_time, Duration::ZERO);
        assert_eq!(messages.grace_window, Duration::from_millis(250));

        let products = config.policy_for("products");
        assert_eq!(products.stale_time, Duration::from_secs(5));
    }

    #[test]
    fn test_from_env() {
        let _stale = EnvVarGuard::set("QUERYSYNC_STALE_TIME_MS", Some("1500"));
        let _grace = EnvVarGuard::set("QUERYSYNC_GRACE_WINDOW_MS", Some("not-a-number"));
        let config = CacheConfig::from_env();
        assert_eq!(config.stale_time_ms, 1500);
        assert_eq!(config.grace_window_ms, DEFAULT_GRACE_WINDOW_MS);
    }

    #[test]
    fn test_from_toml() {
        let config = CacheConfig::from_toml_str(
            r#"
            stale_time_ms = 1000

            [entities.communities]
            grace_window_ms = 60000
            "#,
        )
        .expect("valid toml");

        assert_eq!(config.stale_time_ms, 1000);
        assert_eq!(config.grace_window_ms, DEFAULT_GRACE_WINDOW_MS);
        assert_eq!(
            config.policy_for("communities").grace_window,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        let err = CacheConfig::from_toml_str("stale_time_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, SyncError::Config(ConfigError::Unreadable { .. })));
    }

    #[test]
    fn test_validate_rejects_blank_entity() {
        let config = CacheConfig::new().with_entity_override(" ", EntityOverride::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = CacheConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, SyncError::Config(ConfigError::Unreadable { .. })));
    }
}
