//! Table and access-layer configuration.
//!
//! Every default the access layer relies on (index name, page sizes, batch
//! chunking, retry bounds) lives here as a named value rather than at call sites.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{
    BATCH_GET_MAX_KEYS, DEFAULT_BATCH_CONCURRENCY, DEFAULT_INDEX, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE,
};

/// Environment variable that overrides the cursor secret from the config file.
pub const CURSOR_SECRET_ENV: &str = "CURSORDYN_CURSOR_SECRET";

/// Key attribute names of one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKeys {
    pub partition_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
}

impl IndexKeys {
    pub fn new(partition_key: &str) -> Self {
        Self {
            partition_key: partition_key.to_string(),
            sort_key: None,
        }
    }

    pub fn with_sort_key(mut self, sort_key: &str) -> Self {
        self.sort_key = Some(sort_key.to_string());
        self
    }

    /// Partition key name followed by the sort key name, if any.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition_key.as_str()).chain(self.sort_key.as_deref())
    }
}

/// Identity and key layout of one table.
#[derive(Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub table_name: String,
    pub indexes: BTreeMap<String, IndexKeys>,
    /// Secret protecting cursors. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub cursor_secret: Option<String>,
}

impl TableConfig {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            indexes: BTreeMap::new(),
            cursor_secret: None,
        }
    }

    pub fn with_index(mut self, name: &str, keys: IndexKeys) -> Self {
        self.indexes.insert(name.to_string(), keys);
        self
    }

    pub fn with_cursor_secret(mut self, secret: &str) -> Self {
        self.cursor_secret = Some(secret.to_string());
        self
    }

    /// Look up an index by name.
    pub fn index(&self, name: &str) -> Result<&IndexKeys, ConfigError> {
        self.indexes
            .get(name)
            .ok_or_else(|| ConfigError::UnknownIndex(name.to_string()))
    }
}

impl fmt::Debug for TableConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableConfig")
            .field("table_name", &self.table_name)
            .field("indexes", &self.indexes)
            .field(
                "cursor_secret",
                &self.cursor_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Bounds for reissuing unprocessed batch-get keys.
///
/// Delays grow exponentially from `initial_delay_ms`, capped at `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// Retry up to `max_retries` times without sleeping in between.
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn retry_delay(&self, attempt: usize) -> Duration {
        let factor = 1u64.checked_shl(attempt as u32).unwrap_or(u64::MAX);
        let delay_ms = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Limits and defaults applied by [`TableAccess`](crate::api::TableAccess).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default = "default_index")]
    pub default_index: String,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "max_page_size")]
    pub max_page_size: usize,
    #[serde(default = "batch_chunk_size")]
    pub batch_chunk_size: usize,
    #[serde(default = "batch_concurrency")]
    pub batch_concurrency: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            default_index: default_index(),
            default_page_size: default_page_size(),
            max_page_size: max_page_size(),
            batch_chunk_size: batch_chunk_size(),
            batch_concurrency: batch_concurrency(),
            retry: RetryConfig::default(),
        }
    }
}

/// Everything needed to serve one table: its layout plus access limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub table: TableConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

impl ServiceConfig {
    /// Read a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read(path.as_ref())?;
        serde_json::from_slice(&data).map_err(ConfigError::Parse)
    }

    /// Read a JSON config file, then apply [`CURSOR_SECRET_ENV`] if set.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::from_path(path)?;
        Ok(config.with_secret_override(std::env::var(CURSOR_SECRET_ENV).ok()))
    }

    /// Replace the table's cursor secret when `secret` is non-empty.
    pub fn with_secret_override(mut self, secret: Option<String>) -> Self {
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            self.table.cursor_secret = Some(secret);
        }
        self
    }
}

fn default_max_retries() -> usize {
    10
}

fn default_initial_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_index() -> String {
    DEFAULT_INDEX.to_string()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn max_page_size() -> usize {
    MAX_PAGE_SIZE
}

fn batch_chunk_size() -> usize {
    BATCH_GET_MAX_KEYS
}

fn batch_concurrency() -> usize {
    DEFAULT_BATCH_CONCURRENCY
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_retry_delay_is_capped() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        assert_eq!(retry.retry_delay(0), Duration::from_millis(100));
        assert_eq!(retry.retry_delay(1), Duration::from_millis(200));
        assert_eq!(retry.retry_delay(3), Duration::from_millis(800));
        assert_eq!(retry.retry_delay(4), Duration::from_millis(1_000));
        assert_eq!(retry.retry_delay(80), Duration::from_millis(1_000));
        assert_eq!(RetryConfig::immediate(3).retry_delay(2), Duration::ZERO);
    }

    #[test]
    fn test_access_config_defaults_from_empty_object() {
        let access: AccessConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(access, AccessConfig::default());
        assert_eq!(access.default_index, "default");
        assert_eq!(access.batch_chunk_size, 100);
    }

    #[test]
    fn test_service_config_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("service.json");
        std::fs::write(
            &path,
            json!({
                "table": {
                    "table_name": "orders",
                    "indexes": {
                        "default": {"partition_key": "customer", "sort_key": "order_id"},
                        "by_status": {"partition_key": "status", "sort_key": "created_at"},
                        "by_sku": {"partition_key": "sku"}
                    },
                    "cursor_secret": "file-secret"
                },
                "access": {"max_page_size": 50, "retry": {"max_retries": 2}}
            })
            .to_string(),
        )
        .unwrap();

        let config = ServiceConfig::from_path(&path).unwrap();
        assert_eq!(config.table.table_name, "orders");
        assert_eq!(
            config.table.index("by_status").unwrap(),
            &IndexKeys::new("status").with_sort_key("created_at")
        );
        assert_eq!(config.table.index("by_sku").unwrap().sort_key, None);
        assert_eq!(config.table.cursor_secret.as_deref(), Some("file-secret"));
        assert_eq!(config.access.max_page_size, 50);
        assert_eq!(config.access.default_page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.access.retry.max_retries, 2);
        assert_eq!(config.access.retry.initial_delay_ms, 50);
    }

    #[test]
    fn test_service_config_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ServiceConfig::from_path(&path),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ServiceConfig::from_path(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_secret_override() {
        let config = ServiceConfig {
            table: TableConfig::new("t").with_cursor_secret("from-file"),
            access: AccessConfig::default(),
        };
        let kept = config.clone().with_secret_override(Some(String::new()));
        assert_eq!(kept.table.cursor_secret.as_deref(), Some("from-file"));
        let replaced = config.with_secret_override(Some("from-env".to_string()));
        assert_eq!(replaced.table.cursor_secret.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_secret_is_not_serialized_or_debug_printed() {
        let table = TableConfig::new("t").with_cursor_secret("hunter2");
        let out = serde_json::to_string(&table).unwrap();
        assert!(!out.contains("hunter2"));
        assert!(!format!("{table:?}").contains("hunter2"));
    }

    #[test]
    fn test_unknown_index() {
        let table = TableConfig::new("t").with_index("default", IndexKeys::new("pk"));
        assert!(matches!(
            table.index("nope"),
            Err(ConfigError::UnknownIndex(name)) if name == "nope"
        ));
    }
}
