//! Store configuration
//!
//! [`StoreConfig`] is read from TOML, either from a `[store]` table or from the top
//! level of the document. Every key is optional:
//!
//! ```toml
//! [store]
//! url = "sqlite://${DRAFTLOOP_DATA}/checkpoints.db"
//! max_connections = 5
//! acquire_timeout_secs = 30
//! busy_timeout_ms = 5000
//! journal_mode = "wal"
//! create_if_missing = true
//! list_page_size = 64
//! ```

use draftloop_checkpoint::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// SQLite journal mode applied to every pooled connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Write-ahead log: readers never block the single writer
    #[default]
    Wal,
    /// Rollback journal, deleted after each transaction
    Delete,
}

impl JournalMode {
    /// Value passed to `PRAGMA journal_mode`
    pub fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
        }
    }
}

/// Connection and paging settings for the SQLite checkpoint store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Database URL (`sqlite://path/to/file.db`, `sqlite::memory:`)
    #[serde(default = "default_url")]
    pub url: String,

    /// Upper bound on pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a call waits for a free pooled connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// How long SQLite waits on a locked database before failing a statement
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default)]
    pub journal_mode: JournalMode,

    /// Create the database file when it does not exist
    #[serde(default = "default_create_if_missing")]
    pub create_if_missing: bool,

    /// Rows fetched per round-trip while streaming a history listing
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
}

fn default_url() -> String {
    "sqlite://checkpoints.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_create_if_missing() -> bool {
    true
}

fn default_list_page_size() -> usize {
    64
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: JournalMode::default(),
            create_if_missing: default_create_if_missing(),
            list_page_size: default_list_page_size(),
        }
    }
}

impl StoreConfig {
    /// Default settings pointing at `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Settings for a private in-memory database
    pub fn in_memory() -> Self {
        Self::new("sqlite::memory:")
    }

    /// Settings for a database file at `path`
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        Self::new(format!("sqlite://{}", path.as_ref().display()))
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_journal_mode(mut self, journal_mode: JournalMode) -> Self {
        self.journal_mode = journal_mode;
        self
    }

    pub fn with_list_page_size(mut self, list_page_size: usize) -> Self {
        self.list_page_size = list_page_size.max(1);
        self
    }

    /// Whether the URL names an in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }

    /// Parse settings from a TOML document
    ///
    /// Keys are read from the `[store]` table when the document has one, otherwise from
    /// the top level. Environment references in `url` are expanded.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let document: toml::Table = toml::from_str(content)
            .map_err(|e| CheckpointError::Config(format!("Failed to parse config: {}", e)))?;

        let table = match document.get("store") {
            Some(toml::Value::Table(store)) => store.clone(),
            Some(_) => {
                return Err(CheckpointError::Config(
                    "`store` must be a table".to_string(),
                ))
            }
            None => document,
        };

        let mut config: StoreConfig = toml::Value::Table(table)
            .try_into()
            .map_err(|e| CheckpointError::Config(format!("Invalid store config: {}", e)))?;

        config.resolve_env_vars();
        config.list_page_size = config.list_page_size.max(1);
        config.validate()?;
        Ok(config)
    }

    /// Load settings from a TOML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CheckpointError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| CheckpointError::Config(format!("Failed to read config: {}", e)))?;

        debug!(path = %path.display(), "Loaded checkpoint store config");
        Self::from_toml_str(&content)
    }

    /// Resolve environment variables in configuration values
    ///
    /// Supports `${VAR_NAME}` anywhere in the URL. Unset variables are left as written.
    pub fn resolve_env_vars(&mut self) {
        self.url = expand_env_vars(&self.url);
    }

    fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(CheckpointError::Config("url must not be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(CheckpointError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn expand_env_vars(value: &str) -> String {
    let mut expanded = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let reference = &rest[start..start + 2 + len + 1];
        let var_name = &rest[start + 2..start + 2 + len];

        expanded.push_str(&rest[..start]);
        match std::env::var(var_name) {
            Ok(resolved) => expanded.push_str(&resolved),
            Err(_) => expanded.push_str(reference),
        }
        rest = &rest[start + reference.len()..];
    }

    expanded.push_str(rest);
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.url, "sqlite://checkpoints.db");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.journal_mode, JournalMode::Wal);
        assert_eq!(config.list_page_size, 64);
        assert!(config.create_if_missing);
        assert!(!config.is_in_memory());
        assert!(StoreConfig::in_memory().is_in_memory());
    }

    #[test]
    fn test_from_store_table() {
        let config = StoreConfig::from_toml_str(
            r#"
[store]
url = "sqlite:///var/lib/draftloop/checkpoints.db"
max_connections = 8
journal_mode = "delete"
list_page_size = 0
"#,
        )
        .unwrap();

        assert_eq!(config.url, "sqlite:///var/lib/draftloop/checkpoints.db");
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.journal_mode, JournalMode::Delete);
        assert_eq!(config.list_page_size, 1);
        assert_eq!(config.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_from_top_level() {
        let config = StoreConfig::from_toml_str("busy_timeout_ms = 250\n").unwrap();
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.url, default_url());
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(
            StoreConfig::from_toml_str("store = 3"),
            Err(CheckpointError::Config(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("[store]\njournal_mode = \"truncate\""),
            Err(CheckpointError::Config(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("[store]\nmax_connections = 0"),
            Err(CheckpointError::Config(_))
        ));
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("DRAFTLOOP_TEST_DATA_DIR", "/tmp/draftloop");
        assert_eq!(
            expand_env_vars("sqlite://${DRAFTLOOP_TEST_DATA_DIR}/checkpoints.db"),
            "sqlite:///tmp/draftloop/checkpoints.db"
        );
        assert_eq!(
            expand_env_vars("sqlite://${DRAFTLOOP_TEST_UNSET_VAR}/x.db"),
            "sqlite://${DRAFTLOOP_TEST_UNSET_VAR}/x.db"
        );
        assert_eq!(expand_env_vars("sqlite://${broken"), "sqlite://${broken");
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.toml");
        fs::write(&path, "[store]\nurl = \"sqlite::memory:\"\n")
            .await
            .unwrap();

        let config = StoreConfig::load(&path).await.unwrap();
        assert!(config.is_in_memory());

        let missing = StoreConfig::load(temp_dir.path().join("missing.toml")).await;
        assert!(matches!(missing, Err(CheckpointError::Config(_))));
    }
}
