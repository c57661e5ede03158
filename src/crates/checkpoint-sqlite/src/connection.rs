//! Pooled SQLite connections
//!
//! [`ConnectionManager`] owns the pool and nothing else. Every store operation borrows a
//! connection (or a transaction) for the duration of one call; dropping the guard returns
//! it to the pool, and dropping an uncommitted transaction rolls it back.

use crate::config::{JournalMode, StoreConfig};
use draftloop_checkpoint::{CheckpointError, Result};
use sqlx::error::ErrorKind;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Primary SQLite result codes that mean the database could not be used right now
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_IOERR: i32 = 10;
const SQLITE_CANTOPEN: i32 = 14;

impl From<JournalMode> for SqliteJournalMode {
    fn from(mode: JournalMode) -> Self {
        match mode {
            JournalMode::Wal => SqliteJournalMode::Wal,
            JournalMode::Delete => SqliteJournalMode::Delete,
        }
    }
}

/// Database connection pool wrapper
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    pool: SqlitePool,
}

impl ConnectionManager {
    /// Open a pool for `config`
    ///
    /// File databases get their parent directory created when `create_if_missing` is
    /// set. In-memory databases are pinned to a single connection that never expires,
    /// since each SQLite connection to `:memory:` is its own database.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| CheckpointError::Config(format!("Invalid database url: {}", e)))?
            .create_if_missing(config.create_if_missing)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .journal_mode(config.journal_mode.into());

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs));

        if config.is_in_memory() {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else if config.create_if_missing {
            let filename = options.clone().get_filename();
            if let Some(parent) = filename.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        debug!(url = %config.url, journal_mode = config.journal_mode.pragma_value(), "Connecting to checkpoint database");

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        info!(
            url = %config.url,
            max_connections = config.max_connections,
            "Checkpoint database connection established"
        );

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Borrow a pooled connection for one call
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool.acquire().await.map_err(map_sqlx_error)
    }

    /// Start a transaction on a pooled connection
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(map_sqlx_error)
    }

    /// Perform a health check by running a simple query
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }

    /// Close the pool, waiting for borrowed connections to come back
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Checkpoint database connection closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// Classify a driver error into the store's error taxonomy, keeping it as the source
pub fn map_sqlx_error(err: sqlx::Error) -> CheckpointError {
    match &err {
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => CheckpointError::ConstraintViolation(Box::new(err)),
            _ if is_unavailable_code(db.code().as_deref()) => {
                CheckpointError::ConnectionFailure(Box::new(err))
            }
            _ => CheckpointError::Storage(Box::new(err)),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => CheckpointError::ConnectionFailure(Box::new(err)),
        sqlx::Error::Configuration(_) => CheckpointError::Config(err.to_string()),
        _ => CheckpointError::Storage(Box::new(err)),
    }
}

fn is_unavailable_code(code: Option<&str>) -> bool {
    code.and_then(|code| code.parse::<i32>().ok())
        .map(|code| code & 0xff)
        .map_or(false, |primary| {
            matches!(
                primary,
                SQLITE_BUSY | SQLITE_LOCKED | SQLITE_IOERR | SQLITE_CANTOPEN
            )
        })
}
