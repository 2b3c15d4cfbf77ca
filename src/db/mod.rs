//! Transactional data access over a read pool and a write pool.
//!
//! Every read and write in the crate goes through [`Database::read`] or
//! [`Database::write`]. Writes run on the primary file and are re-run when
//! SQLite reports that a concurrent writer won the race.

mod denylist;
mod error;
mod session;
mod user;

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::{debug, error, warn};

pub use denylist::{DenylistEntry, DenylistStore, RevocationReason};
pub use error::{StoreError, TxError};
pub use session::{NewSession, Session, SessionStore, fingerprint};
pub use user::{User, UserStore};

/// Retries after the first attempt when a write transaction conflicts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Connection settings for both pools.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Primary database file. Writes always go here.
    pub path: PathBuf,
    /// Optional replica file for reads. Defaults to the primary.
    pub read_replica: Option<PathBuf>,
    pub read_connections: u32,
    pub write_connections: u32,
    /// Retries for a write transaction that hit a serialization conflict.
    pub max_retries: u32,
    /// How long SQLite waits on a locked database before reporting busy.
    pub busy_timeout: Duration,
    /// How long a caller waits for a pooled connection.
    pub acquire_timeout: Duration,
}

impl DatabaseOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_replica: None,
            read_connections: 8,
            write_connections: 4,
            max_retries: DEFAULT_MAX_RETRIES,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_read_replica(mut self, path: impl Into<PathBuf>) -> Self {
        self.read_replica = Some(path.into());
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_pool_sizes(mut self, read: u32, write: u32) -> Self {
        self.read_connections = read.max(1);
        self.write_connections = write.max(1);
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

/// Access to the per-table stores from inside a transaction.
pub trait Stores {
    fn denylist(&mut self) -> DenylistStore<'_>;
    fn sessions(&mut self) -> SessionStore<'_>;
    fn users(&mut self) -> UserStore<'_>;
}

impl Stores for SqliteConnection {
    fn denylist(&mut self) -> DenylistStore<'_> {
        DenylistStore::new(self)
    }

    fn sessions(&mut self) -> SessionStore<'_> {
        SessionStore::new(self)
    }

    fn users(&mut self) -> UserStore<'_> {
        UserStore::new(self)
    }
}

#[derive(Clone)]
pub struct Database {
    read_pool: SqlitePool,
    write_pool: SqlitePool,
    max_retries: u32,
}

impl Database {
    /// Open or create the database described by `options` and bring the
    /// schema up to date.
    pub async fn open(options: &DatabaseOptions) -> Result<Self, StoreError> {
        let write_options = SqliteConnectOptions::new()
            .filename(&options.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(options.busy_timeout);

        let write_pool = SqlitePoolOptions::new()
            .max_connections(options.write_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect_with(write_options)
            .await?;

        migrate(&write_pool).await?;

        let read_path: &Path = options.read_replica.as_deref().unwrap_or(&options.path);
        let read_options = SqliteConnectOptions::new()
            .filename(read_path)
            .busy_timeout(options.busy_timeout)
            .pragma("query_only", "ON");

        let read_pool = SqlitePoolOptions::new()
            .max_connections(options.read_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect_with(read_options)
            .await?;

        debug!(
            path = %options.path.display(),
            read_path = %read_path.display(),
            "Database pools ready"
        );

        Ok(Self {
            read_pool,
            write_pool,
            max_retries: options.max_retries,
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `work` inside a read-only transaction on the read pool.
    /// Errors are returned unchanged and never retried.
    pub async fn read<F, T, E>(&self, work: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, E>>,
        E: From<StoreError>,
    {
        let mut tx = self.read_pool.begin().await.map_err(StoreError::from)?;

        match work(&mut *tx).await {
            Ok(value) => {
                tx.commit().await.map_err(StoreError::from)?;
                Ok(value)
            }
            Err(err) => {
                rollback(tx).await;
                Err(err)
            }
        }
    }

    /// Run `work` inside a `BEGIN IMMEDIATE` transaction on the primary.
    ///
    /// A serialization conflict, raised by any statement or by the commit,
    /// rolls the attempt back and runs `work` again, up to `max_retries`
    /// extra times. Any other error is returned as is. `work` may therefore
    /// run more than once and must not touch anything outside `conn`.
    pub async fn write<F, T, E>(&self, mut work: F) -> Result<T, E>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: TxError + Send,
    {
        let mut attempt = 0;

        loop {
            match self.write_once(&mut work).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_serialization_conflict() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        "Serialization conflict, retrying transaction"
                    );
                }
                Err(err) => {
                    if err.is_serialization_conflict() {
                        error!(
                            max_retries = self.max_retries,
                            "Serialization conflict persisted after all retries"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn write_once<F, T, E>(&self, work: &mut F) -> Result<T, E>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, E>> + Send,
        E: TxError,
    {
        // Writers queue on the busy timeout here. A deferred BEGIN would fail
        // without waiting when a read has to upgrade after another commit.
        let mut tx = self
            .write_pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(StoreError::from)?;

        match work(&mut *tx).await {
            Ok(value) => {
                tx.commit().await.map_err(StoreError::from)?;
                Ok(value)
            }
            Err(err) => {
                rollback(tx).await;
                Err(err)
            }
        }
    }

    /// Verify both pools answer a round-trip query within `timeout`.
    pub async fn health_check(&self, timeout: Duration) -> Result<(), StoreError> {
        let probe = async {
            sqlx::query_scalar::<_, i64>("SELECT 1")
                .fetch_one(&self.write_pool)
                .await?;
            sqlx::query_scalar::<_, i64>("SELECT 1")
                .fetch_one(&self.read_pool)
                .await?;
            Ok::<_, StoreError>(())
        };

        tokio::time::timeout(timeout, probe)
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
    }

    /// Close both pools, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.read_pool.close().await;
        self.write_pool.close().await;
    }
}

/// Roll back explicitly so the connection is clean before it goes back to
/// the pool. A dropped transaction is rolled back too; this only makes it
/// eager and logged.
async fn rollback(tx: Transaction<'static, Sqlite>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Failed to roll back transaction");
    }
}

// =============================================================================
// Schema
// =============================================================================

/// Get the current schema version.
async fn get_version(pool: &SqlitePool) -> Result<i32, sqlx::Error> {
    let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
        .fetch_optional(pool)
        .await?;
    Ok(result.map(|r| r.0).unwrap_or(0))
}

/// Execute a list of queries in a transaction, then set the version.
async fn run_migration(
    pool: &SqlitePool,
    version: i32,
    queries: &[&'static str],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for query in queries {
        sqlx::query(*query).execute(&mut *tx).await?;
    }
    sqlx::query("DELETE FROM schema_version")
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .execute(pool)
        .await?;

    if get_version(pool).await? < 1 {
        run_migration(
            pool,
            1,
            &[
                "CREATE TABLE users (
                    id TEXT PRIMARY KEY,
                    email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    password_hash TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                )",
                "CREATE TABLE sessions (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    session_token_hash TEXT NOT NULL,
                    refresh_token_hash TEXT NOT NULL,
                    expires_at INTEGER NOT NULL,
                    last_activity INTEGER NOT NULL,
                    ip_address TEXT,
                    user_agent TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at INTEGER NOT NULL
                )",
                "CREATE INDEX idx_sessions_user_id ON sessions(user_id, is_active)",
                "CREATE INDEX idx_sessions_session_token_hash ON sessions(session_token_hash)",
                "CREATE INDEX idx_sessions_refresh_token_hash ON sessions(refresh_token_hash)",
                "CREATE INDEX idx_sessions_expires_at ON sessions(expires_at)",
                "CREATE TABLE token_denylist (
                    jti TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    expires_at INTEGER NOT NULL,
                    denylisted_at INTEGER NOT NULL,
                    reason TEXT NOT NULL
                )",
                "CREATE INDEX idx_token_denylist_expires_at ON token_denylist(expires_at)",
            ],
        )
        .await?;
    }

    Ok(())
}

/// Unix seconds as stored in INTEGER columns.
pub(crate) fn db_time(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}
