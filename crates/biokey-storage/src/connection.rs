//! SQLite pool behind the template store.
//!
//! A file database runs in WAL mode so `list_all` scans can proceed while a
//! save is committing; writers queue on the busy timeout. `:memory:` is a
//! single private database that lives exactly as long as its one pooled
//! connection, so that connection is never recycled.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::ConnectOptions;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Path that selects an in-memory store.
pub const MEMORY_PATH: &str = ":memory:";

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the template store lives and how it is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Database file, or [`MEMORY_PATH`].
    pub path: PathBuf,

    /// Pool size for a file database. An in-memory store always has one.
    pub max_connections: u32,

    /// Create the file and its parent directories when absent.
    pub create_if_missing: bool,

    /// Apply pending migrations on open.
    pub auto_migrate: bool,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 4,
            create_if_missing: true,
            auto_migrate: true,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MEMORY_PATH)
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn auto_migrate(mut self, migrate: bool) -> Self {
        self.auto_migrate = migrate;
        self
    }

    pub fn is_memory(&self) -> bool {
        self.path == Path::new(MEMORY_PATH)
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        if self.is_memory() {
            return SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .max_lifetime(None)
                .idle_timeout(None);
        }
        SqlitePoolOptions::new().max_connections(self.max_connections)
    }

    fn connect_options(&self) -> StorageResult<SqliteConnectOptions> {
        let options = if self.is_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(self.create_if_missing)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .busy_timeout(BUSY_TIMEOUT)
        };
        Ok(options.disable_statement_logging())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new("biokey.db")
    }
}

/// Open template store pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the store described by `config`.
    ///
    /// ```no_run
    /// use biokey_storage::connection::{Database, DatabaseConfig};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let db = Database::new(DatabaseConfig::new("/var/lib/biokey/samples.db")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(config: DatabaseConfig) -> StorageResult<Self> {
        if config.max_connections == 0 {
            return Err(StorageError::Configuration(
                "max_connections must be at least 1".to_string(),
            ));
        }

        if config.create_if_missing
            && !config.is_memory()
            && let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::Configuration(format!(
                    "Failed to create {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let pool = config
            .pool_options()
            .connect_with(config.connect_options()?)
            .await?;
        debug!(path = %config.path.display(), "Opened template database");

        let db = Self { pool };
        if config.auto_migrate {
            db.migrate().await?;
        }
        Ok(db)
    }

    /// Migrated in-memory store, used by tests and the session harness.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    /// Apply the workspace `migrations/`, embedded at compile time.
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait for checked-out connections, then close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = DatabaseConfig::default();

        assert_eq!(config.path, PathBuf::from("biokey.db"));
        assert_eq!(config.max_connections, 4);
        assert!(config.create_if_missing);
        assert!(config.auto_migrate);
        assert!(!config.is_memory());
        assert!(DatabaseConfig::in_memory().is_memory());
    }

    #[tokio::test]
    async fn test_zero_connections_rejected() {
        let config = DatabaseConfig::new("unused.db").max_connections(0);
        let err = Database::new(config).await.unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_memory_store_keeps_a_single_connection() {
        let db = Database::new(DatabaseConfig::in_memory().max_connections(8))
            .await
            .unwrap();

        assert_eq!(db.pool().options().get_max_connections(), 1);
        sqlx::query("SELECT COUNT(*) FROM fingerprints")
            .execute(db.pool())
            .await
            .unwrap();
        db.close().await;
    }

    #[tokio::test]
    async fn test_parent_directories_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("samples.db");

        let db = Database::new(DatabaseConfig::new(&path)).await.unwrap();
        db.health_check().await.unwrap();
        db.close().await;

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_missing_file_not_created_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");

        let config = DatabaseConfig::new(&path).create_if_missing(false);
        let err = Database::new(config).await.unwrap_err();

        assert!(matches!(err, StorageError::Database(_)));
        assert!(!path.exists());
    }
}
