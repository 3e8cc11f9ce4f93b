//! `SQLite` connection management for persistent storage
//!
//! Functional core / imperative shell split: configuration validation and
//! connection-string generation are pure; directory creation, connecting,
//! and running migrations are the shell.

use crate::domain_types::ConnectionPoolSize;
use nutype::nutype;
use sqlx::{Pool, Sqlite, SqlitePool, migrate::Migrator};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Static migrator for embedded `SQLite` migrations
static MIGRATOR: Migrator = sqlx::migrate!();

/// Storage-specific error types, shared by every persistence trait in this module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Database error from `SQLx`
    #[error("database error: {message}")]
    Database {
        /// Error message from database operation
        message: String,
    },

    /// File system I/O error
    #[error("file system error: {message}")]
    FileSystem {
        /// Error message from file system operation
        message: String,
    },

    /// Invalid configuration
    #[error("configuration error: {field} - {reason}")]
    Configuration {
        /// Name of the configuration field that was invalid
        field: String,
        /// Reason why the configuration was invalid
        reason: String,
    },

    /// Connection pool error
    #[error("connection pool error: {message}")]
    ConnectionPool {
        /// Error message from connection pool operation
        message: String,
    },

    /// Migration error
    #[error("migration failed at version {version}: {message}")]
    Migration {
        /// Migration version that failed
        version: String,
        /// Error message from migration operation
        message: String,
    },

    /// A row expected to exist by its unique key was not found
    #[error("record not found: {what}")]
    NotFound {
        /// Human-readable description of what was being looked up
        what: String,
    },
}

/// Database error types, wrapping both `SQLx` and [`StorageError`].
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error from `SQLx`
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Database result type
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Storage result type for pure functions
pub type StorageResult<T> = Result<T, StorageError>;

/// A validated path to a `.db` file on disk.
#[nutype(
    sanitize(with = |path: PathBuf| path),
    validate(predicate = |path| !path.as_os_str().is_empty() && path.extension().is_some_and(|ext| ext == "db")),
    derive(Clone, Debug, Eq, PartialEq)
)]
pub struct DatabasePath(PathBuf);

impl DatabasePath {
    /// Create a new database path with validation
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty or has an invalid extension
    pub fn new<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let path_buf = path.as_ref().to_path_buf();
        Self::try_new(path_buf).map_err(|_| {
            DatabaseError::Storage(StorageError::Configuration {
                field: "database_path".to_string(),
                reason: "path is empty or has invalid extension (must be .db)".to_string(),
            })
        })
    }

    /// Get the path as `PathBuf`
    pub fn as_path(&self) -> PathBuf {
        self.clone().into_inner()
    }

    /// Generate `SQLite` connection string (functional core)
    pub fn to_connection_string(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.as_path().display())
    }

    /// Get parent directory for file creation (functional core)
    pub fn parent_directory(&self) -> Option<PathBuf> {
        self.as_path().parent().map(std::path::Path::to_path_buf)
    }

    /// Check if file exists (pure function for testing)
    pub fn exists(&self) -> bool {
        self.as_path().exists()
    }
}

impl std::fmt::Display for DatabasePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_path().display())
    }
}

/// Database configuration with connection pool settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    path: DatabasePath,
    pool_size: ConnectionPoolSize,
    enable_wal_mode: bool,
    enable_foreign_keys: bool,
}

impl DatabaseConfig {
    /// Create new database config with default settings
    pub fn new(path: DatabasePath) -> Self {
        Self {
            path,
            pool_size: ConnectionPoolSize::default(),
            enable_wal_mode: true,
            enable_foreign_keys: true,
        }
    }

    /// Create config for testing with minimal settings
    ///
    /// # Panics
    ///
    /// Panics if the default pool size cannot be created (should never happen)
    pub fn for_testing(path: DatabasePath) -> Self {
        Self {
            path,
            pool_size: ConnectionPoolSize::try_new(1)
                .expect("pool size 1 should be valid (range: 1-1000)"),
            enable_wal_mode: false,
            enable_foreign_keys: false,
        }
    }

    /// Builder pattern: set connection pool size
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: ConnectionPoolSize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Builder pattern: enable/disable WAL mode
    #[must_use]
    pub fn with_wal_mode(mut self, enable: bool) -> Self {
        self.enable_wal_mode = enable;
        self
    }

    /// Builder pattern: enable/disable foreign keys
    #[must_use]
    pub fn with_foreign_keys(mut self, enable: bool) -> Self {
        self.enable_foreign_keys = enable;
        self
    }

    /// Get the database path
    pub fn path(&self) -> &DatabasePath {
        &self.path
    }

    /// Get the connection pool size
    pub fn pool_size(&self) -> ConnectionPoolSize {
        self.pool_size
    }

    /// Check if WAL mode is enabled
    pub fn wal_mode_enabled(&self) -> bool {
        self.enable_wal_mode
    }

    /// Check if foreign keys are enabled
    pub fn foreign_keys_enabled(&self) -> bool {
        self.enable_foreign_keys
    }

    /// Validate configuration (functional core)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn validate(&self) -> StorageResult<()> {
        if self.pool_size.as_usize() == 0 {
            return Err(StorageError::Configuration {
                field: "pool_size".to_string(),
                reason: "pool size must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Database connection with managed pool
#[derive(Clone)]
pub struct DatabaseConnection {
    pool: Pool<Sqlite>,
    config: DatabaseConfig,
}

// Functional Core: Pure business logic
impl DatabaseConnection {
    /// Generate `SQLite` options from config (pure function)
    fn create_connect_options(config: &DatabaseConfig) -> sqlx::sqlite::SqliteConnectOptions {
        use sqlx::ConnectOptions;
        use sqlx::sqlite::SqliteConnectOptions;

        let mut options = SqliteConnectOptions::new()
            .filename(config.path().as_path())
            .create_if_missing(true);

        if config.wal_mode_enabled() {
            options = options.pragma("journal_mode", "WAL");
        }

        if config.foreign_keys_enabled() {
            options = options.pragma("foreign_keys", "ON");
        }

        options.disable_statement_logging()
    }
}

// Imperative Shell: I/O operations
impl DatabaseConnection {
    /// Initialize database connection (imperative shell)
    ///
    /// # Errors
    ///
    /// Returns an error if database initialization fails
    pub async fn initialize(config: DatabaseConfig) -> DatabaseResult<Self> {
        config.validate().map_err(DatabaseError::Storage)?;

        Self::ensure_parent_directory_exists(&config).await?;

        let pool = Self::create_connection_pool(&config).await?;

        Self::apply_database_settings(&pool).await?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool, config })
    }

    async fn ensure_parent_directory_exists(config: &DatabaseConfig) -> DatabaseResult<()> {
        if let Some(parent) = config.path().parent_directory() {
            tokio::fs::create_dir_all(&parent).await.map_err(|e| {
                DatabaseError::Storage(StorageError::FileSystem {
                    message: format!("failed to create directory {}: {}", parent.display(), e),
                })
            })?;
        }
        Ok(())
    }

    async fn create_connection_pool(config: &DatabaseConfig) -> DatabaseResult<Pool<Sqlite>> {
        let options = Self::create_connect_options(config);

        SqlitePool::connect_with(options).await.map_err(|e| {
            DatabaseError::Storage(StorageError::ConnectionPool {
                message: format!("failed to create connection pool: {e}"),
            })
        })
    }

    async fn apply_database_settings(pool: &Pool<Sqlite>) -> DatabaseResult<()> {
        for pragma in [
            "PRAGMA synchronous = NORMAL",
            "PRAGMA cache_size = -65536",
            "PRAGMA temp_store = MEMORY",
            "PRAGMA mmap_size = 268435456",
        ] {
            sqlx::query(pragma).execute(pool).await.map_err(|e| {
                DatabaseError::Storage(StorageError::Database {
                    message: format!("failed to apply `{pragma}`: {e}"),
                })
            })?;
        }
        Ok(())
    }

    /// Run embedded database migrations (imperative shell)
    async fn run_migrations(pool: &Pool<Sqlite>) -> DatabaseResult<()> {
        info!("running embedded database migrations");

        match MIGRATOR.run(pool).await {
            Ok(()) => {
                info!("database migrations completed successfully");
                Ok(())
            }
            Err(e) => {
                warn!("migration failed: {}", e);
                Err(DatabaseError::Storage(StorageError::Migration {
                    version: "unknown".to_string(),
                    message: format!("schema migration execution failed: {e}"),
                }))
            }
        }
    }

    /// Check if database file exists
    pub fn database_file_exists(&self) -> bool {
        self.config.path().exists()
    }

    /// Test the database connection
    ///
    /// # Errors
    ///
    /// Returns an error if the connection test fails
    pub async fn test_connection(&self) -> DatabaseResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DatabaseError::Storage(StorageError::Database {
                    message: format!("connection test failed: {e}"),
                })
            })?;
        Ok(())
    }

    /// Get access to the connection pool for advanced operations
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Get the database configuration
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn valid_db_extension_is_accepted() {
        let path = DatabasePath::new("test.db").unwrap();
        assert!(path.to_connection_string().contains("test.db"));
    }

    #[test]
    fn empty_path_is_rejected() {
        let result = DatabasePath::new("");
        assert!(result.is_err());
    }

    #[test]
    fn non_db_extension_is_rejected() {
        let result = DatabasePath::new("test.txt");
        assert!(result.is_err());
    }

    #[test]
    fn connection_string_has_expected_shape() {
        let path = DatabasePath::new("/tmp/test.db").unwrap();
        let conn_str = path.to_connection_string();
        assert!(conn_str.starts_with("sqlite://"));
        assert!(conn_str.contains("mode=rwc"));
    }

    #[test]
    fn default_config_has_expected_defaults() {
        let path = DatabasePath::new("test.db").unwrap();
        let config = DatabaseConfig::new(path);
        assert_eq!(config.pool_size().as_usize(), 10);
        assert!(config.wal_mode_enabled());
        assert!(config.foreign_keys_enabled());
    }

    #[test]
    fn testing_config_disables_wal_and_foreign_keys() {
        let path = DatabasePath::new("test.db").unwrap();
        let config = DatabaseConfig::for_testing(path);
        assert_eq!(config.pool_size().as_usize(), 1);
        assert!(!config.wal_mode_enabled());
        assert!(!config.foreign_keys_enabled());
    }

    #[tokio::test]
    async fn initialize_creates_database_file_and_runs_migrations() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let path = DatabasePath::new(db_path).unwrap();
        let config = DatabaseConfig::for_testing(path);

        let connection = DatabaseConnection::initialize(config).await.unwrap();
        assert!(connection.database_file_exists());

        let version_check = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations")
            .fetch_one(connection.pool())
            .await;
        assert!(version_check.is_ok());
    }

    #[tokio::test]
    async fn connection_test_succeeds_on_healthy_database() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let path = DatabasePath::new(db_path).unwrap();
        let config = DatabaseConfig::for_testing(path);

        let connection = DatabaseConnection::initialize(config).await.unwrap();
        assert!(connection.test_connection().await.is_ok());
    }
}
