//! SQLite database client for persistent pipeline state.
//!
//! `Database` owns the connection pool. Record-specific operations live in
//! sibling modules as further `impl Database` blocks:
//! - `nodes`: node store and lineage
//! - `runs`: run/step state machine
//! - `providers`: credential store

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use thiserror::Error;

use super::migrations::MigrationRunner;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A record with the same natural key already exists.
    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored column could not be decoded.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] super::migrations::MigrationError),
}

impl From<crate::model::UnknownStatus> for DatabaseError {
    fn from(err: crate::model::UnknownStatus) -> Self {
        DatabaseError::InvalidData(err.to_string())
    }
}

/// SQLite database client.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Opens (creating if needed) the database at `path` and applies the schema.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;

        tracing::debug!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let runner = MigrationRunner::new(self.pool.clone());
        runner.run_migrations().await?;
        Ok(())
    }
}

/// Current time in the stored timestamp format (fixed width, sortable).
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidData(format!("timestamp '{}': {}", value, e)))
}
