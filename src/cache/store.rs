//! SQLite-backed step output cache.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::model::Node;

use super::key::CacheKey;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS step_cache (
    cache_key   TEXT    PRIMARY KEY,
    step_id     INTEGER NOT NULL,
    config_hash TEXT    NOT NULL,
    input_hash  TEXT    NOT NULL,
    outputs     TEXT    NOT NULL,
    created_at  TEXT    NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_step_cache_step_id ON step_cache(step_id);
"#;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to open cache at {path}: {message}")]
    Open { path: String, message: String },

    #[error("Cache query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Output node attributes kept in a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedNode {
    pub parent_node_id: Option<i64>,
    pub value: String,
    pub ablated: bool,
    #[serde(default)]
    pub metadata: Vec<serde_json::Value>,
}

impl CachedNode {
    /// Rebuilds an unpersisted output node.
    pub fn into_node(self) -> Node {
        Node {
            parent_node_id: self.parent_node_id,
            ablated: self.ablated,
            metadata: self.metadata,
            ..Node::new(self.value)
        }
    }
}

impl From<&Node> for CachedNode {
    fn from(node: &Node) -> Self {
        Self {
            parent_node_id: node.parent_node_id,
            value: node.value.clone(),
            ablated: node.ablated,
            metadata: node.metadata.clone(),
        }
    }
}

/// Summary printed by `synda cache info`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheInfo {
    pub path: PathBuf,
    pub enabled: bool,
    pub entries: u64,
    pub steps: u64,
}

/// Step output cache, constructed once per process and shared by reference.
#[derive(Clone)]
pub struct StepCache {
    pool: SqlitePool,
    path: PathBuf,
    enabled: bool,
}

impl std::fmt::Debug for StepCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepCache")
            .field("path", &self.path)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl StepCache {
    /// Opens the cache database at `path`.
    ///
    /// A disabled cache still opens its file so that it can be inspected and
    /// cleared, but lookups always miss and writes are skipped.
    pub async fn open(path: &Path, enabled: bool) -> Result<Self, CacheError> {
        let open_error = |message: String| CacheError::Open {
            path: path.display().to_string(),
            message,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| open_error(e.to_string()))?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| open_error(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| open_error(e.to_string()))?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        tracing::debug!(path = %path.display(), enabled, "Step cache opened");
        Ok(Self {
            pool,
            path: path.to_path_buf(),
            enabled,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Option<Vec<CachedNode>>, CacheError> {
        if !self.enabled {
            return Ok(None);
        }

        let row = sqlx::query("SELECT outputs FROM step_cache WHERE cache_key = ?1")
            .bind(key.key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let outputs: String = row.get("outputs");
                Ok(Some(serde_json::from_str(&outputs)?))
            }
            None => Ok(None),
        }
    }

    /// Records the outputs of one invocation. An existing entry is kept.
    pub async fn set(&self, key: &CacheKey, outputs: &[Node]) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }

        let cached: Vec<CachedNode> = outputs.iter().map(CachedNode::from).collect();
        sqlx::query(
            "INSERT OR IGNORE INTO step_cache (cache_key, step_id, config_hash, input_hash, outputs)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(key.key.as_str())
        .bind(key.step_id)
        .bind(key.config_hash.as_str())
        .bind(key.input_hash.as_str())
        .bind(serde_json::to_string(&cached)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Removes every entry. Returns the number of entries removed.
    pub async fn clear(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM step_cache")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Removes the entries recorded for one step id.
    pub async fn clear_for_step(&self, step_id: i64) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM step_cache WHERE step_id = ?1")
            .bind(step_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn info(&self) -> Result<CacheInfo, CacheError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS entries, COUNT(DISTINCT step_id) AS steps FROM step_cache",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CacheInfo {
            path: self.path.clone(),
            enabled: self.enabled,
            entries: row.get::<i64, _>("entries") as u64,
            steps: row.get::<i64, _>("steps") as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, value: &str) -> Node {
        let mut node = Node::new(value);
        node.id = Some(id);
        node
    }

    fn outputs() -> Vec<Node> {
        let parent = node(1, "hello world");
        vec![
            Node::derived_from(&parent, "hello"),
            Node::derived_from(&parent, "world")
                .with_ablated(true)
                .with_metadata(vec![serde_json::json!({ "label": "w" })]),
        ]
    }

    #[tokio::test]
    async fn test_set_then_get_rebuilds_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StepCache::open(&dir.path().join("cache.db"), true).await.unwrap();
        let key = CacheKey::new(1, &serde_json::json!({}), &[node(1, "hello world")]);

        assert!(cache.get(&key).await.unwrap().is_none());
        cache.set(&key, &outputs()).await.unwrap();

        let rebuilt: Vec<Node> = cache
            .get(&key)
            .await
            .unwrap()
            .unwrap()
            .into_iter()
            .map(CachedNode::into_node)
            .collect();
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt[0].value, "hello");
        assert_eq!(rebuilt[0].parent_node_id, Some(1));
        assert!(rebuilt[1].ablated);
        assert_eq!(rebuilt[1].metadata, outputs()[1].metadata);
        assert!(rebuilt.iter().all(|n| n.id.is_none()));
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StepCache::open(&dir.path().join("cache.db"), false).await.unwrap();
        let key = CacheKey::new(1, &serde_json::json!({}), &[]);

        cache.set(&key, &outputs()).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
        assert_eq!(cache.info().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_clear_for_step_and_info() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StepCache::open(&dir.path().join("cache.db"), true).await.unwrap();

        for step_id in [1, 1, 2] {
            let pending = [node(step_id * 10 + 1, "x")];
            let key = CacheKey::new(step_id, &serde_json::json!({ "n": step_id }), &pending);
            cache.set(&key, &outputs()).await.unwrap();
        }

        let info = cache.info().await.unwrap();
        assert_eq!(info.entries, 2, "same key is stored once");
        assert_eq!(info.steps, 2);

        assert_eq!(cache.clear_for_step(1).await.unwrap(), 1);
        assert_eq!(cache.info().await.unwrap().steps, 1);
        assert_eq!(cache.clear().await.unwrap(), 1);
        assert_eq!(cache.info().await.unwrap().entries, 0);
    }
}
