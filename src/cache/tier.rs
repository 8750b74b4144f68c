//! Persistent cache tiers
//!
//! The memory tier lives in [`TwoTierCache`](super::TwoTierCache); this
//! module holds the backing stores behind it:
//! - `FileTier`: one JSON file per key under a directory
//! - `SqliteTier`: rows in a SQLite table, one namespace per cache

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// Errors from the persistent tier
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("date parsing error: {0}")]
    DateParse(String),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// One cached payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: Value) -> Self {
        Self {
            key: key.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Backing store behind the memory tier
#[async_trait]
pub trait PersistentTier: Send + Sync {
    async fn load(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    async fn save(&self, entry: &CacheEntry) -> CacheResult<()>;

    async fn remove(&self, key: &str) -> CacheResult<()>;

    async fn clear(&self) -> CacheResult<()>;

    /// Make pending writes durable. Called on close.
    async fn flush(&self) -> CacheResult<()> {
        Ok(())
    }

    /// Short description for logs
    fn describe(&self) -> String;
}

/// JSON file per key
///
/// File names are UUIDv5 digests of the key so arbitrary keys map to
/// safe names. Writes go to a temporary file first and are renamed into
/// place.
pub struct FileTier {
    dir: PathBuf,
}

impl FileTier {
    /// Open (creating if needed) a tier rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> CacheResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name = Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes());
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl PersistentTier for FileTier {
    async fn load(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let bytes = match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: CacheEntry = serde_json::from_slice(&bytes)?;
        // digest collisions are not trusted
        Ok((entry.key == key).then_some(entry))
    }

    async fn save(&self, entry: &CacheEntry) -> CacheResult<()> {
        let path = self.path_for(&entry.key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(entry)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(path).await?;
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.dir.display())
    }
}

/// SQLite-backed tier
///
/// Several caches can share one database file; each uses its own
/// namespace. Calls run on the blocking pool.
pub struct SqliteTier {
    conn: Arc<Mutex<Connection>>,
    namespace: String,
    location: String,
}

impl SqliteTier {
    fn init_schema(conn: &Connection) -> CacheResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            "#,
        )?;
        Ok(())
    }

    /// Open or create a tier in the database at `path`.
    pub fn open(path: impl AsRef<Path>, namespace: impl Into<String>) -> CacheResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let location = path.as_ref().display().to_string();
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            namespace: namespace.into(),
            location,
        })
    }

    /// A tier in a private in-memory database (useful for testing).
    pub fn open_in_memory(namespace: impl Into<String>) -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            namespace: namespace.into(),
            location: ":memory:".to_string(),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> CacheResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let namespace = self.namespace.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&guard, &namespace)
        })
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
    }
}

#[async_trait]
impl PersistentTier for SqliteTier {
    async fn load(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let key = key.to_string();
        self.with_conn(move |conn, namespace| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT payload_json, updated_at FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((payload_json, updated_at)) = row else {
                return Ok(None);
            };
            let timestamp = DateTime::parse_from_rfc3339(&updated_at)
                .map_err(|e| CacheError::DateParse(e.to_string()))?
                .with_timezone(&Utc);
            Ok(Some(CacheEntry {
                key,
                payload: serde_json::from_str(&payload_json)?,
                timestamp,
            }))
        })
        .await
    }

    async fn save(&self, entry: &CacheEntry) -> CacheResult<()> {
        let key = entry.key.clone();
        let payload_json = serde_json::to_string(&entry.payload)?;
        let updated_at = entry.timestamp.to_rfc3339();
        self.with_conn(move |conn, namespace| {
            conn.execute(
                r#"
                INSERT INTO cache_entries (namespace, key, payload_json, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(namespace, key) DO UPDATE SET
                    payload_json = excluded.payload_json,
                    updated_at = excluded.updated_at
                "#,
                params![namespace, key, payload_json, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        let key = key.to_string();
        self.with_conn(move |conn, namespace| {
            conn.execute(
                "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
            )?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> CacheResult<()> {
        self.with_conn(|conn, namespace| {
            conn.execute(
                "DELETE FROM cache_entries WHERE namespace = ?1",
                params![namespace],
            )?;
            Ok(())
        })
        .await
    }

    fn describe(&self) -> String {
        format!("sqlite:{}#{}", self.location, self.namespace)
    }
}
