//! Local key-value storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{LocalStore, StoreEntries},
};
use core_async::sync::RwLock;
use sqlx::{
    sqlite::{SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::PathBuf;
use tracing::debug;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS local_store (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

/// SQLite-backed local store
///
/// Values are stored as JSON text. A batched `set` runs inside a single
/// transaction so a partially written batch is never observable.
pub struct SqliteLocalStore {
    pool: SqlitePool,
}

impl SqliteLocalStore {
    /// Create a new store with the given database path
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        // SQLite URLs want forward slashes
        let path_str = db_path.to_string_lossy().replace('\\', "/");
        let db_url = format!("sqlite://{}?mode=rwc", path_str);

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to connect to DB: {}", e)))?;

        Self::create_table(&pool).await?;
        debug!(path = ?db_path, "Initialized local store");

        Ok(Self { pool })
    }

    /// Create an in-memory store (for testing)
    pub async fn in_memory() -> Result<Self> {
        // One connection, otherwise every pooled connection sees its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to connect to DB: {}", e)))?;

        Self::create_table(&pool).await?;

        Ok(Self { pool })
    }

    async fn create_table(pool: &SqlitePool) -> Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to create table: {}", e)))?;
        Ok(())
    }

    fn now() -> i64 {
        core_async::time::now_secs() as i64
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get(&self, keys: &[String]) -> Result<StoreEntries> {
        let mut entries = StoreEntries::with_capacity(keys.len());

        for key in keys {
            let row = sqlx::query("SELECT value FROM local_store WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| BridgeError::Storage(format!("Failed to read key: {}", e)))?;

            if let Some(row) = row {
                let raw: String = row.get(0);
                entries.insert(key.clone(), serde_json::from_str(&raw)?);
            }
        }

        debug!(requested = keys.len(), found = entries.len(), "Read local store keys");
        Ok(entries)
    }

    async fn set(&self, entries: StoreEntries) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            BridgeError::Storage(format!("Failed to begin transaction: {}", e))
        })?;

        let count = entries.len();
        for (key, value) in entries {
            let raw = serde_json::to_string(&value)?;
            sqlx::query(
                r#"
                INSERT INTO local_store (key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&key)
            .bind(raw)
            .bind(Self::now())
            .execute(&mut *tx)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to write key: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to commit: {}", e)))?;

        debug!(count, "Wrote local store entries");
        Ok(())
    }
}

/// In-process local store
#[derive(Default)]
pub struct MemoryLocalStore {
    entries: RwLock<StoreEntries>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with initial entries
    pub fn with_entries(entries: StoreEntries) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Copy of everything currently stored
    pub async fn snapshot(&self) -> StoreEntries {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, keys: &[String]) -> Result<StoreEntries> {
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| entries.get(key).map(|value| (key.clone(), value.clone())))
            .collect())
    }

    async fn set(&self, entries: StoreEntries) -> Result<()> {
        self.entries.write().await.extend(entries);
        Ok(())
    }
}
