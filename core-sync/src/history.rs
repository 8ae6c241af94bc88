//! Audit trail of sync runs.
//!
//! A run opens a [`PendingHistoryRecord`] when it starts and consumes it
//! exactly once with [`PendingHistoryRecord::complete`], which yields the
//! immutable [`HistoryRecord`] handed to a [`HistoryStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_async::sync::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, SqlitePool};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use crate::config::{SyncConfiguration, SyncDirection};
use crate::error::{Result, SyncError};
use crate::outcome::{ReceiveResult, SendResult};

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    /// Every branch succeeded
    Success,
    /// Bidirectional run where exactly one branch failed
    Partial,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for HistoryStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(Self::Success),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended, as needed to close its history record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub status: HistoryStatus,
    pub retry_count: u32,
    pub receive_result: Option<ReceiveResult>,
    pub send_result: Option<SendResult>,
    pub error: Option<String>,
}

impl RunSummary {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: HistoryStatus::Failed,
            retry_count: 0,
            receive_result: None,
            send_result: None,
            error: Some(error.into()),
        }
    }
}

/// A run that has started but not yet finished.
#[derive(Debug)]
pub struct PendingHistoryRecord {
    id: Uuid,
    config_id: String,
    storage_key: String,
    direction: SyncDirection,
    start_time: i64,
}

impl PendingHistoryRecord {
    pub fn begin(config: &SyncConfiguration, start_time: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            config_id: config.id.clone(),
            storage_key: config.storage_key.clone(),
            direction: config.direction,
            start_time,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn complete(self, end_time: i64, summary: RunSummary) -> HistoryRecord {
        HistoryRecord {
            id: self.id,
            config_id: self.config_id,
            storage_key: self.storage_key,
            direction: self.direction,
            start_time: self.start_time,
            end_time: end_time.max(self.start_time),
            status: summary.status,
            retry_count: summary.retry_count,
            receive_result: summary.receive_result,
            send_result: summary.send_result,
            error: summary.error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: Uuid,
    pub config_id: String,
    pub storage_key: String,
    pub direction: SyncDirection,
    /// Epoch milliseconds
    pub start_time: i64,
    pub end_time: i64,
    pub status: HistoryStatus,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_result: Option<ReceiveResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_result: Option<SendResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryRecord {
    pub fn duration_ms(&self) -> u64 {
        (self.end_time - self.start_time).max(0) as u64
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.start_time)
    }
}

// ============================================================================
// Store trait
// ============================================================================

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: &HistoryRecord) -> Result<()>;

    /// Most recent records first.
    async fn list_by_config(&self, config_id: &str, limit: u32) -> Result<Vec<HistoryRecord>>;

    /// Keep only the newest `keep` records of a configuration; returns how
    /// many were removed.
    async fn prune(&self, config_id: &str, keep: usize) -> Result<u64>;
}

// ============================================================================
// SQLite
// ============================================================================

pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    /// Wrap an existing pool and create the table if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                core_async::fs::create_dir_all(parent).await.map_err(|e| {
                    SyncError::Database(format!(
                        "Failed to create history directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;
        Self::new(pool).await
    }

    /// Private in-memory database, for tests and ephemeral hosts.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;
        Self::new(pool).await
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_history (
                id TEXT PRIMARY KEY NOT NULL,
                config_id TEXT NOT NULL,
                storage_key TEXT NOT NULL,
                direction TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                receive_result TEXT,
                send_result TEXT,
                error TEXT,
                CONSTRAINT sync_history_status_check CHECK (
                    status IN ('success', 'partial', 'failed')
                )
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sync_history_config
            ON sync_history(config_id, start_time DESC)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct HistoryRecordRow {
    id: String,
    config_id: String,
    storage_key: String,
    direction: String,
    start_time: i64,
    end_time: i64,
    status: String,
    retry_count: i64,
    receive_result: Option<String>,
    send_result: Option<String>,
    error: Option<String>,
}

fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    raw: Option<String>,
) -> Result<Option<T>> {
    raw.map(|text| {
        serde_json::from_str(&text)
            .map_err(|e| SyncError::Database(format!("Invalid {} column: {}", column, e)))
    })
    .transpose()
}

fn encode_json<T: Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(|e| SyncError::Database(e.to_string())))
        .transpose()
}

impl TryFrom<HistoryRecordRow> for HistoryRecord {
    type Error = SyncError;

    fn try_from(row: HistoryRecordRow) -> Result<Self> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| SyncError::Database(format!("Invalid history id {}: {}", row.id, e)))?;
        let direction: SyncDirection = row
            .direction
            .parse()
            .map_err(|_| SyncError::Database(format!("Invalid direction: {}", row.direction)))?;
        let status: HistoryStatus = row.status.parse()?;

        Ok(HistoryRecord {
            id,
            config_id: row.config_id,
            storage_key: row.storage_key,
            direction,
            start_time: row.start_time,
            end_time: row.end_time,
            status,
            retry_count: row.retry_count.max(0) as u32,
            receive_result: decode_json("receive_result", row.receive_result)?,
            send_result: decode_json("send_result", row.send_result)?,
            error: row.error,
        })
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, record: &HistoryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_history (
                id, config_id, storage_key, direction,
                start_time, end_time, status, retry_count,
                receive_result, send_result, error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.config_id)
        .bind(&record.storage_key)
        .bind(record.direction.as_str())
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.status.as_str())
        .bind(record.retry_count as i64)
        .bind(encode_json(&record.receive_result)?)
        .bind(encode_json(&record.send_result)?)
        .bind(&record.error)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        debug!(record_id = %record.id, "History record appended");
        Ok(())
    }

    async fn list_by_config(&self, config_id: &str, limit: u32) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query_as::<_, HistoryRecordRow>(
            r#"
            SELECT id, config_id, storage_key, direction,
                   start_time, end_time, status, retry_count,
                   receive_result, send_result, error
            FROM sync_history
            WHERE config_id = ?
            ORDER BY start_time DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(config_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter()
            .map(HistoryRecord::try_from)
            .collect::<Result<Vec<_>>>()
    }

    async fn prune(&self, config_id: &str, keep: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_history
            WHERE config_id = ?
              AND id NOT IN (
                SELECT id FROM sync_history
                WHERE config_id = ?
                ORDER BY start_time DESC, rowid DESC
                LIMIT ?
              )
            "#,
        )
        .bind(config_id)
        .bind(config_id)
        .bind(keep as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Vector-backed store for tests and hosts without a database.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    records: RwLock<Vec<HistoryRecord>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in insertion order.
    pub async fn records(&self) -> Vec<HistoryRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, record: &HistoryRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn list_by_config(&self, config_id: &str, limit: u32) -> Result<Vec<HistoryRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.config_id == config_id)
            .collect();
        // Newest first; insertion order breaks ties.
        matching.sort_by(|(ia, a), (ib, b)| b.start_time.cmp(&a.start_time).then(ib.cmp(ia)));
        Ok(matching
            .into_iter()
            .take(limit as usize)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn prune(&self, config_id: &str, keep: usize) -> Result<u64> {
        let kept: Vec<Uuid> = self
            .list_by_config(config_id, u32::try_from(keep).unwrap_or(u32::MAX))
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();

        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.config_id != config_id || kept.contains(&r.id));
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: &str) -> SyncConfiguration {
        SyncConfiguration::new(id, "profile", "firestore", SyncDirection::Bidirectional)
    }

    fn record(id: &str, start: i64, status: HistoryStatus) -> HistoryRecord {
        PendingHistoryRecord::begin(&config(id), start).complete(
            start + 10,
            RunSummary {
                status,
                retry_count: 2,
                receive_result: Some(ReceiveResult {
                    success: true,
                    received_count: Some(4),
                    error: None,
                }),
                send_result: Some(SendResult {
                    success: false,
                    sent_count: None,
                    error: Some("Send error".into()),
                }),
                error: Some("Send failed: Send error".into()),
            },
        )
    }

    #[test]
    fn test_complete_consumes_pending_record() {
        let pending = PendingHistoryRecord::begin(&config("cfg-1"), 1_000);
        let id = pending.id();
        let record = pending.complete(900, RunSummary::failed("Sync configuration is disabled"));

        assert_eq!(record.id, id);
        assert_eq!(record.status, HistoryStatus::Failed);
        assert_eq!(record.direction, SyncDirection::Bidirectional);
        // End time is clamped to the start time
        assert_eq!(record.end_time, 1_000);
        assert_eq!(record.duration_ms(), 0);
        assert!(record.started_at().is_some());
    }

    #[test]
    fn test_record_json_is_camel_case() {
        let json = serde_json::to_value(record("cfg-1", 5, HistoryStatus::Partial)).unwrap();
        assert_eq!(json["configId"], "cfg-1");
        assert_eq!(json["status"], "partial");
        assert_eq!(json["retryCount"], 2);
        assert_eq!(json["sendResult"]["error"], "Send error");
    }

    #[core_async::test]
    async fn test_sqlite_append_and_list() {
        let store = SqliteHistoryStore::in_memory().await.unwrap();
        let older = record("cfg-1", 100, HistoryStatus::Success);
        let newer = record("cfg-1", 200, HistoryStatus::Partial);
        let other = record("cfg-2", 300, HistoryStatus::Failed);

        store.append(&older).await.unwrap();
        store.append(&newer).await.unwrap();
        store.append(&other).await.unwrap();

        let listed = store.list_by_config("cfg-1", 10).await.unwrap();
        assert_eq!(listed, vec![newer.clone(), older]);

        let limited = store.list_by_config("cfg-1", 1).await.unwrap();
        assert_eq!(limited, vec![newer]);
    }

    #[core_async::test]
    async fn test_open_creates_missing_directories() {
        let root = std::env::temp_dir().join(format!("kvsync-history-{}", uuid::Uuid::new_v4()));
        let path = root.join("nested").join("history.db");

        let store = SqliteHistoryStore::open(&path).await.unwrap();
        store
            .append(&record("cfg-1", 100, HistoryStatus::Success))
            .await
            .unwrap();
        assert!(path.exists());

        drop(store);
        let _ = core_async::fs::remove_dir_all(&root).await;
    }

    #[core_async::test]
    async fn test_sqlite_duplicate_id_is_database_error() {
        let store = SqliteHistoryStore::in_memory().await.unwrap();
        let record = record("cfg-1", 100, HistoryStatus::Success);
        store.append(&record).await.unwrap();

        let error = store.append(&record).await.unwrap_err();
        assert!(matches!(error, SyncError::Database(_)));
    }

    #[core_async::test]
    async fn test_sqlite_prune_keeps_newest() {
        let store = SqliteHistoryStore::in_memory().await.unwrap();
        for start in [100, 200, 300, 400] {
            store
                .append(&record("cfg-1", start, HistoryStatus::Success))
                .await
                .unwrap();
        }
        store
            .append(&record("cfg-2", 50, HistoryStatus::Success))
            .await
            .unwrap();

        let removed = store.prune("cfg-1", 2).await.unwrap();
        assert_eq!(removed, 2);

        let starts: Vec<_> = store
            .list_by_config("cfg-1", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.start_time)
            .collect();
        assert_eq!(starts, vec![400, 300]);
        assert_eq!(store.list_by_config("cfg-2", 10).await.unwrap().len(), 1);
    }

    #[core_async::test]
    async fn test_in_memory_store_matches_sqlite_semantics() {
        let store = InMemoryHistoryStore::new();
        for start in [300, 100, 200] {
            store
                .append(&record("cfg-1", start, HistoryStatus::Success))
                .await
                .unwrap();
        }

        let starts: Vec<_> = store
            .list_by_config("cfg-1", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.start_time)
            .collect();
        assert_eq!(starts, vec![300, 200, 100]);

        assert_eq!(store.prune("cfg-1", 1).await.unwrap(), 2);
        assert_eq!(store.records().await.len(), 1);
        assert_eq!(store.records().await[0].start_time, 300);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("partial".parse::<HistoryStatus>().unwrap(), HistoryStatus::Partial);
        assert!("unknown".parse::<HistoryStatus>().is_err());
    }
}
