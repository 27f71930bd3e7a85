//! Progress records for backup jobs, keyed by a per-job token.
//!
//! A job is the only writer of its record; any number of pollers read it,
//! possibly from another process. Writes replace the whole record and every
//! write pushes the expiry back by the store TTL.
//!
//! Two stores implement the contract:
//! - `MemoryProgressStore` (this module): single process, used by tests and `progress_store = "memory"`
//! - `SqliteProgressStore` (`crate::db::progress`): a database file shared between processes

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::BackupOption;

pub const DEFAULT_PROGRESS_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Queued,
    Processing,
    Success,
    Error,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub percentage: u8,
    pub message: String,
    pub status: ProgressStatus,
    pub updated_at: DateTime<Utc>,
    pub option: BackupOption,
}

impl ProgressRecord {
    pub fn new(
        percentage: u8,
        message: impl Into<String>,
        status: ProgressStatus,
        option: BackupOption,
    ) -> Self {
        Self {
            percentage: percentage.min(100),
            message: message.into(),
            status,
            updated_at: Utc::now(),
            option,
        }
    }

    /// Placeholder written when a job is handed to a queue.
    pub fn queued(option: BackupOption) -> Self {
        Self::new(0, "Backup queued, waiting for a worker...", ProgressStatus::Queued, option)
    }
}

/// Mint a fresh progress token.
pub fn new_token() -> String {
    format!("backup_progress_{}", Uuid::now_v7().simple())
}

/// Shared, time-limited token -> record mapping.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Replace the record for `token`, expiring `ttl` after this write.
    async fn put(&self, token: &str, record: &ProgressRecord, ttl: Duration) -> Result<()>;

    /// Current record, `None` when unknown or expired.
    async fn get(&self, token: &str) -> Result<Option<ProgressRecord>>;
}

/// What a poller sees for a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressView {
    pub success: bool,
    pub percentage: u8,
    pub message: String,
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<BackupOption>,
}

impl ProgressView {
    /// A missing record always reads as "not started yet": tokens are handed out
    /// right before their first write, so absence is a race, not an error.
    pub fn from_lookup(record: Option<ProgressRecord>) -> Self {
        match record {
            Some(record) => Self {
                success: true,
                percentage: record.percentage,
                message: record.message,
                status: record.status,
                updated_at: Some(record.updated_at),
                option: Some(record.option),
            },
            None => Self {
                success: false,
                percentage: 0,
                message: "Backup is queued and has not started yet".to_string(),
                status: ProgressStatus::Queued,
                updated_at: None,
                option: None,
            },
        }
    }
}

/// Thread-safe in-memory progress store.
///
/// Only visible inside the current process, so it suits tests and
/// deployments where the queue workers run in the server process.
#[derive(Clone, Default)]
pub struct MemoryProgressStore {
    inner: Arc<RwLock<HashMap<String, (ProgressRecord, Instant)>>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of records that have not expired yet.
    #[cfg(test)]
    pub async fn live_count(&self) -> usize {
        let now = Instant::now();
        let map = self.inner.read().await;
        map.values().filter(|(_, expires)| *expires > now).count()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn put(&self, token: &str, record: &ProgressRecord, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut map = self.inner.write().await;
        map.retain(|_, (_, expires)| *expires > now);
        map.insert(token.to_string(), (record.clone(), now + ttl));
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<ProgressRecord>> {
        let map = self.inner.read().await;
        Ok(map
            .get(token)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(record, _)| record.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(percentage: u8, status: ProgressStatus) -> ProgressRecord {
        ProgressRecord::new(percentage, "Running backup command...", status, BackupOption::Full)
    }

    #[tokio::test]
    async fn test_memory_store_put_get_replace() {
        let store = MemoryProgressStore::new();
        assert!(store.get("job-1").await.unwrap().is_none());

        store
            .put("job-1", &record(20, ProgressStatus::Processing), DEFAULT_PROGRESS_TTL)
            .await
            .unwrap();
        store
            .put("job-1", &record(90, ProgressStatus::Processing), DEFAULT_PROGRESS_TTL)
            .await
            .unwrap();

        let current = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(current.percentage, 90);
        assert_eq!(store.live_count().await, 1);
    }

    #[tokio::test]
    async fn test_memory_store_expires() {
        let store = MemoryProgressStore::new();
        store
            .put(
                "job-1",
                &record(50, ProgressStatus::Processing),
                Duration::from_millis(20),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.get("job-1").await.unwrap().is_none());
        assert_eq!(store.live_count().await, 0);
    }

    #[test]
    fn test_unknown_token_reads_as_queued() {
        let view = ProgressView::from_lookup(None);
        assert!(!view.success);
        assert_eq!(view.percentage, 0);
        assert_eq!(view.status, ProgressStatus::Queued);
    }

    #[test]
    fn test_known_token_view() {
        let view = ProgressView::from_lookup(Some(record(50, ProgressStatus::Processing)));
        assert!(view.success);
        assert_eq!(view.percentage, 50);
        assert_eq!(view.status, ProgressStatus::Processing);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "processing");
        assert_eq!(json["option"], "full");
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = new_token();
        let b = new_token();
        assert_ne!(a, b);
        assert!(a.starts_with("backup_progress_"));
    }

    #[test]
    fn test_percentage_is_capped() {
        assert_eq!(record(150, ProgressStatus::Success).percentage, 100);
    }
}
