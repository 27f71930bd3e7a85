use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_rusqlite::rusqlite::OptionalExtension;
use tokio_rusqlite::{Connection, params, rusqlite};

use crate::core::models::BackupOption;
use crate::core::progress::{ProgressRecord, ProgressStatus, ProgressStore};

/// Progress store backed by the shared SQLite file.
///
/// Expired rows are invisible to `get` and swept on every `put`.
#[derive(Clone)]
pub struct SqliteProgressStore {
    conn: Connection,
}

impl SqliteProgressStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Remove expired rows, returning how many were deleted.
    #[cfg(test)]
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let removed = self
            .conn
            .call(move |c| {
                c.execute(
                    "DELETE FROM backup_progress WHERE expires_at <= ?1",
                    params![now],
                )
            })
            .await?;
        Ok(removed)
    }
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn put(&self, token: &str, record: &ProgressRecord, ttl: Duration) -> Result<()> {
        let token = token.to_string();
        let record = record.clone();
        let now = Utc::now().timestamp();
        let expires_at = now + ttl.as_secs() as i64;

        self.conn
            .call(move |c| {
                let tx = c.transaction()?;

                tx.execute(
                    "DELETE FROM backup_progress WHERE expires_at <= ?1",
                    params![now],
                )?;

                tx.execute(
                    "INSERT INTO backup_progress
                        (token, percentage, message, status, option, updated_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(token) DO UPDATE SET
                        percentage = excluded.percentage,
                        message = excluded.message,
                        status = excluded.status,
                        option = excluded.option,
                        updated_at = excluded.updated_at,
                        expires_at = excluded.expires_at",
                    params![
                        &token,
                        record.percentage,
                        &record.message,
                        record.status.as_str(),
                        record.option.as_str(),
                        record.updated_at.to_rfc3339(),
                        expires_at
                    ],
                )?;

                tx.commit()?;
                Ok::<(), rusqlite::Error>(())
            })
            .await?;

        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<ProgressRecord>> {
        let token = token.to_string();
        let now = Utc::now().timestamp();

        let row = self
            .conn
            .call(move |c| {
                c.query_row(
                    "SELECT percentage, message, status, option, updated_at
                     FROM backup_progress
                     WHERE token = ?1 AND expires_at > ?2",
                    params![token, now],
                    |row| {
                        Ok((
                            row.get::<_, u8>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()
            })
            .await?;

        let Some((percentage, message, status, option, updated_at)) = row else {
            return Ok(None);
        };

        let status = ProgressStatus::from_str(&status)
            .ok_or_else(|| anyhow!("Unknown progress status in database: {}", status))?;
        let option = BackupOption::parse(Some(&option))
            .ok_or_else(|| anyhow!("Unknown backup option in database: {}", option))?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| anyhow!("Invalid progress timestamp {}: {}", updated_at, e))?;

        Ok(Some(ProgressRecord {
            percentage,
            message,
            status,
            updated_at,
            option,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(percentage: u8, status: ProgressStatus) -> ProgressRecord {
        ProgressRecord::new(percentage, "Finalizing backup...", status, BackupOption::OnlyDb)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let temp = tempdir().unwrap();
        let conn = crate::db::init(&temp.path().join("progress.db")).await.unwrap();
        let store = SqliteProgressStore::new(conn);

        assert!(store.get("missing").await.unwrap().is_none());

        let written = record(90, ProgressStatus::Processing);
        store
            .put("job-1", &written, Duration::from_secs(3600))
            .await
            .unwrap();

        let read = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(read.percentage, 90);
        assert_eq!(read.status, ProgressStatus::Processing);
        assert_eq!(read.option, BackupOption::OnlyDb);
        assert_eq!(read.message, "Finalizing backup...");
        assert_eq!(read.updated_at.timestamp(), written.updated_at.timestamp());
    }

    #[tokio::test]
    async fn test_second_connection_sees_writes() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("progress.db");
        let writer = SqliteProgressStore::new(crate::db::init(&path).await.unwrap());
        let reader = SqliteProgressStore::new(crate::db::init(&path).await.unwrap());

        writer
            .put("job-1", &record(10, ProgressStatus::Processing), Duration::from_secs(60))
            .await
            .unwrap();
        writer
            .put("job-1", &record(100, ProgressStatus::Success), Duration::from_secs(60))
            .await
            .unwrap();

        let read = reader.get("job-1").await.unwrap().unwrap();
        assert_eq!(read.percentage, 100);
        assert_eq!(read.status, ProgressStatus::Success);
    }

    #[tokio::test]
    async fn test_expired_rows_are_hidden_and_purged() {
        let temp = tempdir().unwrap();
        let conn = crate::db::init(&temp.path().join("progress.db")).await.unwrap();
        let store = SqliteProgressStore::new(conn);

        store
            .put("job-1", &record(50, ProgressStatus::Processing), Duration::ZERO)
            .await
            .unwrap();

        assert!(store.get("job-1").await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }
}
