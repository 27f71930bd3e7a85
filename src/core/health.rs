//! Secondary "healthy" signal for reachable disks.
//!
//! Reachability only says the disk answered. A health check can look deeper,
//! e.g. at whether the newest archive still matches the digest recorded next
//! to it.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::models::ArchiveEntry;
use super::storage::{StorageBackend, StorageError};
use crate::config::HealthMode;

/// Suffix of the sidecar file holding an archive's BLAKE3 hex digest.
pub const DIGEST_SUFFIX: &str = ".b3";

const READ_BUFFER_SIZE: usize = 128 * 1024;

#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Evaluated only for reachable disks. `backups` is sorted newest first.
    async fn is_healthy(&self, disk: &dyn StorageBackend, backups: &[ArchiveEntry]) -> bool;
}

/// Healthy whenever the disk is reachable.
pub struct ReachabilityHealth;

#[async_trait]
impl HealthCheck for ReachabilityHealth {
    async fn is_healthy(&self, _disk: &dyn StorageBackend, _backups: &[ArchiveEntry]) -> bool {
        true
    }
}

/// Verifies the newest archive against its `.b3` sidecar digest.
///
/// Archives without a sidecar count as healthy.
pub struct ChecksumHealth;

#[async_trait]
impl HealthCheck for ChecksumHealth {
    async fn is_healthy(&self, disk: &dyn StorageBackend, backups: &[ArchiveEntry]) -> bool {
        let Some(newest) = backups.first() else {
            return true;
        };

        match verify_archive(disk, &newest.path).await {
            Ok(Some(digest)) => {
                info!(disk = %disk.name(), file = %newest.path, digest = %digest, "Archive digest verified");
                true
            }
            Ok(None) => {
                debug!(disk = %disk.name(), file = %newest.path, "No digest sidecar, skipping verification");
                true
            }
            Err(e) => {
                warn!(disk = %disk.name(), file = %newest.path, error = %e, "Archive verification failed");
                false
            }
        }
    }
}

pub fn create_health_check(mode: HealthMode) -> Arc<dyn HealthCheck> {
    match mode {
        HealthMode::Reachability => Arc::new(ReachabilityHealth),
        HealthMode::Checksum => Arc::new(ChecksumHealth),
    }
}

/// Compare `path` against its sidecar digest.
///
/// Returns `Ok(None)` when no sidecar exists, `Ok(Some(hex))` on a match and
/// an error on mismatch or read failure.
pub async fn verify_archive(disk: &dyn StorageBackend, path: &str) -> Result<Option<String>> {
    let sidecar = format!("{}{}", path, DIGEST_SUFFIX);

    let expected = match read_to_string(disk, &sidecar).await {
        Ok(text) => text,
        Err(StorageError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e).context("Failed to read digest sidecar"),
    };
    let expected = expected.split_whitespace().next().unwrap_or_default().to_lowercase();

    let actual = hash_archive(disk, path).await?;
    if actual.to_hex().as_str() != expected {
        bail!(
            "BLAKE3 mismatch for {}: expected {}, got {}",
            path,
            expected,
            actual.to_hex()
        );
    }

    Ok(Some(expected))
}

/// Hash a stored archive using BLAKE3, streaming in chunks.
pub async fn hash_archive(disk: &dyn StorageBackend, path: &str) -> Result<blake3::Hash> {
    let mut reader = disk
        .open_for_download(path)
        .await
        .with_context(|| format!("Failed to open {}", path))?;

    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

async fn read_to_string(disk: &dyn StorageBackend, path: &str) -> Result<String, StorageError> {
    let mut reader = disk.open_for_download(path).await?;
    let mut text = String::new();
    reader.read_to_string(&mut text).await?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::MemoryDisk;

    const ARCHIVE: &str = "site-backup/2024-01-17.zip";

    fn entries() -> Vec<ArchiveEntry> {
        vec![ArchiveEntry::new(ARCHIVE.to_string(), 11, 100)]
    }

    #[tokio::test]
    async fn test_matching_digest_is_healthy() {
        let disk = MemoryDisk::new("mem");
        disk.put(ARCHIVE, b"hello world".to_vec(), 100).await;
        let digest = blake3::hash(b"hello world").to_hex().to_string();
        disk.put(&format!("{}.b3", ARCHIVE), format!("{}  x.zip\n", digest).into_bytes(), 100)
            .await;

        assert!(ChecksumHealth.is_healthy(&disk, &entries()).await);
        assert_eq!(verify_archive(&disk, ARCHIVE).await.unwrap(), Some(digest));
    }

    #[tokio::test]
    async fn test_mismatched_digest_is_unhealthy() {
        let disk = MemoryDisk::new("mem");
        disk.put(ARCHIVE, b"hello world".to_vec(), 100).await;
        let digest = blake3::hash(b"something else").to_hex().to_string();
        disk.put(&format!("{}.b3", ARCHIVE), digest.into_bytes(), 100).await;

        assert!(!ChecksumHealth.is_healthy(&disk, &entries()).await);
    }

    #[tokio::test]
    async fn test_missing_sidecar_is_healthy() {
        let disk = MemoryDisk::new("mem");
        disk.put(ARCHIVE, b"hello world".to_vec(), 100).await;

        assert!(ChecksumHealth.is_healthy(&disk, &entries()).await);
        assert!(ChecksumHealth.is_healthy(&disk, &[]).await);
    }

    #[tokio::test]
    async fn test_reachability_health_always_healthy() {
        let disk = MemoryDisk::new("mem");
        assert!(ReachabilityHealth.is_healthy(&disk, &entries()).await);
    }
}
