//! Resolves a requested archive name to a stored path.
//!
//! Callers hand in whatever the listing showed them, which may be a full
//! nested path (`site-backup/2024/01/17/x.zip`) or just a file name.

use tracing::debug;

use super::storage::{StorageBackend, StorageError, StorageResult, basename};

pub const ARCHIVE_EXTENSIONS: [&str; 3] = [".zip", ".tar", ".tar.gz"];

/// Which tier produced the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Direct,
    Pattern,
    Basename,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub path: String,
    pub tier: MatchTier,
}

/// Whether `path` looks like an archive written by the backup tool.
pub fn is_backup_archive(path: &str, backup_name: &str) -> bool {
    path.contains(backup_name) && ARCHIVE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

pub struct ArchiveLocator<'a> {
    backup_name: &'a str,
}

impl<'a> ArchiveLocator<'a> {
    pub fn new(backup_name: &'a str) -> Self {
        Self { backup_name }
    }

    /// Find `requested` on `disk`, trying each tier only if the previous one
    /// found nothing. `NotFound` when no tier matches.
    pub async fn locate(&self, disk: &dyn StorageBackend, requested: &str) -> StorageResult<Located> {
        let requested = requested.trim_start_matches('/');

        if matches!(disk.exists(requested).await, Ok(true)) {
            return Ok(Located {
                path: requested.to_string(),
                tier: MatchTier::Direct,
            });
        }

        let wanted = basename(requested);
        let listing = disk.list_all().await?;

        let pattern = listing
            .iter()
            .find(|path| basename(path) == wanted && is_backup_archive(path, self.backup_name));
        if let Some(path) = pattern {
            debug!(disk = %disk.name(), requested = %requested, found = %path, "Archive found by pattern");
            return Ok(Located {
                path: path.clone(),
                tier: MatchTier::Pattern,
            });
        }

        if let Some(path) = listing.iter().find(|path| basename(path) == wanted) {
            debug!(disk = %disk.name(), requested = %requested, found = %path, "Archive found by name only");
            return Ok(Located {
                path: path.clone(),
                tier: MatchTier::Basename,
            });
        }

        Err(StorageError::NotFound(requested.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::MemoryDisk;

    async fn disk_with(paths: &[&str]) -> MemoryDisk {
        let disk = MemoryDisk::new("mem");
        for path in paths {
            disk.put(path, b"data".to_vec(), 100).await;
        }
        disk
    }

    #[tokio::test]
    async fn test_direct_hit() {
        let disk = disk_with(&["site-backup/2024/01/17/x.zip"]).await;
        let locator = ArchiveLocator::new("site-backup");

        let found = locator
            .locate(&disk, "site-backup/2024/01/17/x.zip")
            .await
            .unwrap();
        assert_eq!(found.tier, MatchTier::Direct);
    }

    #[tokio::test]
    async fn test_pattern_prefers_backup_name_path() {
        // Unrelated entry sorts first in the listing
        let disk = disk_with(&["a-other/x.zip", "site-backup/2024/01/17/x.zip"]).await;
        let locator = ArchiveLocator::new("site-backup");

        let found = locator.locate(&disk, "x.zip").await.unwrap();
        assert_eq!(found.path, "site-backup/2024/01/17/x.zip");
        assert_eq!(found.tier, MatchTier::Pattern);
    }

    #[tokio::test]
    async fn test_basename_fallback() {
        let disk = disk_with(&["other/x.zip"]).await;
        let locator = ArchiveLocator::new("site-backup");

        let found = locator.locate(&disk, "x.zip").await.unwrap();
        assert_eq!(found.path, "other/x.zip");
        assert_eq!(found.tier, MatchTier::Basename);
    }

    #[tokio::test]
    async fn test_not_found() {
        let disk = disk_with(&["site-backup/y.zip"]).await;
        let locator = ArchiveLocator::new("site-backup");

        let result = locator.locate(&disk, "x.zip").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unreachable_disk_propagates() {
        let disk = disk_with(&[]).await;
        disk.set_reachable(false);
        let locator = ArchiveLocator::new("site-backup");

        let result = locator.locate(&disk, "x.zip").await;
        assert!(matches!(result, Err(StorageError::Unreachable { .. })));
    }

    #[test]
    fn test_is_backup_archive() {
        assert!(is_backup_archive("site-backup/2024/x.tar.gz", "site-backup"));
        assert!(is_backup_archive("site-backup/x.tar", "site-backup"));
        assert!(!is_backup_archive("site-backup/x.txt", "site-backup"));
        assert!(!is_backup_archive("other/x.zip", "site-backup"));
    }
}
