//! Filesystem disk
//!
//! Archives are stored below `root`; listed paths are relative to it and always
//! use `/` separators. Remote drivers mounted into the local filesystem
//! (sshfs, curlftpfs, ...) go through this backend with their own driver kind.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tracing::{debug, instrument};

use super::{ArchiveReader, StorageBackend, StorageError, StorageResult, validate_path};
use crate::core::models::DriverKind;

pub struct LocalDisk {
    name: String,
    driver: DriverKind,
    root: PathBuf,
}

impl LocalDisk {
    pub fn new(name: &str, driver: DriverKind, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            driver,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> StorageResult<PathBuf> {
        let relative = validate_path(path)?;
        Ok(self.root.join(relative))
    }

    fn unreachable(&self, e: std::io::Error) -> StorageError {
        StorageError::Unreachable {
            disk: self.name.clone(),
            reason: format!("{}: {}", self.root.display(), e),
        }
    }

    fn not_found_or(path: &str, e: std::io::Error) -> StorageError {
        if e.kind() == ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

#[async_trait]
impl StorageBackend for LocalDisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn driver(&self) -> DriverKind {
        self.driver
    }

    #[instrument(skip(self), fields(disk = %self.name))]
    async fn list_all(&self) -> StorageResult<Vec<String>> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(|e| self.unreachable(e))?;

            while let Some(entry) = entries.next_entry().await.map_err(|e| self.unreachable(e))? {
                let file_type = entry.file_type().await.map_err(|e| self.unreachable(e))?;
                let path = entry.path();

                if file_type.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    let relative = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    files.push(relative);
                }
            }
        }

        files.sort();
        debug!(count = files.len(), "Listed local disk");
        Ok(files)
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let full = match self.full_path(path) {
            Ok(full) => full,
            Err(StorageError::InvalidPath(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        match fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn size(&self, path: &str) -> StorageResult<u64> {
        let meta = fs::metadata(self.full_path(path)?)
            .await
            .map_err(|e| Self::not_found_or(path, e))?;
        Ok(meta.len())
    }

    async fn last_modified(&self, path: &str) -> StorageResult<i64> {
        let meta = fs::metadata(self.full_path(path)?)
            .await
            .map_err(|e| Self::not_found_or(path, e))?;
        let modified = meta.modified()?;
        let secs = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(secs)
    }

    #[instrument(skip(self), fields(disk = %self.name))]
    async fn delete(&self, path: &str) -> StorageResult<()> {
        fs::remove_file(self.full_path(path)?)
            .await
            .map_err(|e| Self::not_found_or(path, e))
    }

    async fn open_for_download(&self, path: &str) -> StorageResult<ArchiveReader> {
        let file = fs::File::open(self.full_path(path)?)
            .await
            .map_err(|e| Self::not_found_or(path, e))?;
        Ok(Box::pin(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    fn create_file(root: &Path, relative: &str, content: &[u8]) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_list_all_is_recursive_and_relative() {
        let temp = tempdir().unwrap();
        create_file(temp.path(), "app/2024/01/17/a.zip", b"a");
        create_file(temp.path(), "app/b.zip", b"bb");
        create_file(temp.path(), "notes.txt", b"n");

        let disk = LocalDisk::new("local", DriverKind::Local, temp.path());
        let files = disk.list_all().await.unwrap();

        assert_eq!(files, vec!["app/2024/01/17/a.zip", "app/b.zip", "notes.txt"]);
    }

    #[tokio::test]
    async fn test_missing_root_is_unreachable() {
        let temp = tempdir().unwrap();
        let disk = LocalDisk::new("local", DriverKind::Local, temp.path().join("missing"));

        let result = disk.list_all().await;
        assert!(matches!(result, Err(StorageError::Unreachable { .. })));
    }

    #[tokio::test]
    async fn test_metadata_and_download() {
        let temp = tempdir().unwrap();
        create_file(temp.path(), "app/a.zip", b"archive-bytes");
        let disk = LocalDisk::new("local", DriverKind::Local, temp.path());

        assert!(disk.exists("app/a.zip").await.unwrap());
        assert!(!disk.exists("app/missing.zip").await.unwrap());
        assert!(!disk.exists("../escape.zip").await.unwrap());
        assert_eq!(disk.size("app/a.zip").await.unwrap(), 13);
        assert!(disk.last_modified("app/a.zip").await.unwrap() > 0);

        let mut reader = disk.open_for_download("app/a.zip").await.unwrap();
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"archive-bytes");
    }

    #[tokio::test]
    async fn test_delete_then_missing() {
        let temp = tempdir().unwrap();
        create_file(temp.path(), "app/a.zip", b"a");
        let disk = LocalDisk::new("local", DriverKind::Local, temp.path());

        disk.delete("app/a.zip").await.unwrap();
        assert!(disk.list_all().await.unwrap().is_empty());
        assert!(matches!(
            disk.delete("app/a.zip").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
