use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{ArchiveReader, StorageBackend, StorageError, StorageResult};
use crate::core::models::DriverKind;

#[derive(Clone)]
struct MemoryObject {
    data: Arc<Vec<u8>>,
    modified: i64,
}

/// In-process disk used by simulation mode and tests.
///
/// Failure injection mirrors what real remote drivers do: going offline
/// (`set_reachable(false)`) or lacking size/mtime introspection
/// (`set_metadata_supported(false)`).
pub struct MemoryDisk {
    name: String,
    objects: RwLock<BTreeMap<String, MemoryObject>>,
    reachable: AtomicBool,
    metadata_supported: AtomicBool,
}

impl MemoryDisk {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            objects: RwLock::new(BTreeMap::new()),
            reachable: AtomicBool::new(true),
            metadata_supported: AtomicBool::new(true),
        }
    }

    /// Store `data` at `path` with the given modification time (epoch seconds).
    pub async fn put(&self, path: &str, data: Vec<u8>, modified: i64) {
        let mut objects = self.objects.write().await;
        objects.insert(
            path.to_string(),
            MemoryObject {
                data: Arc::new(data),
                modified,
            },
        );
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_metadata_supported(&self, supported: bool) {
        self.metadata_supported.store(supported, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> StorageResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unreachable {
                disk: self.name.clone(),
                reason: "simulated outage".to_string(),
            })
        }
    }

    fn check_metadata(&self, operation: &str) -> StorageResult<()> {
        if self.metadata_supported.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Remote(format!(
                "{} is not supported by this driver",
                operation
            )))
        }
    }

    async fn object(&self, path: &str) -> StorageResult<MemoryObject> {
        self.check_reachable()?;
        let objects = self.objects.read().await;
        objects
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}

#[async_trait]
impl StorageBackend for MemoryDisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn driver(&self) -> DriverKind {
        DriverKind::Memory
    }

    async fn list_all(&self) -> StorageResult<Vec<String>> {
        self.check_reachable()?;
        let objects = self.objects.read().await;
        Ok(objects.keys().cloned().collect())
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        self.check_reachable()?;
        Ok(self.objects.read().await.contains_key(path))
    }

    async fn size(&self, path: &str) -> StorageResult<u64> {
        self.check_metadata("size")?;
        Ok(self.object(path).await?.data.len() as u64)
    }

    async fn last_modified(&self, path: &str) -> StorageResult<i64> {
        self.check_metadata("lastModified")?;
        Ok(self.object(path).await?.modified)
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.check_reachable()?;
        let mut objects = self.objects.write().await;
        objects
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn open_for_download(&self, path: &str) -> StorageResult<ArchiveReader> {
        let object = self.object(path).await?;
        Ok(Box::pin(Cursor::new(object.data.as_ref().clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_listing_fails() {
        let disk = MemoryDisk::new("mem");
        disk.put("a.zip", vec![1], 1).await;
        disk.set_reachable(false);

        assert!(matches!(
            disk.list_all().await,
            Err(StorageError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_from_listing() {
        let disk = MemoryDisk::new("mem");
        disk.put("app/a.zip", vec![1, 2, 3], 10).await;
        disk.put("app/b.zip", vec![4], 20).await;

        disk.delete("app/a.zip").await.unwrap();

        assert_eq!(disk.list_all().await.unwrap(), vec!["app/b.zip"]);
        assert!(matches!(
            disk.delete("app/a.zip").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
