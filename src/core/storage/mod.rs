//! Disk drivers behind a single capability interface.
//!
//! Every configured disk resolves to an `Arc<dyn StorageBackend>` regardless of
//! where its archives physically live:
//!
//! - `local`: a directory on this host (also used for mounted FTP/SFTP shares)
//! - `object`: S3-compatible object storage (AWS S3, MinIO, GCS interoperability)
//! - `memory`: an in-process disk for simulation mode and tests

mod local;
mod memory;
mod object;

pub use local::LocalDisk;
pub use memory::MemoryDisk;
pub use object::{ObjectDisk, ObjectDiskConfig};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::DiskConfig;
use crate::core::models::DriverKind;

/// Byte stream handed to download callers.
pub type ArchiveReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Disk '{disk}' is unreachable: {reason}")]
    Unreachable { disk: String, reason: String },

    #[error("Backup file not found: {0}")]
    NotFound(String),

    #[error("Invalid archive path: {0}")]
    InvalidPath(String),

    #[error("Disk [{0}] is not configured")]
    UnknownDisk(String),

    #[error("Driver '{driver}' of disk '{disk}' has no native client; configure a mounted `root`")]
    UnsupportedDriver { disk: String, driver: String },

    #[error("Invalid configuration for disk '{disk}': {reason}")]
    Config { disk: String, reason: String },

    #[error("Storage backend error: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Uniform operations over a named disk.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Configured disk name
    fn name(&self) -> &str;

    fn driver(&self) -> DriverKind;

    /// Full recursive listing of every stored path.
    /// Fails with `Unreachable` instead of returning a partial listing.
    async fn list_all(&self) -> StorageResult<Vec<String>>;

    async fn exists(&self, path: &str) -> StorageResult<bool>;

    async fn size(&self, path: &str) -> StorageResult<u64>;

    /// Last modification time in epoch seconds.
    async fn last_modified(&self, path: &str) -> StorageResult<i64>;

    /// Delete a stored object, `NotFound` when it is already gone.
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Open a stored object as a stream without buffering it in full.
    async fn open_for_download(&self, path: &str) -> StorageResult<ArchiveReader>;
}

/// Cheap reachability probe: a listing that succeeds, even empty, means reachable.
pub async fn probe_reachability(disk: &dyn StorageBackend) -> StorageResult<()> {
    disk.list_all().await.map(|_| ())
}

/// Size of `path`, or 0 when the driver cannot tell.
pub async fn size_or_zero(disk: &dyn StorageBackend, path: &str) -> u64 {
    match disk.size(path).await {
        Ok(size) => size,
        Err(e) => {
            warn!(
                disk = %disk.name(),
                driver = %disk.driver(),
                file = %path,
                error = %e,
                "Could not get file size"
            );
            0
        }
    }
}

/// Modification time of `path`, or the current time when the driver cannot tell.
pub async fn last_modified_or_now(disk: &dyn StorageBackend, path: &str) -> i64 {
    match disk.last_modified(path).await {
        Ok(ts) => ts,
        Err(e) => {
            warn!(
                disk = %disk.name(),
                driver = %disk.driver(),
                file = %path,
                error = %e,
                "Could not get last modified time"
            );
            chrono::Utc::now().timestamp()
        }
    }
}

/// Resolves configured disk names to live backends.
///
/// Backends are created lazily on first use and cached for the process lifetime,
/// since disk configuration is immutable once loaded.
#[derive(Clone)]
pub struct DiskRegistry {
    configs: Arc<BTreeMap<String, DiskConfig>>,
    resolved: Arc<Mutex<HashMap<String, Arc<dyn StorageBackend>>>>,
}

impl DiskRegistry {
    pub fn new(configs: BTreeMap<String, DiskConfig>) -> Self {
        Self {
            configs: Arc::new(configs),
            resolved: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Install a ready-made backend under `name`, bypassing configuration.
    pub async fn insert(&self, backend: Arc<dyn StorageBackend>) {
        let mut map = self.resolved.lock().await;
        map.insert(backend.name().to_string(), backend);
    }

    pub fn config(&self, name: &str) -> Option<&DiskConfig> {
        self.configs.get(name)
    }

    /// Driver kind for `name` as configured, without contacting the disk.
    pub async fn driver_of(&self, name: &str) -> DriverKind {
        if let Some(backend) = self.resolved.lock().await.get(name) {
            return backend.driver();
        }
        self.configs
            .get(name)
            .map(|c| DriverKind::from_str(&c.driver))
            .unwrap_or(DriverKind::Unknown)
    }

    pub async fn resolve(&self, name: &str) -> StorageResult<Arc<dyn StorageBackend>> {
        if let Some(backend) = self.resolved.lock().await.get(name) {
            return Ok(backend.clone());
        }

        let config = self
            .configs
            .get(name)
            .ok_or_else(|| StorageError::UnknownDisk(name.to_string()))?;

        // Built without the lock held: object stores load credentials here
        let built = create_backend(name, config).await?;

        let mut map = self.resolved.lock().await;
        let backend = map.entry(name.to_string()).or_insert(built).clone();
        debug!(disk = %name, driver = %backend.driver(), "Disk resolved");
        Ok(backend)
    }
}

/// Factory function to create a backend for one configured disk.
async fn create_backend(name: &str, config: &DiskConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    let driver = DriverKind::from_str(&config.driver);

    match driver {
        DriverKind::Local => {
            let root = config.root.clone().ok_or_else(|| StorageError::Config {
                disk: name.to_string(),
                reason: "local disks need a `root`".to_string(),
            })?;
            Ok(Arc::new(LocalDisk::new(name, driver, root)))
        }
        DriverKind::S3 | DriverKind::Gcs => {
            let object_config = ObjectDiskConfig::from_disk_config(name, driver, config)?;
            Ok(Arc::new(ObjectDisk::connect(name, driver, object_config).await))
        }
        DriverKind::Memory => Ok(Arc::new(MemoryDisk::new(name))),
        DriverKind::Ftp
        | DriverKind::Sftp
        | DriverKind::Dropbox
        | DriverKind::Rackspace
        | DriverKind::Unknown => match &config.root {
            Some(root) => Ok(Arc::new(LocalDisk::new(name, driver, root.clone()))),
            None => Err(StorageError::UnsupportedDriver {
                disk: name.to_string(),
                driver: config.driver.clone(),
            }),
        },
    }
}

/// Last path segment.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Reject paths that could escape a disk root.
pub(crate) fn validate_path(path: &str) -> StorageResult<&str> {
    let trimmed = path.trim_start_matches("./");
    if trimmed.is_empty()
        || trimmed.starts_with('/')
        || trimmed.split(['/', '\\']).any(|segment| segment == "..")
    {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(trimmed)
}
