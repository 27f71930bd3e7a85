//! S3-compatible object storage disk
//!
//! Serves `s3` disks and `gcs` disks (through the GCS XML interoperability
//! endpoint with HMAC keys). Keys are listed relative to the optional prefix.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use tracing::{debug, instrument};

use super::{ArchiveReader, StorageBackend, StorageError, StorageResult, validate_path};
use crate::config::DiskConfig;
use crate::core::models::DriverKind;

const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Object disk configuration
#[derive(Debug, Clone)]
pub struct ObjectDiskConfig {
    pub bucket: String,
    /// Optional prefix for all keys
    pub prefix: Option<String>,
    pub region: Option<String>,
    /// Endpoint URL (MinIO, R2, GCS, ...)
    pub endpoint: Option<String>,
    /// Static credentials; the default AWS provider chain is used when absent
    pub key: Option<String>,
    pub secret: Option<String>,
}

impl ObjectDiskConfig {
    pub fn from_disk_config(
        name: &str,
        driver: DriverKind,
        config: &DiskConfig,
    ) -> StorageResult<Self> {
        let bucket = config.bucket.clone().ok_or_else(|| StorageError::Config {
            disk: name.to_string(),
            reason: "object storage disks need a `bucket`".to_string(),
        })?;

        let endpoint = match (driver, &config.endpoint) {
            (_, Some(endpoint)) => Some(endpoint.clone()),
            (DriverKind::Gcs, None) => Some(GCS_ENDPOINT.to_string()),
            _ => None,
        };

        Ok(Self {
            bucket,
            prefix: config
                .prefix
                .as_ref()
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            region: config.region.clone(),
            endpoint,
            key: config.key.clone(),
            secret: config.secret.clone(),
        })
    }
}

pub struct ObjectDisk {
    name: String,
    driver: DriverKind,
    client: Client,
    config: ObjectDiskConfig,
}

impl ObjectDisk {
    /// Build the client. No request is sent until the first operation.
    pub async fn connect(name: &str, driver: DriverKind, config: ObjectDiskConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        // GCS ignores the region but the signer needs one.
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());
        loader = loader.region(Region::new(region));

        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        if let (Some(key), Some(secret)) = (&config.key, &config.secret) {
            loader = loader.credentials_provider(Credentials::new(
                key.clone(),
                secret.clone(),
                None,
                None,
                "bkpanel-config",
            ));
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some() && driver != DriverKind::Gcs)
            .build();

        Self {
            name: name.to_string(),
            driver,
            client: Client::from_conf(s3_config),
            config,
        }
    }

    fn key(&self, path: &str) -> StorageResult<String> {
        let path = validate_path(path)?;
        Ok(match &self.config.prefix {
            Some(prefix) => format!("{}/{}", prefix, path),
            None => path.to_string(),
        })
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        match &self.config.prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .and_then(|k| k.strip_prefix('/'))
                .unwrap_or(key),
            None => key,
        }
    }

    fn remote<E: std::error::Error>(e: E) -> StorageError {
        StorageError::Remote(DisplayErrorContext(e).to_string())
    }

    async fn head(
        &self,
        path: &str,
    ) -> StorageResult<Option<aws_sdk_s3::operation::head_object::HeadObjectOutput>> {
        let key = self.key(path)?;
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(output)),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(None)
                } else {
                    Err(Self::remote(service_error))
                }
            }
        }
    }
}

#[async_trait]
impl StorageBackend for ObjectDisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn driver(&self) -> DriverKind {
        self.driver
    }

    #[instrument(skip(self), fields(disk = %self.name, bucket = %self.config.bucket))]
    async fn list_all(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;
        let list_prefix = self.config.prefix.as_ref().map(|p| format!("{}/", p));

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.config.bucket);

            if let Some(prefix) = &list_prefix {
                request = request.prefix(prefix);
            }
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| StorageError::Unreachable {
                disk: self.name.clone(),
                reason: DisplayErrorContext(e).to_string(),
            })?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    // Directory placeholder objects
                    if key.ends_with('/') {
                        continue;
                    }
                    keys.push(self.strip_prefix(key).to_string());
                }
            }

            match (response.is_truncated(), response.next_continuation_token()) {
                (Some(true), Some(token)) => continuation_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(count = keys.len(), "Listed object disk");
        Ok(keys)
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        if validate_path(path).is_err() {
            return Ok(false);
        }
        Ok(self.head(path).await?.is_some())
    }

    async fn size(&self, path: &str) -> StorageResult<u64> {
        let head = self
            .head(path)
            .await?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        head.content_length()
            .map(|len| len.max(0) as u64)
            .ok_or_else(|| StorageError::Remote("object has no content length".to_string()))
    }

    async fn last_modified(&self, path: &str) -> StorageResult<i64> {
        let head = self
            .head(path)
            .await?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        head.last_modified()
            .map(|ts| ts.secs())
            .ok_or_else(|| StorageError::Remote("object has no modification time".to_string()))
    }

    #[instrument(skip(self), fields(disk = %self.name))]
    async fn delete(&self, path: &str) -> StorageResult<()> {
        // DeleteObject succeeds on missing keys, so check first to report NotFound.
        if self.head(path).await?.is_none() {
            return Err(StorageError::NotFound(path.to_string()));
        }

        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(self.key(path)?)
            .send()
            .await
            .map_err(Self::remote)?;

        Ok(())
    }

    async fn open_for_download(&self, path: &str) -> StorageResult<ArchiveReader> {
        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(self.key(path)?)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    StorageError::NotFound(path.to_string())
                } else {
                    Self::remote(service_error)
                }
            })?;

        Ok(Box::pin(response.body.into_async_read()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk_config(driver: &str) -> DiskConfig {
        DiskConfig {
            driver: driver.to_string(),
            bucket: Some("backups".to_string()),
            prefix: Some("/site/".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_gcs_defaults_to_interoperability_endpoint() {
        let config =
            ObjectDiskConfig::from_disk_config("gcs", DriverKind::Gcs, &disk_config("gcs"))
                .unwrap();
        assert_eq!(config.endpoint.as_deref(), Some(GCS_ENDPOINT));
        assert_eq!(config.prefix.as_deref(), Some("site"));
    }

    #[test]
    fn test_s3_without_bucket_is_config_error() {
        let config = DiskConfig {
            driver: "s3".to_string(),
            ..Default::default()
        };
        let result = ObjectDiskConfig::from_disk_config("s3", DriverKind::S3, &config);
        assert!(matches!(result, Err(StorageError::Config { .. })));
    }

    #[tokio::test]
    async fn test_keys_apply_prefix() {
        let config =
            ObjectDiskConfig::from_disk_config("s3", DriverKind::S3, &disk_config("s3")).unwrap();
        let disk = ObjectDisk::connect("s3", DriverKind::S3, config).await;

        assert_eq!(disk.key("app/a.zip").unwrap(), "site/app/a.zip");
        assert_eq!(disk.strip_prefix("site/app/a.zip"), "app/a.zip");
        assert!(disk.key("../a.zip").is_err());
    }
}
