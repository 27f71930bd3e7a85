//! Operator-facing configuration and connectivity report.
//!
//! Never includes secret values: disks are described by the names of the
//! settings they carry.

use serde::Serialize;
use std::path::PathBuf;

use super::models::DriverKind;
use super::storage::{DiskRegistry, probe_reachability};
use crate::config::{AppConfig, ProgressStoreKind};

#[derive(Debug, Clone, Serialize)]
pub struct DiskDiagnostics {
    pub name: String,
    pub driver: DriverKind,
    pub reachable: bool,
    pub is_external: bool,
    pub config_keys: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryCheck {
    pub disk: String,
    pub path: PathBuf,
    pub exists: bool,
    pub writable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub version: &'static str,
    pub backup_name: String,
    pub queue_enabled: bool,
    pub queue_name: Option<String>,
    pub progress_store: ProgressStoreKind,
    pub simulation: bool,
    pub disks: Vec<DiskDiagnostics>,
    pub directories: Vec<DirectoryCheck>,
}

pub async fn collect(config: &AppConfig, disks: &DiskRegistry) -> Diagnostics {
    let mut disk_reports = Vec::new();
    let mut directories = Vec::new();

    for name in &config.backup.destination_disks {
        let driver = disks.driver_of(name).await;
        let config_keys = disks.config(name).map(|c| c.config_keys()).unwrap_or_default();

        let (reachable, error) = match disks.resolve(name).await {
            Ok(disk) => match probe_reachability(disk.as_ref()).await {
                Ok(()) => (true, None),
                Err(e) => (false, Some(e.to_string())),
            },
            Err(e) => (false, Some(e.to_string())),
        };

        if let Some(root) = disks.config(name).and_then(|c| c.root.clone()) {
            directories.push(check_directory(name, root).await);
        }

        disk_reports.push(DiskDiagnostics {
            name: name.clone(),
            driver,
            reachable,
            is_external: driver.is_external(),
            config_keys,
            error,
        });
    }

    Diagnostics {
        version: env!("CARGO_PKG_VERSION"),
        backup_name: config.backup.name.clone(),
        queue_enabled: config.queue.enabled,
        queue_name: config.queue.name.clone(),
        progress_store: config.progress_store,
        simulation: config.simulation,
        disks: disk_reports,
        directories,
    }
}

async fn check_directory(disk: &str, path: PathBuf) -> DirectoryCheck {
    let (exists, writable) = match tokio::fs::metadata(&path).await {
        Ok(meta) => (meta.is_dir(), meta.is_dir() && !meta.permissions().readonly()),
        Err(_) => (false, false),
    };

    DirectoryCheck {
        disk: disk.to_string(),
        path,
        exists,
        writable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiskConfig;

    #[tokio::test]
    async fn test_collect_reports_disks_and_directories() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.disks.insert(
            "local".into(),
            DiskConfig {
                driver: "local".into(),
                root: Some(temp.path().to_path_buf()),
                ..Default::default()
            },
        );
        config.disks.insert(
            "ftp".into(),
            DiskConfig {
                driver: "ftp".into(),
                key: Some("user".into()),
                secret: Some("hunter2".into()),
                ..Default::default()
            },
        );
        config.backup.destination_disks = vec!["local".into(), "ftp".into()];
        let registry = DiskRegistry::new(config.disks.clone());

        let diagnostics = collect(&config, &registry).await;

        assert_eq!(diagnostics.disks.len(), 2);
        let local = &diagnostics.disks[0];
        assert!(local.reachable);
        assert!(!local.is_external);
        assert_eq!(local.config_keys, vec!["driver", "root"]);

        let ftp = &diagnostics.disks[1];
        assert!(!ftp.reachable);
        assert!(ftp.is_external);
        assert!(ftp.error.is_some());

        assert_eq!(diagnostics.directories.len(), 1);
        assert!(diagnostics.directories[0].exists);
        assert!(diagnostics.directories[0].writable);

        let json = serde_json::to_string(&diagnostics).unwrap();
        assert!(!json.contains("hunter2"));
    }
}
