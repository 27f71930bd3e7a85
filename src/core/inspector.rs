//! Builds the per-disk destination reports shown on the panel.
//!
//! A report is always produced, one per configured destination: disks that
//! cannot be resolved or contacted yield an unreachable report carrying the
//! error text instead of failing the whole inspection.

use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::health::{HealthCheck, ReachabilityHealth};
use super::locator::is_backup_archive;
use super::models::{ArchiveEntry, DestinationReport};
use super::storage::{
    DiskRegistry, StorageBackend, StorageResult, last_modified_or_now, probe_reachability,
    size_or_zero,
};

#[derive(Clone)]
pub struct DestinationInspector {
    disks: DiskRegistry,
    backup_name: String,
    destinations: Vec<String>,
    health: Arc<dyn HealthCheck>,
}

impl DestinationInspector {
    pub fn new(disks: DiskRegistry, backup_name: impl Into<String>, destinations: Vec<String>) -> Self {
        Self {
            disks,
            backup_name: backup_name.into(),
            destinations,
            health: Arc::new(ReachabilityHealth),
        }
    }

    pub fn with_health_check(mut self, health: Arc<dyn HealthCheck>) -> Self {
        self.health = health;
        self
    }

    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }

    pub fn backup_name(&self) -> &str {
        &self.backup_name
    }

    /// Reports for every configured destination, in configuration order.
    pub async fn inspect_all(&self) -> Vec<DestinationReport> {
        let mut reports = Vec::with_capacity(self.destinations.len());
        for name in &self.destinations {
            reports.push(self.inspect(name).await);
        }

        let reachable = reports.iter().filter(|r| r.reachable).count();
        info!(
            destinations = reports.len(),
            reachable,
            "Destination inspection complete"
        );
        reports
    }

    /// Report for one disk. Never fails.
    #[instrument(skip(self))]
    pub async fn inspect(&self, name: &str) -> DestinationReport {
        let driver = self.disks.driver_of(name).await;

        let disk = match self.disks.resolve(name).await {
            Ok(disk) => disk,
            Err(e) => {
                error!(disk = %name, driver = %driver, error = %e, "Could not resolve disk");
                return DestinationReport::unreachable(name, driver, e.to_string());
            }
        };

        if let Err(e) = probe_reachability(disk.as_ref()).await {
            warn!(disk = %name, driver = %driver, error = %e, "Disk is not reachable");
            return DestinationReport::unreachable(
                name,
                driver,
                format!("Disk '{}' (driver: {}) is not reachable", name, driver),
            );
        }

        let backups = match self.collect(disk.as_ref()).await {
            Ok(backups) => backups,
            Err(e) => {
                error!(disk = %name, driver = %driver, error = %e, "Error processing disk, reporting no backups");
                Vec::new()
            }
        };

        let healthy = self.health.is_healthy(disk.as_ref(), &backups).await;
        debug!(disk = %name, backups = backups.len(), healthy, "Disk inspected");

        let mut report = DestinationReport::reachable(name, driver, backups);
        report.healthy = healthy;
        report
    }

    /// Archives on `disk` with soft metadata, newest first.
    async fn collect(&self, disk: &dyn StorageBackend) -> StorageResult<Vec<ArchiveEntry>> {
        let paths = disk.list_all().await?;

        let mut backups = Vec::new();
        for path in paths
            .into_iter()
            .filter(|p| is_backup_archive(p, &self.backup_name))
        {
            let size = size_or_zero(disk, &path).await;
            let modified = last_modified_or_now(disk, &path).await;
            backups.push(ArchiveEntry::new(path, size, modified));
        }

        backups.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(backups)
    }
}
