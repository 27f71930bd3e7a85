use serde::{Deserialize, Serialize};
use std::fmt;

use super::units::{format_bytes, kilobytes};

/// Physical driver behind a configured disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Local,
    S3,
    Gcs,
    Ftp,
    Sftp,
    Dropbox,
    Rackspace,
    Memory,
    Unknown,
}

impl DriverKind {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "local" | "public" => Self::Local,
            "s3" => Self::S3,
            "gcs" | "google" => Self::Gcs,
            "ftp" => Self::Ftp,
            "sftp" => Self::Sftp,
            "dropbox" => Self::Dropbox,
            "rackspace" => Self::Rackspace,
            "memory" => Self::Memory,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
            Self::Gcs => "gcs",
            Self::Ftp => "ftp",
            Self::Sftp => "sftp",
            Self::Dropbox => "dropbox",
            Self::Rackspace => "rackspace",
            Self::Memory => "memory",
            Self::Unknown => "unknown",
        }
    }

    /// Whether archives on this driver live off the host.
    pub fn is_external(&self) -> bool {
        !matches!(self, Self::Local | Self::Memory)
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of the application the external backup command should capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupOption {
    #[default]
    Full,
    OnlyDb,
    OnlyFiles,
}

impl BackupOption {
    /// Parse the optional selector sent by callers. `None` and an empty string mean a full backup.
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim) {
            None | Some("") | Some("full") => Some(Self::Full),
            Some("only-db") => Some(Self::OnlyDb),
            Some("only-files") => Some(Self::OnlyFiles),
            Some(_) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::OnlyDb => "only-db",
            Self::OnlyFiles => "only-files",
        }
    }

    /// Flags appended to the external backup command.
    pub fn selector_flags(&self) -> &'static [&'static str] {
        match self {
            Self::Full => &[],
            Self::OnlyDb => &["--only-db"],
            Self::OnlyFiles => &["--only-files"],
        }
    }

    pub fn preparing_message(&self) -> &'static str {
        match self {
            Self::Full => "Preparing full backup...",
            Self::OnlyDb => "Preparing database backup...",
            Self::OnlyFiles => "Preparing files backup...",
        }
    }
}

impl fmt::Display for BackupOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored backup archive, as observed during a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub path: String,
    pub size_bytes: u64,
    pub size_in_kb: f64,
    pub human_readable_size: String,
    /// Epoch seconds
    pub last_modified: i64,
}

impl ArchiveEntry {
    pub fn new(path: String, size_bytes: u64, last_modified: i64) -> Self {
        Self {
            path,
            size_bytes,
            size_in_kb: kilobytes(size_bytes),
            human_readable_size: format_bytes(size_bytes),
            last_modified,
        }
    }
}

/// Per-disk aggregate shown to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationReport {
    pub name: String,
    pub driver: DriverKind,
    pub reachable: bool,
    pub healthy: bool,
    pub backups: Vec<ArchiveEntry>,
    pub amount: usize,
    pub used_bytes: u64,
    pub used_storage: String,
    /// Modification time of the newest archive, epoch seconds
    pub newest: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DestinationReport {
    /// Report for a disk that could not be resolved or listed.
    pub fn unreachable(name: &str, driver: DriverKind, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            driver,
            reachable: false,
            healthy: false,
            backups: Vec::new(),
            amount: 0,
            used_bytes: 0,
            used_storage: format_bytes(0),
            newest: None,
            error: Some(error.into()),
        }
    }

    /// Report for a reachable disk. `backups` must already be sorted newest first.
    pub fn reachable(name: &str, driver: DriverKind, backups: Vec<ArchiveEntry>) -> Self {
        let used_bytes = backups.iter().map(|b| b.size_bytes).sum();
        let newest = backups.first().map(|b| b.last_modified);

        Self {
            name: name.to_string(),
            driver,
            reachable: true,
            healthy: true,
            amount: backups.len(),
            used_bytes,
            used_storage: format_bytes(used_bytes),
            newest,
            backups,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_option_parse() {
        assert_eq!(BackupOption::parse(None), Some(BackupOption::Full));
        assert_eq!(BackupOption::parse(Some("")), Some(BackupOption::Full));
        assert_eq!(BackupOption::parse(Some("only-db")), Some(BackupOption::OnlyDb));
        assert_eq!(
            BackupOption::parse(Some("only-files")),
            Some(BackupOption::OnlyFiles)
        );
        assert_eq!(BackupOption::parse(Some("invalid-option")), None);
    }

    #[test]
    fn test_driver_aliases() {
        assert_eq!(DriverKind::from_str("public"), DriverKind::Local);
        assert_eq!(DriverKind::from_str("google"), DriverKind::Gcs);
        assert_eq!(DriverKind::from_str("S3"), DriverKind::S3);
        assert_eq!(DriverKind::from_str("azure"), DriverKind::Unknown);
        assert!(DriverKind::Sftp.is_external());
        assert!(!DriverKind::Local.is_external());
    }

    #[test]
    fn test_unreachable_report_has_no_entries() {
        let report = DestinationReport::unreachable("s3", DriverKind::S3, "timeout");
        assert!(!report.reachable);
        assert!(!report.healthy);
        assert!(report.backups.is_empty());
        assert_eq!(report.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_reachable_report_aggregates() {
        let backups = vec![
            ArchiveEntry::new("app/b.zip".into(), 2048, 200),
            ArchiveEntry::new("app/a.zip".into(), 1024, 100),
        ];
        let report = DestinationReport::reachable("local", DriverKind::Local, backups);

        assert_eq!(report.amount, 2);
        assert_eq!(report.used_bytes, 3072);
        assert_eq!(report.used_storage, "3 KB");
        assert_eq!(report.newest, Some(200));
    }
}
