use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "bkpanel.toml";
const ENV_PREFIX: &str = "BKPANEL_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http_bind: SocketAddr,
    /// Holds the shared progress database
    pub data_directory: PathBuf,
    pub simulation: bool,
    pub verbose: bool,
    pub log_json: bool,
    /// Surface raw backup tool output on failure instead of a generic message
    pub show_detailed_errors: bool,
    pub progress_store: ProgressStoreKind,
    pub health: HealthMode,
    pub backup: BackupConfig,
    pub job: JobConfig,
    pub queue: QueueConfig,
    pub auth: AuthConfig,
    pub notifications: NotificationConfig,
    pub disks: BTreeMap<String, DiskConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Substring every archive path contains
    pub name: String,
    /// Disks shown on the panel, in display order
    pub destination_disks: Vec<String>,
    /// Program and arguments that create a backup
    pub command: Vec<String>,
    /// Program and arguments that prune old backups
    pub clean_command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Attempts in total, including the first one
    pub tries: u32,
    pub timeout_secs: u64,
    pub retry_delay_secs: u64,
    pub progress_ttl_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub enabled: bool,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accepted bearer tokens. Empty means the panel is open.
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub channel: NotificationChannelType,
    pub slack_webhook: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannelType {
    #[default]
    None,
    Slack,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStoreKind {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthMode {
    #[default]
    Reachability,
    Checksum,
}

/// Settings for one named disk. Which fields matter depends on the driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub driver: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl DiskConfig {
    /// Names of the settings present, never their values.
    pub fn config_keys(&self) -> Vec<&'static str> {
        let mut keys = vec!["driver"];
        let optional = [
            ("root", self.root.is_some()),
            ("bucket", self.bucket.is_some()),
            ("region", self.region.is_some()),
            ("endpoint", self.endpoint.is_some()),
            ("prefix", self.prefix.is_some()),
            ("key", self.key.is_some()),
            ("secret", self.secret.is_some()),
        ];
        keys.extend(optional.iter().filter(|(_, set)| *set).map(|(k, _)| *k));
        keys
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut disks = BTreeMap::new();
        disks.insert(
            "local".to_string(),
            DiskConfig {
                driver: "local".to_string(),
                root: Some(PathBuf::from("storage/app")),
                ..Default::default()
            },
        );

        Self {
            http_bind: SocketAddr::from(([127, 0, 0, 1], 8750)),
            data_directory: PathBuf::from("."),
            simulation: false,
            verbose: false,
            log_json: false,
            show_detailed_errors: true,
            progress_store: ProgressStoreKind::default(),
            health: HealthMode::default(),
            backup: BackupConfig::default(),
            job: JobConfig::default(),
            queue: QueueConfig::default(),
            auth: AuthConfig::default(),
            notifications: NotificationConfig::default(),
            disks,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            name: "laravel-backup".to_string(),
            destination_disks: vec!["local".to_string()],
            command: vec!["php".into(), "artisan".into(), "backup:run".into()],
            clean_command: vec!["php".into(), "artisan".into(), "backup:clean".into()],
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            tries: 3,
            timeout_secs: 3600,
            retry_delay_secs: 0,
            progress_ttl_secs: 3600,
        }
    }
}

impl JobConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn progress_ttl(&self) -> Duration {
        Duration::from_secs(self.progress_ttl_secs)
    }
}

impl AppConfig {
    /// Load configuration from defaults, the TOML file, `BKPANEL_*` environment
    /// variables and finally CLI overrides, later layers winning.
    pub fn new<T: Serialize>(overrides: Option<&T>, file: Option<&Path>) -> Result<Self> {
        let file = file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment
            .extract()
            .with_context(|| format!("Failed to load configuration ({})", file.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.job.tries == 0 {
            anyhow::bail!("job.tries must be at least 1");
        }
        if self.backup.command.is_empty() {
            anyhow::bail!("backup.command must name a program");
        }
        if self.backup.name.is_empty() {
            anyhow::bail!("backup.name must not be empty");
        }
        Ok(())
    }

    pub fn progress_db_path(&self) -> PathBuf {
        self.data_directory.join("bkpanel_progress.db")
    }

    /// Effective configuration as TOML, with credentials masked.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&self.redacted()).context("Failed to serialize config")
    }

    fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for token in &mut copy.auth.tokens {
            *token = REDACTED.to_string();
        }
        mask(&mut copy.notifications.slack_webhook);
        for disk in copy.disks.values_mut() {
            mask(&mut disk.key);
            mask(&mut disk.secret);
        }
        copy
    }
}

const REDACTED: &str = "<redacted>";

fn mask(value: &mut Option<String>) {
    if value.is_some() {
        *value = Some(REDACTED.to_string());
    }
}
