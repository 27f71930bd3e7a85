use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{AppConfig, ProgressStoreKind};
use crate::core::health::create_health_check;
use crate::core::notifications::create_notifier;
use crate::core::{
    BackupCommand, DestinationInspector, DiskRegistry, JobDispatcher, JobRunner, JobSettings,
    MemoryProgressStore, ProgressStore, ShellCommand, SimulatedCommand,
};
use crate::db::{self, SqliteProgressStore};

/// How long a simulated backup run takes.
const SIMULATED_RUN_TIME: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub disks: DiskRegistry,
    pub progress: Arc<dyn ProgressStore>,
    pub dispatcher: Arc<JobDispatcher>,
    pub inspector: DestinationInspector,
}

impl AppContext {
    /// Wire up the configured progress store and backup command.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let progress: Arc<dyn ProgressStore> = match config.progress_store {
            ProgressStoreKind::Sqlite => {
                let path = config.progress_db_path();
                let conn = db::init(&path).await?;
                info!(path = %path.display(), "Progress database ready");
                Arc::new(SqliteProgressStore::new(conn))
            }
            ProgressStoreKind::Memory => Arc::new(MemoryProgressStore::new()),
        };

        let command: Arc<dyn BackupCommand> = if config.simulation {
            info!("Simulation mode: backup commands are not executed");
            Arc::new(SimulatedCommand::default().with_delay(SIMULATED_RUN_TIME))
        } else {
            Arc::new(ShellCommand::new(
                config.backup.command.clone(),
                config.backup.clean_command.clone(),
            ))
        };

        let disks = DiskRegistry::new(config.disks.clone());
        Ok(Self::from_parts(config, disks, progress, command))
    }

    /// Assemble a context from ready-made parts.
    pub fn from_parts(
        config: AppConfig,
        disks: DiskRegistry,
        progress: Arc<dyn ProgressStore>,
        command: Arc<dyn BackupCommand>,
    ) -> Self {
        let runner = JobRunner::new(command, progress.clone(), JobSettings::from_config(&config))
            .with_notifier(create_notifier(&config.notifications));
        let dispatcher = JobDispatcher::new(runner, config.queue.clone());

        let inspector = DestinationInspector::new(
            disks.clone(),
            config.backup.name.clone(),
            config.backup.destination_disks.clone(),
        )
        .with_health_check(create_health_check(config.health));

        Self {
            config: Arc::new(config),
            disks,
            progress,
            dispatcher: Arc::new(dispatcher),
            inspector,
        }
    }
}
