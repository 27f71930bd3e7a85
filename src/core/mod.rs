pub mod command;
pub mod diagnostics;
pub mod dispatcher;
pub mod health;
pub mod inspector;
pub mod job;
pub mod locator;
pub mod models;
pub mod notifications;
pub mod progress;
pub mod storage;
pub mod units;

pub use command::{BackupCommand, CommandOutput, ShellCommand, SimulatedCommand, SimulatedStep};
pub use dispatcher::{CleanOutcome, Dispatched, JobDispatcher, JobRunner};
pub use health::{ChecksumHealth, HealthCheck, ReachabilityHealth};
pub use inspector::DestinationInspector;
pub use job::{BackupJob, JobError, JobOutcome, JobPhase, JobSettings};
pub use locator::{ArchiveLocator, Located, MatchTier};
pub use models::{ArchiveEntry, BackupOption, DestinationReport, DriverKind};
pub use progress::{
    MemoryProgressStore, ProgressRecord, ProgressStatus, ProgressStore, ProgressView,
};
pub use storage::{DiskRegistry, StorageBackend, StorageError};
