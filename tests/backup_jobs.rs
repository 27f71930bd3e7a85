use bkpanel::config::QueueConfig;
use bkpanel::core::{
    BackupJob, BackupOption, Dispatched, JobDispatcher, JobError, JobRunner, JobSettings,
    ProgressStatus, ProgressStore, ProgressView, ShellCommand,
};
use bkpanel::db::{self, SqliteProgressStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

fn settings() -> JobSettings {
    JobSettings {
        max_attempts: 3,
        timeout: Duration::from_secs(10),
        retry_delay: Duration::ZERO,
        progress_ttl: Duration::from_secs(300),
        detailed_errors: true,
    }
}

async fn shared_stores(temp: &TempDir) -> (SqliteProgressStore, SqliteProgressStore) {
    let path = temp.path().join("progress.db");
    let writer = SqliteProgressStore::new(db::init(&path).await.unwrap());
    let reader = SqliteProgressStore::new(db::init(&path).await.unwrap());
    (writer, reader)
}

#[tokio::test]
async fn test_progress_visible_through_separate_connection() {
    let temp = TempDir::new().unwrap();
    let (writer, reader) = shared_stores(&temp).await;
    let command = ShellCommand::new(sh("sleep 1; echo 'Backup completed!'"), sh("true"));
    let job = BackupJob::new("backup_progress_shared", BackupOption::OnlyFiles);

    let running = tokio::spawn(async move {
        let result = job.execute(&command, &writer, &settings()).await;
        result.map(|outcome| outcome.attempts)
    });

    // Poll like a browser would while the tool runs
    let mut seen = Vec::new();
    let finished = timeout(Duration::from_secs(10), async {
        loop {
            let view = ProgressView::from_lookup(reader.get("backup_progress_shared").await.unwrap());
            seen.push(view.percentage);
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("job did not finish");

    assert_eq!(running.await.unwrap().unwrap(), 1);
    assert_eq!(finished.status, ProgressStatus::Success);
    assert_eq!(finished.percentage, 100);
    assert_eq!(finished.message, "Backup completed successfully!");
    assert_eq!(finished.option, Some(BackupOption::OnlyFiles));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert!(seen.iter().any(|p| *p > 0 && *p < 100));
}

#[tokio::test]
async fn test_marker_in_output_fails_with_detail() {
    let temp = TempDir::new().unwrap();
    let (writer, reader) = shared_stores(&temp).await;
    let command = ShellCommand::new(sh("echo '<comment>mysqldump error</comment>'"), sh("true"));
    let job = BackupJob::new("backup_progress_marker", BackupOption::OnlyDb);

    let err = job.execute(&command, &writer, &settings()).await.unwrap_err();
    assert!(matches!(err, JobError::ToolFailure { exit_code: 0, .. }));

    let record = reader.get("backup_progress_marker").await.unwrap().unwrap();
    assert_eq!(record.status, ProgressStatus::Error);
    assert_eq!(record.percentage, 100);
    assert_eq!(record.message, "mysqldump error");
}

#[tokio::test]
async fn test_non_utf8_output_still_judged_by_exit_code() {
    let temp = TempDir::new().unwrap();
    let (writer, reader) = shared_stores(&temp).await;
    let command = ShellCommand::new(sh("printf 'dump of caf\\351.sql ok\\n'; exit 0"), sh("true"));
    let job = BackupJob::new("backup_progress_latin1", BackupOption::OnlyDb);

    let outcome = job.execute(&command, &writer, &settings()).await.unwrap();
    assert_eq!(outcome.attempts, 1);

    let record = reader.get("backup_progress_latin1").await.unwrap().unwrap();
    assert_eq!(record.status, ProgressStatus::Success);
    assert_eq!(record.percentage, 100);
}

#[tokio::test]
async fn test_timeout_kills_tool() {
    let temp = TempDir::new().unwrap();
    let (writer, reader) = shared_stores(&temp).await;
    let marker = temp.path().join("finished");
    let script = format!("sleep 3; touch {}", marker.display());
    let command = ShellCommand::new(sh(&script), sh("true"));
    let mut settings = settings();
    settings.timeout = Duration::from_millis(300);
    let job = BackupJob::new("backup_progress_timeout", BackupOption::Full);

    let err = job.execute(&command, &writer, &settings).await.unwrap_err();
    assert!(matches!(err, JobError::Timeout(_)));

    let record = reader.get("backup_progress_timeout").await.unwrap().unwrap();
    assert_eq!(record.status, ProgressStatus::Error);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!marker.exists(), "timed out tool kept running");
}

#[tokio::test]
async fn test_unstartable_tool_exhausts_retries() {
    let temp = TempDir::new().unwrap();
    let (writer, _) = shared_stores(&temp).await;
    let store: Arc<dyn ProgressStore> = Arc::new(writer);
    let command = ShellCommand::new(vec!["/nonexistent/artisan".to_string()], sh("true"));
    let runner = JobRunner::new(Arc::new(command), store.clone(), settings());

    let err = runner
        .run(BackupJob::new("backup_progress_missing", BackupOption::Full))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::RetriesExhausted { attempts: 3, .. }));

    let record = store.get("backup_progress_missing").await.unwrap().unwrap();
    assert_eq!(record.status, ProgressStatus::Error);
    assert!(
        record
            .message
            .starts_with("Backup failed after multiple attempts:")
    );
}

#[tokio::test]
async fn test_queued_jobs_write_to_shared_store() {
    let temp = TempDir::new().unwrap();
    let (writer, reader) = shared_stores(&temp).await;
    let command = ShellCommand::new(sh("echo \"Backup $1 done\""), sh("true"));
    let runner = JobRunner::new(Arc::new(command), Arc::new(writer), settings());
    let dispatcher = JobDispatcher::new(
        runner,
        QueueConfig {
            enabled: true,
            name: Some("backups".into()),
        },
    );

    let Dispatched::Queued { progress_key, .. } =
        dispatcher.dispatch(BackupOption::OnlyDb).await.unwrap()
    else {
        panic!("expected queued dispatch");
    };

    dispatcher.shutdown().await;

    let record = reader.get(&progress_key).await.unwrap().unwrap();
    assert_eq!(record.status, ProgressStatus::Success);
    assert_eq!(record.option, BackupOption::OnlyDb);
}
