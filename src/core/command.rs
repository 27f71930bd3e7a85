//! The external backup tool.
//!
//! The panel never creates archives itself; it runs a configured program
//! (`php artisan backup:run` by default) and judges the outcome from its exit
//! code and captured output.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::models::BackupOption;
use crate::logging::LogThrottle;

/// Exit status and combined stdout/stderr of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait BackupCommand: Send + Sync {
    /// Create a backup. An `Err` means the tool could not be run at all.
    async fn run(&self, option: BackupOption) -> Result<CommandOutput>;

    /// Prune old backups according to the tool's own retention policy.
    async fn clean(&self) -> Result<CommandOutput>;
}

/// Runs the configured programs as child processes.
///
/// Children are killed when the returned future is dropped, which is how the
/// job timeout terminates a runaway tool.
pub struct ShellCommand {
    backup: Vec<String>,
    clean: Vec<String>,
}

impl ShellCommand {
    pub fn new(backup: Vec<String>, clean: Vec<String>) -> Self {
        Self { backup, clean }
    }

    async fn execute(&self, argv: &[String], extra: &[&str]) -> Result<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("No command configured"))?;

        info!(program = %program, args = ?args, extra = ?extra, "Running backup tool");

        let mut child = Command::new(program)
            .args(args)
            .args(extra)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", program))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Failed to get stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("Failed to get stderr"))?;

        let throttle = LogThrottle::new(Duration::from_millis(500));
        let (out, err) = tokio::join!(
            collect_lines(stdout, &throttle),
            collect_lines(stderr, &throttle)
        );

        let status = child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for {}", program))?;

        let mut output = out?;
        let err = err?;
        if throttle.suppressed() > 0 {
            debug!(lines = throttle.suppressed(), "Backup tool output not logged");
        }
        if !err.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&err);
        }

        // Killed by a signal: no exit code
        let exit_code = status.code().unwrap_or(-1);
        debug!(exit_code, bytes = output.len(), "Backup tool finished");

        Ok(CommandOutput { exit_code, output })
    }
}

/// Tool output is not guaranteed to be UTF-8 (filenames in dump warnings), so
/// lines are read as bytes and decoded lossily.
async fn collect_lines<R: AsyncRead + Unpin>(reader: R, throttle: &LogThrottle) -> Result<String> {
    let mut segments = BufReader::new(reader).split(b'\n');
    let mut collected = String::new();

    while let Some(raw) = segments.next_segment().await? {
        let decoded = String::from_utf8_lossy(&raw);
        let line = decoded.strip_suffix('\r').unwrap_or(decoded.as_ref());
        if throttle.should_log() {
            debug!(line = %line, "Backup tool output");
        }
        collected.push_str(line);
        collected.push('\n');
    }

    Ok(collected)
}

#[async_trait]
impl BackupCommand for ShellCommand {
    async fn run(&self, option: BackupOption) -> Result<CommandOutput> {
        self.execute(&self.backup, option.selector_flags()).await
    }

    async fn clean(&self) -> Result<CommandOutput> {
        self.execute(&self.clean, &[]).await
    }
}

/// One scripted result for `SimulatedCommand`.
#[derive(Debug, Clone)]
pub enum SimulatedStep {
    Output(CommandOutput),
    Error(String),
}

/// Stand-in for the backup tool in simulation mode and tests.
///
/// Plays back scripted steps in order; once the script is exhausted every
/// further run succeeds. Each run takes `delay` to finish.
pub struct SimulatedCommand {
    script: Mutex<VecDeque<SimulatedStep>>,
    invocations: Mutex<Vec<BackupOption>>,
    pub delay: Duration,
}

impl Default for SimulatedCommand {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl SimulatedCommand {
    pub fn new(script: Vec<SimulatedStep>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            invocations: Mutex::new(Vec::new()),
            delay: Duration::from_millis(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Options of every `run` call so far.
    pub async fn invocations(&self) -> Vec<BackupOption> {
        self.invocations.lock().await.clone()
    }
}

#[async_trait]
impl BackupCommand for SimulatedCommand {
    async fn run(&self, option: BackupOption) -> Result<CommandOutput> {
        self.invocations.lock().await.push(option);
        tokio::time::sleep(self.delay).await;

        match self.script.lock().await.pop_front() {
            Some(SimulatedStep::Output(output)) => Ok(output),
            Some(SimulatedStep::Error(message)) => Err(anyhow!(message)),
            None => Ok(CommandOutput::new(
                0,
                format!("Backup ({}) completed.\n", option),
            )),
        }
    }

    async fn clean(&self) -> Result<CommandOutput> {
        Ok(CommandOutput::new(0, "Cleanup completed.\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_shell_command_captures_output_and_exit_code() {
        let command = ShellCommand::new(sh("echo copying; echo 'warn' >&2; exit 3"), sh("true"));

        let output = command.run(BackupOption::Full).await.unwrap();

        assert_eq!(output.exit_code, 3);
        assert!(output.output.contains("copying"));
        assert!(output.output.contains("warn"));
    }

    #[tokio::test]
    async fn test_shell_command_tolerates_non_utf8_output() {
        // Latin-1 e-acute in a filename, tool exits cleanly
        let command = ShellCommand::new(
            sh("printf 'dump of caf\\351.sql ok\\n'; printf 'tar: \\377 skipped' >&2; exit 0"),
            sh("true"),
        );

        let output = command.run(BackupOption::Full).await.unwrap();

        assert!(output.success());
        assert!(output.output.contains("dump of caf\u{FFFD}.sql ok"));
        assert!(output.output.contains("tar: \u{FFFD} skipped"));
    }

    #[tokio::test]
    async fn test_shell_command_passes_selector_flags() {
        // `sh -c script name arg1`: $0 is the name, $1 the selector flag
        let mut argv = sh("echo \"flag=$1\"");
        argv.push("backup".to_string());
        let command = ShellCommand::new(argv, sh("true"));

        let output = command.run(BackupOption::OnlyDb).await.unwrap();
        assert!(output.success());
        assert_eq!(output.output.trim(), "flag=--only-db");
    }

    #[tokio::test]
    async fn test_shell_command_missing_program_is_error() {
        let command = ShellCommand::new(
            vec!["/nonexistent/backup-tool".to_string()],
            sh("true"),
        );
        assert!(command.run(BackupOption::Full).await.is_err());
    }

    #[tokio::test]
    async fn test_simulated_command_plays_script() {
        let command = SimulatedCommand::new(vec![
            SimulatedStep::Error("connection refused".into()),
            SimulatedStep::Output(CommandOutput::new(1, "failed")),
        ]);

        assert!(command.run(BackupOption::Full).await.is_err());
        assert_eq!(command.run(BackupOption::Full).await.unwrap().exit_code, 1);
        assert!(command.run(BackupOption::OnlyFiles).await.unwrap().success());
        assert_eq!(command.invocations().await.len(), 3);
    }
}
