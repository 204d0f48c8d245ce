//! Asynchronous shell command execution
//!
//! Commands run through `sh -c` on the tokio runtime, so the caller's task
//! yields while the process runs. A timeout kills the child and reports
//! [`TIMEOUT_EXIT_CODE`] instead of a real exit status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Exit code reported when a command was killed on timeout.
/// Real exit codes are 0..=255, and -1 marks spawn failures or signals.
pub const TIMEOUT_EXIT_CODE: i32 = -2;

/// Maximum output length to capture
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    NonZeroExit,
    Timeout,
    SpawnFailed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NonZeroExit => "non-zero exit",
            Self::Timeout => "timeout",
            Self::SpawnFailed => "spawn failed",
        }
    }
}

/// Result of one command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    /// 0 = success, [`TIMEOUT_EXIT_CODE`] on timeout
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub status: ExecutionStatus,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn timed_out(&self) -> bool {
        self.status == ExecutionStatus::Timeout
    }

    /// Build a result from an exit code (used by fakes and spawn errors)
    pub fn from_exit_code(command: &str, exit_code: i32) -> Self {
        let status = match exit_code {
            0 => ExecutionStatus::Success,
            TIMEOUT_EXIT_CODE => ExecutionStatus::Timeout,
            _ => ExecutionStatus::NonZeroExit,
        };
        Self {
            command: command.to_string(),
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            status,
        }
    }
}

/// Runs shell command lines
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &str, timeout_secs: u64) -> CommandResult;
}

/// Real runner using `sh -c`
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, command: &str, timeout_secs: u64) -> CommandResult {
        let start = Instant::now();
        debug!("Executing: {}", command);

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn '{}': {}", command, e);
                return CommandResult {
                    command: command.to_string(),
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("OS error: {}", e),
                    duration_ms: start.elapsed().as_millis() as u64,
                    status: ExecutionStatus::SpawnFailed,
                };
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it
        match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await
        {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let status = if output.status.success() {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::NonZeroExit
                };
                CommandResult {
                    command: command.to_string(),
                    exit_code,
                    stdout: truncate_output(&output.stdout),
                    stderr: truncate_output(&output.stderr),
                    duration_ms: start.elapsed().as_millis() as u64,
                    status,
                }
            }
            Ok(Err(e)) => CommandResult {
                command: command.to_string(),
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("OS error: {}", e),
                duration_ms: start.elapsed().as_millis() as u64,
                status: ExecutionStatus::SpawnFailed,
            },
            Err(_) => {
                warn!("Command timed out after {}s: {}", timeout_secs, command);
                CommandResult {
                    command: command.to_string(),
                    exit_code: TIMEOUT_EXIT_CODE,
                    stdout: String::new(),
                    stderr: "Command timeout".to_string(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    status: ExecutionStatus::Timeout,
                }
            }
        }
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    let slice = if bytes.len() > MAX_OUTPUT_BYTES {
        &bytes[..MAX_OUTPUT_BYTES]
    } else {
        bytes
    };
    String::from_utf8_lossy(slice).to_string()
}
