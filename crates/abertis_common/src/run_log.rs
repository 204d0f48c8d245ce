//! Run log
//!
//! One JSON line per sequencer transition, appended to the configured file.
//! Failing to write is logged and otherwise ignored.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{create_dir_all, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

/// Run log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    /// Timestamp (ISO 8601)
    pub ts: DateTime<Utc>,
    /// Identifies all entries of one run
    pub run_id: Uuid,
    /// Sequencer state entered
    pub state: String,
    pub success: bool,
    /// Status text shown to the user
    pub details: String,
    /// `InstallError::code()` when the transition carries an error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Appends entries for a single run
#[derive(Debug, Clone)]
pub struct RunLog {
    path: Option<PathBuf>,
    run_id: Uuid,
}

impl RunLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Record a transition. Never fails the run.
    pub async fn record(&self, state: &str, success: bool, details: &str, error: Option<&str>) {
        let Some(path) = &self.path else {
            return;
        };
        let entry = RunLogEntry {
            ts: Utc::now(),
            run_id: self.run_id,
            state: state.to_string(),
            success,
            details: details.to_string(),
            error: error.map(str::to_string),
        };
        if let Err(e) = append(path, &entry).await {
            warn!("Run log not written: {:#}", e);
        }
    }
}

async fn append(path: &Path, entry: &RunLogEntry) -> Result<()> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)
            .await
            .context("Failed to create run log directory")?;
    }

    let json = serde_json::to_string(entry)? + "\n";
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;

    file.write_all(json.as_bytes())
        .await
        .context("Failed to write run log entry")?;
    file.sync_all()
        .await
        .context("Failed to sync run log")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_entries_are_appended_as_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log/install.jsonl");
        let log = RunLog::new(Some(path.clone()));

        log.record("StoppingService", true, "Stopping Astra-SM...", None)
            .await;
        log.record("Failed", false, "Copy failed", Some("artifact_copy_failed"))
            .await;

        let content = std::fs::read_to_string(&path).unwrap();
        let entries: Vec<RunLogEntry> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.run_id == log.run_id()));
        assert_eq!(entries[0].error, None);
        assert_eq!(entries[1].error.as_deref(), Some("artifact_copy_failed"));
        assert!(!content.lines().next().unwrap().contains("\"error\""));
    }

    #[tokio::test]
    async fn test_entry_is_on_disk_when_record_returns() {
        let dir = TempDir::new().unwrap();
        for i in 0..50 {
            let path = dir.path().join(format!("run-{}.jsonl", i));
            let log = RunLog::new(Some(path.clone()));
            log.record("Failed", false, "Copy failed", Some("artifact_copy_failed"))
                .await;

            let content = std::fs::read_to_string(&path).unwrap();
            assert_eq!(content.lines().count(), 1, "entry {} missing", i);
        }
    }

    #[tokio::test]
    async fn test_unwritable_log_is_ignored() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        // Parent is a regular file, so the directory cannot be created
        let log = RunLog::new(Some(blocker.join("install.jsonl")));
        log.record("Done", true, "Install done.", None).await;
    }
}
