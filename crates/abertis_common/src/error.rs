//! Error types for the installer.
//!
//! Every failure the sequencer can meet is one of these variants. Whether a
//! variant is fatal, retryable or only a warning is decided by the sequencer,
//! not here.

use std::path::PathBuf;
use thiserror::Error;

/// Architecture normalization failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported architecture: {0}")]
pub struct ArchError(pub String);

/// Failures from the remote fetcher
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("No entry matching '{0}'")]
    NoMatch(String),

    #[error("Invalid listing: {0}")]
    InvalidListing(String),

    #[error("Invalid name pattern: {0}")]
    InvalidPattern(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(timeout_secs)
        } else if let Some(status) = err.status() {
            FetchError::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Failures from the file installer
#[derive(Error, Debug)]
pub enum FileInstallError {
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("Destination not in allow-list: {0}")]
    DestinationNotAllowed(PathBuf),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileInstallError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            FileInstallError::PermissionDenied(path)
        } else {
            FileInstallError::Io { path, source }
        }
    }
}

/// Step-level failures reported by the sequencer
#[derive(Error, Debug)]
pub enum InstallError {
    #[error(transparent)]
    UnsupportedArchitecture(#[from] ArchError),

    #[error("{package} install failed after {attempts} attempt(s) (code {exit_code})")]
    PrerequisiteInstallFailed {
        package: String,
        attempts: u32,
        exit_code: i32,
    },

    #[error("Service stop failed (code {0})")]
    ServiceStopFailed(i32),

    #[error("Service start failed (code {0})")]
    ServiceStartFailed(i32),

    #[error("Copy of {artifact} failed: {source}")]
    ArtifactCopyFailed {
        artifact: String,
        #[source]
        source: FileInstallError,
    },

    #[error("Fetching {what} failed: {source}")]
    RemoteFetchFailed {
        what: String,
        #[source]
        source: FetchError,
    },

    #[error("No matching release: {0}")]
    NoMatchingRelease(String),

    #[error("Bundle extraction failed: {0}")]
    BundleExtractFailed(String),

    #[error("Command timed out after {timeout_secs}s: {command}")]
    CommandTimeout { command: String, timeout_secs: u64 },

    #[error("Reload failed (code {0})")]
    ReloadFailed(i32),

    #[error("Update failed (code {0})")]
    UpdateFailed(i32),

    #[error("Invalid install plan: {0}")]
    InvalidPlan(String),

    #[error("Busy, please wait...")]
    Busy,

    #[error("Aborted")]
    Aborted,
}

impl InstallError {
    /// Short machine-readable code, used in the run log
    pub fn code(&self) -> &'static str {
        match self {
            InstallError::UnsupportedArchitecture(_) => "unsupported_architecture",
            InstallError::PrerequisiteInstallFailed { .. } => "prerequisite_install_failed",
            InstallError::ServiceStopFailed(_) => "service_stop_failed",
            InstallError::ServiceStartFailed(_) => "service_start_failed",
            InstallError::ArtifactCopyFailed { .. } => "artifact_copy_failed",
            InstallError::RemoteFetchFailed { .. } => "remote_fetch_failed",
            InstallError::NoMatchingRelease(_) => "no_matching_release",
            InstallError::BundleExtractFailed(_) => "bundle_extract_failed",
            InstallError::CommandTimeout { .. } => "command_timeout",
            InstallError::ReloadFailed(_) => "reload_failed",
            InstallError::UpdateFailed(_) => "update_failed",
            InstallError::InvalidPlan(_) => "invalid_plan",
            InstallError::Busy => "busy",
            InstallError::Aborted => "aborted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_is_classified() {
        let err = FileInstallError::io(
            "/etc/astra/astra.conf",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, FileInstallError::PermissionDenied(_)));

        let err = FileInstallError::io(
            "/etc/astra/astra.conf",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, FileInstallError::Io { .. }));
    }

    #[test]
    fn test_messages_are_human_readable() {
        let err = InstallError::from(ArchError("x86_64".to_string()));
        assert_eq!(err.to_string(), "Unsupported architecture: x86_64");
        assert_eq!(err.code(), "unsupported_architecture");

        let err = InstallError::CommandTimeout {
            command: "opkg install astra-sm".to_string(),
            timeout_secs: 300,
        };
        assert!(err.to_string().contains("300s"));
    }
}
