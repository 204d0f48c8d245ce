//! Abertis Common - installer core for the CiefpSettings T2MI Abertis plugin
//!
//! Installs astra-sm, stages its configuration and the abertis script,
//! and optionally applies the latest motor settings bundle.

pub mod arch;
pub mod artifact;
pub mod bundle;
pub mod commands;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod file_installer;
pub mod process;
pub mod run_log;
pub mod sequencer;

pub use arch::Architecture;
pub use artifact::{Artifact, ArtifactKind, ArtifactLocator, ArtifactSource, InstallPlan, PlanStep};
pub use config::InstallerConfig;
pub use error::{ArchError, FetchError, FileInstallError, InstallError};
pub use fetcher::{HttpFetcher, RemoteCandidate, RemoteFetcher};
pub use file_installer::{ArtifactInstaller, FileInstaller, InstallOutcome};
pub use process::{CommandResult, ProcessRunner, ShellRunner, TIMEOUT_EXIT_CODE};
pub use sequencer::{
    AbortHandle, AttemptState, InstallHost, InstallSequencer, RunReport, RunRequest,
    SequencerState,
};
