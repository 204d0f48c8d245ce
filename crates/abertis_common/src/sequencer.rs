//! Install sequencer
//!
//! Drives one run through the state machine, with at most one command,
//! download or timer outstanding at a time:
//!
//! ```text
//! CheckingArchitecture -> CheckingPrerequisite -> [InstallingPrerequisite]
//!   -> StoppingService -> CopyingArtifacts -> StartingService
//!   -> [FetchingOptionalBundle -> ApplyingOptionalBundle] -> Done
//!
//! CopyingArtifacts -> RetryingCopy -> StoppingService
//! any non-terminal state -> Failed | Aborted
//! ```
//!
//! Whenever a run ends while the service is stopped, it is started again
//! before the outcome is reported.

use crate::arch::Architecture;
use crate::artifact::{Artifact, ArtifactLocator, ArtifactSource, InstallPlan, PlanStep};
use crate::bundle;
use crate::commands;
use crate::config::InstallerConfig;
use crate::error::{FetchError, FileInstallError, InstallError};
use crate::fetcher::{HttpFetcher, RemoteFetcher};
use crate::file_installer::{ArtifactInstaller, FileInstaller, InstallOutcome};
use crate::process::{CommandResult, ExecutionStatus, ProcessRunner, ShellRunner};
use crate::run_log::RunLog;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sequencer states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SequencerState {
    Idle,
    CheckingArchitecture,
    CheckingPrerequisite,
    InstallingPrerequisite,
    StoppingService,
    CopyingArtifacts,
    RetryingCopy,
    StartingService,
    FetchingOptionalBundle,
    ApplyingOptionalBundle,
    Done,
    Failed,
    Aborted,
}

impl SequencerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CheckingArchitecture => "checking_architecture",
            Self::CheckingPrerequisite => "checking_prerequisite",
            Self::InstallingPrerequisite => "installing_prerequisite",
            Self::StoppingService => "stopping_service",
            Self::CopyingArtifacts => "copying_artifacts",
            Self::RetryingCopy => "retrying_copy",
            Self::StartingService => "starting_service",
            Self::FetchingOptionalBundle => "fetching_optional_bundle",
            Self::ApplyingOptionalBundle => "applying_optional_bundle",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of the current run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttemptState {
    /// Index of the artifact being copied
    pub step_index: usize,
    /// Copy attempts started so far (1-based once copying began)
    pub copy_attempt: u32,
    pub max_copy_attempts: u32,
    pub last_error: Option<String>,
}

/// Receives progress from the sequencer
pub trait InstallHost: Send + Sync {
    fn on_status_changed(&self, text: &str);
    fn on_step_started(&self, text: &str);
    fn on_run_finished(&self, success: bool, message: &str);
    /// Ask the user whether to reboot now
    fn on_reboot_requested(&self) -> bool;
}

/// Parameters of one install run
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Raw machine string, e.g. `armv7l`
    pub machine: String,
    /// Fetch and apply the motor settings bundle after the install
    pub with_bundle: bool,
    /// Ask the host for a reboot after a successful run
    pub offer_reboot: bool,
}

impl RunRequest {
    pub fn new(machine: impl Into<String>) -> Self {
        Self {
            machine: machine.into(),
            with_bundle: false,
            offer_reboot: false,
        }
    }
}

/// Outcome of a finished run
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub final_state: SequencerState,
    /// Every state entered, in order
    pub states: Vec<SequencerState>,
    pub warnings: Vec<InstallError>,
    pub error: Option<InstallError>,
    pub message: String,
    pub reboot_issued: bool,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.final_state == SequencerState::Done
    }
}

/// Requests cancellation of the run in progress
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortHandle {
    pub fn abort(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            info!("Abort requested");
        }
        // Stores a permit when nobody is waiting yet
        self.notify.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    async fn cancelled(&self) {
        loop {
            if self.is_requested() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// Clears the busy flag when a run ends
struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Why a step stopped early
enum Interrupt {
    Aborted,
    Failed(InstallError),
}

/// Mutable state of a single run
struct Run<'a> {
    host: &'a dyn InstallHost,
    log: RunLog,
    request: RunRequest,
    state: SequencerState,
    states: Vec<SequencerState>,
    attempt: AttemptState,
    plan: Option<InstallPlan>,
    service_stopped: bool,
    warnings: Vec<InstallError>,
    error: Option<InstallError>,
    message: Option<String>,
}

impl<'a> Run<'a> {
    fn new(host: &'a dyn InstallHost, config: &InstallerConfig, request: RunRequest) -> Self {
        Self {
            host,
            log: RunLog::new(config.paths.run_log.clone()),
            request,
            state: SequencerState::Idle,
            states: Vec::new(),
            attempt: AttemptState {
                max_copy_attempts: config.retry.max_copy_attempts.max(1),
                ..AttemptState::default()
            },
            plan: None,
            service_stopped: false,
            warnings: Vec::new(),
            error: None,
            message: None,
        }
    }

    fn enter(&mut self, state: SequencerState) {
        debug!("{} -> {}", self.state, state);
        self.state = state;
        self.states.push(state);
    }

    async fn status(&self, text: &str) {
        info!("{}", text);
        self.host.on_status_changed(text);
        self.log.record(self.state.as_str(), true, text, None).await;
    }

    async fn warn(&mut self, warning: InstallError) {
        let text = warning.to_string();
        warn!("{}", text);
        self.host.on_status_changed(&text);
        self.log
            .record(self.state.as_str(), false, &text, Some(warning.code()))
            .await;
        self.warnings.push(warning);
    }

    fn fail(&mut self, error: InstallError) -> SequencerState {
        error!("{}", error);
        self.error = Some(error);
        SequencerState::Failed
    }
}

fn command_failure(
    result: &CommandResult,
    timeout_secs: u64,
    otherwise: impl FnOnce(i32) -> InstallError,
) -> InstallError {
    if result.timed_out() {
        InstallError::CommandTimeout {
            command: result.command.clone(),
            timeout_secs,
        }
    } else {
        otherwise(result.exit_code)
    }
}

/// Work dir subdirectory holding downloaded remote artifacts
const ARTIFACT_SCRATCH: &str = "artifacts";

async fn discard_dir(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        debug!("Could not remove {}: {}", path.display(), e);
    }
}

/// The installer's orchestrator
pub struct InstallSequencer {
    config: InstallerConfig,
    runner: Arc<dyn ProcessRunner>,
    fetcher: Arc<dyn RemoteFetcher>,
    installer: Arc<dyn ArtifactInstaller>,
    busy: Arc<AtomicBool>,
    abort: AbortHandle,
}

impl InstallSequencer {
    pub fn new(
        config: InstallerConfig,
        runner: Arc<dyn ProcessRunner>,
        fetcher: Arc<dyn RemoteFetcher>,
        installer: Arc<dyn ArtifactInstaller>,
    ) -> Self {
        Self {
            config,
            runner,
            fetcher,
            installer,
            busy: Arc::new(AtomicBool::new(false)),
            abort: AbortHandle::default(),
        }
    }

    /// Shell runner, HTTP fetcher and a file installer rooted at `paths.root_dir`
    pub fn with_defaults(config: InstallerConfig) -> Self {
        let runner = Arc::new(ShellRunner::new());
        let fetcher = Arc::new(HttpFetcher::new(config.timeouts.listing_secs));
        let installer = Arc::new(FileInstaller::new(config.paths.root_dir.clone()));
        Self::new(config, runner, fetcher, installer)
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn acquire(&self, host: &dyn InstallHost) -> Result<BusyGuard, InstallError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Rejected: another run is in progress");
            host.on_status_changed(&InstallError::Busy.to_string());
            return Err(InstallError::Busy);
        }
        self.abort.reset();
        Ok(BusyGuard {
            busy: self.busy.clone(),
        })
    }

    /// Run the full install. Fails only with [`InstallError::Busy`]; every
    /// other outcome is in the report.
    pub async fn start(
        &self,
        request: RunRequest,
        host: &dyn InstallHost,
    ) -> Result<RunReport, InstallError> {
        let _guard = self.acquire(host)?;
        let offer_reboot = request.offer_reboot;
        let mut run = Run::new(host, &self.config, request);
        info!(
            "Install run {} for machine '{}'",
            run.log.run_id(),
            run.request.machine
        );

        self.drive(&mut run, SequencerState::CheckingArchitecture)
            .await;
        let mut report = self.finish(run).await;

        if report.success() && offer_reboot {
            report.reboot_issued = self.offer_reboot(host).await;
        }
        Ok(report)
    }

    /// Fetch and apply the motor settings bundle alone. The service is not touched.
    pub async fn run_bundle_only(&self, host: &dyn InstallHost) -> Result<RunReport, InstallError> {
        let _guard = self.acquire(host)?;
        let request = RunRequest {
            machine: String::new(),
            with_bundle: true,
            offer_reboot: false,
        };
        let mut run = Run::new(host, &self.config, request);
        info!("Motor settings run {}", run.log.run_id());

        self.drive(&mut run, SequencerState::FetchingOptionalBundle)
            .await;
        Ok(self.finish(run).await)
    }

    /// Run the plugin's update script
    pub async fn run_self_update(&self, host: &dyn InstallHost) -> Result<RunReport, InstallError> {
        let _guard = self.acquire(host)?;
        let mut run = Run::new(host, &self.config, RunRequest::new(""));
        run.status("Updating plugin...").await;

        let command = commands::self_update(&self.config);
        let timeout_secs = self.config.timeouts.update_secs;
        host.on_step_started(&command);

        match self.or_abort(self.runner.run(&command, timeout_secs)).await {
            None => run.enter(SequencerState::Aborted),
            Some(result) if result.success() => {
                run.message = Some("Update complete.".to_string());
                run.enter(SequencerState::Done);
            }
            Some(result) => {
                run.message = Some(format!("Update failed (code {}).", result.exit_code));
                let next = run.fail(command_failure(&result, timeout_secs, InstallError::UpdateFailed));
                run.enter(next);
            }
        }
        Ok(self.finish(run).await)
    }

    /// Issue the reboot command
    pub async fn reboot(&self) -> CommandResult {
        let command = commands::reboot(&self.config);
        info!("Rebooting: {}", command);
        self.runner.run(&command, self.config.timeouts.service_secs).await
    }

    async fn offer_reboot(&self, host: &dyn InstallHost) -> bool {
        if !host.on_reboot_requested() {
            info!("Reboot declined");
            return false;
        }
        let result = self.reboot().await;
        if !result.success() {
            warn!("Reboot command failed with code {}", result.exit_code);
            host.on_status_changed(&format!("Reboot failed (code {}).", result.exit_code));
            return false;
        }
        true
    }

    /// Await `operation` unless the run is aborted first
    async fn or_abort<F: Future>(&self, operation: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.abort.cancelled() => None,
            output = operation => Some(output),
        }
    }

    async fn drive(&self, run: &mut Run<'_>, first: SequencerState) {
        let mut next = first;
        loop {
            if !next.is_terminal() && self.abort.is_requested() {
                next = SequencerState::Aborted;
            }
            run.enter(next);

            next = match run.state {
                SequencerState::Idle => SequencerState::CheckingArchitecture,
                SequencerState::CheckingArchitecture => self.check_architecture(run).await,
                SequencerState::CheckingPrerequisite => self.check_prerequisite(run).await,
                SequencerState::InstallingPrerequisite => self.install_prerequisite(run).await,
                SequencerState::StoppingService => self.stop_service(run).await,
                SequencerState::CopyingArtifacts => self.copy_artifacts(run).await,
                SequencerState::RetryingCopy => self.retry_copy(run).await,
                SequencerState::StartingService => {
                    self.start_service(run).await;
                    if run.request.with_bundle {
                        SequencerState::FetchingOptionalBundle
                    } else {
                        run.message = Some("Install done.".to_string());
                        SequencerState::Done
                    }
                }
                SequencerState::FetchingOptionalBundle => self.fetch_bundle(run).await,
                SequencerState::ApplyingOptionalBundle => self.apply_bundle(run).await,
                SequencerState::Done | SequencerState::Failed | SequencerState::Aborted => return,
            };
        }
    }

    async fn check_architecture(&self, run: &mut Run<'_>) -> SequencerState {
        run.status("Checking architecture...").await;
        let arch = match Architecture::normalize(&run.request.machine) {
            Ok(arch) => arch,
            Err(e) => return run.fail(e.into()),
        };

        let plan = ArtifactSource::new(&self.config).plan(arch);
        if let Err(e) = plan.validate() {
            return run.fail(InstallError::InvalidPlan(e));
        }
        info!(
            "Architecture {}: {} artifacts to install",
            arch,
            plan.artifacts().count()
        );
        run.plan = Some(plan);
        SequencerState::CheckingPrerequisite
    }

    async fn check_prerequisite(&self, run: &mut Run<'_>) -> SequencerState {
        let name = &self.config.service.display_name;
        run.status(&format!("Checking {}...", name)).await;
        run.host.on_step_started(&PlanStep::PrerequisiteCheck.to_string());

        let command = commands::prerequisite_check(&self.config);
        let Some(result) = self
            .or_abort(self.runner.run(&command, self.config.timeouts.check_secs))
            .await
        else {
            return SequencerState::Aborted;
        };

        if result.success() {
            run.status(&format!("{} already installed. Proceeding...", name))
                .await;
            SequencerState::StoppingService
        } else {
            if result.timed_out() {
                warn!("Package check timed out, assuming not installed");
            }
            SequencerState::InstallingPrerequisite
        }
    }

    async fn install_prerequisite(&self, run: &mut Run<'_>) -> SequencerState {
        let retry = &self.config.retry;
        let attempts = retry.prerequisite_attempts.max(1);
        let timeout_secs = self.config.timeouts.install_secs;
        run.host.on_step_started(&PlanStep::PrerequisiteInstall.to_string());

        let mut exit_code = -1;
        for attempt in 1..=attempts {
            run.status(&format!(
                "Installing {}... (attempt {}/{})",
                self.config.service.display_name, attempt, attempts
            ))
            .await;

            let command = commands::package_install(&self.config, attempt > 1);
            let Some(result) = self.or_abort(self.runner.run(&command, timeout_secs)).await else {
                return SequencerState::Aborted;
            };
            if result.success() {
                info!("{} installed", self.config.service.package);
                return SequencerState::StoppingService;
            }

            warn!("'{}' failed with code {}", command, result.exit_code);
            exit_code = result.exit_code;
            if attempt < attempts {
                let backoff = Duration::from_secs(retry.prerequisite_backoff_secs);
                if self.or_abort(tokio::time::sleep(backoff)).await.is_none() {
                    return SequencerState::Aborted;
                }
            }
        }

        // Configuration is still staged for a later manual install
        run.warn(InstallError::PrerequisiteInstallFailed {
            package: self.config.service.package.clone(),
            attempts,
            exit_code,
        })
        .await;
        SequencerState::StoppingService
    }

    async fn stop_service(&self, run: &mut Run<'_>) -> SequencerState {
        let name = &self.config.service.display_name;
        let text = if run.attempt.copy_attempt == 0 {
            format!("Stopping {} to copy files safely...", name)
        } else {
            format!("Stopping {} (retry)...", name)
        };
        run.status(&text).await;
        run.host.on_step_started(&PlanStep::ServiceStop.to_string());

        // Set before issuing: an abort mid-command must still restart
        run.service_stopped = true;
        let command = commands::service_stop(&self.config);
        let timeout_secs = self.config.timeouts.service_secs;
        let Some(result) = self.or_abort(self.runner.run(&command, timeout_secs)).await else {
            return SequencerState::Aborted;
        };

        match result.status {
            ExecutionStatus::Success => {}
            // killall exits 1 when nothing was running
            ExecutionStatus::NonZeroExit => {
                debug!("Stop exited with {}, service was not running", result.exit_code)
            }
            _ => {
                run.warn(command_failure(&result, timeout_secs, InstallError::ServiceStopFailed))
                    .await
            }
        }
        SequencerState::CopyingArtifacts
    }

    async fn copy_artifacts(&self, run: &mut Run<'_>) -> SequencerState {
        let next = self.copy_artifacts_once(run).await;
        // Remote sources are fetched again on every attempt
        discard_dir(&self.config.paths.work_dir.join(ARTIFACT_SCRATCH)).await;
        next
    }

    async fn copy_artifacts_once(&self, run: &mut Run<'_>) -> SequencerState {
        run.attempt.copy_attempt += 1;
        run.status(&format!(
            "Copying files... (attempt {}/{})",
            run.attempt.copy_attempt, run.attempt.max_copy_attempts
        ))
        .await;

        let artifacts: Vec<Artifact> = match &run.plan {
            Some(plan) => plan.artifacts().cloned().collect(),
            None => return run.fail(InstallError::InvalidPlan("no plan resolved".to_string())),
        };

        for (index, artifact) in artifacts.iter().enumerate() {
            if self.abort.is_requested() {
                return SequencerState::Aborted;
            }
            run.attempt.step_index = index;
            run.host
                .on_step_started(&PlanStep::Copy(artifact.clone()).to_string());

            match self.copy_one(artifact, ARTIFACT_SCRATCH).await {
                Ok(outcome) => debug!("{}: {:?}", artifact.name(), outcome),
                Err(Interrupt::Aborted) => return SequencerState::Aborted,
                Err(Interrupt::Failed(e)) => {
                    warn!("{}", e);
                    run.attempt.last_error = Some(e.to_string());
                    return if run.attempt.copy_attempt < run.attempt.max_copy_attempts {
                        SequencerState::RetryingCopy
                    } else {
                        run.fail(e)
                    };
                }
            }
        }

        info!("All {} artifacts in place", artifacts.len());
        SequencerState::StartingService
    }

    /// Install one artifact, downloading it into the work dir first if remote
    async fn copy_one(&self, artifact: &Artifact, scratch: &str) -> Result<InstallOutcome, Interrupt> {
        let downloaded;
        let source = match artifact.source() {
            ArtifactLocator::Bundled(path) => path.as_path(),
            ArtifactLocator::Remote(url) => {
                downloaded = self
                    .config
                    .paths
                    .work_dir
                    .join(scratch)
                    .join(artifact.name());
                let timeout_secs = self.config.timeouts.download_secs;
                match self
                    .or_abort(self.fetcher.download(url, &downloaded, timeout_secs))
                    .await
                {
                    None => return Err(Interrupt::Aborted),
                    Some(Err(source)) => {
                        return Err(Interrupt::Failed(InstallError::RemoteFetchFailed {
                            what: artifact.name().to_string(),
                            source,
                        }))
                    }
                    Some(Ok(_)) => downloaded.as_path(),
                }
            }
        };

        // Blocking file IO stays off the runtime thread
        let installer = Arc::clone(&self.installer);
        let (source, owned) = (source.to_path_buf(), artifact.clone());
        let installed = tokio::task::spawn_blocking(move || installer.install(&source, &owned))
            .await
            .unwrap_or_else(|e| {
                Err(FileInstallError::Io {
                    path: artifact.destination().to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                })
            });

        installed.map_err(|source| {
            Interrupt::Failed(InstallError::ArtifactCopyFailed {
                artifact: artifact.name().to_string(),
                source,
            })
        })
    }

    async fn retry_copy(&self, run: &mut Run<'_>) -> SequencerState {
        let delay = self.config.retry.copy_retry_delay_secs;
        let last_error = run.attempt.last_error.clone().unwrap_or_default();
        run.status(&format!("Copy failed: {}. Retrying in {}s...", last_error, delay))
            .await;

        if self
            .or_abort(tokio::time::sleep(Duration::from_secs(delay)))
            .await
            .is_none()
        {
            return SequencerState::Aborted;
        }
        SequencerState::StoppingService
    }

    /// Best-effort start; never aborted
    async fn start_service(&self, run: &mut Run<'_>) {
        run.status(&format!("Starting {}...", self.config.service.display_name))
            .await;
        run.host.on_step_started(&PlanStep::ServiceStart.to_string());

        let command = commands::service_start(&self.config);
        let timeout_secs = self.config.timeouts.service_secs;
        let result = self.runner.run(&command, timeout_secs).await;
        run.service_stopped = false;

        if !result.success() {
            run.warn(command_failure(&result, timeout_secs, InstallError::ServiceStartFailed))
                .await;
        }
    }

    async fn fetch_bundle(&self, run: &mut Run<'_>) -> SequencerState {
        let work = self.config.paths.work_dir.join("motor");
        let next = self.fetch_bundle_into(run, &work).await;
        discard_dir(&work).await;
        next
    }

    async fn fetch_bundle_into(&self, run: &mut Run<'_>, work: &Path) -> SequencerState {
        let settings = &self.config.bundle;
        run.status("Checking latest Motor Settings ZIP...").await;

        let candidate = match self
            .or_abort(self.fetcher.find_latest(
                &settings.listing_url,
                &settings.name_pattern,
                &settings.date_format,
            ))
            .await
        {
            None => return SequencerState::Aborted,
            Some(Ok(candidate)) => candidate,
            Some(Err(FetchError::NoMatch(pattern))) => {
                return run.fail(InstallError::NoMatchingRelease(pattern))
            }
            Some(Err(source)) => {
                return run.fail(InstallError::RemoteFetchFailed {
                    what: "release listing".to_string(),
                    source,
                })
            }
        };

        run.status(&format!(
            "Found version: {}",
            candidate.version_label(&settings.date_format)
        ))
        .await;
        run.status(&format!("Source: {}", candidate.download_url)).await;
        run.status("Installing Motor Settings...").await;

        let archive = work.join("bundle.zip");
        match self
            .or_abort(self.fetcher.download(
                &candidate.download_url,
                &archive,
                self.config.timeouts.download_secs,
            ))
            .await
        {
            None => return SequencerState::Aborted,
            Some(Err(source)) => {
                return run.fail(InstallError::RemoteFetchFailed {
                    what: candidate.name.clone(),
                    source,
                })
            }
            Some(Ok(bytes)) => debug!("Bundle archive is {} bytes", bytes),
        }

        let staging = work.join("staging");
        let extracted = {
            let (archive, staging) = (archive.clone(), staging.clone());
            tokio::task::spawn_blocking(move || bundle::extract_archive(&archive, &staging)).await
        };
        match extracted {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return run.fail(e),
            Err(e) => return run.fail(InstallError::BundleExtractFailed(e.to_string())),
        }

        let artifacts = match bundle::bundle_artifacts(
            &staging,
            &settings.settings_dir,
            &settings.satellites_path,
        ) {
            Ok(artifacts) => artifacts,
            Err(e) => return run.fail(e),
        };

        for artifact in &artifacts {
            if self.abort.is_requested() {
                return SequencerState::Aborted;
            }
            run.host
                .on_step_started(&PlanStep::Copy(artifact.clone()).to_string());
            match self.copy_one(artifact, "motor").await {
                Ok(_) => {}
                Err(Interrupt::Aborted) => return SequencerState::Aborted,
                Err(Interrupt::Failed(e)) => return run.fail(e),
            }
        }

        info!("Motor settings: {} files installed", artifacts.len());
        SequencerState::ApplyingOptionalBundle
    }

    async fn apply_bundle(&self, run: &mut Run<'_>) -> SequencerState {
        run.status("Reloading settings...").await;
        let command = commands::reload(&self.config);
        let timeout_secs = self.config.timeouts.reload_secs;
        run.host.on_step_started(&command);

        let Some(result) = self.or_abort(self.runner.run(&command, timeout_secs)).await else {
            return SequencerState::Aborted;
        };

        if result.success() {
            run.message = Some("Motor Settings installed & reloaded successfully.".to_string());
        } else {
            let warning = command_failure(&result, timeout_secs, InstallError::ReloadFailed);
            run.message = Some(format!("Installed, but reload failed: {}", warning));
            run.warn(warning).await;
        }
        SequencerState::Done
    }

    /// Restore the service if needed and report the terminal state
    async fn finish(&self, mut run: Run<'_>) -> RunReport {
        if run.service_stopped {
            self.start_service(&mut run).await;
        }

        if run.state == SequencerState::Aborted {
            run.error = Some(InstallError::Aborted);
        }
        let success = run.state == SequencerState::Done;
        let message = match run.message.take() {
            Some(message) => message,
            None => run
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| run.state.to_string()),
        };

        if success {
            info!("Run {} finished: {}", run.log.run_id(), message);
        } else {
            error!("Run {} {}: {}", run.log.run_id(), run.state, message);
        }
        run.log
            .record(
                run.state.as_str(),
                success,
                &message,
                run.error.as_ref().map(|e| e.code()),
            )
            .await;
        run.host.on_run_finished(success, &message);

        RunReport {
            run_id: run.log.run_id(),
            final_state: run.state,
            states: run.states,
            warnings: run.warnings,
            error: run.error,
            message,
            reboot_issued: false,
        }
    }
}
