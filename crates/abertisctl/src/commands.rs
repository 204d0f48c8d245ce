//! Command handlers for abertisctl.

use crate::output::{self, TerminalHost};
use abertis_common::arch::host_machine;
use abertis_common::{
    AbortHandle, Architecture, ArtifactSource, InstallError, InstallSequencer, InstallerConfig, RunReport,
    RunRequest,
};
use anyhow::{Context, Result};
use std::future::Future;
use std::path::Path;
use tracing::info;

/// Explicit paths must load; the system path falls back to defaults
pub fn load_config(path: Option<&Path>) -> Result<InstallerConfig> {
    match path {
        Some(path) => InstallerConfig::load_from(path),
        None => Ok(InstallerConfig::load()),
    }
}

/// Handle install command
pub async fn install(
    config: InstallerConfig,
    arch: Option<String>,
    with_motor: bool,
    offer_reboot: bool,
) -> Result<bool> {
    let machine = arch.unwrap_or_else(host_machine);
    info!("Installing for machine '{}'", machine);
    output::header(&format!("Abertis install ({})", machine));

    let sequencer = InstallSequencer::with_defaults(config);
    let request = RunRequest {
        machine,
        with_bundle: with_motor,
        offer_reboot,
    };
    let host = TerminalHost;
    let report = abort_on_ctrl_c(&sequencer, sequencer.start(request, &host)).await?;

    output::summary(&report);
    Ok(report.success())
}

/// Handle motor command
pub async fn motor(config: InstallerConfig) -> Result<bool> {
    output::header("Motor settings");
    let sequencer = InstallSequencer::with_defaults(config);
    let host = TerminalHost;
    let report = abort_on_ctrl_c(&sequencer, sequencer.run_bundle_only(&host)).await?;

    output::summary(&report);
    Ok(report.success())
}

/// Handle update command
pub async fn update(config: InstallerConfig) -> Result<bool> {
    output::header("Plugin update");
    let sequencer = InstallSequencer::with_defaults(config);
    let host = TerminalHost;
    let report = abort_on_ctrl_c(&sequencer, sequencer.run_self_update(&host)).await?;

    output::summary(&report);
    Ok(report.success())
}

/// Handle plan command
pub fn plan(config: &InstallerConfig, arch: Option<String>) -> Result<bool> {
    let machine = arch.unwrap_or_else(host_machine);
    let arch = Architecture::normalize(&machine)
        .with_context(|| format!("Cannot plan for machine '{}'", machine))?;
    let plan = ArtifactSource::new(config).plan(arch);

    output::print_plan(&plan, config);
    match plan.validate() {
        Ok(()) => Ok(true),
        Err(e) => {
            output::error(&format!("Plan is invalid: {}", e));
            Ok(false)
        }
    }
}

/// Handle reboot command
pub async fn reboot(config: InstallerConfig, yes: bool) -> Result<bool> {
    if !yes && !output::confirm("Reboot the receiver now?") {
        println!("Reboot cancelled.");
        return Ok(true);
    }

    let result = InstallSequencer::with_defaults(config).reboot().await;
    if !result.success() {
        output::error(&format!("Reboot failed (code {})", result.exit_code));
    }
    Ok(result.success())
}

/// Await a run, aborting it on Ctrl-C
async fn abort_on_ctrl_c<F>(sequencer: &InstallSequencer, run: F) -> Result<RunReport>
where
    F: Future<Output = Result<RunReport, InstallError>>,
{
    let handle = sequencer.abort_handle();
    let watcher = tokio::spawn(forward_interrupts(tokio::signal::ctrl_c, handle));

    let report = run.await;
    watcher.abort();
    Ok(report?)
}

/// The first interrupt aborts the run; later ones only say the restart is
/// still in progress. Returns once the signal source fails.
async fn forward_interrupts<F, Fut>(mut next_signal: F, handle: AbortHandle) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let mut received = 0;
    while next_signal().await.is_ok() {
        received += 1;
        if received == 1 {
            eprintln!();
            output::warning("Aborting, restoring the service first...");
            handle.abort();
        } else {
            output::warning("Still restoring the service, please wait...");
        }
    }
    received
}
