//! Terminal output and the interactive host

use abertis_common::config::SourceMode;
use abertis_common::{InstallHost, InstallPlan, InstallerConfig, RunReport};
use console::Term;
use owo_colors::OwoColorize;

const SEPARATOR: &str = "------------------------------------------------------------";

/// Prints sequencer progress to the terminal
pub struct TerminalHost;

impl InstallHost for TerminalHost {
    fn on_status_changed(&self, text: &str) {
        println!("{} {}", "::".cyan(), text);
    }

    fn on_step_started(&self, text: &str) {
        println!("   {}", text.dimmed());
    }

    fn on_run_finished(&self, success: bool, message: &str) {
        println!("{}", SEPARATOR.dimmed());
        if success {
            println!("{} {}", "[OK]".bright_green(), message.bold());
        } else {
            error(message);
        }
    }

    fn on_reboot_requested(&self) -> bool {
        confirm("Reboot now to apply the changes?")
    }
}

pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", SEPARATOR.dimmed());
}

pub fn error(message: &str) {
    eprintln!("[ERROR] {}", message.red());
}

pub fn warning(message: &str) {
    eprintln!("{} {}", "[WARN]".yellow(), message);
}

/// Ask a yes/no question. Anything but "y" is no, as is a non-interactive terminal.
pub fn confirm(question: &str) -> bool {
    if !console::user_attended() {
        return false;
    }
    let term = Term::stdout();
    if term.write_str(&format!("{} [y/N] ", question)).is_err() {
        return false;
    }
    term.read_line()
        .map(|input| input.trim().eq_ignore_ascii_case("y"))
        .unwrap_or(false)
}

pub fn summary(report: &RunReport) {
    for warning_item in &report.warnings {
        warning(&warning_item.to_string());
    }
    if report.reboot_issued {
        println!("Rebooting...");
    }
    println!("{}", format!("run {} ({})", report.run_id, report.final_state).dimmed());
}

pub fn print_plan(plan: &InstallPlan, config: &InstallerConfig) {
    header(&format!("Install plan for {}", plan.architecture()));
    for (index, step) in plan.steps().iter().enumerate() {
        println!("{:>3}. {}", index + 1, step);
    }
    println!();
    println!("root:   {}", config.paths.root_dir.display());
    let source = match config.paths.source_mode {
        SourceMode::Bundled => config.paths.data_dir.display().to_string(),
        SourceMode::Remote => config.paths.remote_base_url.clone(),
    };
    println!("source: {}", source);
    println!(
        "retry:  {} copy attempts, {}s apart",
        config.retry.max_copy_attempts, config.retry.copy_retry_delay_secs
    );
}
