//! Abertis Control - command-line host for the Abertis installer
//!
//! Runs the install sequence on the receiver and prints its progress.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "abertisctl")]
#[command(about = "CiefpSettings T2MI Abertis installer", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: /etc/abertis/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install astra-sm, the abertis script and its configuration
    Install {
        /// Machine string to install for (default: this receiver)
        #[arg(long)]
        arch: Option<String>,

        /// Also install the latest motor settings
        #[arg(long)]
        with_motor: bool,

        /// Do not ask for a reboot when done
        #[arg(long)]
        no_reboot_prompt: bool,
    },

    /// Install the latest motor settings only
    Motor,

    /// Update the plugin from its repository
    Update,

    /// Show what an install would do
    Plan {
        /// Machine string to plan for (default: this receiver)
        #[arg(long)]
        arch: Option<String>,
    },

    /// Reboot the receiver
    Reboot {
        /// Skip the confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = commands::load_config(cli.config.as_deref())?;

    let success = match cli.command {
        Commands::Install {
            arch,
            with_motor,
            no_reboot_prompt,
        } => commands::install(config, arch, with_motor, !no_reboot_prompt).await?,
        Commands::Motor => commands::motor(config).await?,
        Commands::Update => commands::update(config).await?,
        Commands::Plan { arch } => commands::plan(&config, arch)?,
        Commands::Reboot { yes } => commands::reboot(config, yes).await?,
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
