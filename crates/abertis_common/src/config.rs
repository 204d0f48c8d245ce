//! Installer configuration.
//!
//! Loads settings from /etc/abertis/config.toml or uses defaults. Every field
//! is optional in the file; missing ones take the values the plugin ships with.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/abertis/config.toml";

/// Where the installer takes its artifacts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Files shipped inside the plugin's data directory
    Bundled,
    /// Raw files downloaded from `remote_base_url`
    Remote,
}

/// Artifact sources and filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Bundled data directory (sysctl.conf, astra.conf, <arch>/abertis, SoftCam.Key)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Filesystem root all absolute destinations are placed under
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Scratch directory for downloads and bundle extraction
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// JSONL run log; unset disables it
    #[serde(default = "default_run_log")]
    pub run_log: Option<PathBuf>,

    #[serde(default = "default_source_mode")]
    pub source_mode: SourceMode,

    /// Base URL used when `source_mode = "remote"`
    #[serde(default = "default_remote_base_url")]
    pub remote_base_url: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/usr/lib/enigma2/python/Plugins/Extensions/CiefpSettingsT2miAbertis/data")
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/tmp/abertis")
}

fn default_run_log() -> Option<PathBuf> {
    Some(PathBuf::from("/var/log/abertis/install.jsonl"))
}

fn default_source_mode() -> SourceMode {
    SourceMode::Bundled
}

fn default_remote_base_url() -> String {
    "https://raw.githubusercontent.com/ciefp/CiefpSettingsT2miAbertis/main/data".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            root_dir: default_root_dir(),
            work_dir: default_work_dir(),
            run_log: default_run_log(),
            source_mode: default_source_mode(),
            remote_base_url: default_remote_base_url(),
        }
    }
}

/// Managed daemon package and service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// opkg package name
    #[serde(default = "default_package")]
    pub package: String,

    /// Init script controlling the daemon
    #[serde(default = "default_init_script")]
    pub init_script: String,

    /// Process name for the forced kill
    #[serde(default = "default_process_name")]
    pub process_name: String,

    /// Name shown in status messages
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

fn default_package() -> String {
    "astra-sm".to_string()
}

fn default_init_script() -> String {
    "/etc/init.d/astra-sm".to_string()
}

fn default_process_name() -> String {
    "astra-sm".to_string()
}

fn default_display_name() -> String {
    "Astra-SM".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            package: default_package(),
            init_script: default_init_script(),
            process_name: default_process_name(),
            display_name: default_display_name(),
        }
    }
}

/// Retry bounds and backoff delays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total package install attempts
    #[serde(default = "default_prerequisite_attempts")]
    pub prerequisite_attempts: u32,

    #[serde(default = "default_prerequisite_backoff")]
    pub prerequisite_backoff_secs: u64,

    /// Total copy attempts (each one re-stops the service)
    #[serde(default = "default_max_copy_attempts")]
    pub max_copy_attempts: u32,

    #[serde(default = "default_copy_retry_delay")]
    pub copy_retry_delay_secs: u64,
}

fn default_prerequisite_attempts() -> u32 {
    2
}

fn default_prerequisite_backoff() -> u64 {
    5
}

fn default_max_copy_attempts() -> u32 {
    2
}

fn default_copy_retry_delay() -> u64 {
    30 // astra-sm may auto-start after a fresh install and hold the script
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            prerequisite_attempts: default_prerequisite_attempts(),
            prerequisite_backoff_secs: default_prerequisite_backoff(),
            max_copy_attempts: default_max_copy_attempts(),
            copy_retry_delay_secs: default_copy_retry_delay(),
        }
    }
}

/// Per-operation timeouts in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_check_timeout")]
    pub check_secs: u64,

    #[serde(default = "default_install_timeout")]
    pub install_secs: u64,

    #[serde(default = "default_service_timeout")]
    pub service_secs: u64,

    #[serde(default = "default_listing_timeout")]
    pub listing_secs: u64,

    #[serde(default = "default_download_timeout")]
    pub download_secs: u64,

    #[serde(default = "default_reload_timeout")]
    pub reload_secs: u64,

    #[serde(default = "default_update_timeout")]
    pub update_secs: u64,
}

fn default_check_timeout() -> u64 {
    30
}

fn default_install_timeout() -> u64 {
    600
}

fn default_service_timeout() -> u64 {
    60
}

fn default_listing_timeout() -> u64 {
    20
}

fn default_download_timeout() -> u64 {
    120
}

fn default_reload_timeout() -> u64 {
    30
}

fn default_update_timeout() -> u64 {
    300
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            check_secs: default_check_timeout(),
            install_secs: default_install_timeout(),
            service_secs: default_service_timeout(),
            listing_secs: default_listing_timeout(),
            download_secs: default_download_timeout(),
            reload_secs: default_reload_timeout(),
            update_secs: default_update_timeout(),
        }
    }
}

/// Motor settings bundle lookup and reload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleConfig {
    /// Directory-listing endpoint returning `[{name, download_url}]`
    #[serde(default = "default_listing_url")]
    pub listing_url: String,

    /// Case-insensitive regex; capture group 1 is the date token
    #[serde(default = "default_name_pattern")]
    pub name_pattern: String,

    /// chrono format of the date token
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Live configuration tree the bundle is copied into
    #[serde(default = "default_settings_dir")]
    pub settings_dir: PathBuf,

    /// Destination of a bundled satellites.xml
    #[serde(default = "default_satellites_path")]
    pub satellites_path: PathBuf,

    /// Signal the consuming application to reload services and bouquets
    #[serde(default = "default_reload_command")]
    pub reload_command: String,
}

fn default_listing_url() -> String {
    "https://api.github.com/repos/ciefp/ciefpsettings-enigma2-zipped/contents/".to_string()
}

fn default_name_pattern() -> String {
    r"^ciefp-E2-75E-34W-(\d{2}\.\d{2}\.\d{4})\.zip$".to_string()
}

fn default_date_format() -> String {
    "%d.%m.%Y".to_string()
}

fn default_settings_dir() -> PathBuf {
    PathBuf::from("/etc/enigma2")
}

fn default_satellites_path() -> PathBuf {
    PathBuf::from("/etc/tuxbox/satellites.xml")
}

fn default_reload_command() -> String {
    r#"wget -qO - "http://127.0.0.1/web/servicelistreload?mode=0" >/dev/null 2>&1"#.to_string()
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            listing_url: default_listing_url(),
            name_pattern: default_name_pattern(),
            date_format: default_date_format(),
            settings_dir: default_settings_dir(),
            satellites_path: default_satellites_path(),
            reload_command: default_reload_command(),
        }
    }
}

/// Maintenance commands outside the install sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_update_command")]
    pub update_command: String,

    #[serde(default = "default_reboot_command")]
    pub reboot_command: String,
}

fn default_update_command() -> String {
    r#"wget -q "--no-check-certificate" https://raw.githubusercontent.com/ciefp/CiefpSettingsT2miAbertis/main/installer.sh -O - | /bin/sh"#
        .to_string()
}

fn default_reboot_command() -> String {
    "reboot".to_string()
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            update_command: default_update_command(),
            reboot_command: default_reboot_command(),
        }
    }
}

/// Full installer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallerConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub bundle: BundleConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

impl InstallerConfig {
    /// Load config from the system path, or return defaults
    pub fn load() -> Self {
        Self::load_from(CONFIG_PATH).unwrap_or_else(|e| {
            warn!("Config not loaded, using defaults: {:#}", e);
            InstallerConfig::default()
        })
    }

    /// Load config from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: InstallerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
