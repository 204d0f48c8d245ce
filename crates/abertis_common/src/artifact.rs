//! Artifacts and the install plan
//!
//! Resolution is pure: the same (kind, architecture) always yields the same
//! Artifact, and nothing touches the filesystem until the installer runs.

use crate::arch::Architecture;
use crate::config::{InstallerConfig, SourceMode};
use crate::error::ArchError;
use serde::Serialize;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Individual files outside the allowed directories
pub const ALLOWED_FILES: &[&str] = &["/etc/sysctl.conf"];

/// Directories a file may be written into directly
pub const ALLOWED_DIRS: &[&str] = &[
    "/etc/astra",
    "/etc/astra/scripts",
    "/etc/tuxbox",
    "/etc/tuxbox/config",
    "/etc/tuxbox/config/oscam-emu",
];

/// Trees a file may be written anywhere below
pub const ALLOWED_TREES: &[&str] = &["/etc/enigma2"];

/// Check a destination against the allow-list
pub fn is_allowed_destination(path: &Path) -> bool {
    if !path.is_absolute() {
        return false;
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
    {
        return false;
    }
    let Some(parent) = path.parent() else {
        return false;
    };
    ALLOWED_FILES.iter().any(|file| path == Path::new(file))
        || ALLOWED_DIRS.iter().any(|dir| parent == Path::new(dir))
        || ALLOWED_TREES
            .iter()
            .any(|tree| path.starts_with(tree) && path != Path::new(tree))
}

/// Where an artifact's bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "location", rename_all = "lowercase")]
pub enum ArtifactLocator {
    Bundled(PathBuf),
    Remote(String),
}

impl fmt::Display for ArtifactLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactLocator::Bundled(path) => write!(f, "{}", path.display()),
            ArtifactLocator::Remote(url) => f.write_str(url),
        }
    }
}

/// Which architectures an artifact is installed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Applicability {
    Any,
    Only(Architecture),
}

impl Applicability {
    pub fn includes(&self, arch: Architecture) -> bool {
        match self {
            Applicability::Any => true,
            Applicability::Only(only) => *only == arch,
        }
    }
}

/// The fixed set of files the installer manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArtifactKind {
    SysctlConf,
    AstraConf,
    AbertisScript,
    SoftcamKey,
    OscamEmuSoftcamKey,
}

impl ArtifactKind {
    /// Install order: config files, then the script, then key files
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::SysctlConf,
        ArtifactKind::AstraConf,
        ArtifactKind::AbertisScript,
        ArtifactKind::SoftcamKey,
        ArtifactKind::OscamEmuSoftcamKey,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::SysctlConf => "sysctl.conf",
            ArtifactKind::AstraConf => "astra.conf",
            ArtifactKind::AbertisScript => "abertis",
            ArtifactKind::SoftcamKey => "softcam.key",
            ArtifactKind::OscamEmuSoftcamKey => "oscam-emu.softcam.key",
        }
    }

    fn relative_source(&self, arch: Architecture) -> PathBuf {
        match self {
            ArtifactKind::SysctlConf => PathBuf::from("sysctl.conf"),
            ArtifactKind::AstraConf => PathBuf::from("astra.conf"),
            ArtifactKind::AbertisScript => Path::new(arch.as_str()).join("abertis"),
            ArtifactKind::SoftcamKey | ArtifactKind::OscamEmuSoftcamKey => {
                PathBuf::from("SoftCam.Key")
            }
        }
    }

    fn destination(&self) -> &'static str {
        match self {
            ArtifactKind::SysctlConf => "/etc/sysctl.conf",
            ArtifactKind::AstraConf => "/etc/astra/astra.conf",
            ArtifactKind::AbertisScript => "/etc/astra/scripts/abertis",
            ArtifactKind::SoftcamKey => "/etc/tuxbox/config/softcam.key",
            ArtifactKind::OscamEmuSoftcamKey => "/etc/tuxbox/config/oscam-emu/softcam.key",
        }
    }

    fn mode(&self) -> Option<u32> {
        match self {
            ArtifactKind::AbertisScript => Some(0o755),
            _ => None,
        }
    }

    /// Files the running daemon may hold open
    fn service_held(&self) -> bool {
        matches!(self, ArtifactKind::AstraConf | ArtifactKind::AbertisScript)
    }
}

/// A single resolved file to install
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    name: String,
    source: ArtifactLocator,
    destination: PathBuf,
    mode: Option<u32>,
    applies_to: Applicability,
    service_held: bool,
}

impl Artifact {
    pub fn new(
        name: impl Into<String>,
        source: ArtifactLocator,
        destination: impl Into<PathBuf>,
        mode: Option<u32>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            destination: destination.into(),
            mode,
            applies_to: Applicability::Any,
            service_held: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ArtifactLocator {
        &self.source
    }

    /// Absolute system path (before root mapping)
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn mode(&self) -> Option<u32> {
        self.mode
    }

    pub fn applies_to(&self) -> Applicability {
        self.applies_to
    }

    pub fn service_held(&self) -> bool {
        self.service_held
    }
}

/// Resolves artifact kinds to concrete sources for one configuration
#[derive(Debug, Clone)]
pub struct ArtifactSource {
    data_dir: PathBuf,
    mode: SourceMode,
    remote_base_url: String,
}

impl ArtifactSource {
    pub fn new(config: &InstallerConfig) -> Self {
        Self {
            data_dir: config.paths.data_dir.clone(),
            mode: config.paths.source_mode,
            remote_base_url: config.paths.remote_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve against a raw machine string
    pub fn resolve(&self, kind: ArtifactKind, machine: &str) -> Result<Artifact, ArchError> {
        let arch = Architecture::normalize(machine)?;
        Ok(self.resolve_for(kind, arch))
    }

    pub fn resolve_for(&self, kind: ArtifactKind, arch: Architecture) -> Artifact {
        let relative = kind.relative_source(arch);
        let source = match self.mode {
            SourceMode::Bundled => ArtifactLocator::Bundled(self.data_dir.join(&relative)),
            SourceMode::Remote => {
                let segments: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                ArtifactLocator::Remote(format!("{}/{}", self.remote_base_url, segments.join("/")))
            }
        };
        let applies_to = if kind == ArtifactKind::AbertisScript {
            Applicability::Only(arch)
        } else {
            Applicability::Any
        };

        Artifact {
            name: kind.name().to_string(),
            source,
            destination: PathBuf::from(kind.destination()),
            mode: kind.mode(),
            applies_to,
            service_held: kind.service_held(),
        }
    }

    /// The full ordered plan for one architecture
    pub fn plan(&self, arch: Architecture) -> InstallPlan {
        let mut steps = vec![
            PlanStep::PrerequisiteCheck,
            PlanStep::PrerequisiteInstall,
            PlanStep::ServiceStop,
        ];
        steps.extend(
            ArtifactKind::ALL
                .iter()
                .map(|kind| self.resolve_for(*kind, arch))
                .filter(|artifact| artifact.applies_to.includes(arch))
                .map(PlanStep::Copy),
        );
        steps.push(PlanStep::ServiceStart);
        InstallPlan { architecture: arch, steps }
    }
}

/// One position in the install plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlanStep {
    PrerequisiteCheck,
    PrerequisiteInstall,
    ServiceStop,
    Copy(Artifact),
    ServiceStart,
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStep::PrerequisiteCheck => f.write_str("check prerequisite package"),
            PlanStep::PrerequisiteInstall => f.write_str("install prerequisite package (if missing)"),
            PlanStep::ServiceStop => f.write_str("stop service"),
            PlanStep::Copy(a) => {
                write!(f, "copy {} -> {}", a.source, a.destination.display())?;
                if let Some(mode) = a.mode {
                    write!(f, " (mode {:o})", mode)?;
                }
                Ok(())
            }
            PlanStep::ServiceStart => f.write_str("start service"),
        }
    }
}

/// Ordered install steps for one architecture
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallPlan {
    architecture: Architecture,
    steps: Vec<PlanStep>,
}

impl InstallPlan {
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.steps.iter().filter_map(|step| match step {
            PlanStep::Copy(artifact) => Some(artifact),
            _ => None,
        })
    }

    /// Check ordering and destination invariants
    pub fn validate(&self) -> Result<(), String> {
        let mut stopped = false;
        let mut started = false;
        for step in &self.steps {
            match step {
                PlanStep::ServiceStop => stopped = true,
                PlanStep::ServiceStart => {
                    if !stopped {
                        return Err("service start before service stop".to_string());
                    }
                    started = true;
                }
                PlanStep::Copy(artifact) => {
                    if !is_allowed_destination(&artifact.destination) {
                        return Err(format!(
                            "{} targets disallowed path {}",
                            artifact.name,
                            artifact.destination.display()
                        ));
                    }
                    if artifact.service_held && (!stopped || started) {
                        return Err(format!(
                            "{} is written while the service may hold it open",
                            artifact.name
                        ));
                    }
                }
                PlanStep::PrerequisiteCheck | PlanStep::PrerequisiteInstall => {}
            }
        }
        if stopped && !started {
            return Err("service is stopped but never restarted".to_string());
        }
        Ok(())
    }
}
