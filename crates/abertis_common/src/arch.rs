//! Target architecture detection and normalization

use crate::error::ArchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Architectures the bundled script is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Arm,
    Mips,
}

impl Architecture {
    /// Normalize a machine string (as reported by `uname -m`)
    pub fn normalize(machine: &str) -> Result<Self, ArchError> {
        match machine.trim().to_ascii_lowercase().as_str() {
            "arm" | "armv7" | "armv7l" => Ok(Architecture::Arm),
            "mips" => Ok(Architecture::Mips),
            _ => Err(ArchError(machine.trim().to_string())),
        }
    }

    /// Subdirectory of the data dir holding this architecture's script
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Arm => "arm",
            Architecture::Mips => "mips",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = ArchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Architecture::normalize(s)
    }
}

/// Raw machine string of the running host.
///
/// Falls back to the compile-time target when the kernel does not report one.
pub fn host_machine() -> String {
    sysinfo::System::cpu_arch().unwrap_or_else(|| std::env::consts::ARCH.to_string())
}
