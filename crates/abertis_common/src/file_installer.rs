//! Idempotent, atomic file installation
//!
//! Files are written to `<dest>.part` and renamed over the destination, so a
//! reader never sees a half-written file. Identical content with a matching
//! mode is left alone, which keeps re-runs from disturbing the service.

use crate::artifact::{is_allowed_destination, Artifact};
use crate::error::FileInstallError;
use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What `install` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstallOutcome {
    Installed,
    Skipped,
}

/// Installs one resolved artifact from a local source file
pub trait ArtifactInstaller: Send + Sync {
    fn install(&self, source: &Path, artifact: &Artifact)
        -> Result<InstallOutcome, FileInstallError>;
}

/// Byte-for-byte comparison. Absent or non-regular files are never identical.
pub fn is_identical(source: &Path, dest: &Path) -> bool {
    let (Ok(src_meta), Ok(dst_meta)) = (fs::metadata(source), fs::metadata(dest)) else {
        return false;
    };
    if !src_meta.is_file() || !dst_meta.is_file() || src_meta.len() != dst_meta.len() {
        return false;
    }
    let (Ok(a), Ok(b)) = (File::open(source), File::open(dest)) else {
        return false;
    };
    let mut a = BufReader::new(a);
    let mut b = BufReader::new(b);
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];
    loop {
        let n = match a.read(&mut buf_a) {
            Ok(n) => n,
            Err(_) => return false,
        };
        if n == 0 {
            return true;
        }
        if b.read_exact(&mut buf_b[..n]).is_err() || buf_a[..n] != buf_b[..n] {
            return false;
        }
    }
}

fn mode_matches(dest: &Path, mode: Option<u32>) -> bool {
    match mode {
        None => true,
        Some(mode) => fs::metadata(dest)
            .map(|m| m.permissions().mode() & 0o7777 == mode)
            .unwrap_or(false),
    }
}

/// Staging path written before the atomic rename
pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Writes files under a filesystem root (`/` on the box)
#[derive(Debug, Clone)]
pub struct FileInstaller {
    root: PathBuf,
}

impl FileInstaller {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Real path of an absolute system destination
    pub fn rooted(&self, absolute: &Path) -> PathBuf {
        match absolute.strip_prefix("/") {
            Ok(relative) => self.root.join(relative),
            Err(_) => self.root.join(absolute),
        }
    }

    /// Copy `source` to `dest` (real paths) unless it is already in place
    pub fn install_file(
        &self,
        source: &Path,
        dest: &Path,
        mode: Option<u32>,
    ) -> Result<InstallOutcome, FileInstallError> {
        if is_identical(source, dest) && mode_matches(dest, mode) {
            debug!("{} already up to date", dest.display());
            return Ok(InstallOutcome::Skipped);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| FileInstallError::io(parent, e))?;
        }

        let part = part_path(dest);
        let written = fs::copy(source, &part)
            .map_err(|e| FileInstallError::io(source, e))
            .and_then(|_| match mode {
                Some(mode) => fs::set_permissions(&part, fs::Permissions::from_mode(mode))
                    .map_err(|e| FileInstallError::io(&part, e)),
                None => Ok(()),
            })
            .and_then(|_| fs::rename(&part, dest).map_err(|e| FileInstallError::io(dest, e)));

        if let Err(e) = written {
            let _ = fs::remove_file(&part);
            return Err(e);
        }

        info!("Installed {} -> {}", source.display(), dest.display());
        Ok(InstallOutcome::Installed)
    }
}

impl ArtifactInstaller for FileInstaller {
    fn install(
        &self,
        source: &Path,
        artifact: &Artifact,
    ) -> Result<InstallOutcome, FileInstallError> {
        if !is_allowed_destination(artifact.destination()) {
            return Err(FileInstallError::DestinationNotAllowed(
                artifact.destination().to_path_buf(),
            ));
        }
        let dest = self.rooted(artifact.destination());
        self.install_file(source, &dest, artifact.mode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactLocator;
    use tempfile::TempDir;

    fn write(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_is_identical() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        write(&a, b"same");
        assert!(!is_identical(&a, &b), "absent destination is not identical");
        assert!(!is_identical(&dir.path().join("missing"), &a));

        write(&b, b"same");
        assert!(is_identical(&a, &b));

        write(&b, b"diff");
        assert!(!is_identical(&a, &b));
        write(&b, b"longer content");
        assert!(!is_identical(&a, &b));
    }

    #[test]
    fn test_install_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("data/arm/abertis");
        write(&src, b"#!/bin/sh\necho abertis\n");
        let dest = dir.path().join("etc/astra/scripts/abertis");
        let installer = FileInstaller::new(dir.path());

        let first = installer.install_file(&src, &dest, Some(0o755)).unwrap();
        assert_eq!(first, InstallOutcome::Installed);
        let bytes_after_first = fs::read(&dest).unwrap();
        let mode_after_first = fs::metadata(&dest).unwrap().permissions().mode() & 0o7777;

        let second = installer.install_file(&src, &dest, Some(0o755)).unwrap();
        assert_eq!(second, InstallOutcome::Skipped);
        assert_eq!(fs::read(&dest).unwrap(), bytes_after_first);
        assert_eq!(
            fs::metadata(&dest).unwrap().permissions().mode() & 0o7777,
            mode_after_first
        );
        assert_eq!(mode_after_first, 0o755);
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn test_mode_mismatch_forces_install() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        write(&src, b"x");
        write(&dest, b"x");
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o644)).unwrap();

        let installer = FileInstaller::new(dir.path());
        let outcome = installer.install_file(&src, &dest, Some(0o755)).unwrap();
        assert_eq!(outcome, InstallOutcome::Installed);
        assert_eq!(fs::metadata(&dest).unwrap().permissions().mode() & 0o7777, 0o755);
    }

    #[test]
    fn test_missing_source_fails_and_leaves_no_part() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("etc/astra/astra.conf");
        let installer = FileInstaller::new(dir.path());

        let err = installer
            .install_file(&dir.path().join("nope"), &dest, None)
            .unwrap_err();
        assert!(matches!(err, FileInstallError::Io { .. }));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
        // Parent directories were still created
        assert!(dest.parent().unwrap().is_dir());
    }

    #[test]
    fn test_artifact_install_is_rooted_and_allow_listed() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("SoftCam.Key");
        write(&src, b"F 00000000 00 00112233445566778899\n");
        let installer = FileInstaller::new(dir.path().join("root"));

        let artifact = Artifact::new(
            "softcam.key",
            ArtifactLocator::Bundled(src.clone()),
            "/etc/tuxbox/config/oscam-emu/softcam.key",
            None,
        );
        assert_eq!(installer.install(&src, &artifact).unwrap(), InstallOutcome::Installed);
        assert!(dir
            .path()
            .join("root/etc/tuxbox/config/oscam-emu/softcam.key")
            .is_file());

        let rogue = Artifact::new("rogue", ArtifactLocator::Bundled(src.clone()), "/usr/bin/x", None);
        assert!(matches!(
            installer.install(&src, &rogue),
            Err(FileInstallError::DestinationNotAllowed(_))
        ));
    }
}
