//! Motor settings bundle extraction
//!
//! The archive holds one top-level folder with the Enigma2 settings files
//! (lamedb, bouquets, optionally satellites.xml). The folder's contents go
//! into the settings tree; satellites.xml is also copied to tuxbox.

use crate::artifact::{Artifact, ArtifactLocator};
use crate::error::InstallError;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const SATELLITES_XML: &str = "satellites.xml";

/// Unpack `archive` into a fresh `staging` directory
pub fn extract_archive(archive: &Path, staging: &Path) -> Result<usize, InstallError> {
    let fail = |what: &str, e: &dyn std::fmt::Display| {
        InstallError::BundleExtractFailed(format!("{}: {}", what, e))
    };

    if staging.exists() {
        fs::remove_dir_all(staging).map_err(|e| fail("clearing staging dir", &e))?;
    }
    fs::create_dir_all(staging).map_err(|e| fail("creating staging dir", &e))?;

    let file = File::open(archive).map_err(|e| fail("opening archive", &e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| fail("reading archive", &e))?;
    let entries = zip.len();
    zip.extract(staging).map_err(|e| fail("extracting archive", &e))?;

    info!("Extracted {} entries from {}", entries, archive.display());
    Ok(entries)
}

/// Files of every top-level folder in `staging`, mapped to their destinations
pub fn bundle_artifacts(
    staging: &Path,
    settings_dir: &Path,
    satellites_path: &Path,
) -> Result<Vec<Artifact>, InstallError> {
    let mut folders: Vec<PathBuf> = fs::read_dir(staging)
        .map_err(|e| InstallError::BundleExtractFailed(format!("reading staging dir: {}", e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    folders.sort();

    let mut artifacts = Vec::new();
    for folder in &folders {
        for entry in WalkDir::new(folder).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                InstallError::BundleExtractFailed(format!("walking {}: {}", folder.display(), e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(folder)
                .map_err(|e| InstallError::BundleExtractFailed(e.to_string()))?;
            debug!("Bundle file {}", relative.display());
            artifacts.push(Artifact::new(
                format!("bundle:{}", relative.display()),
                ArtifactLocator::Bundled(entry.path().to_path_buf()),
                settings_dir.join(relative),
                None,
            ));
        }

        let satellites = folder.join(SATELLITES_XML);
        if satellites.is_file() {
            artifacts.push(Artifact::new(
                SATELLITES_XML,
                ArtifactLocator::Bundled(satellites),
                satellites_path,
                None,
            ));
        }
    }

    if artifacts.is_empty() {
        return Err(InstallError::BundleExtractFailed(
            "archive contains no settings folder".to_string(),
        ));
    }
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    fn make_zip(path: &Path, files: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, content) in files {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_extract_and_map_bundle() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("motor.zip");
        make_zip(
            &archive,
            &[
                ("ciefp-E2-75E-34W/lamedb", "eDVB services /4/"),
                ("ciefp-E2-75E-34W/bouquets.tv", "#NAME Bouquets (TV)"),
                ("ciefp-E2-75E-34W/satellites.xml", "<satellites/>"),
                ("readme.txt", "top-level files are ignored"),
            ],
        );
        let staging = dir.path().join("staging");

        assert_eq!(extract_archive(&archive, &staging).unwrap(), 4);
        let artifacts = bundle_artifacts(
            &staging,
            Path::new("/etc/enigma2"),
            Path::new("/etc/tuxbox/satellites.xml"),
        )
        .unwrap();

        let dests: Vec<&Path> = artifacts.iter().map(|a| a.destination()).collect();
        assert_eq!(
            dests,
            vec![
                Path::new("/etc/enigma2/bouquets.tv"),
                Path::new("/etc/enigma2/lamedb"),
                Path::new("/etc/enigma2/satellites.xml"),
                Path::new("/etc/tuxbox/satellites.xml"),
            ]
        );
    }

    #[test]
    fn test_extract_replaces_stale_staging() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("motor.zip");
        make_zip(&archive, &[("set/lamedb", "x")]);
        let staging = dir.path().join("staging");
        fs::create_dir_all(staging.join("stale")).unwrap();
        fs::write(staging.join("stale/old"), "old").unwrap();

        extract_archive(&archive, &staging).unwrap();
        assert!(!staging.join("stale").exists());
    }

    #[test]
    fn test_corrupt_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("motor.zip");
        fs::write(&archive, "not a zip").unwrap();

        let err = extract_archive(&archive, &dir.path().join("staging")).unwrap_err();
        assert!(matches!(err, InstallError::BundleExtractFailed(_)));
    }

    #[test]
    fn test_archive_without_folder_is_rejected() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("motor.zip");
        make_zip(&archive, &[("lamedb", "x")]);
        let staging = dir.path().join("staging");
        extract_archive(&archive, &staging).unwrap();

        let err = bundle_artifacts(
            &staging,
            Path::new("/etc/enigma2"),
            Path::new("/etc/tuxbox/satellites.xml"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no settings folder"));
    }
}
