//! Archive extraction module
//!
//! Handles the `.tar.gz` and `.zip` archives upstream releases ship in.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use aprel_schema::ArchiveFormat;
use thiserror::Error;
use zip::ZipArchive;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Archive error: {0}")]
    Archive(String),
}

/// Extract a tar.gz archive to a destination directory. Returns the paths of
/// the extracted files, relative to `dest_dir`.
pub fn extract_tar_gz(
    archive_path: &Path,
    dest_dir: &Path,
) -> Result<Vec<PathBuf>, ExtractError> {
    let file = File::open(archive_path)?;
    let reader = BufReader::new(file);
    let gz_decoder = flate2::read::GzDecoder::new(reader);

    extract_tar(gz_decoder, dest_dir)
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    fs::create_dir_all(dest_dir)?;

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    let mut extracted_files = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let relative_path: PathBuf = entry.path()?.components().collect();
        let entry_type = entry.header().entry_type();

        // unpack_in refuses entries escaping dest_dir (Zip Slip)
        if !entry.unpack_in(dest_dir)? {
            return Err(ExtractError::Archive(format!(
                "Invalid path in archive: {}",
                relative_path.display()
            )));
        }

        if !entry_type.is_dir() {
            extracted_files.push(relative_path);
        }
    }

    Ok(extracted_files)
}

/// Extract a zip archive
pub fn extract_zip(
    archive_path: &Path,
    dest_dir: &Path,
) -> Result<Vec<PathBuf>, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;

    fs::create_dir_all(dest_dir)?;
    let mut extracted_files = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let relative_path = match file.enclosed_name() {
            Some(path) => path.to_owned(),
            None => continue,
        };

        if file.is_dir() {
            fs::create_dir_all(dest_dir.join(&relative_path))?;
            continue;
        }

        let absolute_path = dest_dir.join(&relative_path);
        if let Some(p) = absolute_path.parent() {
            fs::create_dir_all(p)?;
        }

        let mut outfile = File::create(&absolute_path)?;
        io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&absolute_path, fs::Permissions::from_mode(mode))?;
        }

        extracted_files.push(relative_path);
    }

    Ok(extracted_files)
}

/// Extract an archive, detecting the format from its file name
pub fn extract(archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let name = archive_path.to_string_lossy();
    match ArchiveFormat::from_name(&name) {
        Some(ArchiveFormat::TarGz) => extract_tar_gz(archive_path, dest_dir),
        Some(ArchiveFormat::Zip) => extract_zip(archive_path, dest_dir),
        None => Err(ExtractError::UnsupportedFormat(name.into_owned())),
    }
}


#[cfg(test)]
mod tests {
    use super::testing;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_extract_tar_gz() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("ap-2.9-linux-x64.tar.gz");
        fs::write(
            &archive,
            testing::tar_gz(&[
                ("ap-2.9-linux-x64/build/libasyncProfiler.so", b"elf"),
                ("ap-2.9-linux-x64/profiler.sh", b"#!/bin/sh"),
            ]),
        )
        .unwrap();

        let dest = dir.path().join("out");
        let files = extract(&archive, &dest).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[1], Path::new("ap-2.9-linux-x64/profiler.sh"));
        assert_eq!(
            fs::read(dest.join("ap-2.9-linux-x64/build/libasyncProfiler.so")).unwrap(),
            b"elf"
        );
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dest.join(&files[1])).unwrap().permissions().mode();
            assert_ne!(mode & 0o111, 0);
        }
    }

    #[test]
    fn test_extract_zip() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("ap-2.9-macos.zip");
        fs::write(&archive, testing::zip(&[("ap-2.9-macos/README", b"hello")])).unwrap();

        let dest = dir.path().join("out");
        let files = extract(&archive, &dest).unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files, [Path::new("ap-2.9-macos/README")]);
        assert_eq!(fs::read_to_string(dest.join("ap-2.9-macos/README")).unwrap(), "hello");
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("ap-2.9-linux-x64.tar.xz");
        fs::write(&archive, b"").unwrap();

        let err = extract(&archive, dir.path()).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
    }
}
