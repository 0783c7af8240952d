// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Checkpoint archive creation and extraction.
//!
//! Archives are gzip-compressed tarballs rooted one level above the working
//! directory, i.e., the only top-level entry of an archive is the base name
//! of the directory it was taken from. Protected entries never make it into
//! an archive, and are skipped when an archive is extracted.

use crate::{checkpoint::ProtectedSet, path::dir_name};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::{
    fs::{create_dir_all, File, OpenOptions},
    io::{BufReader, BufWriter, Write},
    path::{Component, Path, PathBuf},
};
use tracing::{debug, instrument};
use walkdir::WalkDir;

/// Write archive of working directory to a new file.
///
/// The destination must not exist yet, it is never overwritten. Symbolic
/// links are stored as links. Anything that is not a regular file, directory,
/// or symbolic link is skipped. Returns number of entries archived.
///
/// A failure part way through leaves a corrupt archive at the destination
/// that must be removed by hand.
///
/// # Errors
///
/// - Return [`ArchiveError::Create`] if destination cannot be created.
/// - Return [`ArchiveError::Walk`] if working directory cannot be traversed.
/// - Return [`ArchiveError::Write`] if archive cannot be written.
#[instrument(skip(work_dir, dest, protected), level = "debug")]
pub fn write_archive(
    work_dir: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    protected: &ProtectedSet,
) -> Result<usize> {
    let work_dir = work_dir.as_ref();
    let dest = dest.as_ref();
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(|err| ArchiveError::Create {
            source: err,
            archive_path: dest.to_path_buf(),
        })?;
    let write_error = |err: std::io::Error| ArchiveError::Write {
        source: err,
        archive_path: dest.to_path_buf(),
    };

    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let root = PathBuf::from(dir_name(work_dir));
    builder.append_dir(&root, work_dir).map_err(write_error)?;
    let mut count = 1;

    let walker = WalkDir::new(work_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry
                .path()
                .strip_prefix(work_dir)
                .map(|relative| !protected.is_protected(relative))
                .unwrap_or(true)
        });

    for entry in walker {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(work_dir) else {
            continue;
        };
        let name = root.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            builder.append_dir(&name, entry.path()).map_err(write_error)?;
        } else if file_type.is_file() || file_type.is_symlink() {
            builder
                .append_path_with_name(entry.path(), &name)
                .map_err(write_error)?;
        } else {
            debug!("skip special file {:?}", entry.path().display());
            continue;
        }
        count += 1;
    }

    let encoder = builder.into_inner().map_err(write_error)?;
    let mut writer = encoder.finish().map_err(write_error)?;
    writer.flush().map_err(write_error)?;

    Ok(count)
}

/// Extract archive over a working directory.
///
/// Strips the top-level directory of the archive, so its contents land
/// directly in the working directory. Existing files are overwritten.
/// Protected entries are skipped. Returns number of entries extracted.
///
/// # Errors
///
/// - Return [`ArchiveError::Open`] if archive cannot be opened.
/// - Return [`ArchiveError::UnsafeEntry`] if an entry tries to escape the
///   working directory.
/// - Return [`ArchiveError::Extract`] if an entry cannot be unpacked.
#[instrument(skip(archive, work_dir, protected), level = "debug")]
pub fn extract_archive(
    archive: impl AsRef<Path>,
    work_dir: impl AsRef<Path>,
    protected: &ProtectedSet,
) -> Result<usize> {
    let archive_path = archive.as_ref();
    let work_dir = work_dir.as_ref();
    let extract_error = |err: std::io::Error| ArchiveError::Extract {
        source: err,
        archive_path: archive_path.to_path_buf(),
    };

    let file = File::open(archive_path).map_err(|err| ArchiveError::Open {
        source: err,
        archive_path: archive_path.to_path_buf(),
    })?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_overwrite(true);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);

    let mut count = 0;
    let mut directories = Vec::new();
    for entry in archive.entries().map_err(extract_error)? {
        let mut entry = entry.map_err(extract_error)?;
        let entry_path = entry.path().map_err(extract_error)?.into_owned();
        let Some(relative) = strip_top_level(&entry_path)? else {
            continue;
        };

        if protected.is_protected(&relative) {
            debug!("skip protected entry {:?}", relative.display());
            continue;
        }

        let target = work_dir.join(&relative);
        if entry.header().entry_type().is_dir() {
            create_dir_all(&target).map_err(extract_error)?;
            directories.push((target, entry));
            count += 1;
            continue;
        }

        if let Some(parent) = target.parent() {
            create_dir_all(parent).map_err(extract_error)?;
        }
        entry.unpack(&target).map_err(extract_error)?;
        count += 1;
    }

    // INVARIANT: Directory modes are applied last, children before parents.
    directories.sort_by(|(lhs, _), (rhs, _)| rhs.cmp(lhs));
    for (target, mut entry) in directories {
        entry.unpack(&target).map_err(extract_error)?;
    }

    Ok(count)
}

/// List entry paths of an archive without extracting anything.
///
/// # Errors
///
/// - Return [`ArchiveError::Open`] if archive cannot be opened.
/// - Return [`ArchiveError::Extract`] if archive cannot be read.
pub fn list_archive(archive: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let archive_path = archive.as_ref();
    let extract_error = |err: std::io::Error| ArchiveError::Extract {
        source: err,
        archive_path: archive_path.to_path_buf(),
    };

    let file = File::open(archive_path).map_err(|err| ArchiveError::Open {
        source: err,
        archive_path: archive_path.to_path_buf(),
    })?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

    let mut paths = Vec::new();
    for entry in archive.entries().map_err(extract_error)? {
        let entry = entry.map_err(extract_error)?;
        paths.push(entry.path().map_err(extract_error)?.into_owned());
    }

    Ok(paths)
}

// INVARIANT: Only plain relative components survive.
//   - Absolute paths and ".." are rejected outright.
//   - The top-level directory itself yields nothing to unpack.
fn strip_top_level(path: &Path) -> Result<Option<PathBuf>> {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => components.push(part),
            Component::CurDir => continue,
            _ => {
                return Err(ArchiveError::UnsafeEntry {
                    entry_path: path.to_path_buf(),
                })
            }
        }
    }

    if components.len() < 2 {
        return Ok(None);
    }

    Ok(Some(components[1..].iter().collect()))
}

/// Archive error types.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Archive file cannot be created.
    #[error("failed to create archive at {:?}", archive_path.display())]
    Create {
        #[source]
        source: std::io::Error,
        archive_path: PathBuf,
    },

    /// Archive cannot be written.
    #[error("failed to write archive at {:?}, remove it by hand as it is corrupt", archive_path.display())]
    Write {
        #[source]
        source: std::io::Error,
        archive_path: PathBuf,
    },

    /// Working directory cannot be traversed.
    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    /// Archive file cannot be opened.
    #[error("failed to open archive at {:?}", archive_path.display())]
    Open {
        #[source]
        source: std::io::Error,
        archive_path: PathBuf,
    },

    /// Archive entry cannot be extracted.
    #[error("failed to extract archive at {:?}", archive_path.display())]
    Extract {
        #[source]
        source: std::io::Error,
        archive_path: PathBuf,
    },

    /// Archive entry points outside of the extraction directory.
    #[error("refusing to extract unsafe archive entry {:?}", entry_path.display())]
    UnsafeEntry { entry_path: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::{read_to_string, write};

    fn populate(work_dir: &Path) -> anyhow::Result<()> {
        create_dir_all(work_dir.join("src/nested"))?;
        write(work_dir.join("README.md"), "read me")?;
        write(work_dir.join("src/main.rs"), "fn main() {}")?;
        write(work_dir.join("src/nested/clean.sh"), "nested, not protected")?;
        for script in crate::checkpoint::PROTECTED_SCRIPTS {
            write(work_dir.join(script), format!("#!/bin/sh\n# {script}"))?;
        }
        Ok(())
    }

    #[test]
    fn archive_is_rooted_at_directory_name() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let work_dir = tmp.path().join("widget");
        populate(&work_dir)?;

        let dest = tmp.path().join("1.0_init.tar.gz");
        let count = write_archive(&work_dir, &dest, &ProtectedSet::new())?;

        let mut result = list_archive(&dest)?
            .into_iter()
            .map(|path| path.to_string_lossy().trim_end_matches('/').to_string())
            .collect::<Vec<_>>();
        result.sort();
        let expect = vec![
            "widget",
            "widget/README.md",
            "widget/src",
            "widget/src/main.rs",
            "widget/src/nested",
            "widget/src/nested/clean.sh",
        ];
        assert_eq!(result, expect);
        assert_eq!(count, expect.len());

        Ok(())
    }

    #[test]
    fn archive_never_overwrites() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let work_dir = tmp.path().join("widget");
        populate(&work_dir)?;

        let dest = tmp.path().join("1.0_init.tar.gz");
        write(&dest, "precious")?;
        let result = write_archive(&work_dir, &dest, &ProtectedSet::new());
        assert!(matches!(result, Err(ArchiveError::Create { .. })));
        assert_eq!(read_to_string(&dest)?, "precious");

        Ok(())
    }

    #[test]
    fn archive_skips_store_inside_working_directory() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let work_dir = tmp.path().join("widget");
        populate(&work_dir)?;
        create_dir_all(work_dir.join(".chkpt"))?;

        let dest = work_dir.join(".chkpt/1.0_init.tar.gz");
        write_archive(&work_dir, &dest, &ProtectedSet::new().with_path(".chkpt"))?;

        let result = list_archive(&dest)?;
        assert!(result.iter().all(|path| !path.starts_with("widget/.chkpt")));

        Ok(())
    }

    #[test]
    fn extract_strips_top_level_and_skips_protected() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let work_dir = tmp.path().join("widget");
        populate(&work_dir)?;
        let dest = tmp.path().join("1.0_init.tar.gz");
        write_archive(&work_dir, &dest, &ProtectedSet::new())?;

        let target = tmp.path().join("elsewhere");
        create_dir_all(&target)?;
        write(target.join("restore.sh"), "keep me")?;
        write(target.join("README.md"), "stale")?;
        extract_archive(&dest, &target, &ProtectedSet::new())?;

        assert_eq!(read_to_string(target.join("README.md"))?, "read me");
        assert_eq!(read_to_string(target.join("src/main.rs"))?, "fn main() {}");
        assert_eq!(
            read_to_string(target.join("src/nested/clean.sh"))?,
            "nested, not protected"
        );
        assert_eq!(read_to_string(target.join("restore.sh"))?, "keep me");
        assert!(!target.join("checkpoint.sh").exists());
        assert!(!target.join("widget").exists());

        Ok(())
    }

    #[test]
    fn extract_into_read_only_directory() -> anyhow::Result<()> {
        use std::{
            fs::{set_permissions, Permissions},
            os::unix::fs::PermissionsExt,
        };

        let tmp = tempfile::tempdir()?;
        let work_dir = tmp.path().join("widget");
        create_dir_all(work_dir.join("ro/inner"))?;
        write(work_dir.join("ro/inner/file.txt"), "locked in")?;
        set_permissions(work_dir.join("ro/inner"), Permissions::from_mode(0o555))?;
        set_permissions(work_dir.join("ro"), Permissions::from_mode(0o555))?;
        let dest = tmp.path().join("1.0_init.tar.gz");
        write_archive(&work_dir, &dest, &ProtectedSet::new())?;

        let target = tmp.path().join("elsewhere");
        create_dir_all(&target)?;
        let result = extract_archive(&dest, &target, &ProtectedSet::new());

        let modes = [target.join("ro"), target.join("ro/inner")]
            .iter()
            .map(|dir| dir.metadata().map(|meta| meta.permissions().mode() & 0o777))
            .collect::<std::io::Result<Vec<_>>>();
        for dir in [&work_dir, &target] {
            for sub in ["ro", "ro/inner"] {
                let _ = set_permissions(dir.join(sub), Permissions::from_mode(0o755));
            }
        }

        assert_eq!(result?, 3);
        assert_eq!(read_to_string(target.join("ro/inner/file.txt"))?, "locked in");
        assert_eq!(modes?, vec![0o555, 0o555]);
        Ok(())
    }

    #[test]
    fn reject_entries_escaping_directory() {
        let result = strip_top_level(Path::new("widget/../../etc/passwd"));
        assert!(matches!(result, Err(ArchiveError::UnsafeEntry { .. })));

        let result = strip_top_level(Path::new("/etc/passwd"));
        assert!(matches!(result, Err(ArchiveError::UnsafeEntry { .. })));
    }

    #[test]
    fn strip_top_level_component() -> anyhow::Result<()> {
        assert_eq!(strip_top_level(Path::new("widget"))?, None);
        assert_eq!(strip_top_level(Path::new("./widget/"))?, None);
        assert_eq!(
            strip_top_level(Path::new("widget/src/main.rs"))?,
            Some(PathBuf::from("src/main.rs"))
        );
        Ok(())
    }
}
