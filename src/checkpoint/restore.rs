// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Checkpoint restoration.
//!
//! Restoration replaces the contents of the working directory with the
//! contents of a checkpoint. It happens in four steps:
//!
//! 1. Stop the compose stack of the working directory, if any. Failure is
//!    only worth a warning.
//! 2. Archive the current state under the next version marked with "b".
//! 3. Remove everything from the working directory except for protected
//!    entries.
//! 4. Extract the selected checkpoint over the working directory, skipping
//!    protected entries.

use crate::{
    checkpoint::{
        archive::extract_archive, snapshot, spinner, version::VersionTag, CheckpointError,
        Created, ProtectedSet, Result,
    },
    compose::ComposeStack,
    store::ArchiveEntry,
    workspace::Workspace,
};

use std::{
    fs::{read_dir, remove_dir_all, remove_file},
    path::Path,
};
use tracing::{debug, info, instrument, warn};

/// Message of backup archives when the user gives none.
pub const DEFAULT_BACKUP_MESSAGE: &str = "pre_restore";

/// Outcome of a restoration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
    /// Archive that was restored.
    pub archive: ArchiveEntry,

    /// Backup archive of the state before restoration.
    pub backup: Created,

    /// Number of entries extracted.
    pub extracted: usize,
}

/// Restore checkpoint matching a version tag.
///
/// The backup message defaults to [`DEFAULT_BACKUP_MESSAGE`]. See module
/// documentation for the individual steps.
///
/// # Errors
///
/// - Return [`CheckpointError::Store`] if no archive matches the tag.
/// - Return [`CheckpointError::Archive`] if backup or extraction fails.
/// - Return [`CheckpointError::Clear`] if working directory cannot be
///   cleared.
#[instrument(skip(workspace, backup_message), level = "debug")]
pub fn restore(
    workspace: &Workspace,
    tag: VersionTag,
    backup_message: Option<&str>,
) -> Result<Restored> {
    // INVARIANT: Resolve before touching anything, so a bad tag has no side effects.
    let archive = workspace.store().resolve(tag)?;
    info!("restore {} from {:?}", tag, archive.path.display());

    if let Some(stack) = ComposeStack::detect(workspace.work_dir()) {
        if let Err(error) = stack.stop() {
            warn!("cannot stop compose stack, restoring anyway: {error}");
        }
    }

    let version = workspace.store().next_version()?;
    let message = backup_message
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .unwrap_or(DEFAULT_BACKUP_MESSAGE);
    let backup = snapshot(workspace, VersionTag::backup(version), message)?;
    info!("backed up current state to {:?}", backup.path.display());

    let protected = workspace.protected();
    let removed = clear_directory(workspace.work_dir(), &protected)?;
    debug!("cleared {removed} entries");

    let bar = spinner(format!("extracting {}", archive.file_name));
    let result = extract_archive(&archive.path, workspace.work_dir(), &protected);
    bar.finish_and_clear();
    let extracted = result?;

    Ok(Restored {
        archive,
        backup,
        extracted,
    })
}

/// Remove every top-level entry of a directory that is not protected.
///
/// Directories are removed recursively. Symbolic links are removed, never
/// followed. Returns number of top-level entries removed.
///
/// # Errors
///
/// - Return [`CheckpointError::Clear`] if an entry cannot be removed.
pub fn clear_directory(dir: impl AsRef<Path>, protected: &ProtectedSet) -> Result<usize> {
    let dir = dir.as_ref();
    let clear_error = |err: std::io::Error| CheckpointError::Clear {
        source: err,
        path: dir.to_path_buf(),
    };

    let mut removed = 0;
    for entry in read_dir(dir).map_err(clear_error)? {
        let entry = entry.map_err(clear_error)?;
        let name = entry.file_name();
        if protected.is_protected(&name) {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type().map_err(clear_error)?;
        let result = if file_type.is_dir() {
            remove_dir_all(&path)
        } else {
            remove_file(&path)
        };
        result.map_err(|err| CheckpointError::Clear {
            source: err,
            path: path.clone(),
        })?;
        removed += 1;
    }

    Ok(removed)
}
