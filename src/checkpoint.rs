// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Checkpoint creation and restoration.
//!
//! A __checkpoint__ is a versioned, gzip-compressed tarball of an entire
//! working directory. Checkpoints are kept in a per-project checkpoint store
//! (see [`crate::store`]), and carry their version and a short message in
//! their file names.
//!
//! # Protected Scripts
//!
//! Some tooling scripts live at the top-level of a working directory, and
//! must survive any in-place restoration: "checkpoint.sh", "restore.sh", and
//! "clean.sh". These are never archived, never removed when the working
//! directory is cleared, and never replaced during extraction.
//!
//! # Restoration
//!
//! Restoring a checkpoint always archives the current state of the working
//! directory first under a backup version marked with "b". Thus, every
//! restoration can itself be undone by restoring that backup.

pub mod archive;
pub mod name;
pub mod restore;
pub mod version;

use crate::{
    checkpoint::{
        archive::write_archive,
        name::ArchiveName,
        version::VersionTag,
    },
    workspace::Workspace,
};

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::metadata,
    path::{Component, Path, PathBuf},
    time::Duration,
};
use tracing::{info, instrument};

/// Tooling scripts that are never archived, cleared, or replaced.
pub const PROTECTED_SCRIPTS: [&str; 3] = ["checkpoint.sh", "restore.sh", "clean.sh"];

/// Set of entries in a working directory to leave alone.
///
/// Always includes [`PROTECTED_SCRIPTS`] at the top-level of the working
/// directory. Additional relative paths can be registered, e.g., a checkpoint
/// store that lives inside of the working directory it snapshots.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProtectedSet {
    extra: Vec<PathBuf>,
}

impl ProtectedSet {
    /// Construct new protected set of just the protected scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also protect a path relative to the working directory.
    pub fn with_path(mut self, relative: impl Into<PathBuf>) -> Self {
        self.extra.push(relative.into());
        self
    }

    /// Check if path relative to the working directory is protected.
    pub fn is_protected(&self, relative: impl AsRef<Path>) -> bool {
        let relative = relative.as_ref();
        let mut components = relative.components();
        if let (Some(Component::Normal(first)), None) = (components.next(), components.next()) {
            if PROTECTED_SCRIPTS.iter().any(|script| first == *script) {
                return true;
            }
        }

        self.extra.iter().any(|path| relative.starts_with(path))
    }
}

/// Newly written checkpoint archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    /// Path to new archive.
    pub path: PathBuf,

    /// Version tag the archive was written under.
    pub tag: VersionTag,

    /// Size of new archive in bytes.
    pub size: u64,

    /// Size of entire checkpoint store in bytes, new archive included.
    pub store_size: u64,
}

impl Display for Created {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "checkpoint {} saved to {}", self.tag, self.path.display())?;
        writeln!(fmt, "  archive size: {}", HumanBytes(self.size))?;
        write!(fmt, "  store size:   {}", HumanBytes(self.store_size))
    }
}

/// Create a new checkpoint of the working directory.
///
/// Allocates the next version of the checkpoint store, and archives the
/// working directory under it with the sanitized message.
///
/// # Errors
///
/// - Return [`CheckpointError::Store`] if store cannot be read or created.
/// - Return [`CheckpointError::Archive`] if archive cannot be written.
pub fn create(workspace: &Workspace, message: impl AsRef<str>) -> Result<Created> {
    let version = workspace.store().next_version()?;
    snapshot(workspace, VersionTag::regular(version), message)
}

/// Archive working directory under a specific version tag.
///
/// # Errors
///
/// - Return [`CheckpointError::Store`] if store cannot be created.
/// - Return [`CheckpointError::Archive`] if archive cannot be written.
#[instrument(skip(workspace, message), level = "debug")]
pub(crate) fn snapshot(
    workspace: &Workspace,
    tag: VersionTag,
    message: impl AsRef<str>,
) -> Result<Created> {
    let store = workspace.store();
    store.ensure()?;

    let name = ArchiveName::new(tag, message);
    let path = store.vacant_path(&name);
    info!("archive {:?} to {:?}", workspace.work_dir().display(), path.display());

    let bar = spinner(format!("archiving {}", workspace.project_name()));
    let result = write_archive(workspace.work_dir(), &path, &workspace.protected());
    bar.finish_and_clear();
    let count = result?;

    let size = metadata(&path)
        .map(|metadata| metadata.len())
        .unwrap_or_default();
    info!("archived {count} entries");

    Ok(Created {
        path,
        tag,
        size,
        store_size: store.total_size(),
    })
}

pub(crate) fn spinner(message: impl Into<String>) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {elapsed:.dim} {msg}") {
        bar.set_style(style.tick_chars("-\\|/ "));
    }
    bar.set_message(message.into());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Checkpoint error types.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Checkpoint store interaction fails.
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    /// Archive creation or extraction fails.
    #[error(transparent)]
    Archive(#[from] crate::checkpoint::archive::ArchiveError),

    /// Version tag is malformed.
    #[error(transparent)]
    Version(#[from] crate::checkpoint::version::VersionError),

    /// Working directory cannot be cleared.
    #[error("failed to clear {:?}", path.display())]
    Clear {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = CheckpointError> = std::result::Result<T, E>;
