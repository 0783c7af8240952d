// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Checkpoint store management.
//!
//! Chkpt groups the checkpoints of a project into one place called the
//! __checkpoint store__. The checkpoint store is a plain directory whose
//! top-level contains checkpoint archives.
//!
//! # Checkpoint Store Layout
//!
//! The checkpoint store can generally be placed anywhere on the user's file
//! system. However, the default location is
//! `$XDG_DATA_HOME/chkpt-store/<project>`. Only the top-level of the store is
//! ever evaluated. Entries that do not follow archive naming are tolerated,
//! listed as-is, and ignored for version allocation.
//!
//! Nothing beyond the archives themselves is persisted. The next version is
//! recomputed from the archive names on every run.

use crate::checkpoint::{
    name::{ArchiveName, ARCHIVE_EXTENSION},
    version::{next_version, Version, VersionTag},
};

use chrono::{DateTime, Local};
use indicatif::HumanBytes;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{metadata, read_dir, symlink_metadata},
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::{debug, instrument};
use walkdir::WalkDir;

/// Checkpoint store of a single project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointStore {
    store_path: PathBuf,
}

impl CheckpointStore {
    /// Open checkpoint store at target path.
    ///
    /// Does not touch the file system. A store that does not exist yet is
    /// treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: path.into(),
        }
    }

    /// Path to checkpoint store.
    pub fn path(&self) -> &Path {
        self.store_path.as_path()
    }

    /// Check if checkpoint store directory exists.
    pub fn exists(&self) -> bool {
        self.store_path.is_dir()
    }

    /// Create checkpoint store directory if missing.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Create`] if directory cannot be created.
    pub fn ensure(&self) -> Result<()> {
        mkdirp::mkdirp(&self.store_path).map_err(|err| StoreError::Create {
            source: err,
            store_path: self.store_path.clone(),
        })?;

        Ok(())
    }

    /// List names of all immediate children of the store.
    ///
    /// Yields nothing if the store does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if store exists, but cannot be read.
    pub fn entry_names(&self) -> Result<Vec<String>> {
        let entries = match read_dir(&self.store_path) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(self.read_error(err)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| self.read_error(err))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }

        Ok(names)
    }

    /// Determine next version to allocate.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if store exists, but cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn next_version(&self) -> Result<Version> {
        let version = next_version(self.entry_names()?);
        debug!("next version of {:?} is {version}", self.store_path.display());
        Ok(version)
    }

    /// List all archives in the store.
    ///
    /// Archives are ordered by version, with backups following the regular
    /// version they share a number with. Archives that do not follow archive
    /// naming are listed last by file name.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if store exists, but cannot be read.
    pub fn archives(&self) -> Result<Vec<ArchiveEntry>> {
        let mut archives = Vec::new();
        for file_name in self.entry_names()? {
            if !file_name.ends_with(ARCHIVE_EXTENSION) {
                continue;
            }

            // INVARIANT: Symbolic links count if they lead to a regular file.
            let path = self.store_path.join(&file_name);
            let metadata = match metadata(&path) {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(self.read_error(err)),
            };

            archives.push(ArchiveEntry {
                name: ArchiveName::parse(&file_name),
                modified: metadata.modified().map_err(|err| self.read_error(err))?,
                size: metadata.len(),
                file_name,
                path,
            });
        }

        archives.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(archives)
    }

    /// Resolve version tag to a single archive.
    ///
    /// Among the archives whose file name starts with `<tag>_`, the most
    /// recently modified one wins. Equal modification times are broken by
    /// file name, the greatest wins.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if store cannot be read.
    /// - Return [`StoreError::NoMatch`] if no archive carries the tag.
    pub fn resolve(&self, tag: VersionTag) -> Result<ArchiveEntry> {
        let prefix = format!("{tag}_");
        self.archives()?
            .into_iter()
            .filter(|archive| archive.file_name.starts_with(&prefix))
            .max_by(|a, b| {
                a.modified
                    .cmp(&b.modified)
                    .then_with(|| a.file_name.cmp(&b.file_name))
            })
            .ok_or_else(|| StoreError::NoMatch {
                tag: tag.to_string(),
                store_path: self.store_path.clone(),
            })
    }

    /// Determine a path for a new archive that does not clobber anything.
    ///
    /// Appends `_1`, `_2`, and so on to the message until the name is free.
    pub fn vacant_path(&self, name: &ArchiveName) -> PathBuf {
        let mut candidate = self.store_path.join(name.to_string());
        let mut n = 0;
        while symlink_metadata(&candidate).is_ok() {
            n += 1;
            candidate = self.store_path.join(name.with_collision(n).to_string());
        }

        candidate
    }

    /// Total size of everything in the store in bytes.
    pub fn total_size(&self) -> u64 {
        WalkDir::new(&self.store_path)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.metadata().ok())
            .filter(|metadata| metadata.is_file())
            .map(|metadata| metadata.len())
            .sum()
    }

    fn read_error(&self, err: std::io::Error) -> StoreError {
        StoreError::Read {
            source: err,
            store_path: self.store_path.clone(),
        }
    }
}

/// Single archive sitting in a checkpoint store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Absolute path to archive.
    pub path: PathBuf,

    /// File name of archive.
    pub file_name: String,

    /// Structured archive name, if file name follows archive naming.
    pub name: Option<ArchiveName>,

    /// Last modification time.
    pub modified: SystemTime,

    /// Size in bytes.
    pub size: u64,
}

impl ArchiveEntry {
    /// Version label to display for archive.
    ///
    /// Falls back to the file name for archives that do not follow archive
    /// naming.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.tag().to_string(),
            None => self.file_name.clone(),
        }
    }

    fn sort_key(&self) -> (bool, u64, bool, &str) {
        match &self.name {
            Some(name) => (
                false,
                name.tag().version.encode(),
                name.tag().backup,
                self.file_name.as_str(),
            ),
            None => (true, 0, false, self.file_name.as_str()),
        }
    }
}

/// Table of archives for display, one archive per line.
///
/// Shows version label, message, size, and local modification time of each
/// archive.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveTable<'archives>(pub &'archives [ArchiveEntry]);

impl Display for ArchiveTable<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "{:<8}  {:<32}  {:>10}  modified", "version", "message", "size")?;
        for archive in self.0 {
            let message = archive
                .name
                .as_ref()
                .map(|name| name.message())
                .unwrap_or_default();
            let modified = DateTime::<Local>::from(archive.modified).format("%Y-%m-%d %H:%M:%S");
            writeln!(
                fmt,
                "{:<8}  {:<32}  {:>10}  {modified}",
                archive.label(),
                message,
                HumanBytes(archive.size).to_string()
            )?;
        }

        Ok(())
    }
}

/// All possible error types for checkpoint store interaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Checkpoint store directory cannot be created.
    #[error("failed to create checkpoint store at {:?}", store_path.display())]
    Create {
        #[source]
        source: std::io::Error,
        store_path: PathBuf,
    },

    /// Checkpoint store directory cannot be read.
    #[error("failed to read checkpoint store at {:?}", store_path.display())]
    Read {
        #[source]
        source: std::io::Error,
        store_path: PathBuf,
    },

    /// No archive carries requested version.
    #[error("no checkpoint with version {tag} in {:?}", store_path.display())]
    NoMatch { tag: String, store_path: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
