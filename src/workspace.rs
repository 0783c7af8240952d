// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Workspace of a single invocation.
//!
//! Every operation chkpt offers works on a __workspace__: the working
//! directory being checkpointed, the checkpoint store its archives live in,
//! and the project configuration found at the top-level of the working
//! directory. The workspace is resolved once up front, and handed to each
//! operation explicitly.

use crate::{
    checkpoint::ProtectedSet,
    config::{ConfigError, DeploySettings, ProjectConfig, CONFIG_FILE_NAME},
    path::{default_checkpoint_store_dir, dir_name},
    store::CheckpointStore,
};

use std::path::{absolute, Component, Path, PathBuf};
use tracing::{debug, instrument};

/// Resolved workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    work_dir: PathBuf,
    store: CheckpointStore,
    config: ProjectConfig,
    config_found: bool,
}

impl Workspace {
    /// Open workspace at target working directory.
    ///
    /// Loads project configuration if present. The checkpoint store is
    /// determined in the following order: the override given by the caller,
    /// the store of the project configuration (relative to the working
    /// directory), and finally the default store location.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::MissingWorkDir`] if working directory does
    ///   not exist.
    /// - Return [`WorkspaceError::Config`] if project configuration is
    ///   malformed.
    /// - Return [`WorkspaceError::NoWayHome`] if default store location
    ///   cannot be determined.
    #[instrument(skip(work_dir, store_override), level = "debug")]
    pub fn open(work_dir: impl AsRef<Path>, store_override: Option<PathBuf>) -> Result<Self> {
        let work_dir = work_dir
            .as_ref()
            .canonicalize()
            .ok()
            .filter(|path| path.is_dir())
            .ok_or_else(|| WorkspaceError::MissingWorkDir {
                work_dir: work_dir.as_ref().to_path_buf(),
            })?;

        let (config, config_found) = match ProjectConfig::load(&work_dir)? {
            Some(config) => (config, true),
            None => (ProjectConfig::default(), false),
        };

        let store_path = match (store_override, &config.checkpoint.store) {
            (Some(path), _) => normalize(&path),
            (None, Some(path)) => normalize(work_dir.join(path)),
            (None, None) => normalize(default_checkpoint_store_dir(&work_dir)?),
        };

        // INVARIANT: Clearing the working directory must never reach the store's contents.
        if work_dir.starts_with(&store_path) {
            return Err(WorkspaceError::StoreContainsWorkDir {
                store: store_path,
                work_dir,
            });
        }
        debug!(
            "workspace {:?} uses store {:?}",
            work_dir.display(),
            store_path.display()
        );

        Ok(Self {
            work_dir,
            store: CheckpointStore::open(store_path),
            config,
            config_found,
        })
    }

    /// Construct workspace from parts without touching the file system.
    pub fn new(
        work_dir: impl Into<PathBuf>,
        store_path: impl Into<PathBuf>,
        config: Option<ProjectConfig>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            store: CheckpointStore::open(store_path),
            config_found: config.is_some(),
            config: config.unwrap_or_default(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir.as_path()
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Path to project configuration file, whether it exists or not.
    pub fn config_path(&self) -> PathBuf {
        self.work_dir.join(CONFIG_FILE_NAME)
    }

    /// Name of project, i.e., base name of working directory.
    pub fn project_name(&self) -> String {
        dir_name(&self.work_dir)
    }

    /// Entries of the working directory that must be left alone.
    ///
    /// Always the protected scripts. Also the checkpoint store itself if it
    /// lives inside of the working directory.
    pub fn protected(&self) -> ProtectedSet {
        let protected = ProtectedSet::new();
        match self.store.path().strip_prefix(&self.work_dir) {
            Ok(relative) if !relative.as_os_str().is_empty() => protected.with_path(relative),
            _ => protected,
        }
    }

    /// Deployment settings with a defined target.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::MissingFile`] if there is no project
    ///   configuration file.
    /// - Return [`ConfigError::MissingDeployTarget`] if no deployment target
    ///   is defined.
    pub fn deploy_settings(&self) -> Result<&DeploySettings, ConfigError> {
        if !self.config_found {
            return Err(ConfigError::MissingFile {
                path: self.config_path(),
            });
        }

        match &self.config.deploy.target {
            Some(target) if !target.trim().is_empty() => Ok(&self.config.deploy),
            _ => Err(ConfigError::MissingDeployTarget {
                path: self.config_path(),
            }),
        }
    }
}

/// Absolute form of a path with symlinks and dot components resolved.
///
/// The longest existing prefix is canonicalized. The remainder, which does
/// not exist yet, is resolved lexically.
fn normalize(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let path = absolute(path).unwrap_or_else(|_| path.to_path_buf());

    let existing = path
        .ancestors()
        .find_map(|ancestor| Some((ancestor, ancestor.canonicalize().ok()?)));
    let Some((base, canonical)) = existing else {
        return path;
    };

    let rest = path.strip_prefix(base).unwrap_or(Path::new(""));
    rest.components().fold(canonical, |mut normal, component| {
        match component {
            Component::ParentDir => {
                normal.pop();
            }
            Component::Normal(name) => normal.push(name),
            _ => {}
        }
        normal
    })
}

/// Workspace error types.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// Working directory does not exist.
    #[error("working directory {:?} does not exist", work_dir.display())]
    MissingWorkDir { work_dir: PathBuf },

    /// Checkpoint store would contain the working directory.
    #[error(
        "checkpoint store {:?} cannot be the working directory {:?} or one of its parents",
        store.display(),
        work_dir.display()
    )]
    StoreContainsWorkDir { store: PathBuf, work_dir: PathBuf },

    /// Project configuration cannot be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Default store location cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] crate::path::NoWayHome),
}

/// Friendly result alias :3
pub type Result<T, E = WorkspaceError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::{create_dir_all, write};

    #[test]
    fn missing_working_directory() {
        let result = Workspace::open("/definitely/not/here", None);
        assert!(matches!(result, Err(WorkspaceError::MissingWorkDir { .. })));
    }

    #[test]
    fn store_from_project_config_is_relative_to_working_directory() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let work_dir = tmp.path().join("widget");
        create_dir_all(&work_dir)?;
        write(work_dir.join(CONFIG_FILE_NAME), "[checkpoint]\nstore = \".chkpt\"\n")?;

        let workspace = Workspace::open(&work_dir, None)?;
        let work_dir = work_dir.canonicalize()?;
        assert_eq!(workspace.store().path(), work_dir.join(".chkpt"));
        assert!(workspace.protected().is_protected(".chkpt/1.0_x.tar.gz"));
        assert_eq!(workspace.project_name(), "widget");
        Ok(())
    }

    #[test]
    fn store_override_wins() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        write(tmp.path().join(CONFIG_FILE_NAME), "[checkpoint]\nstore = \".chkpt\"\n")?;

        let workspace = Workspace::open(tmp.path(), Some(PathBuf::from("/srv/checkpoints")))?;
        assert_eq!(workspace.store().path(), Path::new("/srv/checkpoints"));
        assert_eq!(workspace.protected(), ProtectedSet::new());
        Ok(())
    }

    #[test]
    fn protect_store_spelled_through_parent_or_symlink() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let work_dir = tmp.path().join("widget");
        create_dir_all(work_dir.join("src"))?;
        std::os::unix::fs::symlink(&work_dir, tmp.path().join("alias"))?;
        let expect = work_dir.canonicalize()?.join(".chkpt");

        for store in [work_dir.join("src/../.chkpt"), tmp.path().join("alias/.chkpt")] {
            let workspace = Workspace::open(&work_dir, Some(store))?;
            assert_eq!(workspace.store().path(), expect);
            assert!(workspace.protected().is_protected(".chkpt/1.0_x.tar.gz"));
        }
        Ok(())
    }

    #[test]
    fn refuse_store_containing_working_directory() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let work_dir = tmp.path().join("widget");
        create_dir_all(work_dir.join("src"))?;

        for store in [work_dir.join("src/.."), tmp.path().to_path_buf(), PathBuf::from("/")] {
            let result = Workspace::open(&work_dir, Some(store));
            assert!(matches!(result, Err(WorkspaceError::StoreContainsWorkDir { .. })));
        }
        Ok(())
    }

    #[sealed_test(env = [("XDG_DATA_HOME", "/tmp/xdg-data")])]
    fn default_store_location() -> anyhow::Result<()> {
        create_dir_all("gadget")?;
        let workspace = Workspace::open("gadget", None)?;
        assert_eq!(
            workspace.store().path(),
            Path::new("/tmp/xdg-data/chkpt-store/gadget")
        );
        Ok(())
    }

    #[test]
    fn deploy_settings_require_configuration() {
        let workspace = Workspace::new("/srv/widget", "/srv/store", None);
        assert!(matches!(
            workspace.deploy_settings(),
            Err(ConfigError::MissingFile { .. })
        ));

        let workspace = Workspace::new("/srv/widget", "/srv/store", Some(ProjectConfig::default()));
        assert!(matches!(
            workspace.deploy_settings(),
            Err(ConfigError::MissingDeployTarget { .. })
        ));

        let mut config = ProjectConfig::default();
        config.deploy.target = Some("deploy@example.org:/srv/widget".into());
        let workspace = Workspace::new("/srv/widget", "/srv/store", Some(config));
        assert!(workspace.deploy_settings().is_ok());
    }
}
