// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for the project-local configuration file that chkpt
//! reads from the top-level of a working directory, i.e., "chkpt.toml". File
//! I/O is limited to [`ProjectConfig::load`]; everything else is plain
//! serialization and deserialization.
//!
//! # General Layout
//!
//! Every section is optional. A working directory without a configuration
//! file behaves as if an empty one was present, with the exception of
//! deployment, which requires a target to be defined.
//!
//! ```toml
//! [checkpoint]
//! store = "$HOME/checkpoints/widget"
//!
//! [deploy]
//! target = "deploy@example.org:/srv/widget"
//! backup_dir = "/srv/backups/widget"
//! scripts_source = "/opt/devtools"
//!
//! [session]
//! name = "widget"
//! port = 7681
//!
//! [watch]
//! exclude = ["target/**", "*.log"]
//! ```

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Name of configuration file expected at the top-level of a working
/// directory.
pub const CONFIG_FILE_NAME: &str = "chkpt.toml";

/// Project configuration layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ProjectConfig {
    /// Checkpoint store settings.
    #[serde(default)]
    pub checkpoint: CheckpointSettings,

    /// Deployment settings.
    #[serde(default)]
    pub deploy: DeploySettings,

    /// Terminal session settings.
    #[serde(default)]
    pub session: SessionSettings,

    /// File watcher settings.
    #[serde(default)]
    pub watch: WatchSettings,
}

impl ProjectConfig {
    /// Load configuration file from top-level of working directory.
    ///
    /// Returns `None` if no configuration file exists.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if configuration file exists, but
    ///   cannot be read.
    /// - Return [`ConfigError::Deserialize`] if configuration is malformed.
    /// - Return [`ConfigError::ShellExpansion`] if a path field references an
    ///   undefined variable.
    pub fn load(work_dir: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = work_dir.as_ref().join(CONFIG_FILE_NAME);
        match read_to_string(&path) {
            Ok(data) => Ok(Some(data.parse()?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ConfigError::Read { source: err, path }),
        }
    }
}

impl FromStr for ProjectConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: ProjectConfig = toml::de::from_str(data)?;

        // INVARIANT: Perform shell expansion on local path fields only.
        //   - Deployment paths live on the target host, and are left alone.
        if let Some(store) = config.checkpoint.store.take() {
            let expanded = shellexpand::full(store.to_string_lossy().as_ref())?.into_owned();
            config.checkpoint.store = Some(PathBuf::from(expanded));
        }

        Ok(config)
    }
}

impl Display for ProjectConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Checkpoint store settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct CheckpointSettings {
    /// Directory to keep checkpoint archives in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<PathBuf>,
}

/// Deployment settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct DeploySettings {
    /// Deployment target as `user@host:path`, `host:path`, or a local path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Directory on target host to keep backups of the deployment in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<String>,

    /// Directory on target host to fetch fresh tooling scripts from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scripts_source: Option<String>,
}

/// Terminal session settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SessionSettings {
    /// Name of tmux session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Port ttyd listens on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// File watcher settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct WatchSettings {
    /// Glob patterns of paths to leave out of the watch listing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration file {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Configuration file is required, but does not exist.
    #[error("configuration file {:?} does not exist", path.display())]
    MissingFile { path: PathBuf },

    /// Deployment target is not defined.
    #[error("no deployment target defined in {:?}, set [deploy] target", path.display())]
    MissingDeployTarget { path: PathBuf },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;
