// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Docker Compose stack handling.
//!
//! Projects that come with a compose file get their stack stopped before a
//! checkpoint is restored, and restarted after a deployment. Chkpt does not
//! look inside of the compose file. It only figures out whether one exists,
//! and drives `docker compose` accordingly.
//!
//! The docker binary can be swapped out through the `CHKPT_DOCKER`
//! environment variable, e.g., to point at podman.

use crate::syscall::{syscall_interactive, SyscallError};

use std::{
    env,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// Compose file names, in order of preference.
pub const COMPOSE_FILES: [&str; 4] = [
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Environment variable to override docker binary with.
pub const DOCKER_ENV: &str = "CHKPT_DOCKER";

/// Options for cleaning a compose stack.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanOptions {
    /// Remove named volumes declared by the stack.
    pub volumes: bool,

    /// Prune dangling images once the stack is down.
    pub prune_images: bool,
}

/// Compose stack of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeStack {
    dir: PathBuf,
    file: PathBuf,
    program: String,
}

impl ComposeStack {
    /// Detect compose stack in target directory.
    ///
    /// Returns `None` if directory has no compose file.
    pub fn detect(dir: impl AsRef<Path>) -> Option<Self> {
        let dir = dir.as_ref();
        COMPOSE_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
            .map(|file| Self {
                dir: dir.to_path_buf(),
                file,
                program: env::var(DOCKER_ENV).unwrap_or_else(|_| "docker".into()),
            })
    }

    /// Path to detected compose file.
    pub fn file(&self) -> &Path {
        self.file.as_path()
    }

    /// Stop stack, removing its containers.
    ///
    /// # Errors
    ///
    /// - Return [`SyscallError`] if docker fails.
    #[instrument(skip(self), level = "debug")]
    pub fn stop(&self) -> Result<()> {
        info!("stop compose stack in {:?}", self.dir.display());
        self.compose(&["down", "--remove-orphans"])
    }

    /// Start stack in the background, rebuilding images as needed.
    ///
    /// # Errors
    ///
    /// - Return [`SyscallError`] if docker fails.
    #[instrument(skip(self), level = "debug")]
    pub fn start(&self) -> Result<()> {
        info!("start compose stack in {:?}", self.dir.display());
        self.compose(&["up", "-d", "--build"])
    }

    /// Stop and start stack.
    ///
    /// # Errors
    ///
    /// - Return [`SyscallError`] if docker fails.
    pub fn restart(&self) -> Result<()> {
        self.stop()?;
        self.start()
    }

    /// Tear stack down, optionally dropping volumes and images, and bring it
    /// back up.
    ///
    /// # Errors
    ///
    /// - Return [`SyscallError`] if docker fails.
    #[instrument(skip(self), level = "debug")]
    pub fn clean(&self, options: CleanOptions) -> Result<()> {
        info!("clean compose stack in {:?}", self.dir.display());
        self.compose(&self.down_args(options))?;

        if options.prune_images {
            syscall_interactive(&self.program, ["image", "prune", "-f"], Some(&self.dir))?;
        }

        self.start()
    }

    fn down_args(&self, options: CleanOptions) -> Vec<&'static str> {
        let mut args = vec!["down", "--remove-orphans"];
        if options.volumes {
            args.push("--volumes");
        }
        args
    }

    fn compose_args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = vec!["compose", "-f"];
        full.push(self.file.to_str().unwrap_or_default());
        full.extend_from_slice(args);
        full
    }

    fn compose(&self, args: &[&str]) -> Result<()> {
        if self.file.to_str().is_none() {
            return Err(SyscallError::Spawn {
                source: std::io::Error::other("compose file path is not valid UTF-8"),
                command: format!("{} compose", self.program),
            });
        }

        syscall_interactive(&self.program, self.compose_args(args), Some(&self.dir))
    }
}

/// Friendly result alias :3
pub type Result<T, E = SyscallError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::write;

    #[test]
    fn no_compose_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(ComposeStack::detect(dir.path()), None);
        Ok(())
    }

    #[test]
    fn prefer_modern_compose_file_name() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path().join("docker-compose.yml"), "services: {}")?;
        write(dir.path().join("compose.yaml"), "services: {}")?;

        let stack = ComposeStack::detect(dir.path()).unwrap();
        assert_eq!(stack.file(), dir.path().join("compose.yaml"));
        Ok(())
    }

    #[test]
    fn build_compose_arguments() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path().join("compose.yml"), "services: {}")?;
        let stack = ComposeStack::detect(dir.path()).unwrap();
        let file = dir.path().join("compose.yml");

        let down = stack.down_args(CleanOptions {
            volumes: true,
            prune_images: false,
        });
        let result = stack.compose_args(&down);
        let expect = vec![
            "compose",
            "-f",
            file.to_str().unwrap(),
            "down",
            "--remove-orphans",
            "--volumes",
        ];
        assert_eq!(result, expect);
        Ok(())
    }

    #[sealed_test(env = [("CHKPT_DOCKER", "false")])]
    fn failed_docker_reports_exit_code() -> anyhow::Result<()> {
        write("compose.yaml", "services: {}")?;
        let stack = ComposeStack::detect(".").unwrap();
        let result = stack.stop();
        assert!(matches!(result, Err(ref err) if err.exit_code() == Some(1)));
        Ok(())
    }

    #[sealed_test(env = [("CHKPT_DOCKER", "true")])]
    fn restart_runs_through() -> anyhow::Result<()> {
        write("compose.yaml", "services: {}")?;
        let stack = ComposeStack::detect(".").unwrap();
        stack.restart()?;
        stack.clean(CleanOptions {
            volumes: true,
            prune_images: true,
        })?;
        Ok(())
    }
}
