// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Ship a working directory.
//!
//! Shipping does two independent things at once: push the current branch of
//! the git repository of the working directory to "origin", and restart its
//! compose stack. Both run as tasks on the blocking thread pool of the async
//! runtime, and shipping only succeeds if both do. Every failure is logged,
//! not just the first one.
//!
//! A working directory without a compose file is pushed, and its restart is
//! skipped with a warning.

use crate::{
    checkpoint::spinner,
    compose::ComposeStack,
    syscall::SyscallError,
};

use auth_git2::{GitAuthenticator, Prompter};
use git2::{PushOptions, RemoteCallbacks, Repository};
use indicatif::ProgressBar;
use inquire::{Password, Text};
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

/// Remote the current branch is pushed to.
pub const REMOTE: &str = "origin";

/// Outcome of a successful shipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shipped {
    /// Branch that was pushed.
    pub branch: String,

    /// Whether a compose stack was restarted.
    pub restarted: bool,
}

/// Push current branch and restart compose stack concurrently.
///
/// # Errors
///
/// - Return [`ShipError::Incomplete`] if either task fails. The error of the
///   restart comes first, so the exit code of a failed docker invocation is
///   preserved.
#[instrument(skip(work_dir), level = "debug")]
pub async fn ship(work_dir: impl Into<PathBuf>) -> Result<Shipped> {
    let work_dir = work_dir.into();
    let push_dir = work_dir.clone();

    let push = tokio::task::spawn_blocking(move || push_current_branch(&push_dir));
    let restart = tokio::task::spawn_blocking(move || restart_stack(&work_dir));
    let (push, restart) = futures::future::join(push, restart).await;

    let push = push.map_err(ShipError::from).and_then(|result| result);
    let restart = restart.map_err(ShipError::from).and_then(|result| result);

    match (push, restart) {
        (Ok(branch), Ok(restarted)) => Ok(Shipped { branch, restarted }),
        (push, restart) => {
            let failures = [restart.err(), push.err()]
                .into_iter()
                .flatten()
                .inspect(|failure| error!("{failure}"))
                .collect::<Vec<_>>();
            Err(ShipError::incomplete(failures))
        }
    }
}

/// Push current branch of repository containing working directory to
/// [`REMOTE`].
///
/// Credentials are prompted for when the remote requires them.
///
/// # Errors
///
/// - Return [`ShipError::DetachedHead`] if HEAD is not on a branch.
/// - Return [`ShipError::Git2`] if repository cannot be opened, or push
///   fails.
/// - Return [`ShipError::Rejected`] if remote rejects the update.
#[instrument(skip(work_dir), level = "debug")]
pub fn push_current_branch(work_dir: impl AsRef<Path>) -> Result<String> {
    let repository = Repository::discover(work_dir.as_ref())?;
    let head = repository.head()?;
    if !head.is_branch() {
        return Err(ShipError::DetachedHead);
    }
    let (Some(refname), Some(branch)) = (head.name(), head.shorthand()) else {
        return Err(ShipError::DetachedHead);
    };
    let refspec = format!("{refname}:{refname}");
    let branch = branch.to_string();

    let bar = spinner(format!("pushing {branch} to {REMOTE}"));
    let prompter = SpinnerPrompter::new(bar.clone());
    let authenticator = GitAuthenticator::default().set_prompter(prompter);
    let config = repository.config()?;

    let mut rejection = None;
    let mut remote = repository.find_remote(REMOTE)?;
    let result = {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(authenticator.credentials(&config));
        callbacks.push_update_reference(|refname, status| {
            if let Some(status) = status {
                rejection = Some(format!("{refname}: {status}"));
            }
            Ok(())
        });

        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);
        remote.push(&[refspec.as_str()], Some(&mut options))
    };
    bar.finish_and_clear();
    result?;

    if let Some(reason) = rejection {
        return Err(ShipError::Rejected { reason });
    }
    info!("pushed {branch} to {REMOTE}");

    Ok(branch)
}

/// Restart compose stack of working directory if it has one.
///
/// # Errors
///
/// - Return [`ShipError::Compose`] if docker fails.
pub fn restart_stack(work_dir: impl AsRef<Path>) -> Result<bool> {
    match ComposeStack::detect(work_dir.as_ref()) {
        Some(stack) => {
            stack.restart()?;
            Ok(true)
        }
        None => {
            warn!(
                "no compose file in {:?}, skipping restart",
                work_dir.as_ref().display()
            );
            Ok(false)
        }
    }
}

/// Git2 authentication prompter that pauses a spinner.
#[derive(Debug, Clone)]
pub struct SpinnerPrompter {
    bar: ProgressBar,
}

impl SpinnerPrompter {
    /// Construct new prompter suspending target spinner.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for SpinnerPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

fn describe(failures: &[ShipError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Ship error types.
#[derive(Debug, thiserror::Error)]
pub enum ShipError {
    /// HEAD does not point at a branch.
    #[error("cannot push from a detached HEAD")]
    DetachedHead,

    /// Remote refuses to update a reference.
    #[error("remote rejected push of {reason}")]
    Rejected { reason: String },

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Compose stack cannot be restarted.
    #[error("failed to restart compose stack")]
    Compose(#[from] SyscallError),

    /// Task panicked or was cancelled.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    /// At least one of the tasks failed.
    #[error("shipping failed, also: {}", describe(.failures))]
    Incomplete {
        #[source]
        source: Box<ShipError>,
        failures: Vec<ShipError>,
    },
}

impl ShipError {
    // INVARIANT: Called with at least one failure.
    fn incomplete(mut failures: Vec<ShipError>) -> Self {
        if failures.len() == 1 {
            return failures.remove(0);
        }

        let first = failures.remove(0);
        Self::Incomplete {
            source: Box::new(first),
            failures,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = ShipError> = std::result::Result<T, E>;
