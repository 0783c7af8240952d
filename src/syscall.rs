// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External process invocation.
//!
//! Chkpt leans on a handful of external tools like docker, ssh, scp, tmux,
//! and ttyd. These helpers run them as child processes, and keep track of
//! the exit code of a failed invocation so it can be propagated as the exit
//! code of chkpt itself.

use shell_escape::escape;
use std::{
    borrow::Cow,
    ffi::OsStr,
    path::Path,
    process::{Command, ExitStatus, Stdio},
};
use tracing::debug;

/// Run command with inherited standard streams.
///
/// Blocks until the command finishes. Output goes straight to the user's
/// terminal.
///
/// # Errors
///
/// - Return [`SyscallError::Spawn`] if command cannot be started.
/// - Return [`SyscallError::Failed`] if command exits unsuccessfully.
pub fn syscall_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    cwd: Option<&Path>,
) -> Result<()> {
    let mut command = Command::new(cmd.as_ref());
    command.args(args);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    debug!("run {command:?}");
    let status = command
        .spawn()
        .and_then(|mut child| child.wait())
        .map_err(|err| SyscallError::Spawn {
            source: err,
            command: display_command(&command),
        })?;

    check_status(&command, status, String::new())
}

/// Run command with captured standard streams.
///
/// Output to stdout and stderr is returned together as a [`String`] with
/// trailing newlines chomped.
///
/// # Errors
///
/// - Return [`SyscallError::Spawn`] if command cannot be started.
/// - Return [`SyscallError::Failed`] if command exits unsuccessfully.
pub fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    cwd: Option<&Path>,
) -> Result<String> {
    let mut command = Command::new(cmd.as_ref());
    command.args(args).stdin(Stdio::null());
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    debug!("run {command:?}");
    let output = command.output().map_err(|err| SyscallError::Spawn {
        source: err,
        command: display_command(&command),
    })?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(stdout.as_str());
    }

    if !stderr.is_empty() {
        if !message.is_empty() && !message.ends_with('\n') {
            message.push('\n');
        }
        message.push_str(stderr.as_str());
    }

    // INVARIANT: Chomp trailing newlines.
    let message = message.trim_end_matches(['\r', '\n']).to_string();

    check_status(&command, output.status, message.clone())?;

    Ok(message)
}

/// Quote string for safe use as a single POSIX shell word.
pub fn shell_quote(word: &str) -> String {
    escape(Cow::Borrowed(word)).into_owned()
}

fn check_status(command: &Command, status: ExitStatus, output: String) -> Result<()> {
    if status.success() {
        return Ok(());
    }

    Err(SyscallError::Failed {
        command: display_command(command),
        code: status.code(),
        output,
    })
}

fn display_command(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(
        command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned()),
    );
    parts.join(" ")
}

/// System call error types.
#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    /// Command could not be started at all.
    #[error("failed to run {command:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        command: String,
    },

    /// Command ran, but exited unsuccessfully.
    #[error("command {command:?} failed{}{}", exit_suffix(*code), output_suffix(output))]
    Failed {
        command: String,
        code: Option<i32>,
        output: String,
    },
}

impl SyscallError {
    /// Exit code of failed command if it exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Spawn { .. } => None,
            Self::Failed { code, .. } => *code,
        }
    }
}

fn exit_suffix(code: Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {code}"),
        None => " by signal".into(),
    }
}

fn output_suffix(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(":\n{output}")
    }
}

/// Friendly result alias :3
pub type Result<T, E = SyscallError> = std::result::Result<T, E>;
