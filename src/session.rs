// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Browser terminal sessions.
//!
//! A __session__ is a detached tmux session rooted at the working directory,
//! exposed to a browser through ttyd. The pid of the ttyd process is
//! recorded in a pid file under the runtime state directory, so later
//! invocations can check on it or stop it.

use crate::{
    config::SessionSettings,
    path::{dir_name, runtime_state_dir},
    syscall::{syscall_non_interactive, SyscallError},
};

use mkdirp::mkdirp;
use nix::{
    errno::Errno,
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, remove_file, write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use tracing::{info, instrument, warn};

/// Default port ttyd listens on.
pub const DEFAULT_PORT: u16 = 7681;

/// Session action to perform.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SessionAction {
    /// Start tmux session and ttyd, whichever is not running yet.
    #[default]
    Start,

    /// Report whether tmux session and ttyd are running.
    Status,

    /// Stop ttyd and tmux session.
    Stop,

    /// Stop then start.
    Restart,
}

/// Liveness report of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub tmux: bool,
    pub ttyd: Option<u32>,
}

/// Browser terminal session of a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    name: String,
    port: u16,
    dir: PathBuf,
    pid_file: PathBuf,
}

impl Session {
    /// Construct session for working directory.
    ///
    /// Name defaults to the base name of the working directory, and port to
    /// [`DEFAULT_PORT`].
    pub fn new(work_dir: impl AsRef<Path>, settings: &SessionSettings) -> Self {
        let work_dir = work_dir.as_ref();
        let name = settings
            .name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| dir_name(work_dir));
        let pid_file = runtime_state_dir().join(format!("{name}.ttyd.pid"));

        Self {
            name,
            port: settings.port.unwrap_or(DEFAULT_PORT),
            dir: work_dir.to_path_buf(),
            pid_file,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid_file(&self) -> &Path {
        self.pid_file.as_path()
    }

    /// Perform session action.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError`] if tmux or ttyd cannot be managed.
    pub fn perform(&self, action: SessionAction) -> Result<()> {
        match action {
            SessionAction::Start => self.start(),
            SessionAction::Status => {
                println!("{}", self.status());
                Ok(())
            }
            SessionAction::Stop => self.stop(),
            SessionAction::Restart => {
                self.stop()?;
                self.start()
            }
        }
    }

    /// Start tmux session and ttyd, skipping whichever is already running.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::MissingProgram`] if tmux or ttyd is not
    ///   installed.
    /// - Return [`SessionError::Syscall`] if tmux session cannot be created.
    /// - Return [`SessionError::Spawn`] if ttyd cannot be started.
    /// - Return [`SessionError::PidFile`] if pid file cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn start(&self) -> Result<()> {
        for program in ["tmux", "ttyd"] {
            if which::which(program).is_err() {
                return Err(SessionError::MissingProgram {
                    program: program.into(),
                });
            }
        }

        if self.has_tmux_session() {
            info!("tmux session {:?} already exists", self.name);
        } else {
            let dir = self.dir.to_string_lossy();
            syscall_non_interactive(
                "tmux",
                ["new-session", "-d", "-s", self.name.as_str(), "-c", dir.as_ref()],
                None,
            )?;
            info!("created tmux session {:?}", self.name);
        }

        if let Some(pid) = self.live_ttyd() {
            info!("ttyd already running with pid {pid}");
            return Ok(());
        }

        let port = self.port.to_string();
        let child = Command::new("ttyd")
            .args(["-W", "-p", port.as_str(), "tmux", "attach", "-t", self.name.as_str()])
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| SessionError::Spawn {
                source: err,
                program: "ttyd".into(),
            })?;
        self.write_pid(child.id())?;
        info!(
            "ttyd serving session {:?} on http://localhost:{} with pid {}",
            self.name,
            self.port,
            child.id()
        );

        Ok(())
    }

    /// Stop ttyd and tmux session.
    ///
    /// Either being absent already is not an error.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::PidFile`] if pid file cannot be removed.
    #[instrument(skip(self), level = "debug")]
    pub fn stop(&self) -> Result<()> {
        match self.live_ttyd() {
            Some(pid) => match signal_pid(pid, Signal::SIGTERM) {
                Ok(()) => info!("stopped ttyd with pid {pid}"),
                Err(error) => warn!("cannot stop ttyd with pid {pid}: {error}"),
            },
            None => info!("ttyd is not running"),
        }
        self.remove_pid()?;

        if self.has_tmux_session() {
            match syscall_non_interactive("tmux", ["kill-session", "-t", self.name.as_str()], None) {
                Ok(_) => info!("killed tmux session {:?}", self.name),
                Err(error) => warn!("cannot kill tmux session {:?}: {error}", self.name),
            }
        } else {
            info!("tmux session {:?} does not exist", self.name);
        }

        Ok(())
    }

    /// Check whether tmux session and ttyd are running.
    pub fn status(&self) -> SessionReport<'_> {
        SessionReport {
            session: self,
            status: SessionStatus {
                tmux: self.has_tmux_session(),
                ttyd: self.live_ttyd(),
            },
        }
    }

    fn has_tmux_session(&self) -> bool {
        syscall_non_interactive("tmux", ["has-session", "-t", self.name.as_str()], None).is_ok()
    }

    fn live_ttyd(&self) -> Option<u32> {
        let pid = self.read_pid()?;
        match signal_pid(pid, None) {
            Ok(()) | Err(Errno::EPERM) => Some(pid),
            Err(_) => None,
        }
    }

    fn read_pid(&self) -> Option<u32> {
        read_to_string(&self.pid_file).ok().and_then(|data| parse_pid(&data))
    }

    fn write_pid(&self, pid: u32) -> Result<()> {
        let pid_error = |err: std::io::Error| SessionError::PidFile {
            source: err,
            path: self.pid_file.clone(),
        };

        if let Some(parent) = self.pid_file.parent() {
            mkdirp(parent).map_err(pid_error)?;
        }
        write(&self.pid_file, format!("{pid}\n")).map_err(pid_error)
    }

    fn remove_pid(&self) -> Result<()> {
        match remove_file(&self.pid_file) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SessionError::PidFile {
                source: err,
                path: self.pid_file.clone(),
            }),
        }
    }
}

/// Human readable session status.
#[derive(Debug, Clone, Copy)]
pub struct SessionReport<'session> {
    session: &'session Session,
    pub status: SessionStatus,
}

impl Display for SessionReport<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let tmux = if self.status.tmux { "running" } else { "absent" };
        writeln!(fmt, "tmux session {:?}: {tmux}", self.session.name)?;
        match self.status.ttyd {
            Some(pid) => write!(
                fmt,
                "ttyd: running with pid {pid} on port {}",
                self.session.port
            ),
            None => write!(fmt, "ttyd: not running"),
        }
    }
}

fn signal_pid(pid: u32, signal: impl Into<Option<Signal>>) -> Result<(), Errno> {
    // INVARIANT: Pids beyond i32::MAX cannot exist.
    let pid = i32::try_from(pid).map_err(|_| Errno::ESRCH)?;
    kill(Pid::from_raw(pid), signal)
}

fn parse_pid(data: &str) -> Option<u32> {
    data.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
}

/// Session error types.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// External tool fails.
    #[error("failed to manage tmux session")]
    Syscall(#[from] SyscallError),

    /// Required program is not installed.
    #[error("{program:?} is required for sessions, but cannot be found")]
    MissingProgram { program: String },

    /// Program cannot be started.
    #[error("failed to start {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Pid file cannot be written or removed.
    #[error("failed to update pid file {:?}", path.display())]
    PidFile {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = SessionError> = std::result::Result<T, E>;
