// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Versioned snapshots of a project directory.
//!
//! Chkpt archives a working directory into numbered checkpoints, restores
//! any of them in place while keeping a backup of the state it replaces, and
//! deploys checkpoints to a remote host over SSH. Around that core it also
//! drives the Docker Compose stack of a project, watches the working tree
//! for recent changes, hosts a browser terminal session, and ships the
//! current branch.
//!
//! # Versions
//!
//! Versions take the form `MAJOR.MINOR` where the minor part is a single
//! digit. Versions only ever go up: the successor of `1.9` is `2.0`.
//! Backups made by a restoration carry a "b" suffix, e.g., `1.3b`.

pub mod checkpoint;
pub mod compose;
pub mod config;
pub mod deploy;
pub mod path;
pub mod session;
pub mod ship;
pub mod store;
pub mod syscall;
pub mod watch;
pub mod workspace;
