// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::{Path, PathBuf};

/// Determine default absolute path to the checkpoint store of a project.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/chkpt-store/<project>` as the
/// default absolute path, where `<project>` is the base name of the working
/// directory. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if data directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_checkpoint_store_dir(work_dir: impl AsRef<Path>) -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("chkpt-store").join(dir_name(work_dir)))
        .ok_or(NoWayHome)
}

/// Determine directory to keep runtime state like pid files in.
///
/// Prefers `$XDG_RUNTIME_DIR/chkpt`, falling back to the system temporary
/// directory when no runtime directory is available.
pub fn runtime_state_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("chkpt")
}

/// Base name of a directory as an owned string.
///
/// Falls back to "root" for paths without a final component, e.g., `/`.
pub fn dir_name(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".into())
}

/// No way to determine user's data directory.
///
/// # See Also
///
/// - [`dirs::data_dir`](https://docs.rs/dirs/latest/dirs/fn.data_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's data directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("XDG_DATA_HOME", "/tmp/blah/share")])]
    fn store_dir_follows_xdg_data_home() -> anyhow::Result<()> {
        let result = default_checkpoint_store_dir("/home/blah/projects/widget")?;
        assert_eq!(result, PathBuf::from("/tmp/blah/share/chkpt-store/widget"));
        Ok(())
    }

    #[test]
    fn dir_name_of_root() {
        assert_eq!(dir_name("/"), "root");
        assert_eq!(dir_name("/srv/app"), "app");
    }
}
