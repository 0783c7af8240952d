// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Watch a working tree for recent changes.
//!
//! Periodically lists the most recently modified files of the working tree.
//! The walk honors ".gitignore" files whether or not the working tree is a
//! git repository, includes hidden files, and never descends into ".git".
//! Additional glob patterns can be excluded through the `[watch]` section of
//! the project configuration.

use glob::{MatchOptions, Pattern};
use ignore::WalkBuilder;
use std::{
    fmt::Write,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tracing::{debug, info, instrument};

/// Default number of files to show per frame.
pub const DEFAULT_COUNT: usize = 20;

/// Default time between two frames.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// File with its last modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentFile {
    /// Path relative to the watched root.
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Recent change watcher of a working tree.
#[derive(Debug, Clone)]
pub struct Watcher {
    root: PathBuf,
    excludes: Vec<Pattern>,
    count: usize,
}

impl Watcher {
    /// Construct new watcher for root directory.
    ///
    /// # Errors
    ///
    /// - Return [`WatchError::Pattern`] if an exclude pattern is malformed.
    pub fn new(root: impl Into<PathBuf>, excludes: &[String], count: usize) -> Result<Self> {
        let excludes = excludes
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|err| WatchError::Pattern {
                    source: err,
                    pattern: pattern.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            root: root.into(),
            excludes,
            count,
        })
    }

    /// Find most recently modified files, newest first.
    ///
    /// Entries that vanish or cannot be read during the walk are skipped.
    pub fn scan(&self) -> Vec<RecentFile> {
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .require_git(false)
            .filter_entry(|entry| entry.file_name() != ".git")
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    debug!("skip unreadable entry: {error}");
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|kind| kind.is_file()) {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if self.is_excluded(relative) {
                continue;
            }

            let Some(modified) = entry
                .metadata()
                .ok()
                .and_then(|meta| meta.modified().ok())
            else {
                continue;
            };

            files.push(RecentFile {
                path: relative.to_path_buf(),
                modified,
            });
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
        files.truncate(self.count);
        files
    }

    /// Render one frame of recent files relative to a point in time.
    pub fn render(&self, files: &[RecentFile], now: SystemTime) -> String {
        let mut frame = String::new();
        let _ = writeln!(
            frame,
            "most recently modified files in {} ({} shown)",
            self.root.display(),
            files.len()
        );

        for file in files {
            let age = now.duration_since(file.modified).unwrap_or_default();
            let _ = writeln!(frame, "{:>8}  {}", format_age(age), file.path.display());
        }

        frame
    }

    /// Print frames until interrupted with Ctrl-C.
    ///
    /// Scans run on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// - Return [`WatchError::Join`] if a scan panics.
    /// - Return [`WatchError::Signal`] if Ctrl-C handler cannot be installed.
    #[instrument(skip(self), level = "debug")]
    pub async fn run(self, interval: Duration) -> Result<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                signal = &mut ctrl_c => {
                    signal.map_err(WatchError::Signal)?;
                    info!("stop watching {:?}", self.root.display());
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let watcher = self.clone();
                    let files = tokio::task::spawn_blocking(move || watcher.scan()).await?;
                    print!("{CLEAR_SCREEN}{}", self.render(&files, SystemTime::now()));
                }
            }
        }
    }

    /// Print a single frame.
    pub fn once(&self) {
        print!("{}", self.render(&self.scan(), SystemTime::now()));
    }

    fn is_excluded(&self, relative: &Path) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };

        self.excludes
            .iter()
            .any(|pattern| pattern.matches_path_with(relative, options))
    }
}

/// Format age in its largest whole unit, e.g., "42s", "3m", "5h", "2d".
pub fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3_600 => format!("{}m", secs / 60),
        3_600..86_400 => format!("{}h", secs / 3_600),
        _ => format!("{}d", secs / 86_400),
    }
}

/// Watcher error types.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Exclude pattern is malformed.
    #[error("invalid exclude pattern {pattern:?}")]
    Pattern {
        #[source]
        source: glob::PatternError,
        pattern: String,
    },

    /// Scan task failed.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    /// Ctrl-C handler failed.
    #[error("failed to listen for Ctrl-C")]
    Signal(#[source] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = WatchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::fs::{create_dir_all, write};

    fn touch(root: &Path, relative: &str, secs: i64) -> anyhow::Result<()> {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        write(&path, relative)?;
        set_file_mtime(&path, FileTime::from_unix_time(secs, 0))?;
        Ok(())
    }

    fn paths(files: &[RecentFile]) -> Vec<String> {
        files
            .iter()
            .map(|file| file.path.display().to_string())
            .collect()
    }

    #[test]
    fn newest_files_first() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        touch(tmp.path(), "old.txt", 1_000)?;
        touch(tmp.path(), "src/new.rs", 3_000)?;
        touch(tmp.path(), "src/mid.rs", 2_000)?;

        let watcher = Watcher::new(tmp.path(), &[], DEFAULT_COUNT)?;
        assert_eq!(
            paths(&watcher.scan()),
            vec!["src/new.rs", "src/mid.rs", "old.txt"]
        );

        let watcher = Watcher::new(tmp.path(), &[], 2)?;
        assert_eq!(paths(&watcher.scan()), vec!["src/new.rs", "src/mid.rs"]);
        Ok(())
    }

    #[test]
    fn honor_gitignore_and_excludes() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        touch(tmp.path(), ".gitignore", 1_000)?;
        write(tmp.path().join(".gitignore"), "target/\n")?;
        set_file_mtime(tmp.path().join(".gitignore"), FileTime::from_unix_time(1_000, 0))?;
        touch(tmp.path(), ".env", 2_000)?;
        touch(tmp.path(), ".git/HEAD", 9_000)?;
        touch(tmp.path(), "target/debug/app", 9_000)?;
        touch(tmp.path(), "logs/app.log", 9_000)?;
        touch(tmp.path(), "src/lib.rs", 3_000)?;

        let watcher = Watcher::new(tmp.path(), &["*.log".into()], DEFAULT_COUNT)?;
        assert_eq!(
            paths(&watcher.scan()),
            vec!["src/lib.rs", ".env", ".gitignore"]
        );
        Ok(())
    }

    #[test]
    fn reject_malformed_pattern() {
        let result = Watcher::new(".", &["[".into()], DEFAULT_COUNT);
        assert!(matches!(result, Err(WatchError::Pattern { .. })));
    }

    #[test_case(0, "0s"; "now")]
    #[test_case(59, "59s"; "seconds")]
    #[test_case(60, "1m"; "one minute")]
    #[test_case(7_199, "1h"; "hours round down")]
    #[test_case(172_800, "2d"; "days")]
    #[test]
    fn format_ages(secs: u64, expect: &str) {
        pretty_assertions::assert_eq!(format_age(Duration::from_secs(secs)), expect);
    }

    #[test]
    fn render_frame() -> anyhow::Result<()> {
        let watcher = Watcher::new("/srv/widget", &[], DEFAULT_COUNT)?;
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10_000);
        let files = vec![
            RecentFile {
                path: "src/lib.rs".into(),
                modified: SystemTime::UNIX_EPOCH + Duration::from_secs(9_990),
            },
            RecentFile {
                path: "README.md".into(),
                modified: SystemTime::UNIX_EPOCH + Duration::from_secs(2_800),
            },
        ];

        let expect = indoc! {r#"
            most recently modified files in /srv/widget (2 shown)
                 10s  src/lib.rs
                  2h  README.md
        "#};
        assert_eq!(watcher.render(&files, now), expect);
        Ok(())
    }
}
