// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Archive file naming.
//!
//! Checkpoint archives carry their metadata in their file names:
//!
//! ```text
//! <major>.<minor>[b]_<message>[_<n>].tar.gz
//! ```
//!
//! The optional "b" marks a backup-before-restore snapshot. The message is
//! a sanitized user string. The optional numeric suffix only exists to avoid
//! overwriting an archive that already has the same name.

use crate::checkpoint::version::{Version, VersionTag};

use regex::Regex;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    sync::LazyLock,
};

/// File extension of checkpoint archives.
pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

/// Message used when sanitizing leaves nothing behind.
pub const EMPTY_MESSAGE: &str = "no_msg";

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+)\.([0-9])(b?)_(.+?)(?:_([0-9]+))?\.tar\.gz$").expect("valid name pattern")
});

/// Sanitize free-text message for use in an archive name.
///
/// Spaces become underscores, then everything outside of `[A-Za-z0-9_.-]` is
/// dropped. Yields [`EMPTY_MESSAGE`] if nothing is left.
pub fn sanitize_message(message: impl AsRef<str>) -> String {
    let sanitized: String = message
        .as_ref()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    if sanitized.is_empty() {
        EMPTY_MESSAGE.into()
    } else {
        sanitized
    }
}

/// Structured form of an archive file name.
///
/// # Invariant
///
/// - Message is always sanitized.
/// - Formatting a parsed name yields the exact file name it was parsed from.
///   A message that itself ends in `_<digits>` parses back as a shorter
///   message plus a collision suffix, which formats to the same file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    tag: VersionTag,
    message: String,
    collision: Option<u32>,
}

impl ArchiveName {
    /// Construct new archive name, sanitizing the message.
    pub fn new(tag: VersionTag, message: impl AsRef<str>) -> Self {
        Self {
            tag,
            message: sanitize_message(message),
            collision: None,
        }
    }

    /// Parse archive name from a file name.
    ///
    /// Returns `None` if the file name does not follow archive naming.
    pub fn parse(file_name: impl AsRef<str>) -> Option<Self> {
        let captures = NAME_PATTERN.captures(file_name.as_ref())?;
        let version = Version::new(captures[1].parse().ok()?, captures[2].parse().ok()?)?;
        let tag = VersionTag {
            version,
            backup: &captures[3] == "b",
        };

        // INVARIANT: Collision suffix too big to count is part of the message.
        let (message, collision) = match captures.get(5) {
            Some(suffix) => match suffix.as_str().parse::<u32>() {
                Ok(n) => (captures[4].to_string(), Some(n)),
                Err(_) => (format!("{}_{}", &captures[4], suffix.as_str()), None),
            },
            None => (captures[4].to_string(), None),
        };

        Some(Self {
            tag,
            message,
            collision,
        })
    }

    /// Same name with a collision suffix.
    pub fn with_collision(&self, n: u32) -> Self {
        Self {
            collision: Some(n),
            ..self.clone()
        }
    }

    pub fn tag(&self) -> VersionTag {
        self.tag
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn collision(&self) -> Option<u32> {
        self.collision
    }
}

impl Display for ArchiveName {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}_{}", self.tag, self.message)?;
        if let Some(n) = self.collision {
            write!(fmt, "_{n}")?;
        }
        write!(fmt, "{ARCHIVE_EXTENSION}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("fix the build", "fix_the_build"; "spaces")]
    #[test_case("v1.2-rc_3", "v1.2-rc_3"; "allowed punctuation")]
    #[test_case("what?! (really)", "what_really"; "strip disallowed")]
    #[test_case("!!!???", "no_msg"; "only disallowed")]
    #[test_case("", "no_msg"; "empty")]
    #[test_case("héllo wörld", "hllo_wrld"; "non ascii")]
    #[test]
    fn sanitize_messages(input: &str, expect: &str) {
        pretty_assertions::assert_eq!(sanitize_message(input), expect);
    }

    #[test]
    fn format_archive_name() {
        let version = Version::new(1, 2).unwrap();
        let name = ArchiveName::new(VersionTag::regular(version), "first try");
        assert_eq!(name.to_string(), "1.2_first_try.tar.gz");
        assert_eq!(name.with_collision(2).to_string(), "1.2_first_try_2.tar.gz");

        let name = ArchiveName::new(VersionTag::backup(version), "pre restore");
        assert_eq!(name.to_string(), "1.2b_pre_restore.tar.gz");
    }

    #[test]
    fn parse_archive_name() {
        let result = ArchiveName::parse("10.3b_pre_restore_4.tar.gz").unwrap();
        assert_eq!(result.tag().to_string(), "10.3b");
        assert_eq!(result.message(), "pre_restore");
        assert_eq!(result.collision(), Some(4));

        let result = ArchiveName::parse("1.1_fix.tar.gz").unwrap();
        assert_eq!(result.tag().to_string(), "1.1");
        assert_eq!(result.message(), "fix");
        assert_eq!(result.collision(), None);
    }

    #[test_case("notes.txt"; "unrelated")]
    #[test_case("1.1_fix.tar"; "wrong extension")]
    #[test_case("1.12_fix.tar.gz"; "two digit minor")]
    #[test_case("1.1_.tar.gz"; "empty message")]
    #[test_case("1.1fix.tar.gz"; "missing separator")]
    #[test]
    fn reject_foreign_names(input: &str) {
        pretty_assertions::assert_eq!(ArchiveName::parse(input), None);
    }

    #[test_case("1.0_init.tar.gz"; "plain")]
    #[test_case("1.1_fix_1.tar.gz"; "collision")]
    #[test_case("2.0b_pre_restore.tar.gz"; "backup")]
    #[test_case("3.3_release_2024_99999999999.tar.gz"; "huge suffix")]
    #[test_case("0.1_a_b_c.tar.gz"; "underscores")]
    #[test]
    fn formatting_reproduces_parsed_file_name(input: &str) {
        let parsed = ArchiveName::parse(input).unwrap();
        pretty_assertions::assert_eq!(parsed.to_string(), input);
    }
}
