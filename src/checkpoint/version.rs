// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Checkpoint version allocation.
//!
//! Versions are never stored anywhere. They are derived from the names of the
//! archives already sitting in a checkpoint store. Each version is a
//! `major.minor` pair where minor is a single decimal digit. Internally a
//! version is encoded as `10 * major + minor`, so the successor of `1.9` is
//! `2.0`. Thus, each major version holds at most ten checkpoints.

use regex::Regex;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
    sync::LazyLock,
};

static SCAN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)\.([0-9])b?_").expect("valid scan pattern"));

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)\.([0-9])(b?)$").expect("valid tag pattern"));

/// Checkpoint version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    major: u64,
    minor: u8,
}

impl Version {
    /// Version handed out for the first checkpoint of a store.
    pub const FIRST: Version = Version { major: 1, minor: 0 };

    /// Construct new version.
    ///
    /// Returns `None` if minor is not a single decimal digit, or if the
    /// encoded form of the version cannot be represented.
    pub fn new(major: u64, minor: u8) -> Option<Self> {
        if minor > 9 {
            return None;
        }

        let version = Self { major, minor };
        version.checked_encode().map(|_| version)
    }

    /// Decode version from `10 * major + minor` form.
    pub fn decode(value: u64) -> Self {
        Self {
            major: value / 10,
            minor: (value % 10) as u8,
        }
    }

    /// Encode version into `10 * major + minor` form.
    pub fn encode(&self) -> u64 {
        self.major * 10 + u64::from(self.minor)
    }

    fn checked_encode(&self) -> Option<u64> {
        self.major
            .checked_mul(10)
            .and_then(|value| value.checked_add(u64::from(self.minor)))
    }

    /// Version that directly follows this one.
    pub fn successor(&self) -> Self {
        Self::decode(self.encode().saturating_add(1))
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u8 {
        self.minor
    }

    /// Extract version from leading `major.minor[b]_` prefix of a file name.
    pub fn scan(name: &str) -> Option<Self> {
        let captures = SCAN_PATTERN.captures(name)?;
        let major = captures[1].parse().ok()?;
        let minor = captures[2].parse().ok()?;
        Self::new(major, minor)
    }
}

impl Display for Version {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}.{}", self.major, self.minor)
    }
}

/// Determine next version to allocate from listing of file names.
///
/// Names without a `major.minor[b]_` prefix are ignored. Backup versions
/// count just like regular versions. Yields [`Version::FIRST`] if no name
/// carries a version.
pub fn next_version(names: impl IntoIterator<Item = impl AsRef<str>>) -> Version {
    names
        .into_iter()
        .filter_map(|name| Version::scan(name.as_ref()))
        .max()
        .map(|latest| latest.successor())
        .unwrap_or(Version::FIRST)
}

/// Version tag as typed by a user, or as carried by an archive name.
///
/// A tag is a version plus an optional "b" marker flagging a
/// backup-before-restore snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionTag {
    pub version: Version,
    pub backup: bool,
}

impl VersionTag {
    /// Construct new regular version tag.
    pub fn regular(version: Version) -> Self {
        Self {
            version,
            backup: false,
        }
    }

    /// Construct new backup version tag.
    pub fn backup(version: Version) -> Self {
        Self {
            version,
            backup: true,
        }
    }
}

impl Display for VersionTag {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.backup {
            write!(fmt, "{}b", self.version)
        } else {
            write!(fmt, "{}", self.version)
        }
    }
}

impl FromStr for VersionTag {
    type Err = VersionError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let trimmed = data.trim();
        let invalid = || VersionError::InvalidTag {
            tag: trimmed.to_string(),
        };

        let captures = TAG_PATTERN.captures(trimmed).ok_or_else(invalid)?;
        let major = captures[1].parse().map_err(|_| invalid())?;
        let minor = captures[2].parse().map_err(|_| invalid())?;
        let version = Version::new(major, minor).ok_or_else(invalid)?;

        Ok(Self {
            version,
            backup: &captures[3] == "b",
        })
    }
}

/// Version error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Version tag does not follow `major.minor[b]` format.
    #[error("invalid version {tag:?}, expected format like 1.2 or 1.2b")]
    InvalidTag { tag: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case(Vec::<&str>::new(), "1.0"; "empty store")]
    #[test_case(vec!["1.0_init.tar.gz", "1.1_fix.tar.gz"], "1.2"; "sequential")]
    #[test_case(vec!["1.9_last.tar.gz"], "2.0"; "minor rolls into major")]
    #[test_case(vec!["0.0_zero.tar.gz"], "0.1"; "zero version")]
    #[test_case(vec!["1.3b_pre_restore.tar.gz", "1.2_x.tar.gz"], "1.4"; "backups count")]
    #[test_case(vec!["notes.txt", "v1.0_x.tar.gz", "1.10_x.tar.gz", "1.0"], "1.0"; "ignore junk")]
    #[test_case(vec!["12.5_a.tar.gz", "3.9_b.tar.gz"], "12.6"; "maximum wins")]
    #[test_case(vec!["99999999999999999999999.1_a.tar.gz", "2.2_b"], "2.3"; "skip overflow")]
    #[test]
    fn allocate_next_version(names: Vec<&str>, expect: &str) {
        pretty_assertions::assert_eq!(next_version(names).to_string(), expect);
    }

    #[test]
    fn allocation_is_strictly_increasing() {
        let mut names = Vec::new();
        let mut previous: Option<Version> = None;
        for round in 0..35 {
            let next = next_version(&names);
            assert!(next.minor() <= 9);
            if let Some(previous) = previous {
                assert!(next.encode() > previous.encode());
            }
            previous = Some(next);
            names.push(format!("{next}_round{round}.tar.gz"));
        }

        assert_eq!(previous.map(|v| v.to_string()), Some("4.4".into()));
    }

    #[test_case("1.1", Some((1, 1, false)); "regular")]
    #[test_case(" 2.0b\n", Some((2, 0, true)); "backup with whitespace")]
    #[test_case("1.10", None; "two digit minor")]
    #[test_case("1", None; "missing minor")]
    #[test_case("1.1c", None; "bad suffix")]
    #[test_case("1.1 b", None; "inner space")]
    #[test]
    fn parse_version_tag(input: &str, expect: Option<(u64, u8, bool)>) {
        let result = input
            .parse::<VersionTag>()
            .ok()
            .map(|tag| (tag.version.major(), tag.version.minor(), tag.backup));
        pretty_assertions::assert_eq!(result, expect);
    }

    #[test]
    fn display_version_tag() {
        let version = Version::new(3, 7).unwrap();
        assert_eq!(VersionTag::regular(version).to_string(), "3.7");
        assert_eq!(VersionTag::backup(version).to_string(), "3.7b");
    }
}
