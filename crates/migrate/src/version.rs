//! Version Ordering - Parses and totally orders migration version identifiers
//!
//! Accepts the usual `major.minor.patch` shape with any number of numeric
//! segments, an optional leading `v`, an optional `-pre.release` suffix and
//! optional `+build` metadata. Missing trailing segments count as zero, so
//! `1.0` and `1.0.0` compare equal.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{MigrateError, MigrateResult};

static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^v?(?P<core>[0-9]+(?:\.[0-9]+)*)(?:-(?P<pre>[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*))?(?:\+(?P<build>[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*))?$",
    )
    .expect("version pattern is a valid regex")
});

/// One dot-separated pre-release identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Identifier {
    // Variant order matters: numeric identifiers rank below alphanumeric ones.
    Numeric(u64),
    Alpha(String),
}

/// A parsed migration version
///
/// Equality follows the ordering, not the spelling: `Version::parse("1.0")`
/// equals `Version::parse("1.0.0")` while `as_str` still returns what the
/// caller wrote.
#[derive(Debug, Clone)]
pub struct Version {
    original: String,
    segments: Vec<u64>,
    pre: Vec<Identifier>,
    build: Option<String>,
}

impl Version {
    /// Parse a version string, rejecting anything outside the accepted grammar
    pub fn parse(input: &str) -> MigrateResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(MigrateError::invalid_version(input, "version is empty"));
        }

        let caps = VERSION_PATTERN.captures(trimmed).ok_or_else(|| {
            MigrateError::invalid_version(input, "expected dot-separated numeric segments")
        })?;

        let segments = caps["core"]
            .split('.')
            .map(|segment| {
                segment.parse::<u64>().map_err(|_| {
                    MigrateError::invalid_version(input, format!("segment '{}' is out of range", segment))
                })
            })
            .collect::<MigrateResult<Vec<_>>>()?;

        let pre = match caps.name("pre") {
            Some(pre) => pre
                .as_str()
                .split('.')
                .map(|id| match id.parse::<u64>() {
                    Ok(n) if id.bytes().all(|b| b.is_ascii_digit()) => Identifier::Numeric(n),
                    _ => Identifier::Alpha(id.to_string()),
                })
                .collect(),
            None => Vec::new(),
        };

        Ok(Self {
            original: trimmed.to_string(),
            segments,
            pre,
            build: caps.name("build").map(|b| b.as_str().to_string()),
        })
    }

    /// The version exactly as supplied (whitespace trimmed)
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Numeric release segments
    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    /// Whether the version carries a pre-release suffix
    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// Build metadata, ignored for ordering
    pub fn build(&self) -> Option<&str> {
        self.build.as_deref()
    }

    /// Spelling-independent key: two versions are equal exactly when their
    /// canonical keys are equal
    ///
    /// Trailing zero segments, leading zeros, the `v` prefix and build
    /// metadata are dropped; pre-release identifiers keep their case.
    pub fn canonical(&self) -> String {
        let significant = self
            .segments
            .iter()
            .rposition(|&segment| segment != 0)
            .map_or(1, |last| last + 1);
        let mut key = self.segments[..significant]
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".");

        if !self.pre.is_empty() {
            let pre: Vec<String> = self
                .pre
                .iter()
                .map(|id| match id {
                    Identifier::Numeric(n) => n.to_string(),
                    Identifier::Alpha(s) => s.clone(),
                })
                .collect();
            key.push('-');
            key.push_str(&pre.join("."));
        }
        key
    }

    fn cmp_segments(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i).copied().unwrap_or(0);
            let b = other.segments.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }

    fn cmp_pre(&self, other: &Self) -> Ordering {
        match (self.pre.is_empty(), other.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            // A release outranks any of its pre-releases.
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.pre.cmp(&other.pre),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_segments(other).then_with(|| self.cmp_pre(other))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl FromStr for Version {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

/// Compare two versions under the migration ordering
pub fn compare(a: &Version, b: &Version) -> Ordering {
    a.cmp(b)
}

/// Sort versions ascending
pub fn sort(mut versions: Vec<Version>) -> Vec<Version> {
    versions.sort();
    versions
}

/// Parse a batch of version strings, aborting on the first malformed entry
pub fn parse_all<S: AsRef<str>>(inputs: &[S]) -> MigrateResult<Vec<Version>> {
    inputs.iter().map(|s| Version::parse(s.as_ref())).collect()
}

/// Find two differently spelled versions that compare equal
///
/// Returns the first such pair in ascending order, or `None` when every
/// version is distinct under the ordering.
pub fn find_ambiguous(versions: &[Version]) -> Option<(&Version, &Version)> {
    let mut sorted: Vec<&Version> = versions.iter().collect();
    sorted.sort();
    sorted
        .windows(2)
        .find(|pair| pair[0] == pair[1])
        .map(|pair| (pair[0], pair[1]))
}
