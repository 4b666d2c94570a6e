use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::{BuildMetadata, Prerelease};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("version string is empty")]
    Empty,
    #[error("invalid version component '{component}' in '{input}'")]
    InvalidComponent { input: String, component: String },
    #[error("invalid pre-release tag in '{input}': {reason}")]
    InvalidPrerelease { input: String, reason: String },
    #[error("invalid build metadata in '{input}': {reason}")]
    InvalidBuild { input: String, reason: String },
}

/// A dotted numeric version with an optional pre-release tag.
///
/// Unlike strict semver, any number of numeric components is accepted and
/// missing trailing components compare as zero, so `1.2` equals `1.2.0`.
/// Build metadata (`+...`) is kept for display but never affects ordering.
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u64>,
    pre: Prerelease,
    build: BuildMetadata,
}

impl Version {
    /// Parse a version string, accepting an optional leading `v`.
    ///
    /// # Errors
    /// Returns an error when the numeric part contains anything other than
    /// digits separated by dots, or when the pre-release tag or build metadata
    /// are malformed.
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let trimmed = input.trim();
        let body = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
        if body.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let (rest, build) = match body.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (body, None),
        };
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        let components = core
            .split('.')
            .map(|component| parse_component(input, component))
            .collect::<Result<Vec<_>, _>>()?;

        let pre = match pre {
            Some(tag) => {
                Prerelease::new(tag).map_err(|error| VersionParseError::InvalidPrerelease {
                    input: input.to_string(),
                    reason: if tag.is_empty() {
                        "tag is empty".to_string()
                    } else {
                        error.to_string()
                    },
                })?
            }
            None => Prerelease::EMPTY,
        };
        if pre.is_empty() && rest.ends_with('-') {
            return Err(VersionParseError::InvalidPrerelease {
                input: input.to_string(),
                reason: "tag is empty".to_string(),
            });
        }

        let build = match build {
            Some(meta) if !meta.is_empty() => {
                BuildMetadata::new(meta).map_err(|error| VersionParseError::InvalidBuild {
                    input: input.to_string(),
                    reason: error.to_string(),
                })?
            }
            Some(_) => {
                return Err(VersionParseError::InvalidBuild {
                    input: input.to_string(),
                    reason: "metadata is empty".to_string(),
                });
            }
            None => BuildMetadata::EMPTY,
        };

        Ok(Self {
            components,
            pre,
            build,
        })
    }
}

fn parse_component(input: &str, component: &str) -> Result<u64, VersionParseError> {
    let invalid = || VersionParseError::InvalidComponent {
        input: input.to_string(),
        component: component.to_string(),
    };
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    component.parse::<u64>().map_err(|_| invalid())
}

/// Compare two versions component-wise, padding the shorter one with zeros.
///
/// A version carrying a pre-release tag sorts below the same numeric version
/// without one; two tags are ordered by semver precedence rules.
#[must_use]
pub fn compare(a: &Version, b: &Version) -> Ordering {
    let len = a.components.len().max(b.components.len());
    for index in 0..len {
        let left = a.components.get(index).copied().unwrap_or(0);
        let right = b.components.get(index).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => {}
            other => return other,
        }
    }

    match (a.pre.is_empty(), b.pre.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.pre.cmp(&b.pre),
    }
}

/// Parse and compare two version strings.
///
/// # Errors
/// Returns the parse error of the first string that is not a valid version.
pub fn compare_str(a: &str, b: &str) -> Result<Ordering, VersionParseError> {
    Ok(compare(&Version::parse(a)?, &Version::parse(b)?))
}

#[must_use]
pub fn is_newer_version(latest: &Version, running: &Version) -> bool {
    compare(latest, running) == Ordering::Greater
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        compare(self, other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.components {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre)?;
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build)?;
        }
        Ok(())
    }
}
