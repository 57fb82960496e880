// src/version/mod.rs

//! Version handling for pacman packages and dependency strings
//!
//! pacman versions have the form `[epoch:]pkgver[-pkgrel]` and compare with
//! the segment algorithm used by `vercmp(8)`. Dependency strings carry an
//! optional constraint glued to the name (`glibc>=2.38`); the resolver only
//! uses the bare name; constraints are parsed but not enforced.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A parsed pacman version with epoch, pkgver and pkgrel components
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PkgVersion {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl PkgVersion {
    /// Parse a pacman version string
    ///
    /// Format: [epoch:]version[-release]
    /// Examples:
    /// - "1.2.3" → epoch=0, version="1.2.3", release=None
    /// - "2:1.2.3" → epoch=2, version="1.2.3", release=None
    /// - "1.2.3-4" → epoch=0, version="1.2.3", release=Some("4")
    /// - "1:r123.abc-1" → epoch=1, version="r123.abc", release=Some("1")
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (epoch, rest) = match s.split_once(':') {
            Some((e, r)) if e.chars().all(|c| c.is_ascii_digit()) => {
                let epoch = if e.is_empty() {
                    0
                } else {
                    e.parse::<u64>().map_err(|err| {
                        Error::ParseError(format!("Invalid epoch in version '{}': {}", s, err))
                    })?
                };
                (epoch, r)
            }
            _ => (0, s),
        };

        // pkgrel never contains '-', pkgver may not either, so split on the last one
        let (version, release) = match rest.rsplit_once('-') {
            Some((v, r)) => (v.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(Error::ParseError(format!(
                "Empty version component in '{}'",
                s
            )));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Compare two versions the way pacman does
    ///
    /// The release is only consulted when both sides carry one.
    pub fn compare(&self, other: &PkgVersion) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match segment_cmp(&self.version, &other.version) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match (&self.release, &other.release) {
            (Some(a), Some(b)) => segment_cmp(a, b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for PkgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl Ord for PkgVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for PkgVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two raw version strings, falling back to segment comparison when
/// either side does not parse
pub fn compare(a: &str, b: &str) -> Ordering {
    match (PkgVersion::parse(a), PkgVersion::parse(b)) {
        (Ok(va), Ok(vb)) => va.compare(&vb),
        _ => segment_cmp(a, b),
    }
}

/// Segment comparison of a single version component
///
/// Alternating runs of digits and letters are compared pairwise; numeric
/// runs compare by value and always beat alphabetic runs. Separator runs of
/// different length decide immediately.
fn segment_cmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let one = a.as_bytes();
    let two = b.as_bytes();
    let (mut i, mut j) = (0usize, 0usize);

    while i < one.len() && j < two.len() {
        let (sep1, sep2) = (i, j);
        while i < one.len() && !one[i].is_ascii_alphanumeric() {
            i += 1;
        }
        while j < two.len() && !two[j].is_ascii_alphanumeric() {
            j += 1;
        }

        if i >= one.len() || j >= two.len() {
            break;
        }

        if i - sep1 != j - sep2 {
            return (i - sep1).cmp(&(j - sep2));
        }

        let (start1, start2) = (i, j);
        let is_num = one[i].is_ascii_digit();
        if is_num {
            while i < one.len() && one[i].is_ascii_digit() {
                i += 1;
            }
            while j < two.len() && two[j].is_ascii_digit() {
                j += 1;
            }
        } else {
            while i < one.len() && one[i].is_ascii_alphabetic() {
                i += 1;
            }
            while j < two.len() && two[j].is_ascii_alphabetic() {
                j += 1;
            }
        }

        // Segment types differ: numeric is newer than alpha
        if start2 == j {
            return if is_num {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let mut seg1 = &one[start1..i];
        let mut seg2 = &two[start2..j];

        if is_num {
            while seg1.len() > 1 && seg1[0] == b'0' {
                seg1 = &seg1[1..];
            }
            while seg2.len() > 1 && seg2[0] == b'0' {
                seg2 = &seg2[1..];
            }
            match seg1.len().cmp(&seg2.len()) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }

        match seg1.cmp(seg2) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }

    let rest1 = one.get(i).copied();
    let rest2 = two.get(j).copied();
    match (rest1, rest2) {
        (None, None) => Ordering::Equal,
        // A remaining alpha string never beats an empty string
        (None, Some(c)) if !c.is_ascii_alphabetic() => Ordering::Less,
        (Some(c), _) if c.is_ascii_alphabetic() => Ordering::Less,
        _ => Ordering::Greater,
    }
}

/// Version constraint operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Any version is acceptable
    Any,
    Exact(PkgVersion),
    GreaterThan(PkgVersion),
    GreaterOrEqual(PkgVersion),
    LessThan(PkgVersion),
    LessOrEqual(PkgVersion),
}

impl VersionConstraint {
    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &PkgVersion) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => version.compare(v) == Ordering::Equal,
            VersionConstraint::GreaterThan(v) => version > v,
            VersionConstraint::GreaterOrEqual(v) => version >= v,
            VersionConstraint::LessThan(v) => version < v,
            VersionConstraint::LessOrEqual(v) => version <= v,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => Ok(()),
            VersionConstraint::Exact(v) => write!(f, "={}", v),
            VersionConstraint::GreaterThan(v) => write!(f, ">{}", v),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">={}", v),
            VersionConstraint::LessThan(v) => write!(f, "<{}", v),
            VersionConstraint::LessOrEqual(v) => write!(f, "<={}", v),
        }
    }
}

/// A declared dependency: bare name plus an optional constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub name: String,
    pub constraint: VersionConstraint,
}

impl DependencySpec {
    /// Parse a pacman dependency string such as `glibc>=2.38` or `'sh'`
    ///
    /// Quotes left over from PKGBUILD arrays and optdepends descriptions
    /// (`name: reason`) are stripped. A constraint whose version does not
    /// parse degrades to `Any`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim().trim_matches(|c| c == '\'' || c == '"');
        let trimmed = match trimmed.split_once(": ") {
            Some((name, _)) => name,
            None => trimmed,
        };

        let Some(pos) = trimmed.find(['<', '>', '=']) else {
            return Self {
                name: trimmed.to_string(),
                constraint: VersionConstraint::Any,
            };
        };

        let name = trimmed[..pos].to_string();
        let op_and_version = &trimmed[pos..];
        let (op, version) = ["<=", ">=", "<", ">", "="]
            .iter()
            .find_map(|op| op_and_version.strip_prefix(op).map(|v| (*op, v)))
            .unwrap_or(("=", ""));

        let constraint = match PkgVersion::parse(version) {
            Ok(v) => match op {
                "<=" => VersionConstraint::LessOrEqual(v),
                ">=" => VersionConstraint::GreaterOrEqual(v),
                "<" => VersionConstraint::LessThan(v),
                ">" => VersionConstraint::GreaterThan(v),
                _ => VersionConstraint::Exact(v),
            },
            Err(_) => VersionConstraint::Any,
        };

        Self { name, constraint }
    }
}

/// Strip the constraint from a dependency string, keeping the bare name
pub fn dependency_name(raw: &str) -> String {
    DependencySpec::parse(raw).name
}
