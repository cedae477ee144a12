// src/version.rs

//! Package version parsing and comparison
//!
//! GooGet versions have the form `N(.N)*(-tag)?(@R)?`: dot-separated numeric
//! segments, an optional pre-release tag, and an optional numeric revision.
//! Missing segments compare as zero, a pre-release sorts below the same
//! version without one, and the revision breaks remaining ties.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// A parsed package version.
///
/// Versions are stored as strings everywhere (specs, the database, repo
/// indexes); `Version` exists only to give them a total order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    segments: Vec<u64>,
    tag: Option<String>,
    revision: u64,
}

impl Version {
    /// Parse a version string, failing with `InvalidVersion` when it does
    /// not match the grammar.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidVersion(s.to_string());

        let (body, revision) = match s.rsplit_once('@') {
            Some((body, rev)) => {
                let revision = rev.parse::<u64>().map_err(|_| invalid())?;
                (body, revision)
            }
            None => (s, 0),
        };

        let (numbers, tag) = match body.split_once('-') {
            Some((numbers, tag)) if !tag.is_empty() => (numbers, Some(tag.to_string())),
            Some(_) => return Err(invalid()),
            None => (body, None),
        };

        if numbers.is_empty() {
            return Err(invalid());
        }
        let segments = numbers
            .split('.')
            .map(|seg| {
                if seg.is_empty() || !seg.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                seg.parse::<u64>().map_err(|_| invalid())
            })
            .collect::<Result<Vec<u64>>>()?;

        Ok(Version {
            segments,
            tag,
            revision,
        })
    }

    /// The numeric revision (0 when absent).
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i).copied().unwrap_or(0);
            let b = other.segments.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        // A pre-release sorts below the untagged version; two tags compare
        // bytewise.
        let tags = match (&self.tag, &other.tag) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        };
        if tags != Ordering::Equal {
            return tags;
        }
        self.revision.cmp(&other.revision)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nums: Vec<String> = self.segments.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", nums.join("."))?;
        if let Some(tag) = &self.tag {
            write!(f, "-{}", tag)?;
        }
        if self.revision != 0 {
            write!(f, "@{}", self.revision)?;
        }
        Ok(())
    }
}

/// Compare two version strings, returning -1, 0, or 1.
pub fn compare(a: &str, b: &str) -> Result<i32> {
    let va = Version::parse(a)?;
    let vb = Version::parse(b)?;
    Ok(match va.cmp(&vb) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    })
}

/// Whether candidate version `v` satisfies a minimum-version spec `w`.
pub fn satisfies(v: &str, w: &str) -> Result<bool> {
    Ok(compare(v, w)? >= 0)
}
