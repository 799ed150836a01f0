//! # Registry Coordinates
//!
//! Published artifacts are addressed by a name, a [`Label`] (the namespace the
//! versions live under) and a [`Version`]. A version string looks like
//!
//! ```text
//! /build.example.com@corp:proj-main/1700000000.000:1.0.3f2a9c1b7e44-1-2
//!  \_____________ label ___________/ \__ stamp __/ \_ upstream _/ | |
//!                                                        source ---+ +--- build
//! ```
//!
//! The label part and the stamp are optional, so `1.0-1` is also a valid
//! version. The *trailing revision* is everything after the last `/`; its
//! upstream part is what the change detector calls the published "revision".
//! Builds stamp the truncated commit id into the last dot-delimited segment of
//! that upstream part, which is why change detection compares prefixes rather
//! than whole strings.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

/// Flavors a version was published with (e.g. `is: x86_64`).
pub type FlavorSet = BTreeSet<String>;

/// Latest published versions per artifact name.
pub type LatestVersions = BTreeMap<String, BTreeMap<Version, FlavorSet>>;

/// Registry namespace a target's versions are published under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A published version of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    label: Option<Label>,
    stamp: Option<String>,
    upstream: String,
    source_count: u32,
    build_count: Option<u32>,
}

impl Version {
    /// Parses a version string; see the module documentation for the format.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let invalid = |message: &str| Error::Registry {
            message: format!("invalid version '{}': {}", text, message),
        };

        let (label, trailing) = match text.rsplit_once('/') {
            Some((head, trailing)) => {
                let label = head
                    .rsplit('/')
                    .find(|segment| !segment.is_empty())
                    .map(Label::new);
                (label, trailing)
            }
            None => (None, text),
        };

        let (stamp, revision) = match trailing.split_once(':') {
            Some((stamp, revision)) => (Some(stamp.to_string()), revision),
            None => (None, trailing),
        };

        let mut parts = revision.split('-');
        let upstream = parts
            .next()
            .filter(|upstream| !upstream.is_empty())
            .ok_or_else(|| invalid("missing upstream version"))?;
        let source_count = parts
            .next()
            .ok_or_else(|| invalid("missing source count"))?
            .parse::<u32>()
            .map_err(|_| invalid("source count is not a number"))?;
        let build_count = match parts.next() {
            Some(build) => Some(
                build
                    .parse::<u32>()
                    .map_err(|_| invalid("build count is not a number"))?,
            ),
            None => None,
        };
        if parts.next().is_some() {
            return Err(invalid("too many release components"));
        }

        Ok(Self {
            label,
            stamp,
            upstream: upstream.to_string(),
            source_count,
            build_count,
        })
    }

    /// Label the version was published on, when the string carried one.
    pub fn label(&self) -> Option<&Label> {
        self.label.as_ref()
    }

    /// Upstream part of the trailing revision (e.g. `1.0.3f2a9c1b7e44`).
    pub fn revision(&self) -> &str {
        &self.upstream
    }

    /// Last dot-delimited segment of the upstream part.
    pub fn revision_tail(&self) -> &str {
        revision_tail(&self.upstream)
    }

    /// The trailing revision rendered without the label.
    pub fn trailing(&self) -> String {
        let mut out = String::new();
        if let Some(stamp) = &self.stamp {
            out.push_str(stamp);
            out.push(':');
        }
        out.push_str(&self.upstream);
        out.push('-');
        out.push_str(&self.source_count.to_string());
        if let Some(build) = self.build_count {
            out.push('-');
            out.push_str(&build.to_string());
        }
        out
    }

    fn stamp_value(&self) -> f64 {
        self.stamp
            .as_deref()
            .and_then(|stamp| stamp.parse::<f64>().ok())
            .unwrap_or(0.0)
    }
}

/// Last dot-delimited segment of a revision string.
pub fn revision_tail(revision: &str) -> &str {
    revision.rsplit('.').next().unwrap_or(revision)
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stamp_value()
            .total_cmp(&other.stamp_value())
            .then_with(|| self.stamp.cmp(&other.stamp))
            .then_with(|| self.source_count.cmp(&other.source_count))
            .then_with(|| self.build_count.cmp(&other.build_count))
            .then_with(|| self.upstream.cmp(&other.upstream))
            .then_with(|| self.label.cmp(&other.label))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.label {
            write!(f, "/{}/", label)?;
        }
        f.write_str(&self.trailing())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One `NAME=VERSION[FLAVOR]` line of registry output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedSpec {
    pub name: String,
    pub version: Version,
    pub flavor: Option<String>,
}

impl PublishedSpec {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (name, rest) = line.split_once('=').ok_or_else(|| Error::Registry {
            message: format!("malformed registry line '{}': expected NAME=VERSION", line),
        })?;
        let (version, flavor) = match rest.split_once('[') {
            Some((version, flavor)) => {
                let flavor = flavor.strip_suffix(']').ok_or_else(|| Error::Registry {
                    message: format!("malformed flavor in registry line '{}'", line),
                })?;
                (version, Some(flavor.to_string()).filter(|f| !f.is_empty()))
            }
            None => (rest, None),
        };
        Ok(Self {
            name: name.trim().to_string(),
            version: Version::parse(version)?,
            flavor,
        })
    }
}

/// Collects `NAME=VERSION[FLAVOR]` lines into a per-name version map.
pub fn collect_published(output: &str) -> Result<LatestVersions> {
    let mut latest = LatestVersions::new();
    for line in output.lines().filter(|line| !line.trim().is_empty()) {
        let spec = PublishedSpec::parse(line)?;
        let flavors = latest
            .entry(spec.name)
            .or_default()
            .entry(spec.version)
            .or_default();
        if let Some(flavor) = spec.flavor {
            flavors.insert(flavor);
        }
    }
    Ok(latest)
}
