//! Package versions and version ranges.
//!
//! Versions are dotted sequences of numbers (`1.2.3`) compared
//! component-wise. Ranges are provided by the [`version_ranges`] crate, which
//! gives us intersection, union and complement for free.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use itertools::Itertools;

/// A set of versions. Dependencies, user constraints and preferences are all
/// expressed as ranges.
pub type VersionRange = version_ranges::Ranges<Version>;

/// A dotted numeric version such as `1.10.2`.
///
/// Versions compare lexicographically by component, so `1.2 < 1.2.0 < 1.10`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(into = "String", try_from = "String"))]
pub struct Version(Vec<u32>);

impl Version {
    /// Constructs a version from its components.
    pub fn new(components: impl IntoIterator<Item = u32>) -> Self {
        Self(components.into_iter().collect())
    }

    /// Returns the components of this version.
    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// Returns the smallest version that is strictly larger than this version
    /// and all of its extensions, e.g. `1.2` becomes `1.3`. Useful to express
    /// "major compatible" ranges.
    pub fn bump_last(&self) -> Self {
        let mut components = self.0.clone();
        match components.last_mut() {
            Some(last) => *last += 1,
            None => components.push(1),
        }
        Self(components)
    }
}

impl From<u32> for Version {
    fn from(value: u32) -> Self {
        Self(vec![value])
    }
}

impl From<&[u32]> for Version {
    fn from(value: &[u32]) -> Self {
        Self(value.to_vec())
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().format("."))
    }
}

/// Returned when a string does not describe a valid [`Version`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version '{0}'")]
pub struct ParseVersionError(String);

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseVersionError(s.to_string()));
        }
        s.split('.')
            .map(u32::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
            .map_err(|_| ParseVersionError(s.to_string()))
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Version {
    type Error = ParseVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
