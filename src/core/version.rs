use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::VersionError;

/// Control API version, written `<major>.<minor>`.
///
/// Deliberately not `Ord`: the only relations a node range needs are
/// [`ApiVersion::lower_or_equals`] and [`ApiVersion::greater_or_equals`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn parse(s: &str) -> Result<Self, VersionError> {
        s.parse()
    }

    /// True if `self` is lower than or equal to `other`
    pub fn lower_or_equals(&self, other: ApiVersion) -> bool {
        if self.major > other.major {
            return false;
        }
        self.major < other.major || self.minor <= other.minor
    }

    /// True if `self` is greater than or equal to `other`
    pub fn greater_or_equals(&self, other: ApiVersion) -> bool {
        if self.major < other.major {
            return false;
        }
        self.major > other.major || self.minor >= other.minor
    }
}

impl FromStr for ApiVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || VersionError::MalformedVersion(s.to_string());

        let mut parts = s.split('.');
        let (major, minor) = match (parts.next(), parts.next(), parts.next()) {
            (Some(major), Some(minor), None) => (major, minor),
            _ => return Err(malformed()),
        };

        Ok(Self {
            major: major.parse().map_err(|_| malformed())?,
            minor: minor.parse().map_err(|_| malformed())?,
        })
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// On the wire a version is the plain "major.minor" string.
impl Serialize for ApiVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
