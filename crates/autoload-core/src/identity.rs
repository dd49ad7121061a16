//! Module identities and versions.
//!
//! A [`ModuleIdentity`] is the key used both to register a module and to ask
//! for one. Equality is exact; looser comparisons (case-insensitive names,
//! version ranges) belong to the backends.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Four-part module version: `major.minor.build.revision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub revision: u32,
}

impl ModuleVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for ModuleVersion {
    type Err = Error;

    /// Parses one to four dot-separated parts; missing parts are zero.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let parts: Vec<&str> = s.split('.').collect();
        if s.is_empty() || parts.len() > 4 {
            return Err(Error::InvalidVersion(s.to_string()));
        }

        let mut nums = [0u32; 4];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| Error::InvalidVersion(s.to_string()))?;
        }

        Ok(Self::new(nums[0], nums[1], nums[2], nums[3]))
    }
}

impl TryFrom<String> for ModuleVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ModuleVersion> for String {
    fn from(value: ModuleVersion) -> Self {
        value.to_string()
    }
}

/// Inclusive version range, as used by redirect rules (`"1.0-1.9.9.9"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    pub low: ModuleVersion,
    pub high: ModuleVersion,
}

impl VersionRange {
    #[must_use]
    pub fn contains(&self, version: ModuleVersion) -> bool {
        self.low <= version && version <= self.high
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.low == self.high {
            write!(f, "{}", self.low)
        } else {
            write!(f, "{}-{}", self.low, self.high)
        }
    }
}

impl FromStr for VersionRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (low, high) = match s.split_once('-') {
            Some((low, high)) => (low.parse()?, high.parse()?),
            None => {
                let v: ModuleVersion = s.parse()?;
                (v, v)
            }
        };
        if low > high {
            return Err(Error::InvalidVersion(s.to_string()));
        }
        Ok(Self { low, high })
    }
}

impl TryFrom<String> for VersionRange {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<VersionRange> for String {
    fn from(value: VersionRange) -> Self {
        value.to_string()
    }
}

/// Identity of a module: name, version and optional strong-identity token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleIdentity {
    pub name: String,
    pub version: ModuleVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ModuleIdentity {
    #[must_use]
    pub fn new(name: impl Into<String>, version: ModuleVersion) -> Self {
        Self {
            name: name.into(),
            version,
            token: None,
        }
    }

    /// Whether `name` can stand for a single file name inside a probing
    /// directory: non-empty, no separators, not `.` or `..`.
    #[must_use]
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', ':', '\0'])
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Same module family: names equal ignoring ASCII case, and tokens equal
    /// whenever `self` carries one.
    #[must_use]
    pub fn same_family(&self, candidate: &ModuleIdentity) -> bool {
        if !self.name.eq_ignore_ascii_case(&candidate.name) {
            return false;
        }
        match &self.token {
            Some(token) => candidate
                .token
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case(token)),
            None => true,
        }
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)?;
        if let Some(token) = &self.token {
            write!(f, "#{token}")?;
        }
        Ok(())
    }
}

impl FromStr for ModuleIdentity {
    type Err = Error;

    /// Parses `Name@1.2.0.0` or `Name@1.2.0.0#token`. A bare `Name` means version 0.
    fn from_str(s: &str) -> Result<Self> {
        let (rest, token) = match s.split_once('#') {
            Some((rest, token)) if !token.is_empty() => (rest, Some(token.to_string())),
            Some(_) => return Err(Error::InvalidIdentity(s.to_string())),
            None => (s, None),
        };
        let (name, version) = match rest.split_once('@') {
            Some((name, version)) => (name, version.parse()?),
            None => (rest, ModuleVersion::default()),
        };
        let name = name.trim();
        if !Self::is_valid_name(name) {
            return Err(Error::InvalidIdentity(s.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            version,
            token,
        })
    }
}
