//! Validated device identities

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Minimum identity length after trimming, in characters
pub const MIN_IDENTITY_LEN: usize = 3;

/// Maximum identity length after trimming, in characters
pub const MAX_IDENTITY_LEN: usize = 64;

/// The unique name a device registers under
///
/// Always stored trimmed. Comparison is case-sensitive.
///
/// Deserializing applies the same validation as [`DeviceIdentity::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Validate and normalize a candidate identity
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidIdentity` if the trimmed candidate is not
    /// between 3 and 64 characters long
    pub fn parse(candidate: &str) -> Result<Self> {
        let trimmed = candidate.trim();
        let len = trimmed.chars().count();
        if !(MIN_IDENTITY_LEN..=MAX_IDENTITY_LEN).contains(&len) {
            return Err(Error::InvalidIdentity(format!(
                "identity must be {MIN_IDENTITY_LEN}-{MAX_IDENTITY_LEN} characters, got {len}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the identity as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for DeviceIdentity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceIdentity {
    type Error = Error;

    fn try_from(candidate: String) -> Result<Self> {
        Self::parse(&candidate)
    }
}

impl From<DeviceIdentity> for String {
    fn from(identity: DeviceIdentity) -> Self {
        identity.0
    }
}

impl std::str::FromStr for DeviceIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
