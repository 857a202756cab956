//! Identifier types used throughout the realm workspace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Maximum length of a sandbox identifier.
const MAX_ID_LEN: usize = 128;

/// Unique identifier for one running micro-application instance.
///
/// Hosts usually pick readable ids (the application name); `generate`
/// produces a time-ordered UUID v7 id for anonymous instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SandboxId(String);

impl SandboxId {
    /// Creates a sandbox id from a host-chosen name.
    ///
    /// The name must be non-empty, at most 128 bytes, and made of ASCII
    /// alphanumerics, `-`, `_`, `.` or `:`.
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_ID_LEN {
            return Err(Error::InvalidSandboxId(name));
        }
        let valid = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
        if !valid {
            return Err(Error::InvalidSandboxId(name));
        }
        Ok(Self(name))
    }

    /// Creates a fresh, globally unique id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("sandbox-{}", Uuid::now_v7()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SandboxId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SandboxId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SandboxId> for String {
    fn from(id: SandboxId) -> Self {
        id.0
    }
}
