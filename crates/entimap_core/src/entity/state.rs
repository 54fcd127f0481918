//! Entity lifecycle state.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle phase of an entity.
///
/// ```text
/// New ──(successful insert)──> Persisted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    /// Not yet written to storage.
    New,
    /// Backed by a storage row.
    Persisted,
}

impl EntityState {
    /// Returns `true` for [`EntityState::New`].
    #[must_use]
    pub const fn is_new(self) -> bool {
        matches!(self, Self::New)
    }

    /// Returns `true` for [`EntityState::Persisted`].
    #[must_use]
    pub const fn is_persisted(self) -> bool {
        matches!(self, Self::Persisted)
    }

    /// Returns the textual form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Persisted => "persisted",
        }
    }

    /// Parses the textual form.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for anything but `"new"` and
    /// `"persisted"`.
    pub fn parse(value: &str) -> CoreResult<Self> {
        match value {
            "new" => Ok(Self::New),
            "persisted" => Ok(Self::Persisted),
            other => Err(CoreError::invalid_argument(format!(
                "unknown entity state {other:?}"
            ))),
        }
    }
}

impl FromStr for EntityState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
