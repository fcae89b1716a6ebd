//! Typed identifiers.
//!
//! [`PreviewId`] is a newtype over `Uuid` whose textual form carries a
//! `preview_` prefix. The textual form doubles as the name of the session's
//! output directory, so it is also what the API hands out and accepts.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const PREFIX: &str = "preview_";

/// Unique identifier for a preview session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PreviewId(Uuid);

impl PreviewId {
    /// Create a new random ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return the inner UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PreviewId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PreviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0.simple())
    }
}

impl FromStr for PreviewId {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|e| crate::Error::invalid_input(format!("malformed preview id '{s}': {e}")))
    }
}

impl From<Uuid> for PreviewId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<PreviewId> for Uuid {
    fn from(id: PreviewId) -> Self {
        id.0
    }
}

impl Serialize for PreviewId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PreviewId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
