//! Strongly-typed identifiers for wamem entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an arena.
///
/// Only used to correlate log events across an arena's lifetime; it has no
/// meaning to the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArenaId(Uuid);

impl ArenaId {
    /// Create a new random arena ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an arena ID from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ArenaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arena_{}", self.0)
    }
}

/// Identifier of a file mapping within one guarded arena.
///
/// Ids are assigned sequentially by the owning arena, starting at 0, and
/// are never reused within that arena.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MappingId(i32);

impl MappingId {
    /// Create a mapping ID from a raw value.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_i32(&self) -> i32 {
        self.0
    }

    /// The ID following this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for MappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mapping_{}", self.0)
    }
}

impl From<i32> for MappingId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}
