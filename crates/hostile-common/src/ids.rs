//! ID types for units, groups and locks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for unit IDs.
static UNIT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Global counter for lock IDs.
static LOCK_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for any unit in a zone (player, NPC or structure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(u64);

impl UnitId {
    /// Creates a new unique unit ID.
    #[must_use]
    pub fn new() -> Self {
        Self(UNIT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a unit ID from a raw value (for deserialization).
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Null/invalid unit ID.
    pub const NULL: Self = Self(0);

    /// Checks if this is a valid (non-null) unit ID.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// Identifier for a named NPC group (flock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(u32);

impl GroupId {
    /// Creates a group ID from a raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

/// Identifier for a targeting lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockId(u64);

impl LockId {
    /// Creates a new unique lock ID.
    #[must_use]
    pub fn next() -> Self {
        Self(LOCK_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a lock ID from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}
