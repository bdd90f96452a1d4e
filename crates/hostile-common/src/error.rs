//! Error types shared across the hostile NPC engine.

use crate::ids::UnitId;
use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum HostileError {
    /// Zone collaborator errors
    #[error("Zone error: {0}")]
    Zone(#[from] ZoneError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by zone collaborators (terrain, unit registry, structures).
#[derive(Debug, Error)]
pub enum ZoneError {
    /// Unit is not present in the zone
    #[error("Unit not found: {0}")]
    UnitNotFound(UnitId),

    /// Cell outside the zone bounds
    #[error("Cell ({x}, {y}) is outside the zone")]
    OutOfBounds {
        /// X cell index
        x: i32,
        /// Y cell index
        y: i32,
    },

    /// Linked structure could not be resolved
    #[error("Structure not found: {0}")]
    StructureNotFound(UnitId),
}

/// Result type alias for top-level operations.
pub type HostileResult<T> = Result<T, HostileError>;
