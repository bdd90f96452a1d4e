//! # Hostile Common
//!
//! Foundational types shared by the hostile NPC decision engine:
//! - Unit, group and lock identifiers
//! - Zone positions and grid cells
//! - Common error types
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod coords;
pub mod error;
pub mod ids;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::ids::*;
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_to_cell_roundtrip() {
        let cell = CellCoord::new(4, -2);
        assert_eq!(cell.center().cell(), cell);
    }

    #[test]
    fn test_zone_error_converts() {
        let err: HostileError = ZoneError::UnitNotFound(UnitId::from_raw(9)).into();
        assert!(err.to_string().contains("unit#9"));
    }
}
