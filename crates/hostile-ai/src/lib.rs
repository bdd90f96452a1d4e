//! # Hostile AI
//!
//! Decision engine for hostile NPCs in a persistent zone.
//!
//! This crate provides:
//! - Threat ledger and pseudo-threat tracking
//! - Target acquisition with lock timing and primary selection
//! - Module activation rules (weapons, repairers, shields, debuffs)
//! - Asynchronous, cancellable A* repositioning
//! - A stack-based behavior state machine
//! - Group threat fan-out, call-for-help and boss hooks
//! - Kill reward attribution
//! - Event bus for collaborators (visibility, scripting, quests)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod agent;
pub mod behavior;
pub mod boss;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod grid_zone;
pub mod group;
pub mod modules;
pub mod pathfinder;
pub mod pseudo_threat;
pub mod reward;
pub mod sampling;
pub mod targeting;
pub mod threat;
pub mod world;
pub mod zone;


/// Prelude for convenient imports
pub mod prelude {
    pub use crate::agent::*;
    pub use crate::behavior::*;
    pub use crate::boss::*;
    pub use crate::clock::*;
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::events::*;
    pub use crate::grid_zone::*;
    pub use crate::group::*;
    pub use crate::modules::*;
    pub use crate::pathfinder::*;
    pub use crate::pseudo_threat::*;
    pub use crate::reward::*;
    pub use crate::sampling::*;
    pub use crate::targeting::*;
    pub use crate::threat::*;
    pub use crate::world::*;
    pub use crate::zone::*;
}

pub use prelude::*;
