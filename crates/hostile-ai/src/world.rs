//! Collaborator interfaces the engine consumes.
//!
//! Terrain, unit registry, rewards and structures are owned elsewhere; the
//! engine only ever queries them through these traits.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use hostile_common::{Position, UnitId, ZoneError};

bitflags! {
    /// What stopped a line-of-sight ray.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct BlockingFlags: u8 {
        /// Terrain heightmap
        const TERRAIN = 0b0001;
        /// Buildings and walls
        const STRUCTURE = 0b0010;
        /// Trees and plants
        const VEGETATION = 0b0100;
        /// Low cover, ignored by ballistic shots
        const LOW_COVER = 0b1000;
    }
}

/// Outcome of a line-of-sight query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LosResult {
    /// The ray hit something before reaching the target
    pub hit: bool,
    /// Everything the ray touched
    pub blocking: BlockingFlags,
}

impl LosResult {
    /// A clear line of sight.
    pub const CLEAR: Self = Self {
        hit: false,
        blocking: BlockingFlags::empty(),
    };

    /// Returns whether nothing blocked the ray.
    #[must_use]
    pub const fn is_clear(&self) -> bool {
        !self.hit
    }
}

/// Broad classification of a zone unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    /// Player controlled robot
    Player,
    /// Another NPC
    Npc,
    /// Static structure
    Structure,
}

/// What the engine may know about a unit at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitInfo {
    /// Unit identity
    pub id: UnitId,
    /// Classification
    pub kind: UnitKind,
    /// Current position
    pub position: Position,
    /// Not destroyed
    pub alive: bool,
    /// Still present in this zone
    pub in_zone: bool,
    /// Can be target-locked
    pub lockable: bool,
    /// Can be attacked
    pub attackable: bool,
    /// Currently immune to damage
    pub invulnerable: bool,
    /// Currently visible (not cloaked)
    pub visible: bool,
    /// Unit this one holds as its primary lock
    pub primary_target: Option<UnitId>,
    /// Ally this one is currently repairing or boosting
    pub assisting: Option<UnitId>,
}

impl UnitInfo {
    /// A visible, attackable, alive player at `position`.
    #[must_use]
    pub fn player(id: UnitId, position: Position) -> Self {
        Self {
            id,
            kind: UnitKind::Player,
            position,
            alive: true,
            in_zone: true,
            lockable: true,
            attackable: true,
            invulnerable: false,
            visible: true,
            primary_target: None,
            assisting: None,
        }
    }

    /// Returns whether the unit is a player.
    #[must_use]
    pub fn is_player(&self) -> bool {
        self.kind == UnitKind::Player
    }

    /// Returns whether the unit can be tracked as a hostile at all.
    #[must_use]
    pub fn is_targetable(&self) -> bool {
        self.alive && self.in_zone && self.attackable && !self.invulnerable
    }

    /// Returns whether the unit may be locked right now.
    #[must_use]
    pub fn is_lockable_now(&self) -> bool {
        self.is_targetable() && self.lockable && self.visible
    }
}

/// Terrain and unit queries for one zone.
pub trait ZoneQuery: Send + Sync {
    /// Checks whether a cell can be walked by a unit climbing at most `max_slope`.
    fn is_walkable(&self, x: i32, y: i32, max_slope: f32) -> bool;

    /// Casts a ray between two points. Ballistic rays arc over low cover.
    fn line_of_sight(&self, from: Position, to: Position, ballistic: bool) -> LosResult;

    /// All units within `radius` of `center`.
    fn units_in_range(&self, center: Position, radius: f32) -> Vec<UnitInfo>;

    /// Looks up a single unit.
    fn unit(&self, id: UnitId) -> Option<UnitInfo>;

    /// An agent moved. Zones that track agent positions themselves can ignore this.
    fn unit_moved(&self, _unit: UnitId, _position: Position) {}
}

/// Experience and loot payout.
///
/// Payouts for one kill arrive between [`RewardSink::begin_rewards`] and
/// either [`RewardSink::commit_rewards`] or [`RewardSink::rollback_rewards`].
/// A rollback must undo everything applied since the matching begin,
/// including stability changes made through [`StructureSink`] on the same
/// sink.
pub trait RewardSink: Send {
    /// Opens a payout batch for `agent`'s death.
    fn begin_rewards(&mut self, agent: UnitId);

    /// Makes the open batch permanent.
    fn commit_rewards(&mut self, agent: UnitId);

    /// Discards every payout of the open batch.
    fn rollback_rewards(&mut self, agent: UnitId);

    /// Credits experience for participating in a kill.
    fn award_experience(&mut self, unit: UnitId, amount: f64) -> Result<(), String>;

    /// Spawns a loot container at `at` owned by `owners`, filled by `generator`.
    fn spawn_loot(&mut self, owners: &[UnitId], generator: u32, at: Position)
        -> Result<(), String>;
}

/// Structure stability side effects triggered by bosses.
pub trait StructureSink: Send {
    /// Adds (or removes, when negative) stability points on a structure.
    fn adjust_stability(&mut self, structure: UnitId, points: i32) -> Result<(), ZoneError>;
}

/// Hook invoked at transaction boundaries the engine does not own.
pub trait PersistenceSink: Send {
    /// Persists the agent's state after a committed change.
    fn save(&mut self, agent: UnitId);
}

/// Payout recorded by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payout {
    /// Experience award
    Experience {
        /// Recipient
        unit: UnitId,
        /// Amount
        amount: f64,
    },
    /// Loot container
    Loot {
        /// Owners of the container
        owners: Vec<UnitId>,
        /// Loot generator id
        generator: u32,
    },
    /// Stability change
    Stability {
        /// Structure
        structure: UnitId,
        /// Points added
        points: i32,
    },
    /// Save hook call
    Saved {
        /// Agent saved
        agent: UnitId,
    },
}

/// Sink implementation that records every call, used by tests and the demo.
///
/// Payouts made inside a batch are held back until the batch commits.
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Committed payouts in call order
    pub payouts: Vec<Payout>,
    /// Payouts of the open batch
    pub pending: Option<Vec<Payout>>,
    /// Structures that exist
    pub structures: Vec<UnitId>,
    /// Units whose payouts are refused
    pub refuse: Vec<UnitId>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a structure that stability changes may target.
    #[must_use]
    pub fn with_structure(mut self, structure: UnitId) -> Self {
        self.structures.push(structure);
        self
    }

    /// Total experience credited to `unit`.
    #[must_use]
    pub fn experience_of(&self, unit: UnitId) -> f64 {
        self.payouts
            .iter()
            .filter_map(|p| match p {
                Payout::Experience { unit: u, amount } if *u == unit => Some(*amount),
                _ => None,
            })
            .sum()
    }

    fn record(&mut self, payout: Payout) {
        match self.pending.as_mut() {
            Some(batch) => batch.push(payout),
            None => self.payouts.push(payout),
        }
    }
}

impl RewardSink for RecordingSink {
    fn begin_rewards(&mut self, _agent: UnitId) {
        self.pending = Some(Vec::new());
    }

    fn commit_rewards(&mut self, _agent: UnitId) {
        if let Some(batch) = self.pending.take() {
            self.payouts.extend(batch);
        }
    }

    fn rollback_rewards(&mut self, _agent: UnitId) {
        self.pending = None;
    }

    fn award_experience(&mut self, unit: UnitId, amount: f64) -> Result<(), String> {
        if self.refuse.contains(&unit) {
            return Err(format!("{unit} refused"));
        }
        self.record(Payout::Experience { unit, amount });
        Ok(())
    }

    fn spawn_loot(
        &mut self,
        owners: &[UnitId],
        generator: u32,
        _at: Position,
    ) -> Result<(), String> {
        self.record(Payout::Loot {
            owners: owners.to_vec(),
            generator,
        });
        Ok(())
    }
}

impl StructureSink for RecordingSink {
    fn adjust_stability(&mut self, structure: UnitId, points: i32) -> Result<(), ZoneError> {
        if !self.structures.contains(&structure) {
            return Err(ZoneError::StructureNotFound(structure));
        }
        self.record(Payout::Stability { structure, points });
        Ok(())
    }
}

impl PersistenceSink for RecordingSink {
    fn save(&mut self, agent: UnitId) {
        self.payouts.push(Payout::Saved { agent });
    }
}
