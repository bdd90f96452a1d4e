//! Module activation engine.
//!
//! Each module kind maps to exactly one activation rule through
//! [`activation_rule`]. Rules are evaluated on a fixed cadence per module and
//! read only a [`ModuleContext`] snapshot, so they stay pure.

use serde::{Deserialize, Serialize};

use hostile_common::{LockId, Position, UnitId};

use crate::config::AiTuning;
use crate::targeting::{select_target, Candidate, LockSet, PrimaryStrategy};

/// Every module kind the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleKind {
    /// Direct-fire weapon, needs a straight line of sight
    DirectWeapon,
    /// Indirect weapon, fires over low cover
    IndirectWeapon,
    /// Armor repairer
    ArmorRepairer,
    /// Self-shield
    ShieldGenerator,
    /// Lock-breaking jammer
    SensorJammer,
    /// Lock-range dampener
    SensorDampener,
    /// Speed-reducing webber
    Webber,
    /// Core neutralizer
    EnergyNeutralizer,
    /// Visibility blinder
    Blinder,
    /// Area blob emitter
    BlobEmitter,
    /// Core drainer
    EnergyDrainer,
    /// Passive booster
    Booster,
}

/// Broad rule family a kind belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFamily {
    /// Fires on the primary lock
    Weapon,
    /// Reacts to the agent's own armor
    Defensive,
    /// Picks its own target among locks
    Debuff,
    /// Runs continuously
    Passive,
}

impl ModuleKind {
    /// Rule family.
    #[must_use]
    pub const fn family(self) -> ModuleFamily {
        match self {
            Self::DirectWeapon | Self::IndirectWeapon => ModuleFamily::Weapon,
            Self::ArmorRepairer | Self::ShieldGenerator => ModuleFamily::Defensive,
            Self::SensorJammer
            | Self::SensorDampener
            | Self::Webber
            | Self::EnergyNeutralizer
            | Self::Blinder
            | Self::BlobEmitter
            | Self::EnergyDrainer => ModuleFamily::Debuff,
            Self::Booster => ModuleFamily::Passive,
        }
    }

    /// Returns whether the module arcs over low cover.
    #[must_use]
    pub const fn is_ballistic(self) -> bool {
        matches!(self, Self::IndirectWeapon)
    }

    /// Returns whether firing requires a clear line of sight.
    #[must_use]
    pub const fn needs_line_of_sight(self) -> bool {
        matches!(
            self,
            Self::DirectWeapon | Self::IndirectWeapon | Self::EnergyNeutralizer | Self::EnergyDrainer
        )
    }
}

/// Activation state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleState {
    /// Not running
    Idle,
    /// Fired this cycle
    Active,
    /// Running on its own every cycle
    Repeating,
}

/// A module fitted to an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Kind
    pub kind: ModuleKind,
    /// Effective range
    pub optimal_range: f32,
    /// Current state
    pub state: ModuleState,
    /// Lock the module is using
    pub lock: Option<LockId>,
    /// Seconds until the next decision
    timer: f32,
}

impl Module {
    /// Creates an idle module.
    #[must_use]
    pub const fn new(kind: ModuleKind, optimal_range: f32) -> Self {
        Self {
            kind,
            optimal_range,
            state: ModuleState::Idle,
            lock: None,
            timer: 0.0,
        }
    }

    /// Stops the module and releases its lock.
    pub fn reset(&mut self) {
        self.state = ModuleState::Idle;
        self.lock = None;
        self.timer = 0.0;
    }
}

/// Read-only view handed to activation rules.
pub struct ModuleContext<'a> {
    /// Agent position
    pub position: Position,
    /// Armor ratio, 0..=1
    pub armor: f32,
    /// Core (energy) ratio, 0..=1
    pub core: f32,
    /// A self-shield is currently up
    pub shield_active: bool,
    /// Agent locks
    pub locks: &'a LockSet,
    /// Eligible hostiles this tick
    pub candidates: &'a [Candidate],
    /// Line-of-sight check: `(from, to, ballistic) -> clear`
    pub line_of_sight: &'a dyn Fn(Position, Position, bool) -> bool,
    /// Thresholds
    pub tuning: &'a AiTuning,
}

impl ModuleContext<'_> {
    fn position_of(&self, unit: UnitId) -> Option<Position> {
        self.candidates
            .iter()
            .find(|c| c.unit == unit)
            .map(|c| c.position)
    }

    fn locked_candidates(&self) -> Vec<Candidate> {
        self.candidates
            .iter()
            .filter(|c| self.locks.find(c.unit).is_some_and(|l| l.is_locked()))
            .copied()
            .collect()
    }
}

/// What a rule decided for one module this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    /// Stay or go idle
    Hold,
    /// Fire once
    Fire {
        /// Lock used
        lock: Option<LockId>,
        /// Target unit
        target: Option<UnitId>,
    },
    /// Switch to repeating
    Repeat,
}

/// A module firing, reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Activated {
    /// Module kind
    pub kind: ModuleKind,
    /// Target, for targeted modules
    pub target: Option<UnitId>,
}

/// Decides whether `module` fires given `ctx`.
pub fn activation_rule(
    module: &Module,
    ctx: &ModuleContext<'_>,
    rng: &mut fastrand::Rng,
) -> Activation {
    let tuning = ctx.tuning;
    match module.kind {
        ModuleKind::DirectWeapon | ModuleKind::IndirectWeapon => {
            if ctx.shield_active {
                return Activation::Hold;
            }
            let Some(primary) = ctx.locks.primary().filter(|l| l.is_locked()) else {
                return Activation::Hold;
            };
            let Some(at) = ctx.position_of(primary.target) else {
                return Activation::Hold;
            };
            if !(ctx.line_of_sight)(ctx.position, at, module.kind.is_ballistic()) {
                return Activation::Hold;
            }
            Activation::Fire {
                lock: Some(primary.id),
                target: Some(primary.target),
            }
        },
        ModuleKind::ArmorRepairer => {
            if ctx.armor < tuning.repair_armor_below && ctx.core > tuning.repair_core_above {
                Activation::Fire {
                    lock: None,
                    target: None,
                }
            } else {
                Activation::Hold
            }
        },
        ModuleKind::ShieldGenerator => {
            if ctx.armor < tuning.shield_armor_below {
                Activation::Fire {
                    lock: None,
                    target: None,
                }
            } else {
                Activation::Hold
            }
        },
        ModuleKind::SensorJammer
        | ModuleKind::SensorDampener
        | ModuleKind::Webber
        | ModuleKind::EnergyNeutralizer
        | ModuleKind::Blinder
        | ModuleKind::BlobEmitter
        | ModuleKind::EnergyDrainer => {
            if ctx.core < tuning.debuff_core_above {
                return Activation::Hold;
            }
            let locked = ctx.locked_candidates();
            let Some(target) =
                select_target(PrimaryStrategy::OptimalRange, &locked, module.optimal_range, rng)
            else {
                return Activation::Hold;
            };
            if module.kind.needs_line_of_sight() {
                let clear = ctx
                    .position_of(target)
                    .is_some_and(|at| (ctx.line_of_sight)(ctx.position, at, false));
                if !clear {
                    return Activation::Hold;
                }
            }
            Activation::Fire {
                lock: ctx.locks.find(target).map(|l| l.id),
                target: Some(target),
            }
        },
        ModuleKind::Booster => {
            if module.state == ModuleState::Idle {
                Activation::Repeat
            } else {
                Activation::Hold
            }
        },
    }
}

/// All modules fitted to one agent.
#[derive(Debug, Clone, Default)]
pub struct ModuleRack {
    modules: Vec<Module>,
}

impl ModuleRack {
    /// Creates a rack from fitted modules.
    #[must_use]
    pub fn new(modules: Vec<Module>) -> Self {
        Self { modules }
    }

    /// Fitted modules.
    #[must_use]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Returns whether a shield generator is currently up.
    #[must_use]
    pub fn shield_active(&self) -> bool {
        self.modules
            .iter()
            .any(|m| m.kind == ModuleKind::ShieldGenerator && m.state == ModuleState::Active)
    }

    /// Longest weapon range, used as the agent's combat range.
    #[must_use]
    pub fn weapon_range(&self) -> Option<f32> {
        self.modules
            .iter()
            .filter(|m| m.kind.family() == ModuleFamily::Weapon)
            .map(|m| m.optimal_range)
            .reduce(f32::max)
    }

    /// Returns whether any weapon is ballistic.
    #[must_use]
    pub fn has_ballistic_weapon(&self) -> bool {
        self.modules.iter().any(|m| m.kind.is_ballistic())
    }

    /// Stops every module.
    pub fn reset(&mut self) {
        for module in &mut self.modules {
            module.reset();
        }
    }

    /// Drops module references to a lock that no longer exists.
    pub fn release_lock(&mut self, lock: LockId) {
        for module in &mut self.modules {
            if module.lock == Some(lock) {
                module.lock = None;
                if module.state == ModuleState::Active {
                    module.state = ModuleState::Idle;
                }
            }
        }
    }

    /// Runs every module whose cadence elapsed and reports what fired.
    pub fn update(
        &mut self,
        dt: f32,
        ctx: &ModuleContext<'_>,
        rng: &mut fastrand::Rng,
    ) -> Vec<Activated> {
        let mut fired = Vec::new();
        for module in &mut self.modules {
            module.timer -= dt;
            if module.timer > 0.0 {
                continue;
            }
            module.timer = ctx.tuning.module_cycle_secs;

            match activation_rule(module, ctx, rng) {
                Activation::Fire { lock, target } => {
                    module.state = ModuleState::Active;
                    module.lock = lock;
                    fired.push(Activated {
                        kind: module.kind,
                        target,
                    });
                },
                Activation::Repeat => {
                    module.state = ModuleState::Repeating;
                    fired.push(Activated {
                        kind: module.kind,
                        target: None,
                    });
                },
                Activation::Hold => {
                    if module.state == ModuleState::Active {
                        module.state = ModuleState::Idle;
                        module.lock = None;
                    }
                },
            }
        }
        fired
    }
}
