//! Behavior state machine.
//!
//! Each agent carries a stack of states; only the top one runs. [`decide`]
//! is a pure function from the top state and a [`DecisionView`] to a
//! [`Transition`], so every transition can be tested without a zone.

use serde::{Deserialize, Serialize};

use hostile_common::{Position, UnitId};

// ============================================================================
// States
// ============================================================================

/// Discriminant of a [`BehaviorState`], used in events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateTag {
    /// Mobile idle
    Idle,
    /// Immobile idle
    StationaryIdle,
    /// Returning home
    Homing,
    /// Mobile combat
    Aggressor,
    /// Immobile combat
    StationaryCombat,
}

/// Idle-local data.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IdleState {
    /// Seconds until the next roam
    pub roam_in: f32,
    /// Seconds until the next body-pull scan
    pub scan_in: f32,
}

/// Homing-local data.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HomingState {
    /// Point near home being walked to
    pub destination: Option<Position>,
    /// Seconds before a failed request is retried
    pub retry_in: f32,
    /// A path request is outstanding
    pub requested: bool,
    /// Destination reached
    pub arrived: bool,
}

/// Combat-local data, shared by both combat states.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CombatState {
    /// Seconds until the next threat scan
    pub scan_in: f32,
    /// Seconds until a new firing position may be requested
    pub reposition_in: f32,
    /// Hostile the outstanding firing-position request is for
    pub seeking: Option<UnitId>,
}

/// One entry of the behavior stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BehaviorState {
    /// Wander near home
    Idle(IdleState),
    /// Wait in place
    StationaryIdle(IdleState),
    /// Walk back home
    Homing(HomingState),
    /// Chase and fight
    Aggressor(CombatState),
    /// Fight in place
    StationaryCombat(CombatState),
}

impl BehaviorState {
    /// Tag of this state.
    #[must_use]
    pub const fn tag(&self) -> StateTag {
        match self {
            Self::Idle(_) => StateTag::Idle,
            Self::StationaryIdle(_) => StateTag::StationaryIdle,
            Self::Homing(_) => StateTag::Homing,
            Self::Aggressor(_) => StateTag::Aggressor,
            Self::StationaryCombat(_) => StateTag::StationaryCombat,
        }
    }

    /// Fresh base state for a mobile or immobile agent.
    #[must_use]
    pub fn base(mobile: bool) -> Self {
        if mobile {
            Self::Idle(IdleState::default())
        } else {
            Self::StationaryIdle(IdleState::default())
        }
    }

    /// Fresh homing state.
    #[must_use]
    pub fn homing() -> Self {
        Self::Homing(HomingState::default())
    }

    /// Fresh combat state for a mobile or immobile agent.
    #[must_use]
    pub fn combat(mobile: bool) -> Self {
        if mobile {
            Self::Aggressor(CombatState::default())
        } else {
            Self::StationaryCombat(CombatState::default())
        }
    }

    /// Returns whether this is one of the combat states.
    #[must_use]
    pub const fn is_combat(&self) -> bool {
        matches!(self, Self::Aggressor(_) | Self::StationaryCombat(_))
    }
}

// ============================================================================
// Transitions
// ============================================================================

/// What the stack should do this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// Keep the current top
    Stay,
    /// Push a new state over the current one
    Push(BehaviorState),
    /// Return to the state underneath
    Pop,
    /// Swap the top for another state
    Replace(BehaviorState),
}

/// Facts about the agent a transition may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DecisionView {
    /// Agent can move
    pub mobile: bool,
    /// Agent never engages on its own
    pub passive: bool,
    /// Threat ledger has at least one hostile
    pub has_threat: bool,
    /// Agent is farther from home than its home range
    pub out_of_home_range: bool,
}

/// Picks the transition for `top`.
pub fn decide(top: &BehaviorState, view: &DecisionView) -> Transition {
    match top {
        BehaviorState::Idle(_) => {
            if view.out_of_home_range {
                Transition::Push(BehaviorState::homing())
            } else if view.has_threat && !view.passive {
                Transition::Push(BehaviorState::combat(true))
            } else {
                Transition::Stay
            }
        },
        BehaviorState::StationaryIdle(_) => {
            if view.has_threat && !view.passive {
                Transition::Push(BehaviorState::combat(false))
            } else {
                Transition::Stay
            }
        },
        BehaviorState::Homing(homing) => {
            if homing.arrived {
                Transition::Pop
            } else {
                Transition::Stay
            }
        },
        BehaviorState::Aggressor(_) => {
            if view.out_of_home_range {
                Transition::Push(BehaviorState::homing())
            } else if !view.has_threat {
                Transition::Replace(BehaviorState::homing())
            } else {
                Transition::Stay
            }
        },
        BehaviorState::StationaryCombat(_) => {
            if view.out_of_home_range && view.mobile {
                Transition::Push(BehaviorState::homing())
            } else if !view.has_threat {
                Transition::Pop
            } else {
                Transition::Stay
            }
        },
    }
}

// ============================================================================
// Stack
// ============================================================================

/// The per-agent state stack. The bottom state is never popped.
#[derive(Debug, Clone, PartialEq)]
pub struct StateStack {
    states: Vec<BehaviorState>,
}

impl StateStack {
    /// Creates a stack holding only `base`.
    #[must_use]
    pub fn new(base: BehaviorState) -> Self {
        Self { states: vec![base] }
    }

    /// Current top state.
    #[must_use]
    pub fn top(&self) -> &BehaviorState {
        // The base is never removed
        &self.states[self.states.len() - 1]
    }

    /// Mutable top state.
    pub fn top_mut(&mut self) -> &mut BehaviorState {
        let last = self.states.len() - 1;
        &mut self.states[last]
    }

    /// Tag of the top state.
    #[must_use]
    pub fn top_tag(&self) -> StateTag {
        self.top().tag()
    }

    /// Stack depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.states.len()
    }

    /// Tags from bottom to top.
    #[must_use]
    pub fn tags(&self) -> Vec<StateTag> {
        self.states.iter().map(BehaviorState::tag).collect()
    }

    /// Applies a transition and returns whether the top changed.
    ///
    /// Replacing the base pushes instead so the base survives.
    pub fn apply(&mut self, transition: Transition) -> bool {
        match transition {
            Transition::Stay => false,
            Transition::Push(state) => {
                self.states.push(state);
                true
            },
            Transition::Pop => {
                if self.states.len() > 1 {
                    self.states.pop();
                    true
                } else {
                    false
                }
            },
            Transition::Replace(state) => {
                if self.states.len() > 1 {
                    *self.top_mut() = state;
                } else {
                    self.states.push(state);
                }
                true
            },
        }
    }

    /// Drops everything above the base and resets it.
    pub fn reset(&mut self, base: BehaviorState) {
        self.states.clear();
        self.states.push(base);
    }
}
