//! Hostile NPC agents.
//!
//! An agent is split in two halves. [`AgentShared`] holds what other threads
//! may write (threat ledger, pseudo-threats, armor and core ratios) behind an
//! `Arc`. [`Agent`] holds what only the tick loop touches: position, state
//! stack, locks, modules and movement.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use hostile_common::{GroupId, Position, UnitId};

use crate::behavior::{
    decide, BehaviorState, CombatState, DecisionView, HomingState, IdleState, StateStack, StateTag,
    Transition,
};
use crate::boss::{BossDeath, BossDescriptor, BossHook, ScriptedBoss};
use crate::config::AiTuning;
use crate::events::{AiEvent, EventPublisher};
use crate::group::GroupCoordinator;
use crate::modules::{Module, ModuleContext, ModuleRack};
use crate::pathfinder::{
    Path, PathMailbox, PathOutcome, PathPurpose, PathRequest, Pathfinder, SearchArea, SearchGoal,
};
use crate::pseudo_threat::PseudoThreatTracker;
use crate::sampling::random_secs;
use crate::targeting::{refresh_locks, Candidate, LockChange, LockSet, LockState, TargetSelector};
use crate::threat::{HostileRecord, ThreatLedger};
use crate::world::ZoneQuery;

/// Upper bound on stack transitions evaluated in a single tick.
const MAX_TRANSITIONS_PER_TICK: usize = 4;

/// Attempts at finding a walkable point near home before falling back to home itself.
const HOME_POINT_ATTEMPTS: usize = 8;

// ============================================================================
// Profile
// ============================================================================

/// How readily an agent engages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BehaviorClass {
    /// Never engages on its own
    Passive,
    /// Engages when attacked; ignores stale hostiles
    #[default]
    Neutral,
    /// Engages anything entering aggro range
    Aggressive,
}

/// Static description of an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentProfile {
    /// Display name
    pub name: String,
    /// Engagement behavior
    pub behavior: BehaviorClass,
    /// Can move
    pub mobile: bool,
    /// Patrol radius around home
    pub home_range: f32,
    /// Body-pull radius
    pub aggro_range: f32,
    /// Maximum lock distance
    pub lock_range: f32,
    /// Preferred engagement range, `None` to derive from weapons
    pub optimal_range: Option<f32>,
    /// Movement speed in units per second
    pub speed: f32,
    /// Lock slots, `None` for the tuning default
    pub max_locks: Option<usize>,
    /// Lock acquisition time, `None` for the tuning default
    pub lock_time: Option<f32>,
    /// Steepest walkable slope
    pub max_slope: f32,
    /// Fitted modules
    pub modules: Vec<Module>,
    /// Group membership
    pub group: Option<GroupId>,
    /// Boss configuration
    pub boss: Option<BossDescriptor>,
    /// Experience shared among participants on death
    pub kill_reward: f64,
    /// Loot generator used on death
    pub loot_generator: Option<u32>,
    /// Base respawn delay handed to the spawner, in seconds
    pub respawn_secs: f32,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            name: "npc".to_string(),
            behavior: BehaviorClass::Neutral,
            mobile: true,
            home_range: 20.0,
            aggro_range: 10.0,
            lock_range: 25.0,
            optimal_range: None,
            speed: 4.0,
            max_locks: None,
            lock_time: None,
            max_slope: 45.0,
            modules: Vec::new(),
            group: None,
            boss: None,
            kill_reward: 0.0,
            loot_generator: None,
            respawn_secs: 60.0,
        }
    }
}

impl AgentProfile {
    /// Creates a default profile with a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the behavior class.
    #[must_use]
    pub fn with_behavior(mut self, behavior: BehaviorClass) -> Self {
        self.behavior = behavior;
        self
    }

    /// Makes the agent immobile.
    #[must_use]
    pub fn stationary(mut self) -> Self {
        self.mobile = false;
        self
    }

    /// Sets the home range.
    #[must_use]
    pub fn with_home_range(mut self, range: f32) -> Self {
        self.home_range = range;
        self
    }

    /// Sets the aggro range.
    #[must_use]
    pub fn with_aggro_range(mut self, range: f32) -> Self {
        self.aggro_range = range;
        self
    }

    /// Sets the lock range.
    #[must_use]
    pub fn with_lock_range(mut self, range: f32) -> Self {
        self.lock_range = range;
        self
    }

    /// Sets the optimal combat range.
    #[must_use]
    pub fn with_optimal_range(mut self, range: f32) -> Self {
        self.optimal_range = Some(range);
        self
    }

    /// Sets the movement speed.
    #[must_use]
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    /// Sets the number of lock slots.
    #[must_use]
    pub fn with_max_locks(mut self, slots: usize) -> Self {
        self.max_locks = Some(slots);
        self
    }

    /// Sets the lock acquisition time.
    #[must_use]
    pub fn with_lock_time(mut self, secs: f32) -> Self {
        self.lock_time = Some(secs);
        self
    }

    /// Fits a module.
    #[must_use]
    pub fn with_module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    /// Joins a group.
    #[must_use]
    pub fn in_group(mut self, group: GroupId) -> Self {
        self.group = Some(group);
        self
    }

    /// Makes the agent a boss.
    #[must_use]
    pub fn with_boss(mut self, boss: BossDescriptor) -> Self {
        self.boss = Some(boss);
        self
    }

    /// Sets the base respawn delay.
    #[must_use]
    pub fn with_respawn(mut self, secs: f32) -> Self {
        self.respawn_secs = secs;
        self
    }

    /// Sets the kill reward and optional loot generator.
    #[must_use]
    pub fn with_reward(mut self, experience: f64, loot_generator: Option<u32>) -> Self {
        self.kill_reward = experience;
        self.loot_generator = loot_generator;
        self
    }
}

// ============================================================================
// Shared State
// ============================================================================

/// The part of an agent other threads may read and write.
#[derive(Debug)]
pub struct AgentShared {
    id: UnitId,
    group: Option<GroupId>,
    ledger: ThreatLedger,
    pseudo: PseudoThreatTracker,
    /// Armor ratio as `f32` bits
    armor: AtomicU32,
    /// Core ratio as `f32` bits
    core: AtomicU32,
    last_help_call: Mutex<Option<Duration>>,
    aggressed: AtomicBool,
}

impl AgentShared {
    /// Creates shared state at full armor and core.
    #[must_use]
    pub fn new(id: UnitId, group: Option<GroupId>) -> Self {
        Self {
            id,
            group,
            ledger: ThreatLedger::new(),
            pseudo: PseudoThreatTracker::new(),
            armor: AtomicU32::new(1.0f32.to_bits()),
            core: AtomicU32::new(1.0f32.to_bits()),
            last_help_call: Mutex::new(None),
            aggressed: AtomicBool::new(false),
        }
    }

    /// Agent id.
    #[must_use]
    pub const fn id(&self) -> UnitId {
        self.id
    }

    /// Group membership.
    #[must_use]
    pub const fn group(&self) -> Option<GroupId> {
        self.group
    }

    /// Threat ledger.
    #[must_use]
    pub fn ledger(&self) -> &ThreatLedger {
        &self.ledger
    }

    /// Pseudo-threat tracker.
    #[must_use]
    pub fn pseudo(&self) -> &PseudoThreatTracker {
        &self.pseudo
    }

    /// Current armor ratio.
    #[must_use]
    pub fn armor(&self) -> f32 {
        f32::from_bits(self.armor.load(Ordering::Acquire))
    }

    /// Stores a new armor ratio and returns the previous one.
    pub fn set_armor(&self, armor: f32) -> f32 {
        let bits = armor.clamp(0.0, 1.0).to_bits();
        f32::from_bits(self.armor.swap(bits, Ordering::AcqRel))
    }

    /// Current core ratio.
    #[must_use]
    pub fn core(&self) -> f32 {
        f32::from_bits(self.core.load(Ordering::Acquire))
    }

    /// Stores a new core ratio.
    pub fn set_core(&self, core: f32) {
        self.core
            .store(core.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    /// Evicts a hostile from the ledger and remembers it as a pseudo-threat.
    pub fn remove_hostile(
        &self,
        hostile: UnitId,
        now: Duration,
        lifetime: Duration,
    ) -> Option<HostileRecord> {
        let record = self.ledger.remove(hostile)?;
        self.pseudo.register(hostile, record.threat, now, lifetime);
        Some(record)
    }

    /// Claims the call-for-help slot if the cooldown has elapsed.
    pub fn try_call_for_help(&self, now: Duration, cooldown: Duration) -> bool {
        let mut last = self.last_help_call.lock();
        if last.is_some_and(|at| now.saturating_sub(at) < cooldown) {
            return false;
        }
        *last = Some(now);
        true
    }

    fn mark_aggressed(&self) -> bool {
        !self.aggressed.swap(true, Ordering::AcqRel)
    }

    fn clear_aggressed(&self) {
        self.aggressed.store(false, Ordering::Release);
    }
}

// ============================================================================
// Agent
// ============================================================================

/// Everything an agent reads from its surroundings during a tick.
pub struct AgentEnv<'a> {
    /// Terrain and unit queries
    pub zone: &'a dyn ZoneQuery,
    /// Path service
    pub pathfinder: &'a Pathfinder,
    /// Group coordinator
    pub groups: &'a GroupCoordinator,
    /// Outbound events
    pub events: &'a EventPublisher,
    /// Tuning
    pub tuning: &'a AiTuning,
    /// Current simulation time
    pub now: Duration,
}

impl AgentEnv<'_> {
    fn pseudo_lifetime(&self) -> Duration {
        self.tuning.pseudo_threat_lifetime()
    }

    fn threat_expiry(&self) -> Duration {
        self.tuning.threat_expiry()
    }
}

/// Tick-owned half of an agent.
pub struct Agent {
    shared: Arc<AgentShared>,
    profile: AgentProfile,
    position: Position,
    home: Position,
    combat_range: f32,
    lock_time: f32,
    stack: StateStack,
    locks: LockSet,
    selector: TargetSelector,
    modules: ModuleRack,
    path: Option<Path>,
    mailbox: Arc<PathMailbox>,
    rng: fastrand::Rng,
    boss: Option<Box<dyn BossHook>>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id())
            .field("name", &self.profile.name)
            .field("position", &self.position)
            .field("states", &self.stack.tags())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Creates an agent standing at its home position.
    pub fn new(
        id: UnitId,
        profile: AgentProfile,
        home: Position,
        tuning: &AiTuning,
        rng: fastrand::Rng,
    ) -> Self {
        let modules = ModuleRack::new(profile.modules.clone());
        let combat_range = profile
            .optimal_range
            .or_else(|| modules.weapon_range())
            .unwrap_or_else(|| {
                warn!(
                    "Agent '{}' has no combat range, using {}",
                    profile.name, tuning.min_combat_range
                );
                tuning.min_combat_range
            });
        let boss = profile
            .boss
            .clone()
            .map(|d| Box::new(ScriptedBoss::new(d)) as Box<dyn BossHook>);

        Self {
            shared: Arc::new(AgentShared::new(id, profile.group)),
            locks: LockSet::new(id, profile.max_locks.unwrap_or(tuning.max_locks)),
            lock_time: profile.lock_time.unwrap_or(tuning.lock_time_secs),
            stack: StateStack::new(BehaviorState::base(profile.mobile)),
            selector: TargetSelector::new(),
            modules,
            path: None,
            mailbox: Arc::new(PathMailbox::new()),
            position: home,
            home,
            combat_range,
            rng,
            boss,
            profile,
        }
    }

    /// Replaces the boss hook.
    #[must_use]
    pub fn with_boss_hook(mut self, hook: Box<dyn BossHook>) -> Self {
        self.boss = Some(hook);
        self
    }

    /// Agent id.
    #[must_use]
    pub fn id(&self) -> UnitId {
        self.shared.id()
    }

    /// Static profile.
    #[must_use]
    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    /// Shared half.
    #[must_use]
    pub fn shared(&self) -> &Arc<AgentShared> {
        &self.shared
    }

    /// Current position.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    /// Places the agent somewhere else, dropping any path.
    pub fn set_position(&mut self, position: Position) {
        self.position = position;
        self.path = None;
    }

    /// Home position.
    #[must_use]
    pub const fn home(&self) -> Position {
        self.home
    }

    /// Effective combat range.
    #[must_use]
    pub const fn combat_range(&self) -> f32 {
        self.combat_range
    }

    /// Top state.
    #[must_use]
    pub fn state(&self) -> StateTag {
        self.stack.top_tag()
    }

    /// State stack from bottom to top.
    #[must_use]
    pub fn states(&self) -> Vec<StateTag> {
        self.stack.tags()
    }

    /// Locks.
    #[must_use]
    pub fn locks(&self) -> &LockSet {
        &self.locks
    }

    /// Modules.
    #[must_use]
    pub fn modules(&self) -> &ModuleRack {
        &self.modules
    }

    /// Path being followed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_ref()
    }

    /// Path mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &Arc<PathMailbox> {
        &self.mailbox
    }

    fn is_out_of_home_range(&self) -> bool {
        self.profile.mobile && self.position.distance(self.home) > self.profile.home_range
    }

    fn has_live_threat(&self, env: &AgentEnv<'_>) -> bool {
        let ledger = self.shared.ledger();
        if self.profile.behavior != BehaviorClass::Neutral {
            return !ledger.is_empty();
        }
        let expiry = env.threat_expiry();
        ledger
            .snapshot()
            .iter()
            .any(|r| !r.is_expired(env.now, expiry))
    }

    // ------------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------------

    /// Runs one tick: stack transitions first, then the new top state's work,
    /// then movement.
    pub fn update(&mut self, dt: f32, env: &AgentEnv<'_>) {
        self.run_transitions(env);

        let mut state = *self.stack.top();
        match &mut state {
            BehaviorState::Idle(idle) | BehaviorState::StationaryIdle(idle) => {
                self.update_idle(idle, dt, env);
            },
            BehaviorState::Homing(homing) => self.update_homing(homing, dt, env),
            BehaviorState::Aggressor(combat) => self.update_combat(combat, true, dt, env),
            BehaviorState::StationaryCombat(combat) => self.update_combat(combat, false, dt, env),
        }
        *self.stack.top_mut() = state;

        self.follow_path(dt, env);
    }

    fn run_transitions(&mut self, env: &AgentEnv<'_>) {
        for _ in 0..MAX_TRANSITIONS_PER_TICK {
            let view = DecisionView {
                mobile: self.profile.mobile,
                passive: self.profile.behavior == BehaviorClass::Passive,
                has_threat: self.has_live_threat(env),
                out_of_home_range: self.is_out_of_home_range(),
            };
            let transition = decide(self.stack.top(), &view);
            if transition == Transition::Stay {
                return;
            }

            let from = self.stack.top_tag();
            let engagement_over = self.stack.top().is_combat() && !view.has_threat;
            self.exit_state(env);
            if !self.stack.apply(transition) {
                return;
            }
            if engagement_over {
                self.shared.clear_aggressed();
            }
            let to = self.stack.top_tag();
            debug!("{} {from:?} -> {to:?}", self.id());
            env.events.publish(AiEvent::StateChanged {
                agent: self.id(),
                from,
                to,
            });
            self.enter_state(env);
        }
        warn!(
            "{} hit the transition limit, stack {:?}",
            self.id(),
            self.stack.tags()
        );
    }

    fn exit_state(&mut self, env: &AgentEnv<'_>) {
        self.path = None;
        self.mailbox.cancel_all();
        self.modules.reset();
        if self.stack.top().is_combat() {
            let changes = self.locks.clear();
            self.publish_lock_changes(changes, env);
            self.selector.reset();
        }
    }

    fn enter_state(&mut self, env: &AgentEnv<'_>) {
        let id = self.id();
        match self.stack.top_tag() {
            StateTag::Homing => {
                let line = self.boss.as_mut().and_then(|b| b.on_deaggro(id));
                self.announce(line, env);
            },
            StateTag::Aggressor | StateTag::StationaryCombat => {
                if self.shared.mark_aggressed() {
                    let line = self.boss.as_mut().and_then(|b| b.on_first_aggression(id));
                    self.announce(line, env);
                }
            },
            StateTag::Idle | StateTag::StationaryIdle => {
                let roam_in = random_secs(
                    &mut self.rng,
                    env.tuning.roam_interval_min_secs,
                    env.tuning.roam_interval_max_secs,
                );
                if let BehaviorState::Idle(idle) | BehaviorState::StationaryIdle(idle) =
                    self.stack.top_mut()
                {
                    idle.roam_in = roam_in;
                }
            },
        }
    }

    fn announce(&self, line: Option<String>, env: &AgentEnv<'_>) {
        if let Some(text) = line {
            env.events.publish(AiEvent::BossMessage {
                agent: self.id(),
                text,
            });
        }
    }

    fn follow_path(&mut self, dt: f32, env: &AgentEnv<'_>) {
        if !self.profile.mobile {
            return;
        }
        let Some(path) = self.path.as_mut() else {
            return;
        };
        let moved = path.advance(self.position, self.profile.speed * dt);
        if path.is_empty() {
            self.path = None;
        }
        if moved != self.position {
            self.position = moved;
            env.zone.unit_moved(self.id(), moved);
        }
    }

    // ------------------------------------------------------------------------
    // Idle
    // ------------------------------------------------------------------------

    fn update_idle(&mut self, idle: &mut IdleState, dt: f32, env: &AgentEnv<'_>) {
        if let Some(result) = self.mailbox.take() {
            if let (PathPurpose::Roam, PathOutcome::Found(path)) = (result.purpose, result.outcome) {
                self.path = Some(path);
            }
        }

        idle.scan_in -= dt;
        if idle.scan_in <= 0.0 {
            idle.scan_in = env.tuning.threat_scan_interval;
            if self.profile.behavior == BehaviorClass::Aggressive {
                self.scan_threat(env, false);
            }
        }

        if !self.profile.mobile {
            return;
        }
        idle.roam_in -= dt;
        if idle.roam_in > 0.0 || self.path.is_some() || self.mailbox.is_pending() {
            return;
        }
        idle.roam_in = random_secs(
            &mut self.rng,
            env.tuning.roam_interval_min_secs,
            env.tuning.roam_interval_max_secs,
        );

        let angle = self.rng.f32() * TAU;
        let radius = self.rng.f32() * self.profile.home_range * 0.8;
        let target = self.home.offset_polar(angle, radius);
        let request = PathRequest {
            start: self.position,
            goal: SearchGoal::Near {
                target,
                tolerance: env.tuning.arrival_tolerance,
            },
            area: Some(SearchArea {
                center: self.home,
                radius: self.profile.home_range,
            }),
            max_slope: self.profile.max_slope,
            ignore_terrain: false,
        };
        env.pathfinder
            .submit(&self.mailbox, PathPurpose::Roam, vec![request]);
    }

    // ------------------------------------------------------------------------
    // Homing
    // ------------------------------------------------------------------------

    fn update_homing(&mut self, homing: &mut HomingState, dt: f32, env: &AgentEnv<'_>) {
        if let Some(result) = self.mailbox.take() {
            if result.purpose == PathPurpose::Homing {
                homing.requested = false;
                match result.outcome {
                    PathOutcome::Found(path) => self.path = Some(path),
                    PathOutcome::Failed => {
                        warn!("{} could not find a way home, retrying", self.id());
                        homing.destination = None;
                        homing.retry_in = env.tuning.homing_retry_secs;
                        if let Some(culprit) = self.shared.ledger().most_hated() {
                            self.demote(culprit.unit, env);
                        }
                    },
                }
            }
        }

        if homing.requested || self.path.is_some() {
            return;
        }
        if homing.destination.is_some() {
            homing.arrived = true;
            return;
        }

        homing.retry_in -= dt;
        if homing.retry_in > 0.0 {
            return;
        }
        let destination = self.point_near_home(env);
        let constrained = PathRequest {
            start: self.position,
            goal: SearchGoal::Near {
                target: destination,
                tolerance: env.tuning.arrival_tolerance,
            },
            area: Some(SearchArea {
                center: self.home,
                radius: self.position.distance(self.home) + self.profile.home_range + 1.0,
            }),
            max_slope: self.profile.max_slope,
            ignore_terrain: false,
        };
        env.pathfinder.submit(
            &self.mailbox,
            PathPurpose::Homing,
            vec![constrained, constrained.unconstrained()],
        );
        homing.destination = Some(destination);
        homing.requested = true;
    }

    fn point_near_home(&mut self, env: &AgentEnv<'_>) -> Position {
        let spread = self.profile.home_range * 0.3;
        for _ in 0..HOME_POINT_ATTEMPTS {
            let candidate = self
                .home
                .offset_polar(self.rng.f32() * TAU, self.rng.f32() * spread);
            let cell = candidate.cell();
            if env.zone.is_walkable(cell.x, cell.y, self.profile.max_slope) {
                return candidate;
            }
        }
        self.home
    }

    // ------------------------------------------------------------------------
    // Combat
    // ------------------------------------------------------------------------

    fn update_combat(&mut self, combat: &mut CombatState, mobile: bool, dt: f32, env: &AgentEnv<'_>) {
        if let Some(result) = self.mailbox.take() {
            if let PathPurpose::FiringPosition { hostile } = result.purpose {
                combat.seeking = None;
                match result.outcome {
                    PathOutcome::Found(path) => self.path = Some(path),
                    PathOutcome::Failed => {
                        debug!("{} found no firing position on {hostile}", self.id());
                        self.demote(hostile, env);
                    },
                }
            }
        }

        combat.scan_in -= dt;
        if combat.scan_in <= 0.0 {
            combat.scan_in = env.tuning.threat_scan_interval;
            self.scan_threat(env, true);
        }

        self.validate_hostiles(env);
        let candidates = self.candidates(env);

        let mut changes = refresh_locks(&mut self.locks, &candidates);
        changes.extend(self.locks.advance(dt, self.lock_time));
        match self.selector.update(
            dt,
            &mut self.locks,
            &candidates,
            self.combat_range,
            env.tuning,
            &mut self.rng,
        ) {
            Ok(primary) => changes.extend(primary),
            Err(e) => error!("{} primary selection failed: {e}", self.id()),
        }
        self.publish_lock_changes(changes, env);

        self.run_modules(dt, &candidates, env);

        if mobile {
            self.reposition(combat, dt, env);
        }
    }

    /// Re-scans nearby units for threat.
    ///
    /// Body-pull applies to aggressive agents only; lock and assist threat
    /// are only collected in combat.
    fn scan_threat(&self, env: &AgentEnv<'_>, in_combat: bool) {
        let id = self.id();
        let radius = self.profile.aggro_range.max(self.profile.lock_range);
        let aggressive = self.profile.behavior == BehaviorClass::Aggressive;

        for unit in env.zone.units_in_range(self.position, radius) {
            if unit.id == id || !unit.is_player() || !unit.is_targetable() {
                continue;
            }
            let ledger = self.shared.ledger();
            let distance = unit.position.distance(self.position);

            if aggressive
                && unit.visible
                && distance <= self.profile.aggro_range
                && !ledger.contains(unit.id)
            {
                self.push_threat(unit.id, env.tuning.body_pull_threat, env);
            }
            if !in_combat {
                continue;
            }
            if unit.primary_target == Some(id) {
                self.push_threat(unit.id, env.tuning.lock_threat, env);
            }
            if let Some(ally) = unit.assisting {
                if ally != unit.id && ledger.contains(ally) {
                    self.push_threat(unit.id, env.tuning.assist_threat, env);
                }
            }
        }
    }

    fn push_threat(&self, hostile: UnitId, value: f64, env: &AgentEnv<'_>) {
        if let Err(e) = env
            .groups
            .add_threat(self.id(), hostile, value, true, env.now)
        {
            warn!("{} threat from {hostile} dropped: {e}", self.id());
        }
    }

    /// Drops hostiles that can no longer be fought.
    fn validate_hostiles(&mut self, env: &AgentEnv<'_>) {
        for record in self.shared.ledger().snapshot() {
            let targetable = env
                .zone
                .unit(record.unit)
                .is_some_and(|info| info.is_targetable());
            if !targetable {
                self.demote(record.unit, env);
            }
        }
    }

    /// Moves a hostile from the ledger to the pseudo-threats and drops its lock.
    pub(crate) fn demote(&mut self, hostile: UnitId, env: &AgentEnv<'_>) {
        if self
            .shared
            .remove_hostile(hostile, env.now, env.pseudo_lifetime())
            .is_some()
        {
            debug!("{} demoted {hostile} to pseudo-threat", self.id());
        }
        if let Some(change) = self.locks.cancel_target(hostile) {
            self.publish_lock_changes(vec![change], env);
        }
    }

    fn candidates(&self, env: &AgentEnv<'_>) -> Vec<Candidate> {
        let neutral = self.profile.behavior == BehaviorClass::Neutral;
        let expiry = env.threat_expiry();
        self.shared
            .ledger()
            .snapshot()
            .into_iter()
            .filter(|r| !(neutral && r.is_expired(env.now, expiry)))
            .filter_map(|r| {
                let info = env.zone.unit(r.unit)?;
                if !info.is_lockable_now() {
                    return None;
                }
                let distance = info.position.distance(self.position);
                (distance <= self.profile.lock_range).then_some(Candidate {
                    unit: r.unit,
                    threat: r.threat,
                    position: info.position,
                    distance,
                })
            })
            .collect()
    }

    fn run_modules(&mut self, dt: f32, candidates: &[Candidate], env: &AgentEnv<'_>) {
        let zone = env.zone;
        let line_of_sight =
            |from: Position, to: Position, ballistic: bool| zone.line_of_sight(from, to, ballistic).is_clear();
        let ctx = ModuleContext {
            position: self.position,
            armor: self.shared.armor(),
            core: self.shared.core(),
            shield_active: self.modules.shield_active(),
            locks: &self.locks,
            candidates,
            line_of_sight: &line_of_sight,
            tuning: env.tuning,
        };
        let fired = self.modules.update(dt, &ctx, &mut self.rng);
        for activation in fired {
            env.events.publish(AiEvent::ModuleActivated {
                agent: self.id(),
                module: activation.kind,
                target: activation.target,
            });
        }
    }

    /// Chases the most-hated hostile into a firing position.
    fn reposition(&mut self, combat: &mut CombatState, dt: f32, env: &AgentEnv<'_>) {
        combat.reposition_in -= dt;

        let Some((hostile, at)) = self.most_hated_visible(env) else {
            return;
        };
        let ballistic = self.modules.has_ballistic_weapon();
        let in_range = self.position.distance(at) <= self.combat_range;
        if in_range && env.zone.line_of_sight(self.position, at, ballistic).is_clear() {
            if combat.seeking.take().is_some() {
                self.mailbox.cancel_all();
            }
            self.path = None;
            return;
        }

        let already_seeking = combat.seeking == Some(hostile) && self.mailbox.is_pending();
        if combat.reposition_in > 0.0 || already_seeking {
            return;
        }
        combat.reposition_in = env.tuning.reposition_interval_secs;

        let request = PathRequest {
            start: self.position,
            goal: SearchGoal::FiringPosition {
                hostile: at,
                optimal_range: self.combat_range,
                ballistic,
            },
            area: Some(SearchArea {
                center: self.home,
                radius: self.profile.home_range,
            }),
            max_slope: self.profile.max_slope,
            ignore_terrain: false,
        };
        env.pathfinder.submit(
            &self.mailbox,
            PathPurpose::FiringPosition { hostile },
            vec![request],
        );
        combat.seeking = Some(hostile);
    }

    fn most_hated_visible(&self, env: &AgentEnv<'_>) -> Option<(UnitId, Position)> {
        self.shared.ledger().snapshot().into_iter().find_map(|r| {
            env.zone
                .unit(r.unit)
                .filter(|info| info.is_targetable() && info.visible)
                .map(|info| (r.unit, info.position))
        })
    }

    fn publish_lock_changes(&mut self, changes: Vec<LockChange>, env: &AgentEnv<'_>) {
        for change in changes {
            if change.state == LockState::Cancelled {
                self.modules.release_lock(change.lock);
            }
            env.events.publish(AiEvent::LockStateChanged {
                agent: self.id(),
                lock: change.lock,
                target: change.target,
                state: change.state,
                primary: change.primary,
            });
        }
    }

    // ------------------------------------------------------------------------
    // Notices
    // ------------------------------------------------------------------------

    /// The world broke one of this agent's locks.
    pub fn on_lock_lost(&mut self, target: UnitId, env: &AgentEnv<'_>) {
        if let Some(change) = self.locks.cancel_target(target) {
            self.publish_lock_changes(vec![change], env);
        }
    }

    /// A unit left the zone.
    pub fn on_unit_left(&mut self, unit: UnitId, env: &AgentEnv<'_>) {
        if self.shared.ledger().contains(unit) || self.locks.find(unit).is_some() {
            self.demote(unit, env);
        }
    }

    /// The agent took damage.
    pub fn on_damaged(&mut self, attacker: UnitId, amount: f64, env: &AgentEnv<'_>) {
        let id = self.id();
        let line = self
            .boss
            .as_mut()
            .and_then(|b| b.on_damage(id, attacker, amount));
        self.announce(line, env);
    }

    /// Stops all work, cancels every lock and runs the boss death hook.
    pub fn on_death(&mut self, env: &AgentEnv<'_>) -> Option<BossDeath> {
        self.path = None;
        self.mailbox.cancel_all();
        self.modules.reset();
        let cancelled = self.locks.clear();
        self.publish_lock_changes(cancelled, env);
        self.selector.reset();
        let id = self.id();
        self.boss.as_mut().map(|b| b.on_death(id))
    }

    /// Respawn delay for the spawner, including boss noise.
    pub fn respawn_delay(&mut self) -> f32 {
        let base = self.profile.respawn_secs.max(0.0);
        match &self.boss {
            Some(boss) => boss.respawn_delay(base, &mut self.rng),
            None => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ModuleKind;

    #[test]
    fn test_missing_combat_range_defaults() {
        let tuning = AiTuning::default();
        let agent = Agent::new(
            UnitId::new(),
            AgentProfile::new("drone"),
            Position::default(),
            &tuning,
            fastrand::Rng::with_seed(1),
        );
        assert!((agent.combat_range() - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_combat_range_from_weapons() {
        let tuning = AiTuning::default();
        let profile = AgentProfile::new("gunner")
            .with_module(Module::new(ModuleKind::DirectWeapon, 12.0))
            .with_module(Module::new(ModuleKind::IndirectWeapon, 18.0));
        let agent = Agent::new(
            UnitId::new(),
            profile,
            Position::default(),
            &tuning,
            fastrand::Rng::with_seed(1),
        );
        assert!((agent.combat_range() - 18.0).abs() < f32::EPSILON);
        assert!(agent.modules().has_ballistic_weapon());
    }

    #[test]
    fn test_profile_overrides() {
        let tuning = AiTuning::default();
        let agent = Agent::new(
            UnitId::new(),
            AgentProfile::new("turret")
                .stationary()
                .with_max_locks(2)
                .with_optimal_range(30.0),
            Position::default(),
            &tuning,
            fastrand::Rng::with_seed(1),
        );
        assert_eq!(agent.locks().capacity(), 2);
        assert_eq!(agent.state(), StateTag::StationaryIdle);
        assert!((agent.combat_range() - 30.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_shared_armor_and_pseudo() {
        let shared = AgentShared::new(UnitId::new(), None);
        assert!((shared.set_armor(0.4) - 1.0).abs() < f32::EPSILON);
        assert!((shared.armor() - 0.4).abs() < f32::EPSILON);

        let h = UnitId::from_raw(5);
        shared.ledger().add(h, 12.0, Duration::ZERO);
        shared.remove_hostile(h, Duration::ZERO, Duration::from_secs(30));
        assert!(!shared.ledger().contains(h));
        assert!(shared.pseudo().is_active(h, Duration::from_secs(1)));
    }

    #[test]
    fn test_help_cooldown() {
        let shared = AgentShared::new(UnitId::new(), None);
        let cooldown = Duration::from_secs(5);
        assert!(shared.try_call_for_help(Duration::from_secs(10), cooldown));
        assert!(!shared.try_call_for_help(Duration::from_secs(12), cooldown));
        assert!(shared.try_call_for_help(Duration::from_secs(15), cooldown));
    }
}
