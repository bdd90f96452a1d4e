//! Zone-level orchestration.
//!
//! [`AiZone`] owns every agent of one zone and drives them from a single
//! tick thread. [`ZoneHandle`] is the thread-safe entry point for damage and
//! world callbacks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use hostile_common::{GroupId, Position, UnitId};

use crate::agent::{Agent, AgentEnv, AgentProfile};
use crate::boss::LootPolicy;
use crate::clock::SimClock;
use crate::config::AiTuning;
use crate::error::{AiError, AiResult};
use crate::events::{AiEvent, EventBus, EventPublisher, NoticeQueue, ZoneNotice};
use crate::group::GroupCoordinator;
use crate::pathfinder::Pathfinder;
use crate::reward::{collect_participants, Participant, RewardCoordinator};
use crate::world::{PersistenceSink, RewardSink, StructureSink, ZoneQuery};

/// Outcome of [`AiZone::kill`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeathReport {
    /// Agent that died
    pub victim: UnitId,
    /// Unit credited with the kill
    pub killer: Option<UnitId>,
    /// Units that shared the reward
    pub participants: Vec<Participant>,
    /// Payouts were committed
    pub rewarded: bool,
    /// Seconds until the spawner should respawn the agent
    pub respawn_in: f32,
}

/// Every agent of one zone plus the services they share.
pub struct AiZone {
    zone: Arc<dyn ZoneQuery>,
    tuning: AiTuning,
    clock: SimClock,
    agents: BTreeMap<UnitId, Agent>,
    pathfinder: Pathfinder,
    groups: Arc<GroupCoordinator>,
    events: EventBus,
    publisher: EventPublisher,
    notices: NoticeQueue,
    rewards: RewardCoordinator,
    rng: fastrand::Rng,
}

impl std::fmt::Debug for AiZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiZone")
            .field("agents", &self.agents.len())
            .field("now", &self.clock.now())
            .field("pathfinder", &self.pathfinder)
            .finish_non_exhaustive()
    }
}

impl AiZone {
    /// Creates a zone driver. The tuning is validated first.
    pub fn new(zone: Arc<dyn ZoneQuery>, mut tuning: AiTuning) -> Self {
        let corrected = tuning.validate();
        if corrected > 0 {
            warn!("Corrected {corrected} tuning values");
        }
        let events = EventBus::default();
        let publisher = events.publisher();
        let groups = Arc::new(GroupCoordinator::new(publisher.clone(), &tuning));
        let pathfinder = Pathfinder::new(Arc::clone(&zone), &tuning);
        info!(
            "AI zone ready: {} path workers",
            pathfinder.worker_count()
        );

        Self {
            zone,
            clock: SimClock::new(),
            agents: BTreeMap::new(),
            pathfinder,
            groups,
            events,
            publisher,
            notices: NoticeQueue::new(),
            rewards: RewardCoordinator::new(),
            rng: fastrand::Rng::new(),
            tuning,
        }
    }

    /// Seeds the random source every spawned agent derives its own from.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    /// Effective tuning.
    #[must_use]
    pub fn tuning(&self) -> &AiTuning {
        &self.tuning
    }

    /// Simulation clock.
    #[must_use]
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Group coordinator.
    #[must_use]
    pub fn groups(&self) -> &Arc<GroupCoordinator> {
        &self.groups
    }

    /// Declares a group.
    pub fn create_group(&self, id: GroupId, name: impl Into<String>, call_for_help: bool) {
        self.groups.create_group(id, name, call_for_help);
    }

    /// Thread-safe handle for callbacks.
    #[must_use]
    pub fn handle(&self) -> ZoneHandle {
        ZoneHandle {
            groups: Arc::clone(&self.groups),
            clock: self.clock.clone(),
            notices: self.notices.sender(),
            damage_multiplier: self.tuning.damage_threat_multiplier,
            debuff_threat: self.tuning.debuff_threat,
        }
    }

    /// Spawns an agent at `position`, which also becomes its home.
    pub fn spawn(&mut self, profile: AgentProfile, position: Position) -> AiResult<UnitId> {
        let id = UnitId::new();
        let rng = fastrand::Rng::with_seed(self.rng.u64(..));
        let name = profile.name.clone();
        let agent = Agent::new(id, profile, position, &self.tuning, rng);
        self.groups.register(Arc::clone(agent.shared()))?;
        self.agents.insert(id, agent);
        debug!("Spawned {id} '{name}' at ({:.1}, {:.1})", position.x, position.y);
        Ok(id)
    }

    /// Removes an agent without a death.
    pub fn despawn(&mut self, id: UnitId) -> Option<Agent> {
        let agent = self.agents.remove(&id)?;
        self.groups.unregister(id);
        agent.mailbox().cancel_all();
        debug!("Despawned {id}");
        Some(agent)
    }

    /// Looks up an agent.
    #[must_use]
    pub fn agent(&self, id: UnitId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    /// Looks up an agent mutably.
    pub fn agent_mut(&mut self, id: UnitId) -> Option<&mut Agent> {
        self.agents.get_mut(&id)
    }

    /// All agents in id order.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// Number of agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Takes every event published since the last drain.
    pub fn drain_events(&self) -> Vec<AiEvent> {
        self.events.drain()
    }

    /// Advances the clock by `dt` seconds, routes queued notices and ticks
    /// every agent.
    pub fn update(&mut self, dt: f32) {
        let now = self.clock.advance(dt);
        let env = AgentEnv {
            zone: self.zone.as_ref(),
            pathfinder: &self.pathfinder,
            groups: &self.groups,
            events: &self.publisher,
            tuning: &self.tuning,
            now,
        };

        for notice in self.notices.drain() {
            match notice {
                ZoneNotice::LockLost { agent, target } => {
                    if let Some(a) = self.agents.get_mut(&agent) {
                        a.on_lock_lost(target, &env);
                    }
                },
                ZoneNotice::UnitLeft { unit } => {
                    for a in self.agents.values_mut() {
                        a.on_unit_left(unit, &env);
                    }
                },
                ZoneNotice::Damaged {
                    agent,
                    attacker,
                    amount,
                } => {
                    if let Some(a) = self.agents.get_mut(&agent) {
                        a.on_damaged(attacker, amount, &env);
                    }
                },
            }
        }

        for agent in self.agents.values_mut() {
            agent.shared().pseudo().purge_expired(now);
            agent.update(dt, &env);
        }
    }

    /// Kills an agent: stops it, runs the boss hook and pays out rewards.
    ///
    /// Experience, loot and the boss stability change go through one reward
    /// transaction. Reward failures roll all of it back, are logged and are
    /// reported through [`DeathReport::rewarded`]; the agent is gone either
    /// way.
    pub fn kill<S>(
        &mut self,
        victim: UnitId,
        killer: Option<UnitId>,
        sink: &mut S,
    ) -> AiResult<DeathReport>
    where
        S: RewardSink + StructureSink + PersistenceSink,
    {
        let mut agent = self
            .agents
            .remove(&victim)
            .ok_or(AiError::AgentNotFound(victim))?;
        self.groups.unregister(victim);
        let now = self.clock.now();
        let env = AgentEnv {
            zone: self.zone.as_ref(),
            pathfinder: &self.pathfinder,
            groups: &self.groups,
            events: &self.publisher,
            tuning: &self.tuning,
            now,
        };

        let boss = agent.on_death(&env);
        self.publisher.publish(AiEvent::UnitDied { killer, victim });
        if let Some(text) = boss.as_ref().and_then(|b| b.message.clone()) {
            self.publisher
                .publish(AiEvent::BossMessage { agent: victim, text });
        }

        let shared = Arc::clone(agent.shared());
        let participants =
            collect_participants(shared.ledger(), shared.pseudo(), self.zone.as_ref(), now);

        let profile = agent.profile();
        let mut tx = self.rewards.begin(victim)?;
        tx.stage_experience(&participants, profile.kill_reward);
        if let Some(generator) = profile.loot_generator {
            let policy = boss.as_ref().map_or(LootPolicy::Single, |b| b.loot);
            tx.stage_loot(&participants, generator, agent.position(), policy);
        }
        if let Some((structure, points)) = boss.as_ref().and_then(|b| b.stability) {
            tx.stage_stability(structure, points);
        }
        let rewarded = match self.rewards.commit(tx, sink) {
            Ok(()) => true,
            Err(e) => {
                error!("Rewards for {victim} failed: {e}");
                false
            },
        };

        info!(
            "{victim} died, {} participants{}",
            participants.len(),
            killer.map(|k| format!(", killed by {k}")).unwrap_or_default()
        );
        Ok(DeathReport {
            victim,
            killer,
            participants,
            rewarded,
            respawn_in: agent.respawn_delay(),
        })
    }
}

/// Cloneable entry point for callbacks arriving on other threads.
#[derive(Debug, Clone)]
pub struct ZoneHandle {
    groups: Arc<GroupCoordinator>,
    clock: SimClock,
    notices: Sender<ZoneNotice>,
    damage_multiplier: f64,
    debuff_threat: f64,
}

impl ZoneHandle {
    /// Current simulation time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Records damage on an agent.
    ///
    /// Adds `amount × damage multiplier` threat (spread to the group),
    /// updates the armor ratio, which may trigger a call for help, and queues
    /// the damage for the agent's boss hook.
    pub fn apply_damage(
        &self,
        agent: UnitId,
        attacker: UnitId,
        amount: f64,
        armor: f32,
    ) -> AiResult<()> {
        let now = self.now();
        self.groups
            .add_threat(agent, attacker, amount * self.damage_multiplier, true, now)?;
        self.groups.on_armor_changed(agent, armor, now)?;
        self.post(ZoneNotice::Damaged {
            agent,
            attacker,
            amount,
        });
        Ok(())
    }

    /// Adds raw threat to an agent, spreading it to the group.
    pub fn add_threat(&self, agent: UnitId, hostile: UnitId, value: f64) -> AiResult<Option<f64>> {
        self.groups.add_threat(agent, hostile, value, true, self.now())
    }

    /// A hostile fired a debuff module at an agent.
    pub fn notify_debuffed(&self, agent: UnitId, source: UnitId) -> AiResult<()> {
        self.groups
            .add_threat(agent, source, self.debuff_threat, true, self.now())?;
        Ok(())
    }

    /// Updates an agent's core ratio.
    pub fn set_core(&self, agent: UnitId, core: f32) -> AiResult<()> {
        self.groups
            .agent(agent)
            .ok_or(AiError::AgentNotFound(agent))?
            .set_core(core);
        Ok(())
    }

    /// The world broke a lock held by `agent`.
    pub fn notify_lock_lost(&self, agent: UnitId, target: UnitId) {
        self.post(ZoneNotice::LockLost { agent, target });
    }

    /// A unit left the zone.
    pub fn notify_unit_left(&self, unit: UnitId) {
        self.post(ZoneNotice::UnitLeft { unit });
    }

    fn post(&self, notice: ZoneNotice) {
        if self.notices.send(notice).is_err() {
            debug!("Zone dropped, notice discarded");
        }
    }
}
