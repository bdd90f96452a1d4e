//! Group coordination: threat fan-out and call-for-help.
//!
//! The coordinator holds a registry of every agent's [`AgentShared`] half so
//! writes can reach an agent from any thread without touching its tick-owned
//! state.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};

use hostile_common::{GroupId, UnitId};

use crate::agent::AgentShared;
use crate::config::AiTuning;
use crate::error::{AiError, AiResult};
use crate::events::{AiEvent, EventPublisher};

/// A named set of agents.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    /// Identity
    pub id: GroupId,
    /// Display name
    pub name: String,
    /// Members may call for help
    pub call_for_help: bool,
    /// Member agents
    pub members: Vec<UnitId>,
}

/// Fan-out and call-for-help parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
struct GroupTuning {
    spread_factor: f64,
    help_threshold: f32,
    help_cooldown: Duration,
}

/// Routes threat between agents of the same group.
#[derive(Debug)]
pub struct GroupCoordinator {
    groups: DashMap<GroupId, Group>,
    agents: DashMap<UnitId, Arc<AgentShared>>,
    events: EventPublisher,
    tuning: GroupTuning,
}

impl GroupCoordinator {
    /// Creates an empty coordinator.
    #[must_use]
    pub fn new(events: EventPublisher, tuning: &AiTuning) -> Self {
        Self {
            groups: DashMap::new(),
            agents: DashMap::new(),
            events,
            tuning: GroupTuning {
                spread_factor: tuning.group_spread_factor,
                help_threshold: tuning.call_for_help_threshold,
                help_cooldown: tuning.help_cooldown(),
            },
        }
    }

    /// Declares a group.
    pub fn create_group(&self, id: GroupId, name: impl Into<String>, call_for_help: bool) {
        let name = name.into();
        debug!("Group {id} '{name}' created (call for help: {call_for_help})");
        self.groups.insert(
            id,
            Group {
                id,
                name,
                call_for_help,
                members: Vec::new(),
            },
        );
    }

    /// Copy of a group.
    #[must_use]
    pub fn group(&self, id: GroupId) -> Option<Group> {
        self.groups.get(&id).map(|g| g.clone())
    }

    /// Registers an agent and joins its group, if any.
    pub fn register(&self, shared: Arc<AgentShared>) -> AiResult<()> {
        if let Some(group) = shared.group() {
            let mut entry = self
                .groups
                .get_mut(&group)
                .ok_or(AiError::GroupNotFound(group))?;
            if !entry.members.contains(&shared.id()) {
                entry.members.push(shared.id());
            }
        }
        self.agents.insert(shared.id(), shared);
        Ok(())
    }

    /// Removes an agent from the registry and its group.
    pub fn unregister(&self, agent: UnitId) -> Option<Arc<AgentShared>> {
        let (_, shared) = self.agents.remove(&agent)?;
        if let Some(group) = shared.group() {
            if let Some(mut entry) = self.groups.get_mut(&group) {
                entry.members.retain(|m| *m != agent);
            }
        }
        Some(shared)
    }

    /// Shared half of a registered agent.
    #[must_use]
    pub fn agent(&self, agent: UnitId) -> Option<Arc<AgentShared>> {
        self.agents.get(&agent).map(|a| Arc::clone(a.value()))
    }

    fn groupmates(&self, shared: &AgentShared) -> Vec<Arc<AgentShared>> {
        let Some(group) = shared.group() else {
            return Vec::new();
        };
        let members = self
            .groups
            .get(&group)
            .map(|g| g.members.clone())
            .unwrap_or_default();
        members
            .into_iter()
            .filter(|m| *m != shared.id())
            .filter_map(|m| self.agent(m))
            .collect()
    }

    /// Adds threat to an agent and optionally fans a fraction out to its group.
    ///
    /// Groupmates receive `value × spread_factor` with their own spread
    /// forced off, so fan-out never recurses past one hop. Returns the
    /// agent's new value for `hostile`, or `None` if `value` was ignored.
    pub fn add_threat(
        &self,
        agent: UnitId,
        hostile: UnitId,
        value: f64,
        spread: bool,
        now: Duration,
    ) -> AiResult<Option<f64>> {
        let shared = self.agent(agent).ok_or(AiError::AgentNotFound(agent))?;
        let Some(total) = shared.ledger().add(hostile, value, now) else {
            return Ok(None);
        };
        shared.pseudo().remove(hostile);
        self.events.publish(AiEvent::ThreatChanged {
            agent,
            hostile,
            value: total,
        });

        if spread && self.tuning.spread_factor > 0.0 {
            let share = value * self.tuning.spread_factor;
            for mate in self.groupmates(&shared) {
                self.add_threat(mate.id(), hostile, share, false, now)?;
            }
        }
        Ok(Some(total))
    }

    /// Records a new armor ratio and runs call-for-help if it applies.
    ///
    /// A call fires when armor drops while under the threshold, the group
    /// allows calls and the caller's cooldown has elapsed. Every groupmate at
    /// or above the threshold then replaces its ledger with the caller's.
    /// Returns the helpers that answered.
    pub fn on_armor_changed(
        &self,
        agent: UnitId,
        armor: f32,
        now: Duration,
    ) -> AiResult<Vec<UnitId>> {
        let shared = self.agent(agent).ok_or(AiError::AgentNotFound(agent))?;
        let previous = shared.set_armor(armor);

        let threshold = self.tuning.help_threshold;
        if !(armor < threshold && armor < previous) {
            return Ok(Vec::new());
        }
        let Some(group) = shared.group() else {
            return Ok(Vec::new());
        };
        let allowed = self
            .groups
            .get(&group)
            .ok_or(AiError::GroupNotFound(group))?
            .call_for_help;
        if !allowed || !shared.try_call_for_help(now, self.tuning.help_cooldown) {
            return Ok(Vec::new());
        }

        let hostiles = shared.ledger().snapshot();
        let mut helpers = Vec::new();
        for mate in self.groupmates(&shared) {
            if mate.armor() < threshold {
                continue;
            }
            mate.ledger().replace_with(&hostiles);
            for record in &hostiles {
                mate.pseudo().remove(record.unit);
                self.events.publish(AiEvent::ThreatChanged {
                    agent: mate.id(),
                    hostile: record.unit,
                    value: record.threat,
                });
            }
            helpers.push(mate.id());
        }

        info!(
            "{agent} called for help at {:.0}% armor, {} answered",
            armor * 100.0,
            helpers.len()
        );
        self.events.publish(AiEvent::CallForHelp {
            caller: agent,
            helpers: helpers.clone(),
        });
        Ok(helpers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    struct Flock {
        bus: EventBus,
        groups: GroupCoordinator,
        members: Vec<Arc<AgentShared>>,
    }

    fn flock(size: usize, call_for_help: bool) -> Flock {
        let bus = EventBus::new(256);
        let groups = GroupCoordinator::new(bus.publisher(), &AiTuning::default());
        let group = GroupId::new(1);
        groups.create_group(group, "pack", call_for_help);
        let members: Vec<Arc<AgentShared>> = (0..size)
            .map(|_| Arc::new(AgentShared::new(UnitId::new(), Some(group))))
            .collect();
        for m in &members {
            groups.register(Arc::clone(m)).expect("group exists");
        }
        Flock {
            bus,
            groups,
            members,
        }
    }

    #[test]
    fn test_spread_gives_half_to_groupmates() {
        let f = flock(3, false);
        let hostile = UnitId::from_raw(9000);
        f.groups
            .add_threat(f.members[0].id(), hostile, 90.0, true, Duration::ZERO)
            .expect("registered");

        assert!((f.members[0].ledger().threat_of(hostile) - 90.0).abs() < 1e-9);
        assert!((f.members[1].ledger().threat_of(hostile) - 45.0).abs() < 1e-9);
        assert!((f.members[2].ledger().threat_of(hostile) - 45.0).abs() < 1e-9);
        assert_eq!(f.bus.drain().len(), 3);
    }

    #[test]
    fn test_no_spread_without_flag() {
        let f = flock(2, false);
        let hostile = UnitId::from_raw(9000);
        f.groups
            .add_threat(f.members[0].id(), hostile, 10.0, false, Duration::ZERO)
            .expect("registered");
        assert!(!f.members[1].ledger().contains(hostile));
    }

    #[test]
    fn test_unknown_group_rejected() {
        let bus = EventBus::new(8);
        let groups = GroupCoordinator::new(bus.publisher(), &AiTuning::default());
        let orphan = Arc::new(AgentShared::new(UnitId::new(), Some(GroupId::new(42))));
        assert!(matches!(
            groups.register(orphan),
            Err(AiError::GroupNotFound(_))
        ));
    }

    #[test]
    fn test_call_for_help_mirrors_and_respects_cooldown() {
        let f = flock(3, true);
        let caller = &f.members[0];
        let healthy = &f.members[1];
        let wounded = &f.members[2];
        let h1 = UnitId::from_raw(9001);
        let h2 = UnitId::from_raw(9002);
        let unrelated = UnitId::from_raw(9003);

        caller.ledger().add(h1, 50.0, Duration::ZERO);
        caller.ledger().add(h2, 20.0, Duration::ZERO);
        healthy.ledger().add(unrelated, 500.0, Duration::ZERO);
        wounded.set_armor(0.1);
        caller.set_armor(0.25);

        let t = Duration::from_secs(10);
        let helpers = f.groups.on_armor_changed(caller.id(), 0.18, t).expect("registered");
        assert_eq!(helpers, vec![healthy.id()]);
        assert!(!healthy.ledger().contains(unrelated));
        assert!((healthy.ledger().threat_of(h1) - 50.0).abs() < 1e-9);
        assert!((healthy.ledger().threat_of(h2) - 20.0).abs() < 1e-9);
        assert!(wounded.ledger().is_empty());

        // Second drop two seconds later is suppressed
        healthy.ledger().add(unrelated, 1.0, t);
        let again = f
            .groups
            .on_armor_changed(caller.id(), 0.12, t + Duration::from_secs(2))
            .expect("registered");
        assert!(again.is_empty());
        assert!(healthy.ledger().contains(unrelated));

        // After the cooldown a further drop calls again
        let later = f
            .groups
            .on_armor_changed(caller.id(), 0.10, t + Duration::from_secs(6))
            .expect("registered");
        assert_eq!(later, vec![healthy.id()]);
    }

    #[test]
    fn test_call_for_help_reports_adopted_threat() {
        let f = flock(2, true);
        let caller = &f.members[0];
        let helper = &f.members[1];
        let hostile = UnitId::from_raw(9100);
        caller.ledger().add(hostile, 30.0, Duration::ZERO);
        caller.set_armor(0.5);
        f.bus.drain();

        f.groups
            .on_armor_changed(caller.id(), 0.1, Duration::from_secs(1))
            .expect("registered");

        let events = f.bus.drain();
        assert!(events.contains(&AiEvent::ThreatChanged {
            agent: helper.id(),
            hostile,
            value: 30.0,
        }));
        assert!(events
            .iter()
            .any(|e| matches!(e, AiEvent::CallForHelp { caller: c, .. } if *c == caller.id())));
    }

    #[test]
    fn test_call_for_help_needs_group_flag() {
        let f = flock(2, false);
        f.members[0].ledger().add(UnitId::from_raw(1), 5.0, Duration::ZERO);
        let helpers = f
            .groups
            .on_armor_changed(f.members[0].id(), 0.1, Duration::ZERO)
            .expect("registered");
        assert!(helpers.is_empty());
        assert!(f.members[1].ledger().is_empty());
    }

    #[test]
    fn test_unregister_leaves_group() {
        let f = flock(2, true);
        let gone = f.members[1].id();
        assert!(f.groups.unregister(gone).is_some());
        let group = f.groups.group(GroupId::new(1)).expect("group exists");
        assert_eq!(group.members, vec![f.members[0].id()]);
    }
}
