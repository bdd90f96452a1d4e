//! Scripted boss behavior.
//!
//! A boss is an ordinary agent with a [`BossHook`] invoked at fixed lifecycle
//! points: first aggression, damage, de-aggro and death.

use serde::{Deserialize, Serialize};
use tracing::info;

use hostile_common::UnitId;

/// Lines a boss announces.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BossMessages {
    /// Said when the boss first engages
    pub aggro: Option<String>,
    /// Said on the first hit of an engagement
    pub damage: Option<String>,
    /// Said when the boss gives up and walks home
    pub deaggro: Option<String>,
    /// Said on death
    pub death: Option<String>,
}

/// Immutable boss configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BossDescriptor {
    /// Random spread added to the spawner's respawn delay, in seconds
    pub respawn_noise_secs: f32,
    /// Split loot between every participant instead of the top one
    pub loot_split: bool,
    /// Structure whose stability changes when the boss dies
    pub linked_structure: Option<UnitId>,
    /// Stability points applied to the linked structure
    pub stability_points: i32,
    /// Custom lines
    pub messages: BossMessages,
    /// Announce the damage line
    pub announce_damage: bool,
}

/// How loot is divided on death.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LootPolicy {
    /// One container owned by every participant
    Split,
    /// One container owned by the top contributor
    Single,
}

/// What a boss decided when it died.
#[derive(Debug, Clone, PartialEq)]
pub struct BossDeath {
    /// Death line
    pub message: Option<String>,
    /// Loot division
    pub loot: LootPolicy,
    /// Structure and stability points to apply with the rewards
    pub stability: Option<(UnitId, i32)>,
}

/// Lifecycle callbacks for a boss agent.
pub trait BossHook: Send {
    /// First aggression of an engagement.
    fn on_first_aggression(&mut self, agent: UnitId) -> Option<String>;

    /// The boss took damage.
    fn on_damage(&mut self, agent: UnitId, attacker: UnitId, amount: f64) -> Option<String>;

    /// The boss entered homing.
    fn on_deaggro(&mut self, agent: UnitId) -> Option<String>;

    /// The boss died. Side effects are returned, not applied, so they can be
    /// committed together with the kill rewards.
    fn on_death(&mut self, agent: UnitId) -> BossDeath;

    /// Respawn delay for the spawner, given its base delay.
    fn respawn_delay(&self, base_secs: f32, rng: &mut fastrand::Rng) -> f32;
}

/// [`BossHook`] driven entirely by a [`BossDescriptor`].
#[derive(Debug, Clone)]
pub struct ScriptedBoss {
    descriptor: BossDescriptor,
    damage_announced: bool,
}

impl ScriptedBoss {
    /// Creates a hook from a descriptor.
    #[must_use]
    pub fn new(descriptor: BossDescriptor) -> Self {
        Self {
            descriptor,
            damage_announced: false,
        }
    }

    /// The descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &BossDescriptor {
        &self.descriptor
    }
}

impl BossHook for ScriptedBoss {
    fn on_first_aggression(&mut self, agent: UnitId) -> Option<String> {
        info!("Boss {agent} engaged");
        self.descriptor.messages.aggro.clone()
    }

    fn on_damage(&mut self, _agent: UnitId, _attacker: UnitId, _amount: f64) -> Option<String> {
        if !self.descriptor.announce_damage || self.damage_announced {
            return None;
        }
        self.damage_announced = true;
        self.descriptor.messages.damage.clone()
    }

    fn on_deaggro(&mut self, agent: UnitId) -> Option<String> {
        info!("Boss {agent} disengaged");
        self.damage_announced = false;
        self.descriptor.messages.deaggro.clone()
    }

    fn on_death(&mut self, agent: UnitId) -> BossDeath {
        info!("Boss {agent} died");
        BossDeath {
            message: self.descriptor.messages.death.clone(),
            loot: if self.descriptor.loot_split {
                LootPolicy::Split
            } else {
                LootPolicy::Single
            },
            stability: self
                .descriptor
                .linked_structure
                .map(|structure| (structure, self.descriptor.stability_points)),
        }
    }

    fn respawn_delay(&self, base_secs: f32, rng: &mut fastrand::Rng) -> f32 {
        let noise = self.descriptor.respawn_noise_secs.abs();
        if noise == 0.0 {
            return base_secs;
        }
        (base_secs + (rng.f32() * 2.0 - 1.0) * noise).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> BossDescriptor {
        BossDescriptor {
            respawn_noise_secs: 30.0,
            loot_split: true,
            linked_structure: Some(UnitId::from_raw(77)),
            stability_points: 25,
            messages: BossMessages {
                aggro: Some("You dare?".into()),
                damage: Some("A scratch.".into()),
                deaggro: None,
                death: Some("Impossible...".into()),
            },
            announce_damage: true,
        }
    }

    #[test]
    fn test_death_reports_stability_and_split() {
        let mut boss = ScriptedBoss::new(descriptor());
        let death = boss.on_death(UnitId::from_raw(1));

        assert_eq!(death.loot, LootPolicy::Split);
        assert_eq!(death.message.as_deref(), Some("Impossible..."));
        assert_eq!(death.stability, Some((UnitId::from_raw(77), 25)));
    }

    #[test]
    fn test_unlinked_boss_has_no_stability_effect() {
        let mut boss = ScriptedBoss::new(BossDescriptor {
            linked_structure: None,
            loot_split: false,
            ..descriptor()
        });
        let death = boss.on_death(UnitId::from_raw(1));
        assert_eq!(death.stability, None);
        assert_eq!(death.loot, LootPolicy::Single);
    }

    #[test]
    fn test_damage_line_once_per_engagement() {
        let mut boss = ScriptedBoss::new(descriptor());
        let me = UnitId::from_raw(1);
        let them = UnitId::from_raw(2);
        assert!(boss.on_damage(me, them, 10.0).is_some());
        assert!(boss.on_damage(me, them, 10.0).is_none());
        boss.on_deaggro(me);
        assert!(boss.on_damage(me, them, 10.0).is_some());
    }

    #[test]
    fn test_respawn_noise_bounds() {
        let boss = ScriptedBoss::new(descriptor());
        let mut rng = fastrand::Rng::with_seed(9);
        for _ in 0..100 {
            let delay = boss.respawn_delay(600.0, &mut rng);
            assert!((570.0..=630.0).contains(&delay));
        }
    }

    #[test]
    fn test_descriptor_from_toml_like_json() {
        let parsed: BossDescriptor =
            serde_json::from_str(r#"{"loot_split": true}"#).expect("partial descriptor");
        assert!(parsed.loot_split);
        assert_eq!(parsed.linked_structure, None);
    }
}
