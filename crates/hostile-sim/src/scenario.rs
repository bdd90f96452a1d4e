//! Demo scenario: a walled arena with a grouped flock, a boss and a few
//! scripted attackers.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use hostile_ai::{
    AgentProfile, AiEvent, AiZone, BehaviorClass, BossDescriptor, BossMessages, GridZone, Module,
    ModuleKind, Obstacle, RecordingSink, UnitInfo, UnitKind, ZoneHandle, ZoneQuery,
};
use hostile_common::{GroupId, Position, UnitId};

use crate::config::SimConfig;

const FLOCK_GROUP: GroupId = GroupId::new(1);
const SHRINE: UnitId = UnitId::from_raw(1_000_000);

/// A player stand-in that walks up to an agent and hits it.
#[derive(Debug, Clone)]
struct Attacker {
    id: UnitId,
    target: Option<UnitId>,
    speed: f32,
}

/// Totals reported when a run ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimReport {
    /// Ticks simulated
    pub ticks: u32,
    /// Agents killed
    pub kills: u32,
    /// Engine events observed
    pub events: usize,
    /// Calls for help observed
    pub calls_for_help: usize,
    /// Agents alive at the end
    pub survivors: usize,
    /// Experience credited per attacker
    pub experience: Vec<(UnitId, f64)>,
}

/// Everything a run needs.
pub struct Scenario {
    config: SimConfig,
    grid: Arc<GridZone>,
    ai: AiZone,
    handle: ZoneHandle,
    attackers: Vec<Attacker>,
    health: HashMap<UnitId, (f64, f64)>,
    sink: RecordingSink,
    rng: fastrand::Rng,
}

impl Scenario {
    /// Builds the arena and spawns every unit.
    pub fn build(config: &SimConfig) -> Result<Self> {
        let mut config = config.clone();
        config.validate();
        let seed = config.seed.unwrap_or_else(|| fastrand::u64(..));
        info!("Building scenario with seed {seed}");

        let grid = Arc::new(GridZone::new(config.grid_width, config.grid_height));
        build_walls(&grid, config.grid_width, config.grid_height)?;

        let mut ai = AiZone::new(grid.clone(), config.tuning.clone()).with_seed(seed);
        ai.create_group(FLOCK_GROUP, "flock", true);
        let handle = ai.handle();

        let mut scenario = Self {
            grid,
            handle,
            attackers: Vec::new(),
            health: HashMap::new(),
            sink: RecordingSink::new().with_structure(SHRINE),
            rng: fastrand::Rng::with_seed(seed),
            ai,
            config,
        };
        scenario.spawn_flock()?;
        scenario.spawn_boss()?;
        scenario.spawn_attackers();
        Ok(scenario)
    }

    fn spawn_flock(&mut self) -> Result<()> {
        let center = Position::new(
            self.config.grid_width as f32 * 0.3,
            self.config.grid_height as f32 * 0.5,
        );
        for i in 0..self.config.flock_size {
            let profile = AgentProfile::new(format!("flock-{i}"))
                .with_behavior(BehaviorClass::Aggressive)
                .in_group(FLOCK_GROUP)
                .with_home_range(12.0)
                .with_module(Module::new(ModuleKind::DirectWeapon, 8.0))
                .with_module(Module::new(ModuleKind::ArmorRepairer, 0.0))
                .with_reward(50.0, Some(1));
            let at = center.offset_polar(i as f32 * 1.3, 2.0);
            let id = self.ai.spawn(profile, at).context("spawning flock")?;
            self.register_agent(id, at, self.config.flock_health);
        }
        Ok(())
    }

    fn spawn_boss(&mut self) -> Result<()> {
        let at = Position::new(
            self.config.grid_width as f32 * 0.7,
            self.config.grid_height as f32 * 0.5,
        );
        let boss = BossDescriptor {
            respawn_noise_secs: 60.0,
            loot_split: true,
            linked_structure: Some(SHRINE),
            stability_points: -100,
            messages: BossMessages {
                aggro: Some("Who disturbs the shrine?".into()),
                damage: Some("You will regret that.".into()),
                deaggro: Some("Cowards.".into()),
                death: Some("The shrine... weakens...".into()),
            },
            announce_damage: true,
        };
        let profile = AgentProfile::new("warden")
            .with_behavior(BehaviorClass::Neutral)
            .with_home_range(15.0)
            .with_max_locks(2)
            .with_module(Module::new(ModuleKind::IndirectWeapon, 14.0))
            .with_module(Module::new(ModuleKind::ShieldGenerator, 0.0))
            .with_module(Module::new(ModuleKind::Webber, 10.0))
            .with_boss(boss)
            .with_reward(500.0, Some(2))
            .with_respawn(900.0);
        let id = self.ai.spawn(profile, at).context("spawning boss")?;
        self.register_agent(id, at, self.config.boss_health);
        Ok(())
    }

    fn spawn_attackers(&mut self) {
        let y = self.config.grid_height as f32 * 0.5;
        for i in 0..self.config.player_count {
            let id = UnitId::new();
            let at = Position::new(4.0, y + i as f32 * 2.0);
            self.grid.upsert_unit(UnitInfo::player(id, at));
            self.attackers.push(Attacker {
                id,
                target: None,
                speed: 5.0,
            });
        }
    }

    fn register_agent(&mut self, id: UnitId, at: Position, health: f64) {
        self.grid.upsert_unit(UnitInfo {
            kind: UnitKind::Npc,
            ..UnitInfo::player(id, at)
        });
        self.health.insert(id, (health, health));
    }

    /// Runs the configured number of ticks.
    pub fn run(&mut self) -> Result<SimReport> {
        let mut report = SimReport::default();
        let dt = self.config.tick_secs;

        for tick in 0..self.config.ticks {
            self.drive_attackers(dt, &mut report)?;
            self.ai.update(dt);

            for event in self.ai.drain_events() {
                report.events += 1;
                match &event {
                    AiEvent::CallForHelp { caller, helpers } => {
                        report.calls_for_help += 1;
                        info!("{caller} called for help, {} answered", helpers.len());
                    },
                    AiEvent::BossMessage { agent, text } => info!("{agent}: \"{text}\""),
                    AiEvent::StateChanged { agent, from, to } => {
                        debug!("{agent}: {from:?} -> {to:?}");
                    },
                    _ => {},
                }
            }

            report.ticks = tick + 1;
            if self.config.status_every > 0 && report.ticks % self.config.status_every == 0 {
                info!(
                    "t={:.1}s agents={} kills={} events={}",
                    self.ai.clock().now().as_secs_f32(),
                    self.ai.agent_count(),
                    report.kills,
                    report.events
                );
            }
            if self.ai.agent_count() == 0 {
                info!("Every agent is down after {} ticks", report.ticks);
                break;
            }
        }

        report.survivors = self.ai.agent_count();
        report.experience = self
            .attackers
            .iter()
            .map(|a| (a.id, self.sink.experience_of(a.id)))
            .collect();
        Ok(report)
    }

    fn drive_attackers(&mut self, dt: f32, report: &mut SimReport) -> Result<()> {
        for index in 0..self.attackers.len() {
            let mut attacker = self.attackers[index].clone();
            let Some(me) = self.grid.unit(attacker.id) else {
                continue;
            };

            let target = attacker
                .target
                .filter(|t| self.ai.agent(*t).is_some())
                .or_else(|| self.pick_target());
            attacker.target = target;
            self.grid
                .edit_unit(attacker.id, |u| u.primary_target = target)
                .context("updating attacker")?;

            if let Some(target) = target {
                if let Some(agent_at) = self.ai.agent(target).map(|a| a.position()) {
                    if me.position.distance(agent_at) > self.config.player_reach {
                        let next = me.position.step_towards(agent_at, attacker.speed * dt);
                        self.grid
                            .move_unit(attacker.id, next)
                            .context("moving attacker")?;
                    } else {
                        self.hit(attacker.id, target, self.config.player_dps * f64::from(dt), report)?;
                    }
                }
            }
            self.attackers[index] = attacker;
        }
        Ok(())
    }

    fn pick_target(&mut self) -> Option<UnitId> {
        let ids: Vec<UnitId> = self.ai.agents().map(|a| a.id()).collect();
        if ids.is_empty() {
            return None;
        }
        Some(ids[self.rng.usize(..ids.len())])
    }

    fn hit(&mut self, attacker: UnitId, target: UnitId, amount: f64, report: &mut SimReport) -> Result<()> {
        let Some((hp, max)) = self.health.get_mut(&target) else {
            return Ok(());
        };
        *hp -= amount;
        let (hp, max) = (*hp, *max);

        if hp > 0.0 {
            self.handle
                .apply_damage(target, attacker, amount, (hp / max) as f32)
                .context("applying damage")?;
            return Ok(());
        }

        let death = self
            .ai
            .kill(target, Some(attacker), &mut self.sink)
            .context("killing agent")?;
        self.health.remove(&target);
        self.grid.remove_unit(target);
        report.kills += 1;
        info!(
            "{target} killed by {attacker}: {} participants, rewarded={}, respawn in {:.0}s",
            death.participants.len(),
            death.rewarded,
            death.respawn_in
        );
        Ok(())
    }
}

/// Outer walls plus a low cover line and a wall stub in the middle.
fn build_walls(grid: &GridZone, width: i32, height: i32) -> Result<()> {
    grid.wall_row(0, 0, width - 1)?;
    grid.wall_row(height - 1, 0, width - 1)?;
    grid.wall_column(0, 0, height - 1)?;
    grid.wall_column(width - 1, 0, height - 1)?;

    let mid = width / 2;
    grid.wall_column(mid, height / 4, height / 2 - 4)?;
    for y in height / 2 + 4..height * 3 / 4 {
        grid.set_obstacle(mid, y, Obstacle::LowCover)?;
    }
    Ok(())
}
