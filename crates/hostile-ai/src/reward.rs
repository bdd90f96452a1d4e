//! Kill reward attribution.
//!
//! Every player still in the ledger plus every unexpired pseudo-threat
//! shares the kill reward in proportion to the threat it held. Payouts are
//! staged in a [`RewardTransaction`] and committed in one go.

use std::time::Duration;

use tracing::{debug, info, warn};

use hostile_common::{Position, UnitId};

use crate::boss::LootPolicy;
use crate::error::{AiError, AiResult};
use crate::pseudo_threat::PseudoThreatTracker;
use crate::threat::ThreatLedger;
use crate::world::{PersistenceSink, RewardSink, StructureSink, ZoneQuery};

/// A unit credited for a kill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Participant {
    /// Unit
    pub unit: UnitId,
    /// Threat it held
    pub threat: f64,
}

/// Collects reward participants from a dying agent's ledgers.
///
/// Ledger entries count when the zone reports them as players; pseudo-threats
/// count unless the zone knows them to be something else. The result is
/// sorted by descending threat.
pub fn collect_participants(
    ledger: &ThreatLedger,
    pseudo: &PseudoThreatTracker,
    zone: &dyn ZoneQuery,
    now: Duration,
) -> Vec<Participant> {
    let mut participants: Vec<Participant> = ledger
        .snapshot()
        .into_iter()
        .filter(|r| zone.unit(r.unit).is_some_and(|u| u.is_player()))
        .map(|r| Participant {
            unit: r.unit,
            threat: r.threat,
        })
        .collect();

    for entry in pseudo.active(now) {
        if participants.iter().any(|p| p.unit == entry.unit) {
            continue;
        }
        if zone.unit(entry.unit).map_or(true, |u| u.is_player()) {
            participants.push(Participant {
                unit: entry.unit,
                threat: entry.threat,
            });
        }
    }

    participants.retain(|p| p.threat > 0.0);
    participants.sort_by(|a, b| b.threat.total_cmp(&a.threat).then(a.unit.cmp(&b.unit)));
    participants
}

/// A staged payout.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedPayout {
    /// Experience share
    Experience {
        /// Recipient
        unit: UnitId,
        /// Amount
        amount: f64,
    },
    /// Loot container
    Loot {
        /// Owners
        owners: Vec<UnitId>,
        /// Generator id
        generator: u32,
        /// Drop point
        at: Position,
    },
    /// Boss structure-stability change
    Stability {
        /// Linked structure
        structure: UnitId,
        /// Points added, negative to remove
        points: i32,
    },
}

/// Payouts for one kill, applied together on commit.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardTransaction {
    agent: UnitId,
    payouts: Vec<StagedPayout>,
}

impl RewardTransaction {
    /// Staged payouts.
    #[must_use]
    pub fn payouts(&self) -> &[StagedPayout] {
        &self.payouts
    }

    /// Stages proportional experience shares of `reward`.
    pub fn stage_experience(&mut self, participants: &[Participant], reward: f64) {
        let total: f64 = participants.iter().map(|p| p.threat).sum();
        if total <= 0.0 || reward <= 0.0 {
            return;
        }
        for p in participants {
            self.payouts.push(StagedPayout::Experience {
                unit: p.unit,
                amount: reward * p.threat / total,
            });
        }
    }

    /// Stages a loot container according to `policy`.
    pub fn stage_loot(
        &mut self,
        participants: &[Participant],
        generator: u32,
        at: Position,
        policy: LootPolicy,
    ) {
        let owners: Vec<UnitId> = match policy {
            LootPolicy::Split => participants.iter().map(|p| p.unit).collect(),
            LootPolicy::Single => participants.iter().take(1).map(|p| p.unit).collect(),
        };
        if owners.is_empty() {
            return;
        }
        self.payouts.push(StagedPayout::Loot {
            owners,
            generator,
            at,
        });
    }

    /// Stages a stability change on a boss's linked structure.
    pub fn stage_stability(&mut self, structure: UnitId, points: i32) {
        self.payouts
            .push(StagedPayout::Stability { structure, points });
    }
}

/// Guards against overlapping reward transactions.
#[derive(Debug, Default)]
pub struct RewardCoordinator {
    open: Option<UnitId>,
}

impl RewardCoordinator {
    /// Creates an idle coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether a transaction is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Opens a transaction for `agent`.
    pub fn begin(&mut self, agent: UnitId) -> AiResult<RewardTransaction> {
        if let Some(current) = self.open {
            warn!("Reward transaction for {agent} opened while {current} is still open");
            return Err(AiError::TransactionReentry);
        }
        self.open = Some(agent);
        Ok(RewardTransaction {
            agent,
            payouts: Vec::new(),
        })
    }

    /// Applies every staged payout as one sink batch, then calls the save hook.
    ///
    /// The transaction is closed whatever the outcome. A refused payout rolls
    /// the whole batch back and skips the save hook. A missing structure is
    /// logged and its stability change skipped without failing the batch.
    pub fn commit<S>(&mut self, tx: RewardTransaction, sink: &mut S) -> AiResult<()>
    where
        S: RewardSink + StructureSink + PersistenceSink + ?Sized,
    {
        if self.open != Some(tx.agent) {
            return Err(AiError::NoTransaction);
        }
        self.open = None;

        sink.begin_rewards(tx.agent);
        for payout in &tx.payouts {
            let applied = match payout {
                StagedPayout::Experience { unit, amount } => sink.award_experience(*unit, *amount),
                StagedPayout::Loot {
                    owners,
                    generator,
                    at,
                } => sink.spawn_loot(owners, *generator, *at),
                StagedPayout::Stability { structure, points } => {
                    match sink.adjust_stability(*structure, *points) {
                        Ok(()) => info!("{} death moved {structure} stability by {points}", tx.agent),
                        Err(e) => warn!("{} stability effect skipped: {e}", tx.agent),
                    }
                    Ok(())
                },
            };
            if let Err(reason) = applied {
                warn!("Rolling back rewards for {}: {reason}", tx.agent);
                sink.rollback_rewards(tx.agent);
                return Err(AiError::RewardRejected(reason));
            }
        }
        sink.commit_rewards(tx.agent);
        debug!("Committed {} payouts for {}", tx.payouts.len(), tx.agent);
        sink.save(tx.agent);
        Ok(())
    }

    /// Discards a transaction without applying it.
    pub fn rollback(&mut self, tx: RewardTransaction) {
        if self.open == Some(tx.agent) {
            self.open = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid_zone::GridZone;
    use crate::world::{Payout, RecordingSink, UnitInfo, UnitKind};

    fn p(raw: u64, threat: f64) -> Participant {
        Participant {
            unit: UnitId::from_raw(raw),
            threat,
        }
    }

    #[test]
    fn test_proportional_shares() {
        let mut coordinator = RewardCoordinator::new();
        let mut tx = coordinator.begin(UnitId::from_raw(100)).expect("idle");
        tx.stage_experience(&[p(1, 75.0), p(2, 25.0)], 200.0);

        let mut sink = RecordingSink::new();
        coordinator.commit(tx, &mut sink).expect("accepted");

        assert!((sink.experience_of(UnitId::from_raw(1)) - 150.0).abs() < 1e-9);
        assert!((sink.experience_of(UnitId::from_raw(2)) - 50.0).abs() < 1e-9);
        assert_eq!(
            sink.payouts.last(),
            Some(&Payout::Saved {
                agent: UnitId::from_raw(100)
            })
        );
    }

    #[test]
    fn test_reentry_rejected() {
        let mut coordinator = RewardCoordinator::new();
        let tx = coordinator.begin(UnitId::from_raw(1)).expect("idle");
        assert!(matches!(
            coordinator.begin(UnitId::from_raw(2)),
            Err(AiError::TransactionReentry)
        ));
        coordinator.rollback(tx);
        assert!(!coordinator.is_open());
        assert!(coordinator.begin(UnitId::from_raw(2)).is_ok());
    }

    #[test]
    fn test_refused_payout_closes_transaction() {
        let mut coordinator = RewardCoordinator::new();
        let mut tx = coordinator.begin(UnitId::from_raw(100)).expect("idle");
        tx.stage_experience(&[p(1, 1.0)], 10.0);

        let mut sink = RecordingSink {
            refuse: vec![UnitId::from_raw(1)],
            ..RecordingSink::default()
        };
        let result = coordinator.commit(tx, &mut sink);
        assert!(matches!(result, Err(AiError::RewardRejected(_))));
        assert!(sink.payouts.is_empty());
        assert!(!coordinator.is_open());
    }

    #[test]
    fn test_late_refusal_rolls_back_earlier_payouts() {
        let tower = UnitId::from_raw(77);
        let mut coordinator = RewardCoordinator::new();
        let mut tx = coordinator.begin(UnitId::from_raw(100)).expect("idle");
        tx.stage_experience(&[p(1, 75.0), p(2, 25.0)], 100.0);
        tx.stage_stability(tower, -40);

        let mut sink = RecordingSink {
            refuse: vec![UnitId::from_raw(2)],
            ..RecordingSink::new().with_structure(tower)
        };
        let result = coordinator.commit(tx, &mut sink);

        assert!(matches!(result, Err(AiError::RewardRejected(_))));
        assert!(sink.payouts.is_empty());
        assert!(sink.pending.is_none());
        assert!(sink.experience_of(UnitId::from_raw(1)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stability_committed_with_rewards() {
        let tower = UnitId::from_raw(77);
        let agent = UnitId::from_raw(100);
        let mut coordinator = RewardCoordinator::new();
        let mut tx = coordinator.begin(agent).expect("idle");
        tx.stage_experience(&[p(1, 10.0)], 20.0);
        tx.stage_stability(tower, -40);
        tx.stage_stability(UnitId::from_raw(78), 5);

        let mut sink = RecordingSink::new().with_structure(tower);
        coordinator.commit(tx, &mut sink).expect("accepted");

        assert_eq!(
            sink.payouts,
            vec![
                Payout::Experience {
                    unit: UnitId::from_raw(1),
                    amount: 20.0
                },
                Payout::Stability {
                    structure: tower,
                    points: -40
                },
                Payout::Saved { agent },
            ]
        );
    }

    #[test]
    fn test_loot_policies() {
        let mut coordinator = RewardCoordinator::new();
        let parts = [p(1, 9.0), p(2, 1.0)];

        let mut single = coordinator.begin(UnitId::from_raw(100)).expect("idle");
        single.stage_loot(&parts, 4, Position::default(), LootPolicy::Single);
        assert!(matches!(
            &single.payouts()[0],
            StagedPayout::Loot { owners, .. } if owners == &vec![UnitId::from_raw(1)]
        ));
        coordinator.rollback(single);

        let mut split = coordinator.begin(UnitId::from_raw(100)).expect("idle");
        split.stage_loot(&parts, 4, Position::default(), LootPolicy::Split);
        assert!(matches!(
            &split.payouts()[0],
            StagedPayout::Loot { owners, .. } if owners.len() == 2
        ));
    }

    #[test]
    fn test_participants_include_pseudo_threats() {
        let zone = GridZone::new(10, 10);
        let live = UnitId::from_raw(1);
        let fled = UnitId::from_raw(2);
        let npc = UnitId::from_raw(3);
        zone.upsert_unit(UnitInfo::player(live, Position::default()));
        zone.upsert_unit(UnitInfo {
            kind: UnitKind::Npc,
            ..UnitInfo::player(npc, Position::default())
        });

        let ledger = ThreatLedger::new();
        ledger.add(live, 30.0, Duration::ZERO);
        ledger.add(npc, 99.0, Duration::ZERO);
        let pseudo = PseudoThreatTracker::new();
        pseudo.register(fled, 10.0, Duration::ZERO, Duration::from_secs(30));

        let now = Duration::from_secs(5);
        let parts = collect_participants(&ledger, &pseudo, &zone, now);
        assert_eq!(parts, vec![p(1, 30.0), p(2, 10.0)]);

        let later = collect_participants(&ledger, &pseudo, &zone, Duration::from_secs(31));
        assert_eq!(later, vec![p(1, 30.0)]);
    }
}
