//! Target acquisition.
//!
//! Turns the threat ledger into a bounded set of locks and picks which locked
//! hostile is the primary focus.

use serde::{Deserialize, Serialize};
use tracing::debug;

use hostile_common::{LockId, Position, UnitId};

use crate::config::AiTuning;
use crate::error::{AiError, AiResult};
use crate::sampling::{random_secs, WeightedSampler};

// ============================================================================
// Locks
// ============================================================================

/// State of a targeting lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockState {
    /// Lock is being acquired
    Pending,
    /// Lock is established
    Locked,
    /// Lock was dropped
    Cancelled,
}

/// A targeting slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Lock {
    /// Lock identity
    pub id: LockId,
    /// Locked unit
    pub target: UnitId,
    /// Current state
    pub state: LockState,
    /// Whether this is the primary focus
    pub primary: bool,
    /// Seconds spent acquiring
    elapsed: f32,
}

impl Lock {
    fn new(target: UnitId) -> Self {
        Self {
            id: LockId::next(),
            target,
            state: LockState::Pending,
            primary: false,
            elapsed: 0.0,
        }
    }

    /// Returns whether the lock finished acquiring.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state == LockState::Locked
    }

    fn change(&self) -> LockChange {
        LockChange {
            lock: self.id,
            target: self.target,
            state: self.state,
            primary: self.primary,
        }
    }
}

/// A lock transition to be published.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockChange {
    /// Lock identity
    pub lock: LockId,
    /// Locked unit
    pub target: UnitId,
    /// State after the change
    pub state: LockState,
    /// Primary flag after the change
    pub primary: bool,
}

/// The bounded set of locks held by one agent.
#[derive(Debug, Clone)]
pub struct LockSet {
    owner: UnitId,
    capacity: usize,
    locks: Vec<Lock>,
}

impl LockSet {
    /// Creates an empty set with `capacity` slots.
    #[must_use]
    pub fn new(owner: UnitId, capacity: usize) -> Self {
        Self {
            owner,
            capacity: capacity.max(1),
            locks: Vec::with_capacity(capacity),
        }
    }

    /// Owning agent.
    #[must_use]
    pub const fn owner(&self) -> UnitId {
        self.owner
    }

    /// Number of slots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of held locks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns whether no lock is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Returns whether every slot is taken.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.locks.len() >= self.capacity
    }

    /// Iterates held locks.
    pub fn iter(&self) -> impl Iterator<Item = &Lock> {
        self.locks.iter()
    }

    /// Looks up a lock by id.
    #[must_use]
    pub fn get(&self, id: LockId) -> Option<&Lock> {
        self.locks.iter().find(|l| l.id == id)
    }

    /// Looks up the lock on `target`.
    #[must_use]
    pub fn find(&self, target: UnitId) -> Option<&Lock> {
        self.locks.iter().find(|l| l.target == target)
    }

    /// The primary lock, if any.
    #[must_use]
    pub fn primary(&self) -> Option<&Lock> {
        self.locks.iter().find(|l| l.primary)
    }

    /// Number of locks flagged primary. Never more than one.
    #[must_use]
    pub fn primary_count(&self) -> usize {
        self.locks.iter().filter(|l| l.primary).count()
    }

    /// Starts acquiring `target`. Returns `None` when full or already locked.
    pub fn add(&mut self, target: UnitId) -> Option<LockChange> {
        if self.is_full() || self.find(target).is_some() {
            return None;
        }
        let lock = Lock::new(target);
        let change = lock.change();
        self.locks.push(lock);
        Some(change)
    }

    /// Drops a lock. The returned change carries the cancelled state.
    pub fn cancel(&mut self, id: LockId) -> Option<LockChange> {
        let index = self.locks.iter().position(|l| l.id == id)?;
        let mut lock = self.locks.remove(index);
        lock.state = LockState::Cancelled;
        lock.primary = false;
        Some(lock.change())
    }

    /// Drops the lock on `target`, if held.
    pub fn cancel_target(&mut self, target: UnitId) -> Option<LockChange> {
        let id = self.find(target)?.id;
        self.cancel(id)
    }

    /// Makes `id` the primary lock, clearing the flag everywhere else.
    ///
    /// Fails with [`AiError::ForeignLock`] when the lock is not held by this
    /// set's owner. A lock still pending is left alone.
    pub fn set_primary(&mut self, id: LockId) -> AiResult<Vec<LockChange>> {
        let Some(target) = self.get(id) else {
            return Err(AiError::ForeignLock {
                owner: self.owner,
                lock: id,
            });
        };
        if !target.is_locked() || target.primary {
            return Ok(Vec::new());
        }

        let mut changes = Vec::new();
        for lock in &mut self.locks {
            let want = lock.id == id;
            if lock.primary != want {
                lock.primary = want;
                changes.push(lock.change());
            }
        }
        Ok(changes)
    }

    /// Removes the primary flag.
    pub fn clear_primary(&mut self) -> Option<LockChange> {
        let lock = self.locks.iter_mut().find(|l| l.primary)?;
        lock.primary = false;
        Some(lock.change())
    }

    /// Progresses pending locks, returning those that finished.
    pub fn advance(&mut self, dt: f32, lock_time: f32) -> Vec<LockChange> {
        let mut changes = Vec::new();
        for lock in &mut self.locks {
            if lock.state == LockState::Pending {
                lock.elapsed += dt;
                if lock.elapsed >= lock_time {
                    lock.state = LockState::Locked;
                    changes.push(lock.change());
                }
            }
        }
        changes
    }

    /// Drops every lock.
    pub fn clear(&mut self) -> Vec<LockChange> {
        let ids: Vec<LockId> = self.locks.iter().map(|l| l.id).collect();
        ids.into_iter().filter_map(|id| self.cancel(id)).collect()
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// An eligible hostile as seen this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Hostile
    pub unit: UnitId,
    /// Threat held against it
    pub threat: f64,
    /// Its position
    pub position: Position,
    /// Distance from the agent
    pub distance: f32,
}

/// Reconciles `locks` with this tick's eligible candidates.
///
/// Locks on units that are no longer candidates are cancelled. Candidates are
/// then visited from most to least hated: a free slot is used when available,
/// otherwise the lowest-threat non-primary lock is evicted to make room. Locks
/// taken earlier in the same pass are not evictable. A candidate that finds
/// nothing to evict waits for the next tick.
pub fn refresh_locks(locks: &mut LockSet, candidates: &[Candidate]) -> Vec<LockChange> {
    let mut changes = Vec::new();

    let stale: Vec<LockId> = locks
        .iter()
        .filter(|l| !candidates.iter().any(|c| c.unit == l.target))
        .map(|l| l.id)
        .collect();
    changes.extend(stale.into_iter().filter_map(|id| locks.cancel(id)));

    let mut ordered: Vec<&Candidate> = candidates.iter().collect();
    ordered.sort_by(|a, b| b.threat.total_cmp(&a.threat).then(a.unit.cmp(&b.unit)));

    let threat_of = |unit: UnitId| {
        candidates
            .iter()
            .find(|c| c.unit == unit)
            .map_or(0.0, |c| c.threat)
    };

    let mut taken: Vec<UnitId> = Vec::new();
    for candidate in ordered {
        if locks.find(candidate.unit).is_some() {
            continue;
        }
        if let Some(change) = locks.add(candidate.unit) {
            changes.push(change);
            taken.push(candidate.unit);
            continue;
        }

        let weakest = locks
            .iter()
            .filter(|l| !l.primary && l.target != candidate.unit && !taken.contains(&l.target))
            .map(|l| (l.id, l.target, threat_of(l.target)))
            .min_by(|a, b| a.2.total_cmp(&b.2));

        if let Some((id, evicted, threat)) = weakest {
            debug!(
                "{} evicts lock on {evicted} ({threat:.1}) for {} ({:.1})",
                locks.owner(),
                candidate.unit,
                candidate.threat
            );
            changes.extend(locks.cancel(id));
            if let Some(change) = locks.add(candidate.unit) {
                changes.push(change);
                taken.push(candidate.unit);
            }
        }
    }

    changes
}

// ============================================================================
// Primary Selection
// ============================================================================

/// How the primary target is chosen among locked hostiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimaryStrategy {
    /// Highest threat
    MostHated,
    /// Nearest
    Closest,
    /// Anything inside optimal range
    OptimalRange,
    /// Uniformly random
    Random,
}

impl PrimaryStrategy {
    /// Weighted sampler over all strategies.
    #[must_use]
    pub fn sampler(tuning: &AiTuning) -> WeightedSampler<Self> {
        let w = tuning.strategy_weights;
        WeightedSampler::new()
            .with(Self::MostHated, w.most_hated)
            .with(Self::Closest, w.closest)
            .with(Self::OptimalRange, w.optimal_range)
            .with(Self::Random, w.random)
    }
}

/// Picks one candidate according to `strategy`.
pub fn select_target(
    strategy: PrimaryStrategy,
    candidates: &[Candidate],
    optimal_range: f32,
    rng: &mut fastrand::Rng,
) -> Option<UnitId> {
    match strategy {
        PrimaryStrategy::MostHated => candidates
            .iter()
            .max_by(|a, b| a.threat.total_cmp(&b.threat).then(b.unit.cmp(&a.unit)))
            .map(|c| c.unit),
        PrimaryStrategy::Closest => candidates
            .iter()
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
            .map(|c| c.unit),
        PrimaryStrategy::OptimalRange => {
            let in_range: Vec<&Candidate> = candidates
                .iter()
                .filter(|c| c.distance <= optimal_range)
                .collect();
            if in_range.is_empty() {
                None
            } else {
                Some(in_range[rng.usize(0..in_range.len())].unit)
            }
        },
        PrimaryStrategy::Random => {
            if candidates.is_empty() {
                None
            } else {
                Some(candidates[rng.usize(0..candidates.len())].unit)
            }
        },
    }
}

/// Periodic primary-target chooser.
#[derive(Debug, Clone)]
pub struct TargetSelector {
    strategy: PrimaryStrategy,
    next_roll: f32,
    armed: bool,
}

impl Default for TargetSelector {
    fn default() -> Self {
        Self {
            strategy: PrimaryStrategy::MostHated,
            next_roll: 0.0,
            armed: false,
        }
    }
}

impl TargetSelector {
    /// Creates a selector that rolls on its first update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Strategy chosen by the last roll.
    #[must_use]
    pub const fn strategy(&self) -> PrimaryStrategy {
        self.strategy
    }

    /// Seconds until the next roll.
    #[must_use]
    pub const fn next_roll(&self) -> f32 {
        self.next_roll
    }

    /// Forces a roll on the next update.
    pub fn reset(&mut self) {
        self.next_roll = 0.0;
        self.armed = false;
    }

    /// Advances the timer and updates the primary flag.
    ///
    /// Only finished locks whose hostile is still a candidate can become
    /// primary. When the current strategy is most-hated, the lock on the
    /// most-hated hostile is promoted in place whenever it changes.
    pub fn update(
        &mut self,
        dt: f32,
        locks: &mut LockSet,
        candidates: &[Candidate],
        optimal_range: f32,
        tuning: &AiTuning,
        rng: &mut fastrand::Rng,
    ) -> AiResult<Vec<LockChange>> {
        let mut changes = Vec::new();
        let locked: Vec<Candidate> = candidates
            .iter()
            .filter(|c| locks.find(c.unit).is_some_and(Lock::is_locked))
            .copied()
            .collect();

        self.next_roll -= dt;
        if self.armed && locks.primary().is_none() {
            self.next_roll = 0.0;
        }

        if self.next_roll <= 0.0 {
            self.strategy = PrimaryStrategy::sampler(tuning)
                .pick(rng)
                .copied()
                .unwrap_or(PrimaryStrategy::MostHated);

            let pick = select_target(self.strategy, &locked, optimal_range, rng)
                .and_then(|unit| locks.find(unit))
                .map(|l| l.id);
            if let Some(id) = pick {
                changes.extend(locks.set_primary(id)?);
                self.next_roll = random_secs(
                    rng,
                    tuning.primary_reroll_min_secs,
                    tuning.primary_reroll_max_secs,
                );
                self.armed = true;
            } else {
                self.next_roll = random_secs(
                    rng,
                    tuning.primary_backoff_min_secs,
                    tuning.primary_backoff_max_secs,
                );
                self.armed = false;
            }
        }

        if self.strategy == PrimaryStrategy::MostHated {
            let hated = select_target(PrimaryStrategy::MostHated, &locked, optimal_range, rng)
                .and_then(|unit| locks.find(unit))
                .filter(|l| !l.primary)
                .map(|l| l.id);
            if let Some(id) = hated {
                changes.extend(locks.set_primary(id)?);
                self.armed = true;
            }
        }

        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn candidate(raw: u64, threat: f64, distance: f32) -> Candidate {
        Candidate {
            unit: UnitId::from_raw(raw),
            threat,
            position: Position::new(distance, 0.0),
            distance,
        }
    }

    #[test]
    fn test_lock_lifecycle() {
        let mut locks = LockSet::new(UnitId::from_raw(100), 2);
        let change = locks.add(UnitId::from_raw(1)).expect("free slot");
        assert_eq!(change.state, LockState::Pending);

        assert!(locks.advance(1.0, 1.5).is_empty());
        let done = locks.advance(0.5, 1.5);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].state, LockState::Locked);

        let cancelled = locks.cancel_target(UnitId::from_raw(1)).expect("held");
        assert_eq!(cancelled.state, LockState::Cancelled);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_foreign_lock_rejected() {
        let mut locks = LockSet::new(UnitId::from_raw(100), 2);
        let err = locks
            .set_primary(LockId::from_raw(u64::MAX))
            .expect_err("lock is not owned");
        assert!(matches!(err, AiError::ForeignLock { .. }));
    }

    #[test]
    fn test_single_primary() {
        let mut locks = LockSet::new(UnitId::from_raw(100), 3);
        for raw in 1..=3 {
            locks.add(UnitId::from_raw(raw));
        }
        locks.advance(5.0, 1.0);
        let ids: Vec<LockId> = locks.iter().map(|l| l.id).collect();

        locks.set_primary(ids[0]).expect("owned");
        locks.set_primary(ids[2]).expect("owned");
        assert_eq!(locks.primary_count(), 1);
        assert_eq!(locks.primary().map(|l| l.id), Some(ids[2]));
    }

    #[test]
    fn test_pending_lock_cannot_be_primary() {
        let mut locks = LockSet::new(UnitId::from_raw(100), 1);
        let id = locks.add(UnitId::from_raw(1)).expect("free slot").lock;
        assert!(locks.set_primary(id).expect("owned").is_empty());
        assert!(locks.primary().is_none());
    }

    #[test]
    fn test_eviction_of_weakest() {
        let mut locks = LockSet::new(UnitId::from_raw(100), 4);
        let mut candidates = vec![
            candidate(1, 50.0, 5.0),
            candidate(2, 40.0, 5.0),
            candidate(3, 30.0, 5.0),
            candidate(4, 20.0, 5.0),
        ];
        refresh_locks(&mut locks, &candidates);
        assert_eq!(locks.len(), 4);

        candidates.push(candidate(5, 25.0, 5.0));
        let changes = refresh_locks(&mut locks, &candidates);

        assert!(locks.find(UnitId::from_raw(5)).is_some());
        assert!(locks.find(UnitId::from_raw(4)).is_none());
        assert!(changes
            .iter()
            .any(|c| c.target == UnitId::from_raw(4) && c.state == LockState::Cancelled));
        assert_eq!(locks.len(), 4);
    }

    #[test]
    fn test_weaker_newcomer_still_evicts_weakest() {
        let mut locks = LockSet::new(UnitId::from_raw(100), 4);
        let mut candidates = vec![
            candidate(1, 50.0, 5.0),
            candidate(2, 40.0, 5.0),
            candidate(3, 30.0, 5.0),
            candidate(4, 20.0, 5.0),
        ];
        refresh_locks(&mut locks, &candidates);

        candidates.push(candidate(5, 10.0, 5.0));
        let changes = refresh_locks(&mut locks, &candidates);

        assert!(locks.find(UnitId::from_raw(5)).is_some());
        assert!(locks.find(UnitId::from_raw(4)).is_none());
        assert!(changes
            .iter()
            .any(|c| c.target == UnitId::from_raw(4) && c.state == LockState::Cancelled));
        assert_eq!(locks.len(), 4);
    }

    #[test]
    fn test_newcomers_do_not_evict_each_other() {
        let mut locks = LockSet::new(UnitId::from_raw(100), 2);
        let mut candidates = vec![candidate(1, 50.0, 5.0), candidate(2, 40.0, 5.0)];
        refresh_locks(&mut locks, &candidates);

        candidates.push(candidate(3, 8.0, 5.0));
        candidates.push(candidate(4, 6.0, 5.0));
        refresh_locks(&mut locks, &candidates);

        assert_eq!(locks.len(), 2);
        assert!(locks.find(UnitId::from_raw(3)).is_some());
        assert!(locks.find(UnitId::from_raw(4)).is_some());
    }

    #[test]
    fn test_primary_is_never_evicted() {
        let mut locks = LockSet::new(UnitId::from_raw(100), 1);
        let mut candidates = vec![candidate(1, 5.0, 5.0)];
        refresh_locks(&mut locks, &candidates);
        locks.advance(5.0, 1.0);
        let id = locks.find(UnitId::from_raw(1)).expect("held").id;
        locks.set_primary(id).expect("owned");

        candidates.push(candidate(2, 500.0, 5.0));
        refresh_locks(&mut locks, &candidates);
        assert!(locks.find(UnitId::from_raw(1)).is_some());
        assert!(locks.find(UnitId::from_raw(2)).is_none());
    }

    #[test]
    fn test_stale_locks_cancelled() {
        let mut locks = LockSet::new(UnitId::from_raw(100), 2);
        refresh_locks(&mut locks, &[candidate(1, 5.0, 5.0)]);
        let changes = refresh_locks(&mut locks, &[]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].state, LockState::Cancelled);
    }

    #[test]
    fn test_select_target_strategies() {
        let mut rng = fastrand::Rng::with_seed(5);
        let cands = [candidate(1, 10.0, 20.0), candidate(2, 90.0, 40.0), candidate(3, 30.0, 2.0)];
        assert_eq!(
            select_target(PrimaryStrategy::MostHated, &cands, 10.0, &mut rng),
            Some(UnitId::from_raw(2))
        );
        assert_eq!(
            select_target(PrimaryStrategy::Closest, &cands, 10.0, &mut rng),
            Some(UnitId::from_raw(3))
        );
        assert_eq!(
            select_target(PrimaryStrategy::OptimalRange, &cands, 10.0, &mut rng),
            Some(UnitId::from_raw(3))
        );
        assert_eq!(
            select_target(PrimaryStrategy::OptimalRange, &cands, 1.0, &mut rng),
            None
        );
        assert!(select_target(PrimaryStrategy::Random, &[], 1.0, &mut rng).is_none());
    }

    #[test]
    fn test_selector_backs_off_without_locked_candidates() {
        let tuning = AiTuning::default();
        let mut rng = fastrand::Rng::with_seed(11);
        let mut locks = LockSet::new(UnitId::from_raw(100), 2);
        let cands = [candidate(1, 10.0, 5.0)];
        refresh_locks(&mut locks, &cands);

        let mut selector = TargetSelector::new();
        let changes = selector
            .update(0.1, &mut locks, &cands, 10.0, &tuning, &mut rng)
            .expect("own locks");
        assert!(changes.is_empty());
        assert!(selector.next_roll() >= tuning.primary_backoff_min_secs);
        assert!(selector.next_roll() <= tuning.primary_backoff_max_secs);
    }

    #[test]
    fn test_selector_picks_locked_primary() {
        let tuning = AiTuning::default();
        let mut rng = fastrand::Rng::with_seed(11);
        let mut locks = LockSet::new(UnitId::from_raw(100), 2);
        let cands = [candidate(1, 10.0, 5.0)];
        refresh_locks(&mut locks, &cands);
        locks.advance(2.0, 1.5);

        let mut selector = TargetSelector::new();
        selector
            .update(0.1, &mut locks, &cands, 10.0, &tuning, &mut rng)
            .expect("own locks");
        assert_eq!(locks.primary().map(|l| l.target), Some(UnitId::from_raw(1)));
        assert!(selector.next_roll() >= tuning.primary_reroll_min_secs);
    }

    proptest! {
        #[test]
        fn prop_at_most_one_primary(
            ops in proptest::collection::vec((0u8..4, 1u64..6, 1i32..100), 1..64),
            seed in any::<u64>(),
        ) {
            let tuning = AiTuning::default();
            let mut rng = fastrand::Rng::with_seed(seed);
            let mut locks = LockSet::new(UnitId::from_raw(100), 3);
            let mut selector = TargetSelector::new();
            let mut cands: Vec<Candidate> = Vec::new();

            for (op, unit, threat) in ops {
                match op {
                    0 => {
                        cands.retain(|c| c.unit.raw() != unit);
                        cands.push(candidate(unit, f64::from(threat), threat as f32));
                    },
                    1 => cands.retain(|c| c.unit.raw() != unit),
                    2 => { locks.advance(1.0, 1.5); },
                    _ => {
                        selector.update(3.0, &mut locks, &cands, 30.0, &tuning, &mut rng)
                            .expect("own locks");
                    },
                }
                refresh_locks(&mut locks, &cands);
                prop_assert!(locks.primary_count() <= 1);
                prop_assert!(locks.len() <= locks.capacity());
            }
        }
    }
}
