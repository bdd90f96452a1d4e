//! Time-boxed memory of hostiles that left the ledger.
//!
//! A pseudo-threat is never targeted. It only keeps a unit eligible for a
//! share of the kill reward for a while after it died, fled or became
//! unreachable.

use std::time::Duration;

use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use hostile_common::UnitId;

/// A removed hostile still eligible for rewards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PseudoThreat {
    /// Unit
    pub unit: UnitId,
    /// Threat it held when it was removed
    pub threat: f64,
    /// Simulation time after which it no longer counts
    pub expires_at: Duration,
}

/// Concurrent set of pseudo-threats.
#[derive(Debug)]
pub struct PseudoThreatTracker {
    entries: DashMap<UnitId, PseudoThreat, RandomState>,
}

impl Default for PseudoThreatTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PseudoThreatTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Registers or refreshes a unit.
    ///
    /// A refresh pushes the expiry out to `now + lifetime` (saturating) and
    /// keeps the larger of the stored and incoming threat.
    pub fn register(&self, unit: UnitId, threat: f64, now: Duration, lifetime: Duration) {
        let expires_at = now.saturating_add(lifetime);
        self.entries
            .entry(unit)
            .and_modify(|entry| {
                entry.threat = entry.threat.max(threat);
                entry.expires_at = expires_at;
            })
            .or_insert(PseudoThreat {
                unit,
                threat: threat.max(0.0),
                expires_at,
            });
    }

    /// Forgets a unit, typically because it re-entered the ledger.
    pub fn remove(&self, unit: UnitId) -> Option<PseudoThreat> {
        self.entries.remove(&unit).map(|(_, entry)| entry)
    }

    /// Returns whether `unit` is tracked and unexpired at `now`.
    #[must_use]
    pub fn is_active(&self, unit: UnitId, now: Duration) -> bool {
        self.entries.get(&unit).is_some_and(|e| e.expires_at > now)
    }

    /// Drops expired entries and returns how many were dropped.
    pub fn purge_expired(&self, now: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before - self.entries.len()
    }

    /// Unexpired entries, ordered by unit id.
    #[must_use]
    pub fn active(&self, now: Duration) -> Vec<PseudoThreat> {
        let mut active: Vec<PseudoThreat> = self
            .entries
            .iter()
            .filter(|e| e.expires_at > now)
            .map(|e| *e.value())
            .collect();
        active.sort_by_key(|e| e.unit);
        active
    }

    /// Number of tracked entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets everything.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
