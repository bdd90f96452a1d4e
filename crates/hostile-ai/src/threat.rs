//! Per-agent threat ledger.
//!
//! The ledger maps each hostile to an accumulating threat score. It is read by
//! the tick loop and written by damage callbacks on other threads, so it sits
//! on a sharded concurrent map: `add` takes the shard entry, increments in
//! place and stamps the time, which makes every contribution atomic without a
//! global lock. The map itself sits behind a read-mostly lock so that
//! [`ThreatLedger::replace_with`] can swap in a fully built map at once.

use std::time::Duration;

use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use hostile_common::UnitId;

/// Accumulated threat for one hostile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostileRecord {
    /// Hostile unit
    pub unit: UnitId,
    /// Accumulated threat, never negative
    pub threat: f64,
    /// Simulation time of the last contribution
    pub last_update: Duration,
}

impl HostileRecord {
    /// Creates an empty record stamped at `now`.
    #[must_use]
    pub const fn new(unit: UnitId, now: Duration) -> Self {
        Self {
            unit,
            threat: 0.0,
            last_update: now,
        }
    }

    /// Returns whether the record has gone `expiry` without an update.
    #[must_use]
    pub fn is_expired(&self, now: Duration, expiry: Duration) -> bool {
        now.saturating_sub(self.last_update) >= expiry
    }
}

/// Concurrent hostile → threat map owned by one agent.
#[derive(Debug)]
pub struct ThreatLedger {
    records: RwLock<RecordMap>,
}

type RecordMap = DashMap<UnitId, HostileRecord, RandomState>;

fn record_map() -> RecordMap {
    DashMap::with_hasher(RandomState::new())
}

impl Default for ThreatLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreatLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(record_map()),
        }
    }

    /// Adds `value` threat for `hostile`.
    ///
    /// Non-positive (and NaN) values are ignored and return `None`; otherwise
    /// the new accumulated value is returned.
    pub fn add(&self, hostile: UnitId, value: f64, now: Duration) -> Option<f64> {
        if value.is_nan() || value <= 0.0 {
            return None;
        }
        let records = self.records.read();
        let mut record = records
            .entry(hostile)
            .or_insert_with(|| HostileRecord::new(hostile, now));
        record.threat += value;
        record.last_update = now;
        Some(record.threat)
    }

    /// Evicts a hostile outright, returning its last record.
    pub fn remove(&self, hostile: UnitId) -> Option<HostileRecord> {
        let records = self.records.read();
        records.remove(&hostile).map(|(_, record)| record)
    }

    /// Copy of the record for `hostile`.
    #[must_use]
    pub fn get(&self, hostile: UnitId) -> Option<HostileRecord> {
        let records = self.records.read();
        let record = records.get(&hostile).map(|r| *r);
        record
    }

    /// Current threat of `hostile`, zero when absent.
    #[must_use]
    pub fn threat_of(&self, hostile: UnitId) -> f64 {
        let records = self.records.read();
        let threat = records.get(&hostile).map_or(0.0, |r| r.threat);
        threat
    }

    /// Returns whether `hostile` is tracked.
    #[must_use]
    pub fn contains(&self, hostile: UnitId) -> bool {
        self.records.read().contains_key(&hostile)
    }

    /// Number of tracked hostiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns whether no hostile is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Forgets every hostile.
    pub fn clear(&self) {
        *self.records.write() = record_map();
    }

    /// Point-in-time copy of every record, highest threat first.
    ///
    /// Ties are broken by unit id so the order is deterministic.
    #[must_use]
    pub fn snapshot(&self) -> Vec<HostileRecord> {
        let mut records: Vec<HostileRecord> =
            self.records.read().iter().map(|r| *r.value()).collect();
        records.sort_by(|a, b| b.threat.total_cmp(&a.threat).then(a.unit.cmp(&b.unit)));
        records
    }

    /// The hostile with the highest threat.
    #[must_use]
    pub fn most_hated(&self) -> Option<HostileRecord> {
        self.snapshot().into_iter().next()
    }

    /// Sum of all threat values.
    #[must_use]
    pub fn total_threat(&self) -> f64 {
        let records = self.records.read();
        let total = records.iter().map(|r| r.threat).sum();
        total
    }

    /// Replaces the whole ledger with `records`.
    ///
    /// Used by call-for-help: the helper forgets its own hostiles and adopts
    /// the caller's. The replacement map is built first and swapped in under
    /// the write lock, so readers see either the old ledger or the new one.
    /// Applying the same set twice yields the same ledger.
    pub fn replace_with(&self, records: &[HostileRecord]) {
        let replacement = record_map();
        for record in records {
            if record.threat > 0.0 {
                replacement.insert(record.unit, *record);
            }
        }
        *self.records.write() = replacement;
    }

    /// Serializable copy of the ledger.
    #[must_use]
    pub fn to_snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            records: self.snapshot(),
        }
    }

    /// Rebuilds a ledger from a snapshot.
    #[must_use]
    pub fn restore(snapshot: &LedgerSnapshot) -> Self {
        let ledger = Self::new();
        ledger.replace_with(&snapshot.records);
        ledger
    }
}

/// Serialized form of a [`ThreatLedger`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Records, highest threat first
    pub records: Vec<HostileRecord>,
}
