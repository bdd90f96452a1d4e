//! Tunable difficulty parameters.
//!
//! Every numeric threshold the engine consults lives here so a zone can be
//! made harder or softer without touching decision code. Values are plain
//! constants, never learned.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Upper bound for every timer and lifetime, one simulated day.
pub const MAX_TIMER_SECS: f32 = 86_400.0;

// ============================================================================
// Strategy Weights
// ============================================================================

/// Relative weights for the primary-target strategies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyWeights {
    /// Pick the hostile with the highest threat
    pub most_hated: u32,
    /// Pick the nearest hostile
    pub closest: u32,
    /// Pick a hostile inside optimal range
    pub optimal_range: u32,
    /// Pick uniformly at random
    pub random: u32,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            most_hated: 4,
            closest: 2,
            optimal_range: 3,
            random: 1,
        }
    }
}

// ============================================================================
// AI Tuning
// ============================================================================

/// Engine-wide tuning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiTuning {
    // === Threat ===
    /// Threat generated per point of damage
    pub damage_threat_multiplier: f64,
    /// Threat an aggressive agent assigns to a unit it notices in aggro range
    pub body_pull_threat: f64,
    /// Threat assigned to a unit holding the agent as its primary target
    pub lock_threat: f64,
    /// Threat assigned to a unit assisting a known hostile
    pub assist_threat: f64,
    /// Threat assigned to a unit that debuffs the agent
    pub debuff_threat: f64,
    /// Seconds without an update after which a hostile counts as expired
    pub threat_expiry_secs: f32,
    /// Seconds a removed hostile stays eligible for rewards
    pub pseudo_threat_secs: f32,
    /// Fraction of threat propagated to groupmates
    pub group_spread_factor: f64,
    /// Seconds between combat threat re-scans
    pub threat_scan_interval: f32,

    // === Locks ===
    /// Default number of targeting slots
    pub max_locks: usize,
    /// Default seconds for a pending lock to finish
    pub lock_time_secs: f32,
    /// Minimum seconds before the primary target is re-rolled
    pub primary_reroll_min_secs: f32,
    /// Maximum seconds before the primary target is re-rolled
    pub primary_reroll_max_secs: f32,
    /// Minimum back-off when no candidate could be picked
    pub primary_backoff_min_secs: f32,
    /// Maximum back-off when no candidate could be picked
    pub primary_backoff_max_secs: f32,
    /// Strategy weights for primary selection
    pub strategy_weights: StrategyWeights,

    // === Modules ===
    /// Seconds between activation decisions for a single module
    pub module_cycle_secs: f32,
    /// Repairers fire below this armor ratio
    pub repair_armor_below: f32,
    /// Repairers need more than this core ratio
    pub repair_core_above: f32,
    /// Shield generators engage below this armor ratio
    pub shield_armor_below: f32,
    /// Debuff and support modules need at least this core ratio
    pub debuff_core_above: f32,

    // === Groups ===
    /// Armor ratio under which an agent calls for help
    pub call_for_help_threshold: f32,
    /// Seconds between two calls from the same agent
    pub call_for_help_cooldown_secs: f32,

    // === Movement ===
    /// Combat range used when an agent defines none
    pub min_combat_range: f32,
    /// Minimum seconds between idle roams
    pub roam_interval_min_secs: f32,
    /// Maximum seconds between idle roams
    pub roam_interval_max_secs: f32,
    /// Seconds between firing-position searches while out of range
    pub reposition_interval_secs: f32,
    /// Seconds a failed homing waits before retrying
    pub homing_retry_secs: f32,
    /// Distance at which a waypoint counts as reached
    pub arrival_tolerance: f32,

    // === Pathfinding ===
    /// Node expansion cap per search
    pub path_max_expansions: usize,
    /// Cost of a diagonal step relative to a straight one
    pub path_diagonal_cost: f32,
    /// Background pathfinding worker threads (0 = inline)
    pub path_workers: usize,
}

impl Default for AiTuning {
    fn default() -> Self {
        Self {
            // Threat
            damage_threat_multiplier: 0.9,
            body_pull_threat: 10.0,
            lock_threat: 5.0,
            assist_threat: 3.0,
            debuff_threat: 8.0,
            threat_expiry_secs: 30.0,
            pseudo_threat_secs: 30.0,
            group_spread_factor: 0.5,
            threat_scan_interval: 2.0,

            // Locks
            max_locks: 4,
            lock_time_secs: 1.5,
            primary_reroll_min_secs: 10.0,
            primary_reroll_max_secs: 25.0,
            primary_backoff_min_secs: 2.0,
            primary_backoff_max_secs: 5.0,
            strategy_weights: StrategyWeights::default(),

            // Modules
            module_cycle_secs: 1.0,
            repair_armor_below: 0.95,
            repair_core_above: 0.35,
            shield_armor_below: 0.35,
            debuff_core_above: 0.55,

            // Groups
            call_for_help_threshold: 0.2,
            call_for_help_cooldown_secs: 5.0,

            // Movement
            min_combat_range: 3.0,
            roam_interval_min_secs: 8.0,
            roam_interval_max_secs: 15.0,
            reposition_interval_secs: 3.0,
            homing_retry_secs: 3.0,
            arrival_tolerance: 0.75,

            // Pathfinding
            path_max_expansions: 4096,
            path_diagonal_cost: std::f32::consts::SQRT_2,
            path_workers: 1,
        }
    }
}

impl AiTuning {
    /// Clamp values to sensible ranges, logging every correction.
    ///
    /// Returns the number of fields that had to be corrected.
    pub fn validate(&mut self) -> usize {
        let mut fixed = 0;

        fixed += clamp_ratio("repair_armor_below", &mut self.repair_armor_below);
        fixed += clamp_ratio("repair_core_above", &mut self.repair_core_above);
        fixed += clamp_ratio("shield_armor_below", &mut self.shield_armor_below);
        fixed += clamp_ratio("debuff_core_above", &mut self.debuff_core_above);
        fixed += clamp_ratio("call_for_help_threshold", &mut self.call_for_help_threshold);

        for (name, value) in [
            ("threat_expiry_secs", &mut self.threat_expiry_secs),
            ("pseudo_threat_secs", &mut self.pseudo_threat_secs),
            ("threat_scan_interval", &mut self.threat_scan_interval),
            ("lock_time_secs", &mut self.lock_time_secs),
            ("primary_reroll_min_secs", &mut self.primary_reroll_min_secs),
            ("primary_reroll_max_secs", &mut self.primary_reroll_max_secs),
            ("primary_backoff_min_secs", &mut self.primary_backoff_min_secs),
            ("primary_backoff_max_secs", &mut self.primary_backoff_max_secs),
            ("module_cycle_secs", &mut self.module_cycle_secs),
            ("call_for_help_cooldown_secs", &mut self.call_for_help_cooldown_secs),
            ("roam_interval_min_secs", &mut self.roam_interval_min_secs),
            ("roam_interval_max_secs", &mut self.roam_interval_max_secs),
            ("reposition_interval_secs", &mut self.reposition_interval_secs),
            ("homing_retry_secs", &mut self.homing_retry_secs),
        ] {
            fixed += clamp_secs(name, value);
        }

        if !(0.0..=1.0).contains(&self.group_spread_factor) {
            warn!(
                "group_spread_factor {} out of range, clamping",
                self.group_spread_factor
            );
            self.group_spread_factor = self.group_spread_factor.clamp(0.0, 1.0);
            fixed += 1;
        }

        if self.damage_threat_multiplier < 0.0 {
            warn!("damage_threat_multiplier must not be negative, resetting to 0.9");
            self.damage_threat_multiplier = 0.9;
            fixed += 1;
        }

        if self.max_locks == 0 {
            warn!("max_locks must be at least 1");
            self.max_locks = 1;
            fixed += 1;
        }

        if self.min_combat_range < 3.0 {
            warn!(
                "min_combat_range {} below floor, using 3.0",
                self.min_combat_range
            );
            self.min_combat_range = 3.0;
            fixed += 1;
        }

        if self.primary_reroll_min_secs > self.primary_reroll_max_secs {
            warn!("primary re-roll interval is inverted, swapping bounds");
            std::mem::swap(
                &mut self.primary_reroll_min_secs,
                &mut self.primary_reroll_max_secs,
            );
            fixed += 1;
        }
        if self.primary_backoff_min_secs > self.primary_backoff_max_secs {
            warn!("primary back-off interval is inverted, swapping bounds");
            std::mem::swap(
                &mut self.primary_backoff_min_secs,
                &mut self.primary_backoff_max_secs,
            );
            fixed += 1;
        }
        if self.roam_interval_min_secs > self.roam_interval_max_secs {
            warn!("roam interval is inverted, swapping bounds");
            std::mem::swap(
                &mut self.roam_interval_min_secs,
                &mut self.roam_interval_max_secs,
            );
            fixed += 1;
        }

        if self.module_cycle_secs <= 0.0 {
            warn!("module_cycle_secs must be positive, using 1.0");
            self.module_cycle_secs = 1.0;
            fixed += 1;
        }

        if self.path_diagonal_cost < 1.0 {
            warn!("path_diagonal_cost below 1.0 breaks the heuristic, using sqrt(2)");
            self.path_diagonal_cost = std::f32::consts::SQRT_2;
            fixed += 1;
        }

        fixed
    }

    /// How long an evicted hostile keeps its reward share.
    #[must_use]
    pub fn pseudo_threat_lifetime(&self) -> Duration {
        secs_to_duration(self.pseudo_threat_secs)
    }

    /// Idle time after which a neutral agent stops counting a hostile.
    #[must_use]
    pub fn threat_expiry(&self) -> Duration {
        secs_to_duration(self.threat_expiry_secs)
    }

    /// Minimum spacing between two calls for help from one agent.
    #[must_use]
    pub fn help_cooldown(&self) -> Duration {
        secs_to_duration(self.call_for_help_cooldown_secs)
    }
}

/// Converts seconds to a [`Duration`] without panicking.
///
/// Negative and NaN inputs give zero, anything past [`MAX_TIMER_SECS`] is
/// capped.
#[must_use]
pub fn secs_to_duration(secs: f32) -> Duration {
    let secs = if secs.is_nan() { 0.0 } else { secs.clamp(0.0, MAX_TIMER_SECS) };
    Duration::try_from_secs_f32(secs).unwrap_or(Duration::ZERO)
}

fn clamp_secs(name: &str, value: &mut f32) -> usize {
    if value.is_finite() && (0.0..=MAX_TIMER_SECS).contains(value) {
        return 0;
    }
    let fixed = if value.is_nan() { 0.0 } else { value.clamp(0.0, MAX_TIMER_SECS) };
    warn!("{name} {value} outside 0..={MAX_TIMER_SECS}, using {fixed}");
    *value = fixed;
    1
}

fn clamp_ratio(name: &str, value: &mut f32) -> usize {
    if (0.0..=1.0).contains(value) {
        return 0;
    }
    warn!("{name} {value} outside 0..=1, clamping");
    *value = value.clamp(0.0, 1.0);
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let tuning = AiTuning::default();
        assert!((tuning.damage_threat_multiplier - 0.9).abs() < f64::EPSILON);
        assert!((tuning.threat_expiry_secs - 30.0).abs() < f32::EPSILON);
        assert!((tuning.repair_armor_below - 0.95).abs() < f32::EPSILON);
        assert!((tuning.shield_armor_below - 0.35).abs() < f32::EPSILON);
        assert!((tuning.debuff_core_above - 0.55).abs() < f32::EPSILON);
        assert!((tuning.call_for_help_threshold - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_defaults_are_valid() {
        let mut tuning = AiTuning::default();
        assert_eq!(tuning.validate(), 0);
    }

    #[test]
    fn test_validate_clamps() {
        let mut tuning = AiTuning {
            repair_armor_below: 1.5,
            max_locks: 0,
            min_combat_range: 0.0,
            primary_reroll_min_secs: 30.0,
            primary_reroll_max_secs: 10.0,
            ..AiTuning::default()
        };

        assert_eq!(tuning.validate(), 4);
        assert!((tuning.repair_armor_below - 1.0).abs() < f32::EPSILON);
        assert_eq!(tuning.max_locks, 1);
        assert!((tuning.min_combat_range - 3.0).abs() < f32::EPSILON);
        assert!(tuning.primary_reroll_min_secs < tuning.primary_reroll_max_secs);
    }

    #[test]
    fn test_validate_bounds_timers() {
        let mut tuning = AiTuning {
            pseudo_threat_secs: 1e30,
            threat_expiry_secs: f32::INFINITY,
            call_for_help_cooldown_secs: f32::NAN,
            homing_retry_secs: -4.0,
            ..AiTuning::default()
        };

        assert_eq!(tuning.validate(), 4);
        assert!((tuning.pseudo_threat_secs - MAX_TIMER_SECS).abs() < f32::EPSILON);
        assert!((tuning.threat_expiry_secs - MAX_TIMER_SECS).abs() < f32::EPSILON);
        assert!(tuning.call_for_help_cooldown_secs.abs() < f32::EPSILON);
        assert!(tuning.homing_retry_secs.abs() < f32::EPSILON);
    }

    #[test]
    fn test_durations_never_panic_on_raw_values() {
        let tuning = AiTuning {
            pseudo_threat_secs: 1e30,
            threat_expiry_secs: f32::INFINITY,
            call_for_help_cooldown_secs: f32::NAN,
            ..AiTuning::default()
        };

        assert_eq!(tuning.pseudo_threat_lifetime(), Duration::from_secs(86_400));
        assert_eq!(tuning.threat_expiry(), Duration::from_secs(86_400));
        assert_eq!(tuning.help_cooldown(), Duration::ZERO);
        assert_eq!(secs_to_duration(-1.0), Duration::ZERO);
    }
}
