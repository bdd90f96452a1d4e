//! Simulation configuration.
//!
//! Scenario size, tick rate and the engine tuning. Loaded from a TOML file;
//! anything missing or unreadable falls back to defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{info, warn};

use hostile_ai::AiTuning;

/// Configuration file name.
pub const CONFIG_FILE: &str = "hostile-sim.toml";

/// Simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    // === Run ===
    /// Number of ticks to simulate
    pub ticks: u32,
    /// Seconds per tick
    pub tick_secs: f32,
    /// Random seed (None = random)
    pub seed: Option<u64>,
    /// Log a status line every N ticks (0 = never)
    pub status_every: u32,

    // === Zone ===
    /// Grid width in cells
    pub grid_width: i32,
    /// Grid height in cells
    pub grid_height: i32,

    // === Scenario ===
    /// Agents in the grouped flock
    pub flock_size: u32,
    /// Hit points of a flock member
    pub flock_health: f64,
    /// Hit points of the boss
    pub boss_health: f64,
    /// Scripted attackers
    pub player_count: u32,
    /// Damage each attacker deals per second
    pub player_dps: f64,
    /// Distance from which attackers can hit
    pub player_reach: f32,

    // === Engine ===
    /// Decision engine tuning
    pub tuning: AiTuning,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            // Run
            ticks: 600,
            tick_secs: 0.1,
            seed: None,
            status_every: 100,

            // Zone
            grid_width: 96,
            grid_height: 96,

            // Scenario
            flock_size: 4,
            flock_health: 200.0,
            boss_health: 1200.0,
            player_count: 3,
            player_dps: 25.0,
            player_reach: 6.0,

            // Engine
            tuning: AiTuning::default(),
        }
    }
}

impl SimConfig {
    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        match fs::File::open(path) {
            Ok(mut file) => {
                let mut contents = String::new();
                if let Err(e) = file.read_to_string(&mut contents) {
                    warn!("Failed to read config file: {e}");
                    return Self::default();
                }

                match toml::from_str(&contents) {
                    Ok(config) => {
                        info!("Loaded config from {}", path.display());
                        config
                    },
                    Err(e) => {
                        warn!("Failed to parse config file: {e}");
                        Self::default()
                    },
                }
            },
            Err(e) => {
                warn!("Failed to open config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        self.tick_secs = self.tick_secs.clamp(0.01, 1.0);
        self.grid_width = self.grid_width.clamp(32, 1024);
        self.grid_height = self.grid_height.clamp(32, 1024);
        self.flock_size = self.flock_size.min(32);
        self.player_count = self.player_count.clamp(1, 16);
        self.flock_health = self.flock_health.max(1.0);
        self.boss_health = self.boss_health.max(1.0);
        self.player_dps = self.player_dps.max(0.0);
        self.player_reach = self.player_reach.clamp(1.0, 50.0);
        self.tuning.validate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = SimConfig::default();
        assert_eq!(config.ticks, 600);
        assert_eq!(config.flock_size, 4);
        assert!((config.tuning.group_spread_factor - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_validation() {
        let mut config = SimConfig {
            tick_secs: 5.0,
            grid_width: 4,
            player_count: 0,
            ..SimConfig::default()
        };
        config.tuning.max_locks = 0;

        config.validate();

        assert!((config.tick_secs - 1.0).abs() < f32::EPSILON);
        assert_eq!(config.grid_width, 32);
        assert_eq!(config.player_count, 1);
        assert_eq!(config.tuning.max_locks, 1);
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("sim").join(CONFIG_FILE);

        let mut config = SimConfig::default();
        config.ticks = 42;
        config.seed = Some(7);
        config.tuning.call_for_help_threshold = 0.3;

        config.save_to(&config_path).expect("Failed to save config");
        let loaded = SimConfig::load_from(&config_path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_partial_tuning_section() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join(CONFIG_FILE);
        fs::write(&config_path, "ticks = 10\n\n[tuning]\nmax_locks = 2\n")
            .expect("Failed to write config");

        let loaded = SimConfig::load_from(&config_path);
        assert_eq!(loaded.ticks, 10);
        assert_eq!(loaded.tuning.max_locks, 2);
        assert!((loaded.tuning.lock_time_secs - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_config_invalid_file_uses_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join(CONFIG_FILE);
        fs::write(&config_path, "ticks = \"lots\"").expect("Failed to write config");

        assert_eq!(SimConfig::load_from(&config_path), SimConfig::default());
    }

    #[test]
    fn test_config_load_missing_file() {
        let config = SimConfig::load_from("/nonexistent/path/hostile-sim.toml");
        assert_eq!(config.ticks, 600);
    }
}
