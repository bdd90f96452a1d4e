//! # Hostile Sim
//!
//! Headless driver for the hostile NPC decision engine.
//!
//! Loads a [`config::SimConfig`] (first argument, or `hostile-sim.toml` in the
//! working directory), builds a walled arena with a grouped flock and a boss,
//! lets a few scripted attackers fight them and logs the outcome.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod config;
mod scenario;

use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{SimConfig, CONFIG_FILE};
use crate::scenario::Scenario;

/// Main entry point.
fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("hostile=info".parse()?))
        .init();

    info!("Hostile sim starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from);
    let config = SimConfig::load_from(&path);
    if !path.exists() {
        if let Err(e) = config.save_to(&path) {
            warn!("Could not write default config to {}: {e}", path.display());
        }
    }

    let mut scenario = Scenario::build(&config)?;
    let report = scenario.run()?;

    info!(
        "Finished after {} ticks: {} kills, {} survivors, {} calls for help, {} events",
        report.ticks, report.kills, report.survivors, report.calls_for_help, report.events
    );
    for (attacker, xp) in &report.experience {
        info!("{attacker} earned {xp:.1} experience");
    }

    info!("Hostile sim shutdown complete");
    Ok(())
}
