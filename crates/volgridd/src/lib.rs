//! volgridd — drives volgrid balancing groups from job scenarios.

pub mod scenario;
pub mod simulate;

use std::path::Path;

use anyhow::Result;

use volgrid_core::VolgridConfig;

pub use scenario::{JobAction, Scenario, ScenarioJob, ScenarioStep};
pub use simulate::{SimulationOptions, SimulationReport, TimedUpdate, simulate};

/// Load `volgrid.toml`, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<VolgridConfig> {
    match path {
        Some(path) => Ok(VolgridConfig::from_file(path)?),
        None => Ok(VolgridConfig::default()),
    }
}
