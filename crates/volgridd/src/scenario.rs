//! Job scenarios for the simulator.
//!
//! ```toml
//! duration = 3.0
//!
//! [[jobs]]
//! id = 1
//! priority = 1.0
//! demand = 8
//! arrive_at = 0.0
//! suspend_at = 1.0
//! resume_at = 1.5
//! terminate_at = 2.5
//! ```
//!
//! Times are seconds since the simulation started.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use volgrid_core::JobId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Seconds to run before shutting the cluster down.
    #[serde(default = "default_duration")]
    pub duration: f64,
    #[serde(default)]
    pub jobs: Vec<ScenarioJob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioJob {
    pub id: JobId,
    #[serde(default = "default_priority")]
    pub priority: f64,
    /// Full size the job asks for once grown.
    pub demand: u32,
    #[serde(default)]
    pub arrive_at: f64,
    pub suspend_at: Option<f64>,
    pub resume_at: Option<f64>,
    pub terminate_at: Option<f64>,
}

fn default_duration() -> f64 {
    5.0
}

fn default_priority() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JobAction {
    Submit { size: u32, priority: f64 },
    Suspend,
    Resume,
    Terminate,
}

/// One timed command of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScenarioStep {
    pub at: f64,
    pub job_id: JobId,
    #[serde(flatten)]
    pub action: JobAction,
}

impl Scenario {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in scenario {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let scenario: Scenario = toml::from_str(content).context("invalid scenario TOML")?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.duration.is_finite() && self.duration > 0.0) {
            bail!("duration must be positive, got {}", self.duration);
        }

        let mut seen = BTreeSet::new();
        for job in &self.jobs {
            if !seen.insert(job.id) {
                bail!("job {} is listed twice", job.id);
            }
            if !(job.priority.is_finite() && job.priority > 0.0) {
                bail!("job {}: priority must be positive, got {}", job.id, job.priority);
            }
            if job.demand == 0 {
                bail!("job {}: demand must be at least 1", job.id);
            }

            let mut last = ("arrive_at", job.arrive_at);
            if !(last.1.is_finite() && last.1 >= 0.0) {
                bail!("job {}: arrive_at must be a non-negative time", job.id);
            }
            if job.resume_at.is_some() && job.suspend_at.is_none() {
                bail!("job {}: resume_at without suspend_at", job.id);
            }
            for (name, at) in [
                ("suspend_at", job.suspend_at),
                ("resume_at", job.resume_at),
                ("terminate_at", job.terminate_at),
            ] {
                let Some(at) = at else { continue };
                if !at.is_finite() || at < last.1 {
                    bail!("job {}: {name} ({at}) must not precede {} ({})", job.id, last.0, last.1);
                }
                last = (name, at);
            }
        }
        Ok(())
    }

    /// Every command of every job, ordered by time. Steps of one job keep
    /// their lifecycle order when they share a timestamp.
    pub fn timeline(&self) -> Vec<ScenarioStep> {
        let mut steps = Vec::new();
        for job in &self.jobs {
            steps.push(ScenarioStep {
                at: job.arrive_at,
                job_id: job.id,
                action: JobAction::Submit {
                    size: job.demand,
                    priority: job.priority,
                },
            });
            for (at, action) in [
                (job.suspend_at, JobAction::Suspend),
                (job.resume_at, JobAction::Resume),
                (job.terminate_at, JobAction::Terminate),
            ] {
                if let Some(at) = at {
                    steps.push(ScenarioStep {
                        at,
                        job_id: job.id,
                        action,
                    });
                }
            }
        }
        steps.sort_by(|a, b| a.at.total_cmp(&b.at));
        steps
    }

    /// Time of the latest scheduled command.
    pub fn last_step_at(&self) -> f64 {
        self.timeline().last().map(|s| s.at).unwrap_or(0.0)
    }
}
