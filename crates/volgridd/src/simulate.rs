//! Plays a [`Scenario`] against a [`LocalCluster`] in real time.

use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use volgrid_balance::Volumes;
use volgrid_cluster::{LocalCluster, VolumeUpdate};
use volgrid_core::VolgridConfig;

use crate::scenario::{JobAction, Scenario, ScenarioStep};

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub ranks: usize,
    /// Overrides the scenario's own duration.
    pub duration: Option<f64>,
    pub tick: Duration,
}

/// A volume update stamped with simulation time.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TimedUpdate {
    pub at: f64,
    #[serde(flatten)]
    pub update: VolumeUpdate,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub ranks: usize,
    pub duration: f64,
    pub global_epoch: u64,
    pub balancing_rounds: u64,
    /// Whether every rank ended with the same epoch and volumes.
    pub consistent: bool,
    pub volumes: Volumes,
    pub timeline: Vec<TimedUpdate>,
}

pub async fn simulate(
    config: &VolgridConfig,
    scenario: &Scenario,
    options: &SimulationOptions,
) -> Result<SimulationReport> {
    let duration = options.duration.unwrap_or(scenario.duration);
    if duration < scenario.last_step_at() {
        warn!(
            duration,
            last_step = scenario.last_step_at(),
            "simulation ends before the last scenario step"
        );
    }

    let (cluster, mut updates) = LocalCluster::spawn(options.ranks, config, options.tick)?;
    info!(ranks = options.ranks, duration, jobs = scenario.jobs.len(), "simulation started");

    let start = Instant::now();
    let mut timeline = Vec::new();
    for step in scenario.timeline() {
        if step.at > duration {
            debug!(at = step.at, job = step.job_id, "step past the end, skipped");
            continue;
        }
        collect_until(&mut updates, &mut timeline, start, step.at).await;
        apply(&cluster, &step)?;
        debug!(at = step.at, job = step.job_id, action = ?step.action, "scenario step");
    }
    collect_until(&mut updates, &mut timeline, start, duration).await;

    let reports = cluster.shutdown().await?;
    while let Ok(update) = updates.try_recv() {
        timeline.push(TimedUpdate {
            at: start.elapsed().as_secs_f64(),
            update,
        });
    }

    let Some(first) = reports.first() else {
        anyhow::bail!("cluster returned no rank reports");
    };
    let consistent = reports
        .iter()
        .all(|r| r.global_epoch == first.global_epoch && r.volumes == first.volumes);
    if !consistent {
        warn!("ranks disagree at shutdown, rounds were still in flight");
    }

    let report = SimulationReport {
        ranks: reports.len(),
        duration,
        global_epoch: first.global_epoch,
        balancing_rounds: first.balancing_rounds,
        consistent,
        volumes: first.volumes.clone(),
        timeline,
    };
    info!(
        epoch = report.global_epoch,
        rounds = report.balancing_rounds,
        updates = report.timeline.len(),
        consistent,
        "simulation finished"
    );
    Ok(report)
}

fn apply(cluster: &LocalCluster, step: &ScenarioStep) -> Result<()> {
    match step.action {
        JobAction::Submit { size, priority } => cluster.submit(step.job_id, size, priority)?,
        JobAction::Suspend => cluster.suspend(step.job_id)?,
        JobAction::Resume => cluster.resume(step.job_id)?,
        JobAction::Terminate => cluster.terminate(step.job_id)?,
    }
    Ok(())
}

/// Record volume updates until `until` seconds after `start`.
async fn collect_until(
    updates: &mut mpsc::UnboundedReceiver<VolumeUpdate>,
    timeline: &mut Vec<TimedUpdate>,
    start: Instant,
    until: f64,
) {
    let deadline = tokio::time::sleep_until(start + Duration::from_secs_f64(until.max(0.0)));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return,
            Some(update) = updates.recv() => {
                timeline.push(TimedUpdate {
                    at: start.elapsed().as_secs_f64(),
                    update,
                });
            }
        }
    }
}
