//! One rank as a tokio task.
//!
//! A [`RankNode`] owns its balancer and drives it from three sources: a
//! periodic tick (demand growth, then `advance`), its message inbox, and
//! job commands for jobs rooted here. Volume changes leave through an
//! unbounded channel as [`VolumeUpdate`]s.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use volgrid_balance::{
    BalancingTree, Clock, DemandSchedule, EventDrivenBalancer, JobUpdate, MonotonicClock, Volumes,
};
use volgrid_core::{JobId, Message, Rank, VolgridConfig};

use crate::error::ClusterResult;
use crate::transport::ChannelTransport;

/// Job lifecycle command, addressed to the job's root rank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeCommand {
    /// A new job wanting up to `size` processes.
    Submit { job_id: JobId, size: u32, priority: f64 },
    Suspend { job_id: JobId },
    Resume { job_id: JobId },
    Terminate { job_id: JobId },
}

/// A job's volume changed at its root.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeUpdate {
    pub rank: Rank,
    pub job_id: JobId,
    pub volume: u32,
    /// Seconds from the job's latest event to the round reflecting it.
    pub latency: f64,
}

/// Final state of a rank, returned when its task stops.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub rank: Rank,
    pub global_epoch: u64,
    pub balancing_rounds: u64,
    pub volumes: Volumes,
}

/// Channel ends a node is wired with.
pub struct NodeChannels {
    pub transport: ChannelTransport,
    pub inbox: mpsc::UnboundedReceiver<Message>,
    pub commands: mpsc::UnboundedReceiver<NodeCommand>,
    pub updates: mpsc::UnboundedSender<VolumeUpdate>,
}

#[derive(Debug)]
struct HostedJob {
    size: u32,
    priority: f64,
    /// `None` while suspended.
    active_since: Option<f64>,
    demand: u32,
}

pub struct RankNode {
    rank: Rank,
    size: usize,
    balancer: EventDrivenBalancer<ChannelTransport, MonotonicClock>,
    clock: MonotonicClock,
    schedule: DemandSchedule,
    tick: Duration,
    inbox: mpsc::UnboundedReceiver<Message>,
    commands: mpsc::UnboundedReceiver<NodeCommand>,
    jobs: BTreeMap<JobId, HostedJob>,
}

impl RankNode {
    pub fn new(
        tree: BalancingTree,
        config: &VolgridConfig,
        channels: NodeChannels,
        clock: MonotonicClock,
        tick: Duration,
    ) -> Self {
        let rank = tree.rank();
        let size = tree.size();
        let updates = channels.updates;
        let balancer =
            EventDrivenBalancer::new(tree, &config.balancer, channels.transport, clock.clone())
                .with_volume_fn(Box::new(move |job_id, volume, latency| {
                    let update = VolumeUpdate {
                        rank,
                        job_id,
                        volume,
                        latency,
                    };
                    if updates.send(update).is_err() {
                        debug!(rank, job = job_id, "volume update receiver gone");
                    }
                }));

        Self {
            rank,
            size,
            balancer,
            clock,
            schedule: DemandSchedule::from_config(&config.growth),
            tick,
            inbox: channels.inbox,
            commands: channels.commands,
            jobs: BTreeMap::new(),
        }
    }

    /// Rank hosting the root of `job_id`.
    pub fn is_root(&self, job_id: JobId) -> bool {
        job_id as usize % self.size == self.rank
    }

    /// Run until shutdown is signalled. A protocol violation stops the rank
    /// and is returned to the caller.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> ClusterResult<NodeReport> {
        info!(rank = self.rank, tick_ms = self.tick.as_millis() as u64, "rank node started");

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick()?,
                Some(msg) = self.inbox.recv() => self.on_message(msg)?,
                Some(cmd) = self.commands.recv() => self.on_command(cmd),
                _ = shutdown.changed() => {
                    info!(rank = self.rank, "rank node shutting down");
                    break;
                }
            }
        }

        Ok(self.report())
    }

    fn on_tick(&mut self) -> ClusterResult<()> {
        let now = self.clock.elapsed_seconds();
        for (job_id, job) in self.jobs.iter_mut() {
            let Some(since) = job.active_since else {
                continue;
            };
            let demand = self.schedule.demand(job.size, Some(now - since));
            if demand != job.demand {
                job.demand = demand;
                self.balancer
                    .on_demand_change(JobUpdate::root(*job_id, demand, job.priority));
            }
        }

        if let Err(e) = self.balancer.advance() {
            error!(rank = self.rank, error = %e, "balancer tick failed, stopping rank");
            return Err(e.into());
        }
        Ok(())
    }

    fn on_message(&mut self, msg: Message) -> ClusterResult<()> {
        if let Err(e) = self.balancer.handle(&msg) {
            error!(rank = self.rank, from = msg.source, error = %e, "unexpected message, stopping rank");
            return Err(e.into());
        }
        Ok(())
    }

    fn on_command(&mut self, cmd: NodeCommand) {
        let now = self.clock.elapsed_seconds();
        match cmd {
            NodeCommand::Submit {
                job_id,
                size,
                priority,
            } => {
                let is_root = self.is_root(job_id);
                let size = size.max(1);
                let update = JobUpdate {
                    job_id,
                    demand: size,
                    priority,
                    is_root,
                };
                self.balancer.on_probe(update);
                if !is_root {
                    warn!(rank = self.rank, job = job_id, "submit sent to a rank that is not the job root");
                    return;
                }
                if self.jobs.contains_key(&job_id) {
                    warn!(rank = self.rank, job = job_id, "job already submitted");
                    return;
                }

                let demand = self.schedule.demand(size, Some(0.0));
                self.jobs.insert(
                    job_id,
                    HostedJob {
                        size,
                        priority,
                        active_since: Some(now),
                        demand,
                    },
                );
                self.balancer.on_activate(JobUpdate { demand, ..update });
                info!(rank = self.rank, job = job_id, size, priority, demand, "job submitted");
            }
            NodeCommand::Suspend { job_id } => {
                let Some(job) = self.jobs.get_mut(&job_id) else {
                    warn!(rank = self.rank, job = job_id, "suspend for unknown job");
                    return;
                };
                job.active_since = None;
                job.demand = 1;
                self.balancer
                    .on_suspend(JobUpdate::root(job_id, 1, job.priority));
                info!(rank = self.rank, job = job_id, "job suspended");
            }
            NodeCommand::Resume { job_id } => {
                let Some(job) = self.jobs.get_mut(&job_id) else {
                    warn!(rank = self.rank, job = job_id, "resume for unknown job");
                    return;
                };
                if job.active_since.is_some() {
                    return;
                }
                job.active_since = Some(now);
                job.demand = self.schedule.demand(job.size, Some(0.0));
                self.balancer
                    .on_activate(JobUpdate::root(job_id, job.demand, job.priority));
                info!(rank = self.rank, job = job_id, demand = job.demand, "job resumed");
            }
            NodeCommand::Terminate { job_id } => {
                let Some(job) = self.jobs.remove(&job_id) else {
                    warn!(rank = self.rank, job = job_id, "terminate for unknown job");
                    return;
                };
                self.balancer
                    .on_terminate(JobUpdate::root(job_id, 0, job.priority));
                info!(rank = self.rank, job = job_id, "job terminated");
            }
        }
    }

    fn report(&self) -> NodeReport {
        NodeReport {
            rank: self.rank,
            global_epoch: self.balancer.global_epoch(),
            balancing_rounds: self.balancer.balancing_rounds(),
            volumes: self.balancer.result().volumes.clone(),
        }
    }
}
