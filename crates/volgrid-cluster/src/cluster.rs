//! A whole group of ranks inside one process.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use volgrid_balance::{BalancingTree, MonotonicClock};
use volgrid_core::{JobId, Message, Rank, VolgridConfig};

use crate::error::{ClusterError, ClusterResult};
use crate::node::{NodeChannels, NodeCommand, NodeReport, RankNode, VolumeUpdate};
use crate::transport::ChannelTransport;

/// Spawns one [`RankNode`] task per rank and routes job commands to roots.
pub struct LocalCluster {
    commands: Vec<mpsc::UnboundedSender<NodeCommand>>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<ClusterResult<NodeReport>>>,
}

impl LocalCluster {
    /// Start `size` ranks. Must be called inside a tokio runtime.
    pub fn spawn(
        size: usize,
        config: &VolgridConfig,
        tick: Duration,
    ) -> ClusterResult<(Self, mpsc::UnboundedReceiver<VolumeUpdate>)> {
        if size == 0 {
            return Err(ClusterError::EmptyCluster);
        }

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (inbox_txs, inbox_rxs): (Vec<_>, Vec<_>) = (0..size)
            .map(|_| mpsc::unbounded_channel::<Message>())
            .unzip();
        let clock = MonotonicClock::new();

        let mut commands = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);
        for (rank, inbox) in inbox_rxs.into_iter().enumerate() {
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let channels = NodeChannels {
                transport: ChannelTransport::new(rank, inbox_txs.clone()),
                inbox,
                commands: command_rx,
                updates: updates_tx.clone(),
            };
            let tree = BalancingTree::new(rank, size)?;
            let node = RankNode::new(tree, config, channels, clock.clone(), tick);
            handles.push(tokio::spawn(node.run(shutdown_rx.clone())));
            commands.push(command_tx);
        }

        info!(size, tick_ms = tick.as_millis() as u64, "local cluster started");
        Ok((
            Self {
                commands,
                shutdown: shutdown_tx,
                handles,
            },
            updates_rx,
        ))
    }

    pub fn size(&self) -> usize {
        self.commands.len()
    }

    /// Rank hosting the root of `job_id`.
    pub fn root_of(&self, job_id: JobId) -> Rank {
        job_id as usize % self.size()
    }

    pub fn submit(&self, job_id: JobId, size: u32, priority: f64) -> ClusterResult<()> {
        self.send(
            job_id,
            NodeCommand::Submit {
                job_id,
                size,
                priority,
            },
        )
    }

    pub fn suspend(&self, job_id: JobId) -> ClusterResult<()> {
        self.send(job_id, NodeCommand::Suspend { job_id })
    }

    pub fn resume(&self, job_id: JobId) -> ClusterResult<()> {
        self.send(job_id, NodeCommand::Resume { job_id })
    }

    pub fn terminate(&self, job_id: JobId) -> ClusterResult<()> {
        self.send(job_id, NodeCommand::Terminate { job_id })
    }

    fn send(&self, job_id: JobId, cmd: NodeCommand) -> ClusterResult<()> {
        let rank = self.root_of(job_id);
        self.commands[rank]
            .send(cmd)
            .map_err(|_| ClusterError::NodeGone { rank, job_id })
    }

    /// Signal every rank to stop and collect their final reports. Fails with
    /// the first rank that stopped on an error.
    pub async fn shutdown(self) -> ClusterResult<Vec<NodeReport>> {
        self.shutdown.send_replace(true);

        let mut reports = Vec::with_capacity(self.handles.len());
        for (rank, handle) in self.handles.into_iter().enumerate() {
            let report = handle.await.map_err(|e| ClusterError::NodeFailed {
                rank,
                reason: e.to_string(),
            })??;
            reports.push(report);
        }
        info!(ranks = reports.len(), "local cluster stopped");
        Ok(reports)
    }
}
