//! Error types for the cluster runtime.

use thiserror::Error;

use volgrid_balance::BalanceError;
use volgrid_core::{JobId, Rank};

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("a cluster needs at least one rank")]
    EmptyCluster,

    #[error("rank {rank} is no longer running, command for job {job_id} dropped")]
    NodeGone { rank: Rank, job_id: JobId },

    #[error("rank {rank} task failed: {reason}")]
    NodeFailed { rank: Rank, reason: String },

    #[error(transparent)]
    Balance(#[from] BalanceError),
}
