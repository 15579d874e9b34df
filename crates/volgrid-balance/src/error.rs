//! Balancer error types.

use thiserror::Error;

use volgrid_core::{CoreError, Rank};

/// Errors that abort message handling on a rank.
///
/// All of these are protocol violations; the owning runtime is expected to
/// stop the rank rather than retry.
#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("unexpected message tag {tag} from rank {source_rank}")]
    UnexpectedTag { tag: u32, source_rank: Rank },

    #[error("malformed payload from rank {source_rank}: {reason}")]
    MalformedPayload { source_rank: Rank, reason: String },

    #[error("rank {rank} outside group of size {size}")]
    RankOutOfRange { rank: Rank, size: usize },

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type BalanceResult<T> = Result<T, BalanceError>;
