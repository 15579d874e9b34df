//! Identifiers and wire envelope types.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Unique identifier of a job.
pub type JobId = u32;

/// Position of a process in the process group, `0..size`.
pub type Rank = usize;

/// Job-local event counter. Strictly increasing per job at its root.
pub type Epoch = u32;

/// Epoch stamped on termination events. Nothing can supersede it.
pub const TERMINATION_EPOCH: Epoch = Epoch::MAX;

/// Message tags owned by the balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum MessageTag {
    /// Upward merge of buffered diffs towards the root.
    ReduceData = 1,
    /// Downward fan-out of a completed round.
    BroadcastData = 2,
}

impl MessageTag {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for MessageTag {
    type Error = CoreError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(MessageTag::ReduceData),
            2 => Ok(MessageTag::BroadcastData),
            other => Err(CoreError::UnexpectedTag(other)),
        }
    }
}

impl std::fmt::Display for MessageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageTag::ReduceData => write!(f, "REDUCE_DATA"),
            MessageTag::BroadcastData => write!(f, "BROADCAST_DATA"),
        }
    }
}

/// A point-to-point message as delivered by the transport.
///
/// The tag stays raw so that a receiver can reject tags it does not own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub source: Rank,
    pub tag: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(source: Rank, tag: MessageTag, payload: Vec<u8>) -> Self {
        Self {
            source,
            tag: tag.as_u32(),
            payload,
        }
    }
}
