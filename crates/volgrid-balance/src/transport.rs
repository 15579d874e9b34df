//! One-way message passing seam.
//!
//! Sends are fire-and-forget: the balancer never learns whether a message
//! arrived. Correctness rests on idempotent merging, not on delivery.

use std::sync::{Arc, Mutex};

use volgrid_core::{MessageTag, Rank};

pub trait Transport {
    /// Queue `payload` for `dest`. Must not block.
    fn send(&self, dest: Rank, tag: MessageTag, payload: Vec<u8>);
}

/// A message captured by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub dest: Rank,
    pub tag: MessageTag,
    pub payload: Vec<u8>,
}

/// Transport that only records what was sent. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<Outgoing>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything sent so far.
    pub fn drain(&self) -> Vec<Outgoing> {
        match self.sent.lock() {
            Ok(mut sent) => std::mem::take(&mut *sent),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for RecordingTransport {
    fn send(&self, dest: Rank, tag: MessageTag, payload: Vec<u8>) {
        let outgoing = Outgoing { dest, tag, payload };
        match self.sent.lock() {
            Ok(mut sent) => sent.push(outgoing),
            Err(poisoned) => poisoned.into_inner().push(outgoing),
        }
    }
}
