//! Channel transport between in-process ranks.

use tokio::sync::mpsc;
use tracing::warn;

use volgrid_balance::Transport;
use volgrid_core::{Message, MessageTag, Rank};

/// Sends to the inbox of every peer rank. Never blocks.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    rank: Rank,
    peers: Vec<mpsc::UnboundedSender<Message>>,
}

impl ChannelTransport {
    pub fn new(rank: Rank, peers: Vec<mpsc::UnboundedSender<Message>>) -> Self {
        Self { rank, peers }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }
}

impl Transport for ChannelTransport {
    fn send(&self, dest: Rank, tag: MessageTag, payload: Vec<u8>) {
        let Some(peer) = self.peers.get(dest) else {
            warn!(rank = self.rank, dest, %tag, "no such peer, message dropped");
            return;
        };
        if peer.send(Message::new(self.rank, tag, payload)).is_err() {
            warn!(rank = self.rank, dest, %tag, "peer inbox closed, message dropped");
        }
    }
}
