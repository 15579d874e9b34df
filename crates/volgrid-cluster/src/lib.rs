//! volgrid-cluster — runs a balancing group as tokio tasks.
//!
//! # Architecture
//!
//! ```text
//! LocalCluster
//!   ├── command senders, one per rank (job j goes to rank j mod size)
//!   ├── shutdown watch channel
//!   └── RankNode task per rank
//!         ├── EventDrivenBalancer<ChannelTransport, MonotonicClock>
//!         ├── inbox ◄── ChannelTransport of every peer
//!         ├── tick   → demand growth, then advance()
//!         └── volume callback → VolumeUpdate channel
//! ```

pub mod cluster;
pub mod error;
pub mod node;
pub mod transport;

pub use cluster::LocalCluster;
pub use error::{ClusterError, ClusterResult};
pub use node::{NodeChannels, NodeCommand, NodeReport, RankNode, VolumeUpdate};
pub use transport::ChannelTransport;
