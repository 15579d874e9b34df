//! volgrid-core — shared value types for the volgrid balancing engine.
//!
//! Everything that crosses a rank boundary lives here: the per-job
//! [`Event`], the mergeable [`EventMap`] that is reduced up and broadcast
//! down the balancing tree, the wire [`Message`] envelope with its
//! [`MessageTag`], and the TOML configuration shared by all ranks.

pub mod config;
pub mod error;
pub mod event;
pub mod types;

pub use config::{BalancerConfig, GrowthConfig, RoundingPolicy, VolgridConfig};
pub use error::{CoreError, CoreResult};
pub use event::{Event, EventMap};
pub use types::*;
