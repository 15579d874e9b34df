//! volgrid-balance — event-driven fair-share volume allocation.
//!
//! Every rank of a fixed group runs an [`EventDrivenBalancer`]. Job roots
//! report demand changes as events; events travel up a binary reduction
//! tree, the root turns each merged batch into a new global round, and the
//! round is broadcast back down so every rank computes the same volumes.
//!
//! # Architecture
//!
//! ```text
//! EventDrivenBalancer<T: Transport, C: Clock>
//!   ├── BalancingTree        (parent / children from rank arithmetic)
//!   ├── PeriodicGate         (cooldown between reductions)
//!   ├── EventMap states      (replica of the global state)
//!   ├── EventMap diffs       (local changes not yet in a round)
//!   └── VolumeCalculator
//!         └── RoundingStrategy  (floor | probabilistic | bisection)
//! ```
//!
//! The balancer never blocks. Message delivery is the [`Transport`]'s
//! business and time comes from a [`Clock`], so the same state machine runs
//! under tokio channels or a deterministic in-memory harness.

pub mod balancer;
pub mod calculator;
pub mod clock;
pub mod demand;
pub mod error;
pub mod latency;
pub mod periodic;
pub mod rounding;
pub mod topology;
pub mod transport;

pub use balancer::{BalancerPhase, EventDrivenBalancer, JobUpdate, RoundCallback, VolumeCallback};
pub use calculator::{BalancingResult, VolumeCalculator};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use demand::DemandSchedule;
pub use error::{BalanceError, BalanceResult};
pub use latency::{LatencyStats, LatencySummary};
pub use rounding::{
    Assignments, BisectionRounding, CapacityTarget, FloorRounding, ProbabilisticRounding,
    RoundingStrategy, Volumes, strategy_for,
};
pub use topology::BalancingTree;
pub use transport::{Outgoing, RecordingTransport, Transport};
