//! Event-driven balancer: asynchronous reduce/broadcast rounds.
//!
//! Each rank runs one `EventDrivenBalancer`. Job roots turn lifecycle
//! transitions into [`Event`]s in a local diff buffer. Diffs are reduced up
//! the [`BalancingTree`]; the root stamps a new global epoch and broadcasts
//! the merged map back down; every rank digests it into its replica of the
//! global state and recomputes all volumes.
//!
//! # Round
//!
//! ```text
//!   push event ──► diffs ──(advance, cooldown elapsed)──► REDUCE to parent
//!                                                          │
//!   parent: filter by states, merge into diffs, forward ◄──┘
//!                                                          │
//!   root: filter by states, stamp global epoch + 1 ◄───────┘
//!         │
//!         └─► BROADCAST to children ─► forward ─► digest
//!
//!   digest: states ← states ∪ data, diffs ← diffs \ states,
//!           recompute volumes, fire callbacks, prune old tombstones
//! ```
//!
//! Nothing here blocks or waits for a reply. Duplicate, stale and
//! reordered messages are absorbed by the epoch-novelty rule of
//! [`EventMap`]. A rank that stops responding stalls only its subtree.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, info, trace, warn};

use volgrid_core::{
    BalancerConfig, Epoch, Event, EventMap, JobId, Message, MessageTag, Rank, TERMINATION_EPOCH,
};

use crate::calculator::{BalancingResult, VolumeCalculator};
use crate::clock::Clock;
use crate::error::{BalanceError, BalanceResult};
use crate::latency::{LatencyStats, LatencySummary};
use crate::periodic::PeriodicGate;
use crate::rounding::{RoundingStrategy, strategy_for};
use crate::topology::BalancingTree;
use crate::transport::Transport;

/// Called with `(job_id, volume, latency_seconds)` whenever a tracked job's
/// volume changes, and once with volume 0 after its termination is digested.
pub type VolumeCallback = Box<dyn FnMut(JobId, u32, f64) + Send>;

/// Called after every digest that changed the global state.
pub type RoundCallback = Box<dyn FnMut(&BalancingResult) + Send>;

/// Where a rank currently is in the round protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancerPhase {
    /// No buffered diffs.
    Idle,
    /// Diffs buffered or sent up, waiting for a round to reflect them.
    Reducing,
    /// Fanning a completed round out to children.
    Broadcasting,
    /// Folding a completed round into the global state.
    Digesting,
}

/// A job lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobUpdate {
    pub job_id: JobId,
    pub demand: u32,
    pub priority: f64,
    /// Whether this rank hosts the job's root. Only roots report demand.
    pub is_root: bool,
}

impl JobUpdate {
    pub fn root(job_id: JobId, demand: u32, priority: f64) -> Self {
        Self {
            job_id,
            demand,
            priority,
            is_root: true,
        }
    }
}

/// Per-job bookkeeping for jobs rooted at this rank.
#[derive(Debug)]
struct TrackedJob {
    priority: f64,
    next_epoch: Epoch,
    last_demand: Option<u32>,
    volume: u32,
    terminated: bool,
    latency: LatencyStats,
}

impl TrackedJob {
    fn new(priority: f64) -> Self {
        Self {
            priority,
            next_epoch: 1,
            last_demand: None,
            volume: 0,
            terminated: false,
            latency: LatencyStats::new(),
        }
    }
}

/// An event pushed here whose effect has not come back in a round yet.
#[derive(Debug, Clone, Copy)]
struct PendingEvent {
    epoch: Epoch,
    pushed_at: f64,
}

pub struct EventDrivenBalancer<T, C> {
    tree: BalancingTree,
    transport: T,
    clock: C,
    calculator: VolumeCalculator,
    rounding: Box<dyn RoundingStrategy>,
    gate: PeriodicGate,
    phase: BalancerPhase,
    /// Replica of the last digested global state.
    states: EventMap,
    /// Events not yet known to be reflected in `states`.
    diffs: EventMap,
    recent_broadcasts: VecDeque<EventMap>,
    recent_broadcast_memory: usize,
    tombstone_retention: u64,
    jobs: BTreeMap<JobId, TrackedJob>,
    pending: BTreeMap<JobId, PendingEvent>,
    result: BalancingResult,
    /// Digests that changed the global state.
    balancing_rounds: u64,
    volume_fn: Option<VolumeCallback>,
    round_fn: Option<RoundCallback>,
}

impl<T: Transport, C: Clock> EventDrivenBalancer<T, C> {
    pub fn new(tree: BalancingTree, config: &BalancerConfig, transport: T, clock: C) -> Self {
        debug!(
            rank = tree.rank(),
            size = tree.size(),
            parent = tree.parent(),
            children = ?tree.children(),
            rounding = ?config.rounding,
            "balancing tree position"
        );

        Self {
            calculator: VolumeCalculator::new(tree.size(), config.load_factor),
            rounding: strategy_for(config.rounding, config.rounding_seed),
            gate: PeriodicGate::new(config.balancing_period),
            phase: BalancerPhase::Idle,
            states: EventMap::new(),
            diffs: EventMap::new(),
            recent_broadcasts: VecDeque::new(),
            recent_broadcast_memory: config.recent_broadcast_memory.max(1),
            tombstone_retention: config.tombstone_retention,
            jobs: BTreeMap::new(),
            pending: BTreeMap::new(),
            result: BalancingResult::default(),
            balancing_rounds: 0,
            volume_fn: None,
            round_fn: None,
            tree,
            transport,
            clock,
        }
    }

    /// Set the callback receiving volume updates of local jobs.
    pub fn with_volume_fn(mut self, f: VolumeCallback) -> Self {
        self.volume_fn = Some(f);
        self
    }

    /// Set the callback run after each state-changing round.
    pub fn with_round_fn(mut self, f: RoundCallback) -> Self {
        self.round_fn = Some(f);
        self
    }

    // ── Lifecycle hooks ────────────────────────────────────────────

    /// A job was seen for the first time. Its root bootstraps demand 1.
    pub fn on_probe(&mut self, job: JobUpdate) -> bool {
        self.push_demand(job, 1)
    }

    /// A job became active with its requested demand.
    pub fn on_activate(&mut self, job: JobUpdate) -> bool {
        self.push_demand(job, job.demand)
    }

    /// A job reported a new demand.
    pub fn on_demand_change(&mut self, job: JobUpdate) -> bool {
        self.push_demand(job, job.demand)
    }

    /// A job was suspended. It keeps its atomic process.
    pub fn on_suspend(&mut self, job: JobUpdate) -> bool {
        self.push_demand(job, 1)
    }

    /// A job is gone for good. Pushes a tombstone that nothing supersedes.
    pub fn on_terminate(&mut self, job: JobUpdate) -> bool {
        if !job.is_root {
            trace!(job = job.job_id, "ignoring termination at non-root");
            return false;
        }
        if self.is_retired(job.job_id) {
            return false;
        }
        let tracked = self
            .jobs
            .entry(job.job_id)
            .or_insert_with(|| TrackedJob::new(job.priority));
        if tracked.terminated {
            return false;
        }
        tracked.terminated = true;
        self.push_event(Event::termination(job.job_id, job.priority))
    }

    fn push_demand(&mut self, job: JobUpdate, demand: u32) -> bool {
        if !job.is_root {
            trace!(job = job.job_id, demand, "ignoring job event at non-root");
            return false;
        }
        if self.is_retired(job.job_id) {
            debug!(job = job.job_id, demand, "job already terminated, event dropped");
            return false;
        }
        let tracked = self
            .jobs
            .entry(job.job_id)
            .or_insert_with(|| TrackedJob::new(job.priority));
        if tracked.terminated {
            debug!(job = job.job_id, demand, "job already terminated, event dropped");
            return false;
        }
        if tracked.last_demand == Some(demand) && tracked.priority == job.priority {
            return false;
        }
        tracked.priority = job.priority;
        let epoch = tracked.next_epoch;
        self.push_event(Event::new(job.job_id, epoch, demand, job.priority))
    }

    /// Terminated and already digested. Outlives the pruning of the tombstone.
    fn is_retired(&self, job_id: JobId) -> bool {
        !self.jobs.contains_key(&job_id) && self.states.is_terminated(job_id)
    }

    fn push_event(&mut self, event: Event) -> bool {
        let now = self.clock.elapsed_seconds();
        let Some(tracked) = self.jobs.get_mut(&event.job_id) else {
            return false;
        };

        // The event still in flight is superseded; count its latency so far.
        if let Some(pending) = self.pending.get(&event.job_id)
            && pending.epoch < event.epoch
        {
            tracked.latency.record(now - pending.pushed_at);
        }

        if !self.diffs.insert_if_novel(event) {
            return false;
        }
        self.pending.insert(
            event.job_id,
            PendingEvent {
                epoch: event.epoch,
                pushed_at: now,
            },
        );
        if event.epoch != TERMINATION_EPOCH {
            tracked.next_epoch = event.epoch.saturating_add(1);
        }
        tracked.last_demand = Some(event.demand);

        debug!(
            rank = self.tree.rank(),
            job = event.job_id,
            epoch = event.epoch,
            demand = event.demand,
            priority = event.priority,
            "job event"
        );
        true
    }

    // ── Protocol ───────────────────────────────────────────────────

    /// Periodic tick. Starts a reduction if diffs are buffered and the
    /// cooldown has elapsed. Returns whether a round was digested.
    pub fn advance(&mut self) -> BalanceResult<bool> {
        self.reduce_if_applicable()
    }

    /// Handle an inbound message. Any tag other than the two balancer tags
    /// is a protocol violation.
    pub fn handle(&mut self, msg: &Message) -> BalanceResult<bool> {
        let tag = MessageTag::try_from(msg.tag).map_err(|_| BalanceError::UnexpectedTag {
            tag: msg.tag,
            source_rank: msg.source,
        })?;
        let mut data =
            EventMap::from_bytes(&msg.payload).map_err(|e| BalanceError::MalformedPayload {
                source_rank: msg.source,
                reason: e.to_string(),
            })?;

        match tag {
            MessageTag::ReduceData => {
                trace!(rank = self.tree.rank(), from = msg.source, events = data.len(), "reduce received");
                data.filter_by(&self.states);
                self.diffs.update_by(&data);
                self.reduce_if_applicable()
            }
            MessageTag::BroadcastData => {
                trace!(
                    rank = self.tree.rank(),
                    from = msg.source,
                    epoch = data.global_epoch(),
                    "broadcast received"
                );
                self.broadcast(&data)?;
                self.digest(data)
            }
        }
    }

    fn reduce_if_applicable(&mut self) -> BalanceResult<bool> {
        if self.diffs.is_empty() {
            self.settle();
            return Ok(false);
        }
        let now = self.clock.elapsed_seconds();
        if !self.gate.ready(now) {
            return Ok(false);
        }
        self.gate.fire(now);

        debug!(rank = self.tree.rank(), diffs = self.diffs.len(), "initiating reduction");
        self.phase = BalancerPhase::Reducing;
        // The buffer itself is only drained by digest, so a lost message
        // is simply sent again after the next cooldown.
        let data = self.diffs.clone();
        if self.tree.is_root() {
            self.promote(data)
        } else {
            let payload = data.to_bytes()?;
            self.transport
                .send(self.tree.parent(), MessageTag::ReduceData, payload);
            Ok(false)
        }
    }

    /// Root only: turn a completed reduction into a new round.
    fn promote(&mut self, mut data: EventMap) -> BalanceResult<bool> {
        data.filter_by(&self.states);
        if data.is_empty() {
            self.settle();
            return Ok(false);
        }
        let epoch = self.states.global_epoch() + 1;
        data.set_global_epoch(epoch);
        info!(epoch, events = data.len(), "balancing round stamped");

        self.broadcast(&data)?;
        self.digest(data)
    }

    fn broadcast(&mut self, data: &EventMap) -> BalanceResult<()> {
        self.phase = BalancerPhase::Broadcasting;
        if self.recent_broadcasts.contains(data) {
            trace!(rank = self.tree.rank(), epoch = data.global_epoch(), "broadcast already forwarded");
            return Ok(());
        }
        self.recent_broadcasts.push_front(data.clone());
        self.recent_broadcasts.truncate(self.recent_broadcast_memory);

        let children = self.tree.children();
        if children.is_empty() {
            return Ok(());
        }
        let payload = data.to_bytes()?;
        for child in children {
            self.transport
                .send(child, MessageTag::BroadcastData, payload.clone());
        }
        Ok(())
    }

    fn digest(&mut self, data: EventMap) -> BalanceResult<bool> {
        self.phase = BalancerPhase::Digesting;
        if data.global_epoch() < self.states.global_epoch() {
            debug!(
                rank = self.tree.rank(),
                epoch = data.global_epoch(),
                current = self.states.global_epoch(),
                "digesting round older than current state"
            );
        }

        let changed = self.states.update_by(&data);
        self.diffs.filter_by(&self.states);

        if changed {
            self.balancing_rounds += 1;
            debug!(
                rank = self.tree.rank(),
                epoch = self.states.global_epoch(),
                round = self.balancing_rounds,
                jobs = self.states.active_jobs(),
                "round digested"
            );
            self.confirm_pending();

            let result = self.calculator.calculate(&self.states, self.rounding.as_ref());
            self.publish(&result);
            if let Some(f) = self.round_fn.as_mut() {
                f(&result);
            }
            self.result = result;

            let pruned = self.states.remove_old_zeros(self.tombstone_retention);
            if pruned > 0 {
                trace!(rank = self.tree.rank(), pruned, "pruned terminated jobs");
            }
        }

        self.settle();
        if changed {
            self.reduce_if_applicable()?;
        }
        Ok(changed)
    }

    /// Record latency for every pending event the global state now reflects.
    fn confirm_pending(&mut self) {
        let now = self.clock.elapsed_seconds();
        let states = &self.states;
        let jobs = &mut self.jobs;
        self.pending.retain(|job_id, pending| match states.get(*job_id) {
            Some(event) if event.epoch >= pending.epoch => {
                if let Some(job) = jobs.get_mut(job_id) {
                    job.latency.record(now - pending.pushed_at);
                }
                false
            }
            _ => true,
        });
    }

    /// Fire volume callbacks for local jobs and retire confirmed terminations.
    fn publish(&mut self, result: &BalancingResult) {
        let mut retired = Vec::new();

        for (job_id, job) in self.jobs.iter_mut() {
            let latency = job.latency.last().unwrap_or(0.0);

            if job.terminated {
                // Silent until the tombstone comes back in a round.
                if !self.pending.contains_key(job_id) {
                    job.volume = 0;
                    if let Some(f) = self.volume_fn.as_mut() {
                        f(*job_id, 0, latency);
                    }
                    retired.push(*job_id);
                }
                continue;
            }

            let volume = result.volume_of(*job_id);
            if volume != job.volume {
                debug!(
                    rank = self.tree.rank(),
                    epoch = result.global_epoch,
                    round = self.balancing_rounds,
                    job = *job_id,
                    from = job.volume,
                    to = volume,
                    "volume changed"
                );
                job.volume = volume;
                if let Some(f) = self.volume_fn.as_mut() {
                    f(*job_id, volume, latency);
                }
            }
        }

        for job_id in retired {
            let Some(job) = self.jobs.remove(&job_id) else {
                continue;
            };
            match job.latency.summary() {
                Some(LatencySummary {
                    count,
                    min,
                    median,
                    mean,
                    max,
                }) => info!(
                    job = job_id,
                    samples = count,
                    min,
                    median,
                    mean,
                    max,
                    "job terminated, balancing latency"
                ),
                None => warn!(job = job_id, "job terminated without latency samples"),
            }
        }
    }

    fn settle(&mut self) {
        self.phase = if self.diffs.is_empty() {
            BalancerPhase::Idle
        } else {
            BalancerPhase::Reducing
        };
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn rank(&self) -> Rank {
        self.tree.rank()
    }

    pub fn size(&self) -> usize {
        self.tree.size()
    }

    pub fn tree(&self) -> &BalancingTree {
        &self.tree
    }

    pub fn phase(&self) -> BalancerPhase {
        self.phase
    }

    pub fn global_epoch(&self) -> u64 {
        self.states.global_epoch()
    }

    pub fn states(&self) -> &EventMap {
        &self.states
    }

    pub fn diffs(&self) -> &EventMap {
        &self.diffs
    }

    /// Last computed result covering every job in the global state.
    pub fn result(&self) -> &BalancingResult {
        &self.result
    }

    /// Last reported volume of a job rooted here.
    pub fn volume_of(&self, job_id: JobId) -> Option<u32> {
        self.jobs.get(&job_id).map(|j| j.volume)
    }

    pub fn balancing_rounds(&self) -> u64 {
        self.balancing_rounds
    }

    pub fn latency_summary(&self, job_id: JobId) -> Option<LatencySummary> {
        self.jobs.get(&job_id).and_then(|j| j.latency.summary())
    }

    pub fn tracks(&self, job_id: JobId) -> bool {
        self.jobs.contains_key(&job_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::RecordingTransport;
    use volgrid_core::RoundingPolicy;

    type Updates = Arc<Mutex<Vec<(JobId, u32)>>>;

    fn config() -> BalancerConfig {
        BalancerConfig {
            balancing_period: 0.1,
            rounding: RoundingPolicy::Floor,
            ..BalancerConfig::default()
        }
    }

    fn balancer(
        rank: Rank,
        size: usize,
    ) -> (
        EventDrivenBalancer<RecordingTransport, ManualClock>,
        RecordingTransport,
        ManualClock,
        Updates,
    ) {
        let transport = RecordingTransport::new();
        let clock = ManualClock::new();
        let updates: Updates = Arc::default();
        let sink = updates.clone();
        let b = EventDrivenBalancer::new(
            BalancingTree::new(rank, size).unwrap(),
            &config(),
            transport.clone(),
            clock.clone(),
        )
        .with_volume_fn(Box::new(move |job, volume, _| {
            sink.lock().unwrap().push((job, volume));
        }));
        (b, transport, clock, updates)
    }

    fn broadcast_msg(source: Rank, data: &EventMap) -> Message {
        Message::new(source, MessageTag::BroadcastData, data.to_bytes().unwrap())
    }

    #[test]
    fn starts_idle_without_rounds() {
        let (b, _, _, _) = balancer(0, 4);
        assert_eq!(b.phase(), BalancerPhase::Idle);
        assert_eq!(b.global_epoch(), 0);
        assert_eq!(b.balancing_rounds(), 0);
    }

    #[test]
    fn non_root_hooks_are_ignored() {
        let (mut b, _, _, _) = balancer(1, 4);
        let job = JobUpdate {
            job_id: 1,
            demand: 4,
            priority: 1.0,
            is_root: false,
        };
        assert!(!b.on_activate(job));
        assert!(!b.on_terminate(job));
        assert!(b.diffs().is_empty());
        assert!(!b.tracks(1));
    }

    #[test]
    fn single_rank_round_completes_locally() {
        let (mut b, transport, _, updates) = balancer(0, 1);
        assert!(b.on_activate(JobUpdate::root(1, 4, 1.0)));

        assert!(b.advance().unwrap());
        assert_eq!(b.global_epoch(), 1);
        assert_eq!(b.phase(), BalancerPhase::Idle);
        assert_eq!(b.volume_of(1), Some(1));
        assert_eq!(*updates.lock().unwrap(), vec![(1, 1)]);
        assert!(transport.is_empty());
    }

    #[test]
    fn leaf_sends_reduce_to_parent() {
        let (mut b, transport, _, _) = balancer(3, 4);
        b.on_activate(JobUpdate::root(7, 2, 1.0));

        assert!(!b.advance().unwrap());
        assert_eq!(b.phase(), BalancerPhase::Reducing);

        let sent = transport.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dest, 2);
        assert_eq!(sent[0].tag, MessageTag::ReduceData);
        let data = EventMap::from_bytes(&sent[0].payload).unwrap();
        assert_eq!(data.get(7).unwrap().demand, 2);
    }

    #[test]
    fn cooldown_limits_reductions() {
        let (mut b, transport, clock, _) = balancer(1, 2);
        b.on_activate(JobUpdate::root(1, 2, 1.0));
        b.advance().unwrap();
        assert_eq!(transport.drain().len(), 1);

        b.on_demand_change(JobUpdate::root(1, 3, 1.0));
        b.advance().unwrap();
        assert!(transport.is_empty());

        clock.advance(0.1);
        b.advance().unwrap();
        assert_eq!(transport.drain().len(), 1);
    }

    #[test]
    fn unchanged_demand_is_not_pushed_again() {
        let (mut b, _, _, _) = balancer(0, 2);
        assert!(b.on_activate(JobUpdate::root(1, 3, 1.0)));
        assert!(!b.on_demand_change(JobUpdate::root(1, 3, 1.0)));
        assert!(b.on_demand_change(JobUpdate::root(1, 3, 2.0)));
    }

    #[test]
    fn broadcast_is_forwarded_then_digested() {
        let (mut b, transport, _, _) = balancer(4, 8);
        let mut data: EventMap = [Event::new(1, 1, 8, 1.0)].into_iter().collect();
        data.set_global_epoch(5);

        assert!(b.handle(&broadcast_msg(0, &data)).unwrap());
        assert_eq!(b.global_epoch(), 5);
        assert_eq!(b.result().volume_of(1), 8);

        let dests: Vec<Rank> = transport.drain().iter().map(|o| o.dest).collect();
        assert_eq!(dests, vec![6, 5]);
    }

    #[test]
    fn duplicate_broadcast_is_not_forwarded_twice() {
        let (mut b, transport, _, _) = balancer(0, 4);
        let mut data: EventMap = [Event::new(1, 1, 2, 1.0)].into_iter().collect();
        data.set_global_epoch(1);

        assert!(b.handle(&broadcast_msg(0, &data)).unwrap());
        assert!(!b.handle(&broadcast_msg(0, &data)).unwrap());
        assert_eq!(transport.drain().len(), 2);
    }

    #[test]
    fn root_merges_reduction_into_new_round() {
        let (mut b, transport, _, _) = balancer(0, 4);
        let data: EventMap = [Event::new(9, 1, 3, 1.0)].into_iter().collect();

        let msg = Message::new(2, MessageTag::ReduceData, data.to_bytes().unwrap());
        assert!(b.handle(&msg).unwrap());

        assert_eq!(b.global_epoch(), 1);
        assert_eq!(b.states().get(9).unwrap().demand, 3);
        let sent = transport.drain();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|o| o.tag == MessageTag::BroadcastData));
    }

    #[test]
    fn digest_drops_subsumed_diffs() {
        let (mut b, _, _, _) = balancer(1, 2);
        b.on_activate(JobUpdate::root(1, 2, 1.0));
        let mut data = b.diffs().clone();
        data.set_global_epoch(1);

        b.handle(&broadcast_msg(0, &data)).unwrap();
        assert!(b.diffs().is_empty());
        assert_eq!(b.phase(), BalancerPhase::Idle);
        assert_eq!(b.latency_summary(1).unwrap().count, 1);
    }

    #[test]
    fn termination_fires_zero_and_untracks() {
        let (mut b, _, clock, updates) = balancer(0, 4);
        b.on_activate(JobUpdate::root(1, 4, 1.0));
        b.advance().unwrap();
        assert_eq!(b.volume_of(1), Some(4));

        clock.advance(1.0);
        assert!(b.on_terminate(JobUpdate::root(1, 0, 1.0)));
        assert!(b.advance().unwrap());

        assert_eq!(*updates.lock().unwrap(), vec![(1, 4), (1, 0)]);
        assert!(!b.tracks(1));
        assert!(b.states().get(1).unwrap().is_termination());
    }

    #[test]
    fn stale_event_after_termination_is_rejected() {
        let (mut b, _, _, _) = balancer(0, 4);
        b.on_activate(JobUpdate::root(1, 4, 1.0));
        b.on_terminate(JobUpdate::root(1, 0, 1.0));
        b.advance().unwrap();

        let stale: EventMap = [Event::new(1, 2, 7, 1.0)].into_iter().collect();
        let msg = Message::new(1, MessageTag::ReduceData, stale.to_bytes().unwrap());
        assert!(!b.handle(&msg).unwrap());
        assert_eq!(b.states().get(1).unwrap().demand, 0);
        assert!(!b.on_demand_change(JobUpdate::root(1, 7, 1.0)));
    }

    #[test]
    fn retired_job_stays_retired_after_pruning() {
        let (mut b, _, clock, _) = balancer(0, 1);
        b.on_activate(JobUpdate::root(1, 2, 1.0));
        b.on_terminate(JobUpdate::root(1, 0, 1.0));
        assert!(b.advance().unwrap());

        for demand in [1, 2] {
            clock.advance(0.1);
            b.on_demand_change(JobUpdate::root(2, demand, 1.0));
            assert!(b.advance().unwrap());
        }
        assert!(!b.states().contains(1));

        assert!(!b.on_activate(JobUpdate::root(1, 2, 1.0)));
        let stale: EventMap = [Event::new(1, 1, 2, 1.0)].into_iter().collect();
        let msg = Message::new(0, MessageTag::ReduceData, stale.to_bytes().unwrap());
        assert!(!b.handle(&msg).unwrap());
        assert!(!b.states().contains(1));
        assert!(b.diffs().is_empty());
    }

    #[test]
    fn unexpected_tag_is_an_error() {
        let (mut b, _, _, _) = balancer(0, 2);
        let msg = Message {
            source: 1,
            tag: 42,
            payload: EventMap::new().to_bytes().unwrap(),
        };
        let err = b.handle(&msg).unwrap_err();
        assert!(matches!(err, BalanceError::UnexpectedTag { tag: 42, source_rank: 1 }));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let (mut b, _, _, _) = balancer(0, 2);
        let msg = Message {
            source: 1,
            tag: MessageTag::BroadcastData.as_u32(),
            payload: b"{".to_vec(),
        };
        assert!(matches!(
            b.handle(&msg).unwrap_err(),
            BalanceError::MalformedPayload { source_rank: 1, .. }
        ));
    }

    #[test]
    fn superseded_event_records_latency() {
        let (mut b, _, clock, _) = balancer(1, 2);
        b.on_activate(JobUpdate::root(1, 2, 1.0));
        clock.advance(0.5);
        b.on_demand_change(JobUpdate::root(1, 3, 1.0));

        let summary = b.latency_summary(1).unwrap();
        assert_eq!(summary.count, 1);
        assert!((summary.max - 0.5).abs() < 1e-12);
    }

    #[test]
    fn round_callback_sees_result() {
        let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
        let sink = seen.clone();
        let (b, _, _, _) = balancer(0, 1);
        let mut b = b.with_round_fn(Box::new(move |result| {
            sink.lock().unwrap().push(result.global_epoch);
        }));

        b.on_activate(JobUpdate::root(1, 1, 1.0));
        b.advance().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }
}
