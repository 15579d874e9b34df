//! Multi-rank protocol tests.
//!
//! Runs a whole group of balancers in one thread over recording transports
//! and a shared manual clock, delivering messages between ticks.

use std::sync::{Arc, Mutex};

use volgrid_balance::*;
use volgrid_core::{BalancerConfig, JobId, Message, MessageTag, Rank, RoundingPolicy};

const PERIOD: f64 = 0.05;

type Updates = Arc<Mutex<Vec<(JobId, u32)>>>;

struct Group {
    ranks: Vec<EventDrivenBalancer<RecordingTransport, ManualClock>>,
    outboxes: Vec<RecordingTransport>,
    updates: Vec<Updates>,
    clock: ManualClock,
    duplicate: bool,
    drop_reduce_from: Option<Rank>,
    /// The next reduction from this rank is parked until `release_held`.
    hold_reduce_from: Option<Rank>,
    held: Vec<(Rank, Message)>,
}

impl Group {
    fn new(size: usize, rounding: RoundingPolicy) -> Self {
        let config = BalancerConfig {
            balancing_period: PERIOD,
            rounding,
            rounding_seed: 7,
            ..BalancerConfig::default()
        };
        let clock = ManualClock::new();
        let mut ranks = Vec::new();
        let mut outboxes = Vec::new();
        let mut updates = Vec::new();

        for rank in 0..size {
            let transport = RecordingTransport::new();
            let seen: Updates = Arc::default();
            let sink = seen.clone();
            let balancer = EventDrivenBalancer::new(
                BalancingTree::new(rank, size).unwrap(),
                &config,
                transport.clone(),
                clock.clone(),
            )
            .with_volume_fn(Box::new(move |job, volume, _| {
                sink.lock().unwrap().push((job, volume));
            }));
            ranks.push(balancer);
            outboxes.push(transport);
            updates.push(seen);
        }

        Self {
            ranks,
            outboxes,
            updates,
            clock,
            duplicate: false,
            drop_reduce_from: None,
            hold_reduce_from: None,
            held: Vec::new(),
        }
    }

    fn root_of(&self, job_id: JobId) -> Rank {
        job_id as usize % self.ranks.len()
    }

    fn activate(&mut self, job_id: JobId, demand: u32, priority: f64) {
        let root = self.root_of(job_id);
        assert!(self.ranks[root].on_activate(JobUpdate::root(job_id, demand, priority)));
    }

    fn change_demand(&mut self, job_id: JobId, demand: u32, priority: f64) {
        let root = self.root_of(job_id);
        assert!(self.ranks[root].on_demand_change(JobUpdate::root(job_id, demand, priority)));
    }

    fn terminate(&mut self, job_id: JobId, priority: f64) {
        let root = self.root_of(job_id);
        assert!(self.ranks[root].on_terminate(JobUpdate::root(job_id, 0, priority)));
    }

    fn deliver_all(&mut self) {
        loop {
            let mut in_flight = Vec::new();
            for (source, outbox) in self.outboxes.iter().enumerate() {
                for out in outbox.drain() {
                    in_flight.push((out.dest, Message::new(source, out.tag, out.payload)));
                }
            }
            if in_flight.is_empty() {
                return;
            }
            for (dest, msg) in in_flight {
                if msg.tag == MessageTag::ReduceData.as_u32()
                    && self.drop_reduce_from.take_if(|r| *r == msg.source).is_some()
                {
                    continue;
                }
                if msg.tag == MessageTag::ReduceData.as_u32()
                    && self.hold_reduce_from.take_if(|r| *r == msg.source).is_some()
                {
                    self.held.push((dest, msg));
                    continue;
                }
                self.ranks[dest].handle(&msg).unwrap();
                if self.duplicate {
                    self.ranks[dest].handle(&msg).unwrap();
                }
            }
        }
    }

    fn quiet(&self) -> bool {
        self.outboxes.iter().all(|o| o.is_empty())
            && self.ranks.iter().all(|b| b.diffs().is_empty())
    }

    fn tick(&mut self) {
        self.clock.advance(PERIOD);
        for balancer in &mut self.ranks {
            balancer.advance().unwrap();
        }
        self.deliver_all();
    }

    /// Deliver parked reductions. Returns whether any produced a round.
    fn release_held(&mut self) -> bool {
        let mut changed = false;
        for (dest, msg) in std::mem::take(&mut self.held) {
            changed |= self.ranks[dest].handle(&msg).unwrap();
        }
        changed
    }

    fn run_until_quiet(&mut self) -> usize {
        for tick in 1..=100 {
            self.tick();
            if self.quiet() {
                return tick;
            }
        }
        panic!("group did not settle within 100 ticks");
    }

    fn assert_agreement(&self) {
        let reference = self.ranks[0].result();
        for balancer in &self.ranks {
            assert_eq!(balancer.global_epoch(), self.ranks[0].global_epoch());
            assert_eq!(
                balancer.result().volumes,
                reference.volumes,
                "rank {} disagrees",
                balancer.rank()
            );
            assert_eq!(balancer.phase(), BalancerPhase::Idle);
        }
    }

    fn last_update(&self, job_id: JobId) -> Option<u32> {
        let root = self.root_of(job_id);
        self.updates[root]
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(job, _)| *job == job_id)
            .map(|(_, volume)| *volume)
    }
}

#[test]
fn group_converges_on_fair_share() {
    let mut group = Group::new(8, RoundingPolicy::Floor);
    group.activate(1, 1, 1.0);
    group.activate(2, 4, 1.0);
    group.activate(3, 8, 1.0);

    group.run_until_quiet();
    group.assert_agreement();

    let result = group.ranks[5].result();
    assert_eq!(result.volume_of(1), 1);
    assert_eq!(result.volume_of(2), 2);
    assert_eq!(result.volume_of(3), 4);

    assert_eq!(group.last_update(2), Some(2));
    assert_eq!(group.last_update(3), Some(4));
    assert_eq!(group.ranks[3].volume_of(3), Some(4));
}

#[test]
fn single_rank_group_balances_alone() {
    let mut group = Group::new(1, RoundingPolicy::Bisection);
    group.activate(4, 5, 1.0);
    group.run_until_quiet();

    assert_eq!(group.ranks[0].result().volume_of(4), 1);
    assert_eq!(group.last_update(4), Some(1));
}

#[test]
fn demand_change_triggers_new_round() {
    let mut group = Group::new(4, RoundingPolicy::Bisection);
    group.activate(1, 2, 1.0);
    group.run_until_quiet();
    let first_epoch = group.ranks[0].global_epoch();
    assert_eq!(group.last_update(1), Some(2));

    group.change_demand(1, 4, 1.0);
    group.run_until_quiet();

    group.assert_agreement();
    assert!(group.ranks[0].global_epoch() > first_epoch);
    assert_eq!(group.last_update(1), Some(4));
}

#[test]
fn terminated_job_reports_zero_everywhere() {
    let mut group = Group::new(4, RoundingPolicy::Floor);
    group.activate(1, 3, 1.0);
    group.activate(2, 2, 1.0);
    group.run_until_quiet();
    assert_eq!(group.last_update(1), Some(2));

    group.terminate(1, 1.0);
    group.run_until_quiet();
    group.assert_agreement();

    assert_eq!(group.last_update(1), Some(0));
    assert!(!group.ranks[1].tracks(1));
    for balancer in &group.ranks {
        assert_eq!(balancer.result().volume_of(1), 0);
        assert_eq!(balancer.result().volume_of(2), 2);
    }
}

#[test]
fn duplicate_delivery_changes_nothing() {
    let mut once = Group::new(8, RoundingPolicy::Bisection);
    let mut twice = Group::new(8, RoundingPolicy::Bisection);
    twice.duplicate = true;

    for group in [&mut once, &mut twice] {
        group.activate(1, 6, 1.0);
        group.activate(6, 3, 2.0);
        group.activate(7, 9, 0.5);
        group.run_until_quiet();
        group.assert_agreement();
    }

    assert_eq!(once.ranks[0].result().volumes, twice.ranks[0].result().volumes);
}

#[test]
fn lost_reduction_is_sent_again() {
    let mut group = Group::new(4, RoundingPolicy::Floor);
    group.drop_reduce_from = Some(3);
    group.activate(3, 2, 1.0);

    group.run_until_quiet();
    group.assert_agreement();
    assert!(group.drop_reduce_from.is_none());
    assert_eq!(group.ranks[0].result().volume_of(3), 2);
    assert_eq!(group.last_update(3), Some(2));
}

#[test]
fn late_reduction_cannot_revive_terminated_job() {
    let mut group = Group::new(2, RoundingPolicy::Floor);
    group.hold_reduce_from = Some(1);
    group.activate(1, 2, 1.0);
    group.tick();
    assert_eq!(group.held.len(), 1);

    group.terminate(1, 1.0);
    group.run_until_quiet();
    assert_eq!(group.last_update(1), Some(0));

    // Two more rounds let the tombstone age out of the state.
    group.activate(2, 1, 1.0);
    group.run_until_quiet();
    group.change_demand(2, 2, 1.0);
    group.run_until_quiet();
    for balancer in &group.ranks {
        assert!(!balancer.states().contains(1));
    }

    let epoch = group.ranks[0].global_epoch();
    assert!(!group.release_held());
    group.run_until_quiet();
    group.assert_agreement();

    assert_eq!(group.ranks[0].global_epoch(), epoch);
    assert_eq!(group.last_update(1), Some(0));
    for balancer in &group.ranks {
        assert!(!balancer.states().contains(1));
        assert_eq!(balancer.result().volume_of(1), 0);
        assert_eq!(balancer.result().volume_of(2), 2);
    }
}

#[test]
fn probabilistic_rounding_agrees_across_ranks() {
    let mut group = Group::new(16, RoundingPolicy::Probabilistic);
    for job in 1..=6 {
        group.activate(job, job * 3, 1.0 + f64::from(job) / 4.0);
    }
    group.run_until_quiet();
    group.assert_agreement();

    let volumes = &group.ranks[9].result().volumes;
    assert_eq!(volumes.len(), 6);
    assert!(volumes.values().all(|v| *v >= 1));
}

#[test]
fn many_jobs_over_many_ranks_settle() {
    let mut group = Group::new(13, RoundingPolicy::Bisection);
    for job in 0..26 {
        group.activate(job, 1 + job % 5, 1.0 + f64::from(job % 3));
    }
    let ticks = group.run_until_quiet();
    group.assert_agreement();
    assert!(ticks < 100);

    for job in 0..26 {
        let volume = group.ranks[0].result().volume_of(job);
        assert!(volume >= 1, "job {job} has no process");
        assert_eq!(group.last_update(job), Some(volume));
    }
}
