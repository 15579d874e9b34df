//! Fair-share volume calculation.
//!
//! Turns a global [`EventMap`] snapshot into one integer volume per job.
//!
//! # Algorithm
//!
//! ```text
//! C          = size * load_factor
//! active     = jobs with demand > 0           (each is owed 1 process)
//! aggregated = sum over active of (demand - 1) * priority
//! available  = C - |active|
//!
//! pass 1:  ratio_j  = clamp(available * priority_j / aggregated, 0, 1)
//!          assign_j = 1 + ratio_j * (demand_j - 1)
//!          unmet demand is summed per priority tier
//!
//! pass 2:  remaining = available - sum(assign_j - 1)
//!          tiers are served in descending priority, highest first;
//!          a tier whose cumulative unmet demand fits in `remaining` is
//!          fully granted,
//!          the first tier that does not fit gets the leftover shared in
//!          proportion to unmet demand, lower tiers get nothing more.
//!
//! rounding: the configured RoundingStrategy maps assign_j to integers.
//! ```

use serde::Serialize;
use tracing::debug;

use volgrid_core::{EventMap, JobId};

use crate::rounding::{Assignments, CapacityTarget, RoundingStrategy, Volumes, utilization};

/// Slack when comparing unmet demand against leftover capacity, so that
/// demand which exactly fills the group is granted in full.
const FIT_TOLERANCE: f64 = 1e-9;

/// Outcome of one balancing computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BalancingResult {
    pub global_epoch: u64,
    /// Fractional assignment per active job.
    pub assignments: Assignments,
    /// Rounded volume per active job. Absent jobs have volume 0.
    pub volumes: Volumes,
}

impl BalancingResult {
    pub fn volume_of(&self, job_id: JobId) -> u32 {
        self.volumes.get(&job_id).copied().unwrap_or(0)
    }

    pub fn utilization(&self) -> u64 {
        utilization(&self.volumes)
    }
}

/// Unmet demand per priority tier, highest priority first.
#[derive(Debug, Default)]
struct PriorityTiers {
    tiers: Vec<(f64, f64)>,
}

impl PriorityTiers {
    fn add(&mut self, priority: f64, unmet: f64) {
        match self.tiers.iter_mut().find(|(p, _)| *p == priority) {
            Some((_, total)) => *total += unmet,
            None => self.tiers.push((priority, unmet)),
        }
    }

    /// Sort descending and turn per-tier sums into running totals.
    fn accumulate(&mut self) {
        self.tiers.sort_by(|a, b| b.0.total_cmp(&a.0));
        let mut running = 0.0;
        for (_, total) in &mut self.tiers {
            running += *total;
            *total = running;
        }
    }

    /// Cumulative unmet demand up to and including `priority`, and up to
    /// the tier served just before it.
    fn cumulative(&self, priority: f64) -> (f64, f64) {
        let mut before = 0.0;
        for (p, running) in &self.tiers {
            if *p == priority {
                return (*running, before);
            }
            before = *running;
        }
        (before, before)
    }
}

/// Computes fractional and rounded volumes for a group of `size` processes.
#[derive(Debug, Clone, Copy)]
pub struct VolumeCalculator {
    size: usize,
    load_factor: f64,
}

impl VolumeCalculator {
    pub fn new(size: usize, load_factor: f64) -> Self {
        Self { size, load_factor }
    }

    /// Total processes the allocation aims to hand out.
    pub fn capacity(&self) -> f64 {
        self.size as f64 * self.load_factor
    }

    /// Fractional fair-share assignment for every job with positive demand.
    pub fn fractional_assignments(&self, states: &EventMap) -> Assignments {
        let epoch = states.global_epoch();
        let active: Vec<_> = states.events().filter(|e| e.demand > 0).collect();
        if active.is_empty() {
            return Assignments::new();
        }

        let aggregated: f64 = active
            .iter()
            .map(|e| f64::from(e.demand - 1) * e.priority)
            .sum();
        let available = self.capacity() - active.len() as f64;

        let mut assignments = Assignments::new();
        let mut assigned = 0.0;
        let mut tiers = PriorityTiers::default();

        for ev in &active {
            let excess = f64::from(ev.demand - 1);
            let ratio = if aggregated > 0.0 {
                (available * ev.priority / aggregated).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let assignment = 1.0 + ratio * excess;
            assigned += assignment - 1.0;
            tiers.add(ev.priority, f64::from(ev.demand) - assignment);
            assignments.insert(ev.job_id, assignment);
            debug!(epoch, job = ev.job_id, demand = ev.demand, assignment, "initial assignment");
        }

        // available is negative when jobs outnumber processes.
        debug_assert!(
            assigned <= available.max(0.0) + FIT_TOLERANCE,
            "assigned {assigned} exceeds available {available}"
        );
        let remaining = (available - assigned).max(0.0);
        debug!(epoch, assigned, remaining, "initial pass done");

        tiers.accumulate();
        for ev in active.iter().filter(|e| e.demand > 1) {
            let demand = f64::from(ev.demand);
            let Some(assignment) = assignments.get_mut(&ev.job_id) else {
                continue;
            };
            let (cumulative, served_before) = tiers.cumulative(ev.priority);

            if *assignment >= demand || cumulative <= remaining + FIT_TOLERANCE {
                *assignment = demand;
            } else if served_before < remaining {
                let ratio = (remaining - served_before) / (cumulative - served_before);
                debug_assert!(ratio > 0.0 && ratio <= 1.0, "tier ratio {ratio} out of range");
                *assignment += ratio * (demand - *assignment);
            }
            debug!(epoch, job = ev.job_id, assignment = *assignment, "adjusted assignment");
        }

        assignments
    }

    /// Full computation: fractional assignments, then rounding.
    pub fn calculate(&self, states: &EventMap, rounding: &dyn RoundingStrategy) -> BalancingResult {
        let assignments = self.fractional_assignments(states);
        let target = CapacityTarget {
            size: self.size,
            load_factor: self.load_factor,
            global_epoch: states.global_epoch(),
        };
        let volumes = rounding.round(&assignments, &target);
        BalancingResult {
            global_epoch: states.global_epoch(),
            assignments,
            volumes,
        }
    }
}
