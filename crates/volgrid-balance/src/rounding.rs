//! Rounding fractional assignments to integer volumes.
//!
//! Three interchangeable strategies, selected once per balancer:
//!
//! - [`FloorRounding`] truncates. Never exceeds the fractional total but
//!   leaves the sum of remainders unused.
//! - [`ProbabilisticRounding`] rounds up with probability equal to the
//!   fractional part. Unbiased per job, no global guarantee.
//! - [`BisectionRounding`] picks one remainder threshold for all jobs so
//!   that the total lands as close to `size * load_factor` as possible.
//!
//! All strategies are deterministic functions of their inputs, so every
//! rank rounds the same global state to the same volumes.

use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use volgrid_core::{JobId, RoundingPolicy};

/// Fractional assignment per job.
pub type Assignments = BTreeMap<JobId, f64>;

/// Integer volume per job.
pub type Volumes = BTreeMap<JobId, u32>;

/// Over-utilization is penalized this many times harder than
/// under-utilization by [`penalty`].
pub const OVERLOAD_WEIGHT: f64 = 4.0;

/// What the rounded total is measured against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityTarget {
    pub size: usize,
    pub load_factor: f64,
    /// Global epoch of the state being rounded.
    pub global_epoch: u64,
}

impl CapacityTarget {
    /// Number of processes the allocation aims to hand out.
    pub fn processes(&self) -> f64 {
        self.size as f64 * self.load_factor
    }
}

pub trait RoundingStrategy: Send {
    fn policy(&self) -> RoundingPolicy;

    fn round(&self, assignments: &Assignments, target: &CapacityTarget) -> Volumes;
}

/// Build the strategy for `policy`.
pub fn strategy_for(policy: RoundingPolicy, seed: u64) -> Box<dyn RoundingStrategy> {
    match policy {
        RoundingPolicy::Floor => Box::new(FloorRounding),
        RoundingPolicy::Probabilistic => Box::new(ProbabilisticRounding::new(seed)),
        RoundingPolicy::Bisection => Box::new(BisectionRounding),
    }
}

/// Sum of all volumes.
pub fn utilization(volumes: &Volumes) -> u64 {
    volumes.values().map(|v| u64::from(*v)).sum()
}

/// Cost of landing at `utilization` (fraction of the group) when aiming for
/// `load_factor`.
pub fn penalty(utilization: f64, load_factor: f64) -> f64 {
    if utilization <= load_factor {
        load_factor - utilization
    } else {
        OVERLOAD_WEIGHT * (utilization - load_factor)
    }
}

fn floor_volume(assignment: f64) -> u32 {
    assignment.max(0.0).floor() as u32
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FloorRounding;

impl RoundingStrategy for FloorRounding {
    fn policy(&self) -> RoundingPolicy {
        RoundingPolicy::Floor
    }

    fn round(&self, assignments: &Assignments, _target: &CapacityTarget) -> Volumes {
        assignments
            .iter()
            .map(|(job_id, a)| (*job_id, floor_volume(*a)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProbabilisticRounding {
    seed: u64,
}

impl ProbabilisticRounding {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl RoundingStrategy for ProbabilisticRounding {
    fn policy(&self) -> RoundingPolicy {
        RoundingPolicy::Probabilistic
    }

    fn round(&self, assignments: &Assignments, target: &CapacityTarget) -> Volumes {
        // Same seed on every rank for the same round.
        let mut rng = SmallRng::seed_from_u64(
            self.seed ^ target.global_epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15),
        );
        assignments
            .iter()
            .map(|(job_id, a)| {
                let base = floor_volume(*a);
                let fraction = a.max(0.0) - f64::from(base);
                let bump = u32::from(rng.random::<f64>() < fraction);
                (*job_id, base + bump)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BisectionRounding;

impl BisectionRounding {
    /// Round every assignment whose remainder is at least `remainders[idx]`
    /// up and everything else down. `idx == remainders.len()` rounds all
    /// down.
    pub fn round_at_threshold(assignments: &Assignments, remainders: &[f64], idx: usize) -> Volumes {
        let threshold = remainders.get(idx).copied();
        assignments
            .iter()
            .map(|(job_id, a)| {
                let base = floor_volume(*a);
                let remainder = a.max(0.0) - f64::from(base);
                let up = matches!(threshold, Some(t) if remainder > 0.0 && remainder >= t);
                (*job_id, base + u32::from(up))
            })
            .collect()
    }
}

impl RoundingStrategy for BisectionRounding {
    fn policy(&self) -> RoundingPolicy {
        RoundingPolicy::Bisection
    }

    fn round(&self, assignments: &Assignments, target: &CapacityTarget) -> Volumes {
        // Distinct remainders make utilization strictly decreasing in idx.
        let mut remainders: Vec<f64> = assignments
            .values()
            .map(|a| a - a.floor())
            .filter(|r| *r > 0.0 && *r < 1.0)
            .collect();
        remainders.sort_by(f64::total_cmp);
        remainders.dedup();

        let size = target.size.max(1) as f64;
        let goal = target.processes();
        let mut best: Option<(f64, usize, u64)> = None;
        let mut iterations = 0;

        let mut consider = |idx: usize, iterations: u32| -> u64 {
            let util = utilization(&Self::round_at_threshold(assignments, &remainders, idx));
            let p = penalty(util as f64 / size, target.load_factor);
            trace!(
                epoch = target.global_epoch,
                iteration = iterations,
                idx,
                remainder = remainders.get(idx).copied().unwrap_or(1.0),
                util,
                penalty = p,
                "bisection step"
            );
            if best.is_none_or(|(best_penalty, _, _)| p < best_penalty) {
                best = Some((p, idx, util));
            }
            util
        };

        // Smallest idx whose utilization does not exceed the goal.
        let (mut lower, mut upper) = (0usize, remainders.len());
        while lower < upper {
            let mid = (lower + upper) / 2;
            let util = consider(mid, iterations);
            if util as f64 <= goal {
                upper = mid;
            } else {
                lower = mid + 1;
            }
            iterations += 1;
        }
        consider(lower, iterations);
        if lower > 0 {
            consider(lower - 1, iterations + 1);
        }

        let (best_penalty, idx, util) = best.unwrap_or((0.0, remainders.len(), 0));
        trace!(
            epoch = target.global_epoch,
            iterations,
            idx,
            util,
            penalty = best_penalty,
            "bisection done"
        );
        Self::round_at_threshold(assignments, &remainders, idx)
    }
}
