//! Balancing latency samples.
//!
//! A sample is the time between a job event being pushed at its root and
//! that event being confirmed by a digested round, or being superseded by
//! a newer event before it got there.

use serde::Serialize;

#[derive(Debug, Clone, Default)]
pub struct LatencyStats {
    samples: Vec<f64>,
}

/// Aggregate over all samples of one job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: usize,
    pub min: f64,
    pub median: f64,
    pub mean: f64,
    pub max: f64,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, seconds: f64) {
        self.samples.push(seconds.max(0.0));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<f64> {
        self.samples.last().copied()
    }

    /// `None` until at least one sample exists.
    pub fn summary(&self) -> Option<LatencySummary> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let median = if count % 2 == 1 {
            sorted[count / 2]
        } else {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        };

        Some(LatencySummary {
            count,
            min: sorted[0],
            median,
            mean: sorted.iter().sum::<f64>() / count as f64,
            max: sorted[count - 1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_summary() {
        assert!(LatencyStats::new().summary().is_none());
    }

    #[test]
    fn summary_of_odd_count() {
        let mut stats = LatencyStats::new();
        for s in [0.3, 0.1, 0.2] {
            stats.record(s);
        }
        let summary = stats.summary().unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, 0.1);
        assert_eq!(summary.median, 0.2);
        assert_eq!(summary.max, 0.3);
        assert!((summary.mean - 0.2).abs() < 1e-12);
    }

    #[test]
    fn median_of_even_count_is_midpoint() {
        let mut stats = LatencyStats::new();
        for s in [4.0, 1.0, 2.0, 3.0] {
            stats.record(s);
        }
        assert_eq!(stats.summary().unwrap().median, 2.5);
        assert_eq!(stats.last(), Some(3.0));
    }

    #[test]
    fn negative_samples_clamp_to_zero() {
        let mut stats = LatencyStats::new();
        stats.record(-1.0);
        assert_eq!(stats.summary().unwrap().max, 0.0);
    }
}
