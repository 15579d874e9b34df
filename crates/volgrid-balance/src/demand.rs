//! Demand growth of an active job.
//!
//! A freshly activated job does not claim its full size at once. Its demand
//! follows `d(0) = 1, d <- 2d + 1` per growth period, i.e. it fills one more
//! level of its binary job tree each period:
//!
//! ```text
//! period <= 0     demand = size
//! discrete        demand = min(size, 2^(floor(t / period) + 1) - 1)
//! continuous      demand = min(size, floor(2^(t / period + 1)) - 1)
//! ```
//!
//! `max_demand > 0` caps the result.

use volgrid_core::GrowthConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemandSchedule {
    period: f64,
    continuous: bool,
    max_demand: u32,
}

impl DemandSchedule {
    pub fn new(period: f64, continuous: bool, max_demand: u32) -> Self {
        Self {
            period,
            continuous,
            max_demand,
        }
    }

    pub fn from_config(config: &GrowthConfig) -> Self {
        Self::new(config.period, config.continuous, config.max_demand)
    }

    /// Demand of a job with full size `size`, `elapsed` seconds after its
    /// activation. `None` for `elapsed` means not activated yet.
    pub fn demand(&self, size: u32, elapsed: Option<f64>) -> u32 {
        let demand = if self.period <= 0.0 {
            size
        } else {
            match elapsed {
                None => 1,
                Some(t) => {
                    let periods = t.max(0.0) / self.period;
                    let exponent = if self.continuous {
                        periods + 1.0
                    } else {
                        periods.floor() + 1.0
                    };
                    // 2^exponent saturates well before overflowing u32.
                    let grown = exponent.exp2().min(f64::from(u32::MAX)).floor() as u32;
                    size.min(grown.saturating_sub(1))
                }
            }
        };

        let demand = if self.max_demand > 0 {
            demand.min(self.max_demand)
        } else {
            demand
        };
        demand.max(1).min(size.max(1))
    }
}

impl Default for DemandSchedule {
    fn default() -> Self {
        Self::new(0.0, false, 0)
    }
}
