//! volgrid.toml configuration parser.
//!
//! ```toml
//! [balancer]
//! load_factor = 1.0
//! balancing_period = 0.05
//! rounding = "bisection"
//!
//! [growth]
//! period = 1.0
//! continuous = false
//! max_demand = 0
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolgridConfig {
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub growth: GrowthConfig,
}

/// How fractional assignments are turned into integer volumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    Floor,
    Probabilistic,
    #[default]
    Bisection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Target fraction of cluster processes to hand out. May exceed 1.0.
    pub load_factor: f64,
    /// Minimum seconds between two reductions initiated by one rank.
    pub balancing_period: f64,
    pub rounding: RoundingPolicy,
    /// Seed for probabilistic rounding, mixed with the global epoch.
    pub rounding_seed: u64,
    /// How many recently broadcast maps are remembered for dedupe.
    pub recent_broadcast_memory: usize,
    /// Global epochs a zero-demand entry survives before it is pruned.
    pub tombstone_retention: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            load_factor: 1.0,
            balancing_period: 0.05,
            rounding: RoundingPolicy::default(),
            rounding_seed: 0,
            recent_broadcast_memory: 8,
            tombstone_retention: 2,
        }
    }
}

/// Demand growth of an active job over time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthConfig {
    /// Seconds per doubling step. 0 means full demand right away.
    pub period: f64,
    /// Grow smoothly instead of once per period.
    pub continuous: bool,
    /// Upper bound on any job's demand. 0 means unlimited.
    pub max_demand: u32,
}

impl VolgridConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: VolgridConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> CoreResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> CoreResult<()> {
        let b = &self.balancer;
        if !(b.load_factor.is_finite() && b.load_factor > 0.0) {
            return Err(CoreError::InvalidConfig {
                field: "balancer.load_factor",
                reason: format!("must be a positive number, got {}", b.load_factor),
            });
        }
        if !(b.balancing_period.is_finite() && b.balancing_period >= 0.0) {
            return Err(CoreError::InvalidConfig {
                field: "balancer.balancing_period",
                reason: format!("must be non-negative, got {}", b.balancing_period),
            });
        }
        if b.recent_broadcast_memory == 0 {
            return Err(CoreError::InvalidConfig {
                field: "balancer.recent_broadcast_memory",
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.growth.period.is_finite() {
            return Err(CoreError::InvalidConfig {
                field: "growth.period",
                reason: format!("must be finite, got {}", self.growth.period),
            });
        }
        Ok(())
    }
}
