//! Cooldown gate for initiating reductions.
//!
//! A rank may start a new reduction only once `period` seconds have passed
//! since it last did. This bounds message rates without any timeout on the
//! rounds already in flight.

#[derive(Debug, Clone)]
pub struct PeriodicGate {
    period: f64,
    last_fired: Option<f64>,
}

impl PeriodicGate {
    pub fn new(period: f64) -> Self {
        Self {
            period,
            last_fired: None,
        }
    }

    /// Whether the cooldown has elapsed at time `now`.
    pub fn ready(&self, now: f64) -> bool {
        match self.last_fired {
            Some(last) => now - last >= self.period,
            None => true,
        }
    }

    /// Restart the cooldown at `now`.
    pub fn fire(&mut self, now: f64) {
        self.last_fired = Some(now);
    }

    pub fn period(&self) -> f64 {
        self.period
    }
}
