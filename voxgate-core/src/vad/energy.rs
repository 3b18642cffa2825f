//! Energy gate using an RMS threshold plus a fadeout window.
//!
//! ## Algorithm
//!
//! 1. If the chunk's level is strictly above `threshold_db`, remember `now`
//!    as the last loud instant.
//! 2. The chunk is live while `now - last_loud_at <= fadeout`.
//! 3. Before the first loud chunk nothing is live.

use std::time::{Duration, Instant};

use super::ActivityGate;

#[derive(Debug, Clone)]
pub struct EnergyGate {
    /// Activation level in dB-FS. A level equal to it does not activate.
    threshold_db: f64,
    /// How long recording continues after the last loud chunk.
    fadeout: Duration,
    last_loud_at: Option<Instant>,
}

impl EnergyGate {
    pub fn new(threshold_db: f64, fadeout: Duration) -> Self {
        Self {
            threshold_db,
            fadeout,
            last_loud_at: None,
        }
    }

    pub fn threshold_db(&self) -> f64 {
        self.threshold_db
    }

    pub fn fadeout(&self) -> Duration {
        self.fadeout
    }

    pub fn last_loud_at(&self) -> Option<Instant> {
        self.last_loud_at
    }
}

impl ActivityGate for EnergyGate {
    fn evaluate(&mut self, level_db: f64, now: Instant) -> bool {
        if level_db > self.threshold_db {
            self.last_loud_at = Some(now);
        }

        match self.last_loud_at {
            Some(loud) => now.saturating_duration_since(loud) <= self.fadeout,
            None => false,
        }
    }

    fn reset(&mut self) {
        self.last_loud_at = None;
    }
}
