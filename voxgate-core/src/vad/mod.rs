//! Activation detection.
//!
//! The `ActivityGate` trait decides, chunk by chunk, whether captured audio
//! is worth persisting. `EnergyGate` (threshold + fadeout) is the default;
//! tests swap in their own gates without touching the pipeline.

pub mod energy;

pub use energy::EnergyGate;

use std::time::Instant;

/// Per-chunk persistence decision.
pub trait ActivityGate: Send + 'static {
    /// Classify a chunk whose RMS level is `level_db`, observed at `now`.
    ///
    /// `now` must come from a monotonic clock.
    fn evaluate(&mut self, level_db: f64, now: Instant) -> bool;

    /// Forget any activation history.
    fn reset(&mut self);
}
