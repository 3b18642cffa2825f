//! Event types published by a running recorder.
//!
//! Levels go out on a `tokio::sync::broadcast` channel (see
//! `Recorder::subscribe_levels`). Presentation layers such as the CLI meter
//! subscribe to them; the pipeline never waits on a slow subscriber.

use serde::{Deserialize, Serialize};

/// Loudness of one captured chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelEvent {
    /// Monotonically increasing chunk sequence number.
    pub seq: u64,
    /// RMS level in dB-FS, floored at -96.
    pub level_db: f64,
    /// Whether the activation gate marked the chunk for recording.
    /// Always false in monitor mode.
    pub live: bool,
}

/// Recorder lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderStatus {
    /// Constructed; `start()` not yet called.
    Created,
    /// Capture and writer threads are running.
    Started,
    /// `start()` returned. The recorder cannot be restarted.
    Stopped,
}
