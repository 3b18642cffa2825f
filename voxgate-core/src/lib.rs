//! # voxgate-core
//!
//! Voice/sound activated recorder engine.
//!
//! ## Architecture
//!
//! ```text
//! Backend (cpal callback / arecord / pw-record)
//!     │  raw PCM chunk
//!     ▼
//! Ingest::process ── rms_db ──► ActivityGate ──► broadcast::Sender<LevelEvent>
//!     │  live chunks only
//!     ▼
//! RingBuffer: Mutex<RingCursors> + Condvar, slot-locked storage
//!                                        (drops on overrun, never blocks)
//!     │  [thread boundary]
//!     ▼
//! writer thread ── SplitPolicy / OutputNamer ──► Writer (raw / wav / mp3 / ogg / opus)
//! ```
//!
//! Sample copies and file and encoder I/O happen with the cursor lock
//! released.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod backend;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod events;
pub mod vad;
pub mod writer;

// Convenience re-exports for downstream crates
pub use audio::device::{format_device_list, DeviceInfo};
pub use audio::{SampleFormat, StreamSpec};
pub use backend::{create_backend, Backend, BackendKind};
pub use engine::{DiagnosticsSnapshot, Ingest, Recorder, RecorderConfig, StopHandle};
pub use error::{Result, VoxError};
pub use events::{LevelEvent, RecorderStatus};
pub use vad::{ActivityGate, EnergyGate};
pub use writer::{create_writer, BitrateConfig, EncoderOptions, Writer, WriterKind};
