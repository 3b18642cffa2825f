//! `Recorder`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! Recorder::new() / from_config()   → ring allocated, status = Created
//!     └─► open(device)              → backend resolves the capture device
//!         └─► start()               → writer thread spawned, backend runs on
//!                                     the caller's thread, status = Started
//!             └─► StopHandle::stop  → running=false, backend returns,
//!                                     writer drains, status = Stopped
//! ```
//!
//! States only move forward; a stopped recorder is not restarted. Build a
//! new one instead.
//!
//! ## Threading
//!
//! `start()` blocks. The writer thread is a scoped thread that borrows the
//! writer mutably, so only the ring, gate, and counters live behind an
//! `Arc`. Push backends whose stream handle is `!Send` (cpal on
//! Windows/macOS) create and drop it inside `Backend::start`, on the same
//! thread.

pub mod config;
pub mod pipeline;
pub mod rotation;

use std::sync::Arc;
use std::thread;

use anyhow::anyhow;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub use config::{RecorderConfig, DEFAULT_OUTPUT_TEMPLATE};
pub use pipeline::{DiagnosticsSnapshot, Ingest, PipelineDiagnostics};
pub use rotation::{OutputNamer, SplitPolicy};

use crate::audio::device::DeviceInfo;
use crate::audio::StreamSpec;
use crate::backend::{create_backend, Backend};
use crate::buffering::{RingBuffer, RING_PERIODS};
use crate::error::{Result, VoxError};
use crate::events::{LevelEvent, RecorderStatus};
use crate::vad::{ActivityGate, EnergyGate};
use crate::writer::{create_writer, Writer};
use pipeline::Shared;

/// Cloneable, thread-safe handle that asks a running recorder to stop.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// Idempotent. Safe from any thread, including async signal tasks.
    pub fn stop(&self) {
        self.shared.shutdown();
    }

    pub fn is_stopped(&self) -> bool {
        !self.shared.is_running()
    }
}

/// Voice activated recorder: one backend, one writer, one ring.
pub struct Recorder {
    config: RecorderConfig,
    backend: Box<dyn Backend>,
    writer: Box<dyn Writer>,
    namer: OutputNamer,
    shared: Arc<Shared>,
    status: RecorderStatus,
}

impl Recorder {
    /// Assemble a recorder from explicit parts, using the energy gate.
    pub fn new(
        config: RecorderConfig,
        backend: Box<dyn Backend>,
        writer: Box<dyn Writer>,
    ) -> Result<Self> {
        let gate = EnergyGate::new(config.threshold_db, config.fadeout());
        Self::with_gate(config, backend, writer, Box::new(gate))
    }

    /// Like [`new`](Self::new) with a caller-supplied activation gate.
    pub fn with_gate(
        config: RecorderConfig,
        backend: Box<dyn Backend>,
        writer: Box<dyn Writer>,
        gate: Box<dyn ActivityGate>,
    ) -> Result<Self> {
        config.validate()?;
        let namer = OutputNamer::new(&config.output_template, writer.extension())?;

        let spec = config.stream_spec();
        let nmemb = usize::from(spec.channels) * spec.period_frames() * RING_PERIODS;
        let ring = RingBuffer::with_slot_elements(
            nmemb,
            spec.format.bytes_per_sample(),
            usize::from(spec.channels) * spec.period_frames(),
        )?;

        info!(
            backend = %backend.kind(),
            writer = %writer.kind(),
            format = %spec.format,
            channels = spec.channels,
            rate = spec.rate,
            ring_samples = nmemb,
            "recorder created"
        );

        let shared = Arc::new(Shared::new(&config, ring, gate));
        Ok(Self {
            config,
            backend,
            writer,
            namer,
            shared,
            status: RecorderStatus::Created,
        })
    }

    /// Build the backend and writer named in `config` through the factories.
    pub fn from_config(config: RecorderConfig) -> Result<Self> {
        config.validate()?;
        let backend = create_backend(config.backend);
        let writer = create_writer(
            config.writer,
            config.stream_spec(),
            &config.encoder_options(),
        )?;
        Self::new(config, backend, writer)
    }

    /// Select the capture device. `"default"` is the platform default.
    pub fn open(&mut self, device: &str) -> Result<()> {
        if self.status != RecorderStatus::Created {
            return Err(VoxError::AlreadyStarted);
        }
        self.backend.open(device, self.config.stream_spec())
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.backend.list_devices()
    }

    /// Run capture until stopped or until the device goes away.
    ///
    /// Blocks the caller. Queued audio is written out before this returns.
    ///
    /// # Errors
    /// `AlreadyStarted` outside the `Created` state, `DeviceLost` when the
    /// capture source disappeared, or the writer's error when output failed.
    pub fn start(&mut self) -> Result<()> {
        if self.status != RecorderStatus::Created {
            return Err(VoxError::AlreadyStarted);
        }
        if !self.shared.is_running() {
            info!("stop requested before start, nothing to record");
            self.status = RecorderStatus::Stopped;
            return Ok(());
        }
        self.status = RecorderStatus::Started;
        self.shared.diagnostics().reset();

        let monitor = self.config.monitor;
        let split = self.config.split_policy();
        let ingest = Ingest::new(Arc::clone(&self.shared));
        let shared = &*self.shared;
        let writer = &mut *self.writer;
        let namer = &self.namer;
        let backend = &mut *self.backend;

        info!(monitor, "recorder started");

        let (captured, written) = thread::scope(|scope| {
            let writer_thread = if monitor {
                None
            } else {
                let spawned = thread::Builder::new()
                    .name("voxgate-writer".into())
                    .spawn_scoped(scope, move || {
                        pipeline::run_writer(shared, writer, namer, split)
                    });
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        shared.shutdown();
                        return (Ok(()), Err(VoxError::Io(e)));
                    }
                }
            };

            let captured = backend.start(ingest);
            backend.stop();
            shared.shutdown();

            let written = match writer_thread {
                Some(handle) => handle
                    .join()
                    .unwrap_or_else(|_| Err(VoxError::Other(anyhow!("writer thread panicked")))),
                None => Ok(()),
            };
            (captured, written)
        });

        self.status = RecorderStatus::Stopped;
        let stats = self.shared.diagnostics().snapshot();
        info!(
            chunks_in = stats.chunks_in,
            chunks_live = stats.chunks_live,
            frames_written = stats.frames_written,
            files_opened = stats.files_opened,
            overruns = stats.overruns,
            samples_dropped = stats.samples_dropped,
            "recorder stopped"
        );

        if let (Err(capture_err), Err(_)) = (&captured, &written) {
            warn!("capture also failed: {capture_err}");
        }
        written.and(captured)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn stop(&self) {
        self.shared.shutdown();
    }

    pub fn status(&self) -> RecorderStatus {
        self.status
    }

    /// Per-chunk levels. Every chunk is reported, live or not.
    pub fn subscribe_levels(&self) -> broadcast::Receiver<LevelEvent> {
        self.shared.subscribe_levels()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics().snapshot()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn spec(&self) -> StreamSpec {
        self.shared.spec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::writer::raw::RawWriter;

    struct IdleBackend;

    impl Backend for IdleBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Alsa
        }

        fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(vec![DeviceInfo::new("default", "default")])
        }

        fn open(&mut self, _device: &str, _spec: StreamSpec) -> Result<()> {
            Ok(())
        }

        fn start(&mut self, ingest: Ingest) -> Result<()> {
            while ingest.is_running() {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            Ok(())
        }

        fn stop(&mut self) {}
    }

    fn recorder(config: RecorderConfig) -> Recorder {
        let writer = Box::new(RawWriter::new(config.stream_spec()));
        Recorder::new(config, Box::new(IdleBackend), writer).unwrap()
    }

    #[test]
    fn fresh_recorder_is_created_with_clean_counters() {
        let config = RecorderConfig {
            channels: 2,
            rate: 8_000,
            ..RecorderConfig::default()
        };
        let rec = recorder(config);
        assert_eq!(rec.diagnostics(), DiagnosticsSnapshot::default());
        assert_eq!(rec.spec().period_frames(), 800);
        assert_eq!(rec.status(), RecorderStatus::Created);
    }

    #[test]
    fn invalid_config_is_rejected_before_allocation() {
        let config = RecorderConfig {
            rate: 0,
            ..RecorderConfig::default()
        };
        let writer = Box::new(RawWriter::new(StreamSpec::new(config.format, 1, 8_000)));
        assert!(Recorder::new(config, Box::new(IdleBackend), writer).is_err());
    }

    #[test]
    fn stop_before_start_returns_immediately() {
        let mut rec = recorder(RecorderConfig::default());
        let handle = rec.stop_handle();
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());

        rec.start().unwrap();
        assert_eq!(rec.status(), RecorderStatus::Stopped);
        assert!(matches!(rec.start(), Err(VoxError::AlreadyStarted)));
        assert!(matches!(rec.open("default"), Err(VoxError::AlreadyStarted)));
    }

    #[test]
    fn list_devices_delegates_to_backend() {
        let rec = recorder(RecorderConfig::default());
        let devices = rec.list_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(rec.status(), RecorderStatus::Created);
    }
}
