//! Producer/consumer hand-off.
//!
//! ## Producer (`Ingest::process`, capture context)
//!
//! ```text
//! 1. Measure the chunk level (dB-FS) and run the activation gate
//! 2. Publish a LevelEvent
//! 3. If live: under the lock, read the tail and linear write capacity;
//!    copy one slice without the lock; re-lock to commit and notify
//! 4. No space left: drop the rest of the chunk and count an overrun
//! ```
//!
//! ## Consumer (`run_writer`, writer thread)
//!
//! ```text
//! 1. Under the lock: note the current linear run, or wait on the condvar
//!    (with a timeout only while a split interval can retire the open file)
//! 2. Outside the lock: copy the run out, then re-lock to release it
//! 3. Rotate if the split interval elapsed, open a file if none is open,
//!    hand the frames to the writer
//! 4. On stop: drain what is queued, then close the writer
//! ```
//!
//! The mutex guards the ring cursors only. Sample copies and file and
//! encoder I/O always happen with it released.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::config::RecorderConfig;
use super::rotation::{OutputNamer, SplitPolicy};
use crate::audio::StreamSpec;
use crate::buffering::RingBuffer;
use crate::error::Result;
use crate::events::LevelEvent;
use crate::vad::ActivityGate;
use crate::writer::Writer;

/// Level events buffered for slow subscribers.
const LEVEL_CHANNEL_CAP: usize = 64;

/// Floor for the rotation-check wait when the split deadline is imminent.
const MIN_SPLIT_POLL: Duration = Duration::from_millis(1);

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub chunks_in: AtomicUsize,
    pub chunks_live: AtomicUsize,
    pub samples_queued: AtomicUsize,
    pub samples_dropped: AtomicUsize,
    pub overruns: AtomicUsize,
    pub frames_written: AtomicUsize,
    pub files_opened: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.chunks_in.store(0, Ordering::Relaxed);
        self.chunks_live.store(0, Ordering::Relaxed);
        self.samples_queued.store(0, Ordering::Relaxed);
        self.samples_dropped.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.frames_written.store(0, Ordering::Relaxed);
        self.files_opened.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            chunks_in: self.chunks_in.load(Ordering::Relaxed),
            chunks_live: self.chunks_live.load(Ordering::Relaxed),
            samples_queued: self.samples_queued.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            files_opened: self.files_opened.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub chunks_in: usize,
    pub chunks_live: usize,
    pub samples_queued: usize,
    pub samples_dropped: usize,
    pub overruns: usize,
    pub frames_written: usize,
    pub files_opened: usize,
}

/// State shared by the capture context and the writer thread.
///
/// The ring and its condvar are the only data-plane channel; the gate is
/// touched by the producer alone but lives here so `Ingest` stays `Clone`.
pub struct Shared {
    spec: StreamSpec,
    monitor: bool,
    verbose: u8,
    ring: RingBuffer,
    /// Paired with the ring's cursor lock.
    data_ready: Condvar,
    /// Cleared exactly once, by a stop request or by pipeline shutdown.
    running: AtomicBool,
    gate: Mutex<Box<dyn ActivityGate>>,
    levels: broadcast::Sender<LevelEvent>,
    seq: AtomicU64,
    diagnostics: PipelineDiagnostics,
}

impl Shared {
    pub(crate) fn new(config: &RecorderConfig, ring: RingBuffer, gate: Box<dyn ActivityGate>) -> Self {
        let (levels, _) = broadcast::channel(LEVEL_CHANNEL_CAP);
        Self {
            spec: config.stream_spec(),
            monitor: config.monitor,
            verbose: config.verbose,
            ring,
            data_ready: Condvar::new(),
            running: AtomicBool::new(true),
            gate: Mutex::new(gate),
            levels,
            seq: AtomicU64::new(0),
            diagnostics: PipelineDiagnostics::default(),
        }
    }

    pub fn spec(&self) -> StreamSpec {
        self.spec
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear the running flag and wake the writer thread.
    ///
    /// Taking the cursor lock before notifying closes the window between
    /// the writer's flag check and its wait.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _cursors = self.ring.cursors().lock();
        self.data_ready.notify_all();
    }

    pub fn subscribe_levels(&self) -> broadcast::Receiver<LevelEvent> {
        self.levels.subscribe()
    }

    pub fn diagnostics(&self) -> &PipelineDiagnostics {
        &self.diagnostics
    }

    /// Copy `data` (whole frames) into the ring, dropping what does not fit.
    /// Returns the number of samples queued.
    fn enqueue(&self, data: &[u8]) -> usize {
        let bytes_per_sample = self.spec.format.bytes_per_sample();
        let channels = usize::from(self.spec.channels);
        let mut remaining = data;
        let mut queued = 0;

        while !remaining.is_empty() {
            let (at, capacity) = {
                let cursors = self.ring.cursors().lock();
                (cursors.tail(), cursors.write_linear_capacity())
            };
            let mut batch = (remaining.len() / bytes_per_sample).min(capacity);
            batch -= batch % channels;

            if batch == 0 {
                self.record_overrun(remaining.len() / bytes_per_sample);
                break;
            }

            let bytes = batch * bytes_per_sample;
            self.ring.store(at, &remaining[..bytes]);
            self.ring.cursors().lock().commit_write_at(at, batch);
            self.data_ready.notify_one();

            remaining = &remaining[bytes..];
            queued += batch;
        }

        self.diagnostics
            .samples_queued
            .fetch_add(queued, Ordering::Relaxed);
        queued
    }

    fn record_overrun(&self, dropped: usize) {
        self.diagnostics.overruns.fetch_add(1, Ordering::Relaxed);
        self.diagnostics
            .samples_dropped
            .fetch_add(dropped, Ordering::Relaxed);
        if self.verbose >= 1 {
            warn!(dropped, "PCM buffer overrun: ring buffer full");
        } else {
            debug!(dropped, "PCM buffer overrun: ring buffer full");
        }
    }
}

/// Producer-side entry point handed to backends.
///
/// Push backends call [`process`](Self::process) from their audio callback,
/// pull backends from their read loop; the algorithm is the same for both.
#[derive(Clone)]
pub struct Ingest {
    shared: Arc<Shared>,
}

impl Ingest {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn spec(&self) -> StreamSpec {
        self.shared.spec
    }

    /// False once the recorder has been asked to stop.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Gate one captured chunk and queue it for the writer.
    ///
    /// `data` is interleaved PCM in the recorder's sample format; a trailing
    /// partial frame is ignored. Returns the number of samples queued, which
    /// is zero for silent chunks, in monitor mode, and when the ring is full.
    pub fn process(&self, data: &[u8]) -> usize {
        let shared = &*self.shared;
        let frame_bytes = shared.spec.frame_bytes();
        let data = &data[..data.len() / frame_bytes * frame_bytes];

        let level_db = shared.spec.format.rms_db(data);
        shared.diagnostics.chunks_in.fetch_add(1, Ordering::Relaxed);

        let live = !shared.monitor && shared.gate.lock().evaluate(level_db, Instant::now());
        let seq = shared.seq.fetch_add(1, Ordering::Relaxed);
        // No subscribers is fine.
        let _ = shared.levels.send(LevelEvent {
            seq,
            level_db,
            live,
        });

        if !live || data.is_empty() {
            return 0;
        }
        shared.diagnostics.chunks_live.fetch_add(1, Ordering::Relaxed);
        shared.enqueue(data)
    }
}

enum Step {
    /// `len` queued elements start at element `at`.
    Data { at: usize, len: usize },
    /// The split interval passed while waiting.
    SplitElapsed,
    /// Stopped and fully drained.
    Shutdown,
}

/// Writer thread body. Returns once stopped and drained, or on the first
/// writer failure (after closing the writer and stopping the pipeline).
pub(crate) fn run_writer(
    shared: &Shared,
    writer: &mut dyn Writer,
    namer: &OutputNamer,
    split: SplitPolicy,
) -> Result<()> {
    info!(
        writer = %writer.kind(),
        split_ms = split.interval().map(|d| d.as_millis() as u64).unwrap_or(0),
        "writer thread started"
    );

    let outcome = drive(shared, writer, namer, split);

    if writer.is_open() {
        info!("closing current output file");
    }
    let closed = writer.close();

    if let Err(e) = &outcome {
        error!("writer failed, stopping recorder: {e}");
        shared.shutdown();
    }
    outcome.and(closed)
}

fn drive(
    shared: &Shared,
    writer: &mut dyn Writer,
    namer: &OutputNamer,
    split: SplitPolicy,
) -> Result<()> {
    let ring = &shared.ring;
    let mut scratch: Vec<u8> = Vec::with_capacity(ring.capacity() * ring.element_size());
    let mut last_write: Option<Instant> = None;

    loop {
        match next_step(shared, writer.is_open(), split, last_write) {
            Step::Shutdown => return Ok(()),
            Step::SplitElapsed => {
                info!("split interval elapsed, closing current output file");
                writer.close()?;
            }
            Step::Data { at, len } => {
                scratch.clear();
                ring.load(at, len, &mut scratch);
                ring.cursors().lock().commit_read(len);

                let now = Instant::now();
                if writer.is_open() && split.expired(last_write, now) {
                    info!("split interval elapsed, rotating output file");
                    writer.close()?;
                }
                if !writer.is_open() {
                    let path = namer.next_path()?;
                    info!(path = %path.display(), "creating new output file");
                    writer.open(&path)?;
                    shared.diagnostics.files_opened.fetch_add(1, Ordering::Relaxed);
                }
                last_write = Some(now);
                let frames = writer.write(&scratch)?;
                shared
                    .diagnostics
                    .frames_written
                    .fetch_add(frames, Ordering::Relaxed);
            }
        }
    }
}

/// Block until there is something for the writer thread to do.
fn next_step(
    shared: &Shared,
    file_open: bool,
    split: SplitPolicy,
    last_write: Option<Instant>,
) -> Step {
    let mut cursors = shared.ring.cursors().lock();
    loop {
        let available = cursors.read_linear_capacity();
        if available > 0 {
            return Step::Data {
                at: cursors.head(),
                len: available,
            };
        }
        if !shared.is_running() {
            return Step::Shutdown;
        }

        let now = Instant::now();
        if file_open && split.expired(last_write, now) {
            return Step::SplitElapsed;
        }
        match split.remaining(last_write, now).filter(|_| file_open) {
            Some(remaining) => {
                shared
                    .data_ready
                    .wait_for(&mut cursors, remaining.max(MIN_SPLIT_POLL));
            }
            None => shared.data_ready.wait(&mut cursors),
        }
    }
}
