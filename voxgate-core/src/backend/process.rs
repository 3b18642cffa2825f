//! Capture through a recorder subprocess writing raw PCM to stdout.
//!
//! Shared by the pull backends. The child is spawned in `open` and killed
//! and reaped in `stop` or on drop. A reader thread owns the child's stdout
//! and hands whole periods to `start` over a channel, so a silent child
//! never keeps `start` from noticing a stop request.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::engine::Ingest;
use crate::error::{Result, VoxError};

/// Stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 8;

/// How often `ensure_running` checks the child during its grace period.
const STARTUP_POLL: Duration = Duration::from_millis(20);

/// Longest `pump` waits on the reader before rechecking the running flag.
const STOP_POLL: Duration = Duration::from_millis(50);

enum ReadEvent {
    Period(Vec<u8>),
    /// Last bytes before end of stream; may be empty.
    Tail(Vec<u8>),
    Failed(VoxError),
}

pub(crate) struct CaptureProcess {
    label: &'static str,
    child: Child,
    stdout: Option<ChildStdout>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_thread: Option<JoinHandle<()>>,
    reader_thread: Option<JoinHandle<()>>,
}

impl CaptureProcess {
    pub(crate) fn spawn(label: &'static str, mut command: Command) -> Result<Self> {
        let program = command.get_program().to_string_lossy().into_owned();
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    VoxError::AudioDevice(format!("{program} not found in PATH ({label} backend)"))
                }
                _ => VoxError::AudioDevice(format!("failed to start {program}: {e}")),
            })?;

        info!(pid = child.id(), program = %program, "{label} capture process started");

        let stdout = child.stdout.take();
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_thread = match child.stderr.take() {
            Some(stderr) => {
                let tail = Arc::clone(&stderr_tail);
                let spawned = thread::Builder::new()
                    .name(format!("{program}-stderr"))
                    .spawn(move || forward_stderr(label, stderr, &tail));
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        warn!("could not watch {program} stderr: {e}");
                        None
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            label,
            child,
            stdout,
            stderr_tail,
            stderr_thread,
            reader_thread: None,
        })
    }

    /// Give the child `grace` to fail on a bad device before declaring it up.
    pub(crate) fn ensure_running(&mut self, grace: Duration, device: &str) -> Result<()> {
        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.join_stderr();
                let detail = self.stderr_text();
                return Err(VoxError::InvalidDevice {
                    device: device.to_string(),
                    reason: if detail.is_empty() {
                        format!("{} capture exited with {status}", self.label)
                    } else {
                        detail
                    },
                });
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            thread::sleep(STARTUP_POLL);
        }
    }

    /// Forward whole periods to `ingest` until stopped or until the child
    /// closes its stdout.
    pub(crate) fn pump(&mut self, ingest: &Ingest) -> Result<()> {
        let spec = ingest.spec();
        let frame_bytes = spec.frame_bytes();
        let events = self.spawn_reader(spec.period_bytes())?;
        self.forward(&events, ingest, frame_bytes)
    }

    fn forward(
        &self,
        events: &Receiver<ReadEvent>,
        ingest: &Ingest,
        frame_bytes: usize,
    ) -> Result<()> {
        while ingest.is_running() {
            let event = match events.recv_timeout(STOP_POLL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => ReadEvent::Tail(Vec::new()),
            };
            match event {
                ReadEvent::Period(period) => {
                    ingest.process(&period);
                }
                ReadEvent::Tail(tail) => {
                    let whole = tail.len() / frame_bytes * frame_bytes;
                    if whole > 0 {
                        ingest.process(&tail[..whole]);
                    }
                    if !ingest.is_running() {
                        break;
                    }
                    return Err(self.lost("capture stream ended"));
                }
                ReadEvent::Failed(e) => {
                    if !ingest.is_running() {
                        break;
                    }
                    return Err(self.lost(&format!("capture read failed ({e})")));
                }
            }
        }
        Ok(())
    }

    fn spawn_reader(&mut self, period_bytes: usize) -> Result<Receiver<ReadEvent>> {
        let Some(mut stdout) = self.stdout.take() else {
            return Err(VoxError::AudioStream(format!(
                "{} capture has no output stream",
                self.label
            )));
        };
        let (tx, rx) = crossbeam_channel::bounded(2);
        let handle = thread::Builder::new()
            .name(format!("{}-reader", self.label))
            .spawn(move || loop {
                let mut period = vec![0u8; period_bytes];
                let event = match read_period(&mut stdout, &mut period) {
                    Ok(n) if n == period_bytes => ReadEvent::Period(period),
                    Ok(n) => {
                        period.truncate(n);
                        ReadEvent::Tail(period)
                    }
                    Err(e) => ReadEvent::Failed(e),
                };
                let last = !matches!(event, ReadEvent::Period(_));
                if tx.send(event).is_err() || last {
                    break;
                }
            })
            .map_err(|e| VoxError::AudioStream(format!("could not start capture reader: {e}")))?;
        self.reader_thread = Some(handle);
        Ok(rx)
    }

    fn lost(&self, what: &str) -> VoxError {
        let detail = tail_text(&self.stderr_tail);
        VoxError::DeviceLost(if detail.is_empty() {
            format!("{} {what}", self.label)
        } else {
            format!("{} {what}: {detail}", self.label)
        })
    }

    /// Kill and reap the child. Safe to call more than once.
    pub(crate) fn terminate(&mut self) {
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                if let Err(e) = self.child.kill() {
                    debug!("{} capture kill: {e}", self.label);
                }
                if let Err(e) = self.child.wait() {
                    warn!("{} capture wait failed: {e}", self.label);
                }
            }
        }
        self.stdout = None;
        // The reader exits once the pipe closes; a grandchild holding the
        // pipe open must not block the stop path.
        if let Some(handle) = self.reader_thread.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
        self.join_stderr();
    }

    fn join_stderr(&mut self) {
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
    }

    fn stderr_text(&self) -> String {
        tail_text(&self.stderr_tail)
    }
}

fn tail_text(tail: &Mutex<VecDeque<String>>) -> String {
    tail.lock()
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Drop for CaptureProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Fill `buf` from `reader`, retrying interrupted reads.
///
/// Returns fewer bytes than `buf.len()` only at end of stream.
pub(crate) fn read_period(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(VoxError::Io(e)),
        }
    }
    Ok(filled)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StderrClass {
    /// The recorder tool recovered from an xrun by itself.
    Transient,
    Info,
}

pub(crate) fn classify_stderr(line: &str) -> StderrClass {
    let lowered = line.to_ascii_lowercase();
    if lowered.contains("overrun") || lowered.contains("xrun") {
        StderrClass::Transient
    } else {
        StderrClass::Info
    }
}

fn forward_stderr(label: &'static str, stderr: impl Read, tail: &Mutex<VecDeque<String>>) {
    for line in BufReader::new(stderr).lines() {
        let Ok(line) = line else { break };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        match classify_stderr(&line) {
            StderrClass::Transient => warn!("{label} driver: {line}"),
            StderrClass::Info => debug!("{label}: {line}"),
        }
        let mut tail = tail.lock();
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}
