//! Capture backends.
//!
//! A backend turns a device selector into a stream of interleaved PCM
//! chunks and feeds them to [`Ingest::process`]. Two shapes exist:
//!
//! - **push**: the driver calls back on its own thread (`portable`, cpal).
//!   `start` parks the caller until stop or device loss.
//! - **pull**: `start` runs a blocking read loop on the caller's thread
//!   (`alsa` via `arecord`, `pipewire` via `pw-record`).
//!
//! Either way `start` returns once [`Ingest::is_running`] turns false, or
//! with `DeviceLost` when the source goes away first.

pub mod alsa;
pub mod pipewire;
pub mod portable;
pub(crate) mod process;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::audio::device::DeviceInfo;
use crate::audio::StreamSpec;
use crate::engine::Ingest;
use crate::error::{Result, VoxError};

/// Capability set of an audio source.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    /// Capture devices this backend can open. Does not touch pipeline state.
    fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Resolve `device` and prepare capture at `spec`.
    fn open(&mut self, device: &str, spec: StreamSpec) -> Result<()>;

    /// Deliver audio to `ingest` until stopped or until the device is lost.
    fn start(&mut self, ingest: Ingest) -> Result<()>;

    /// Release driver handles. Idempotent.
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Cross-platform capture through cpal.
    #[default]
    Cpal,
    /// ALSA PCM devices through `arecord`.
    Alsa,
    /// PipeWire sources through `pw-record`.
    #[serde(alias = "pw")]
    PipeWire,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Cpal, BackendKind::Alsa, BackendKind::PipeWire];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Cpal => "cpal",
            BackendKind::Alsa => "alsa",
            BackendKind::PipeWire => "pipewire",
        }
    }

    /// Name used in log lines and error messages.
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::Cpal => "cpal",
            BackendKind::Alsa => "ALSA",
            BackendKind::PipeWire => "PipeWire",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = VoxError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpal" | "portaudio" | "pa" => Ok(BackendKind::Cpal),
            "alsa" => Ok(BackendKind::Alsa),
            "pipewire" | "pw" => Ok(BackendKind::PipeWire),
            other => Err(VoxError::InvalidParameter(format!(
                "unknown backend '{other}' (valid: {})",
                BackendKind::ALL
                    .iter()
                    .map(|k| k.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

pub fn create_backend(kind: BackendKind) -> Box<dyn Backend> {
    match kind {
        BackendKind::Cpal => Box::new(portable::PortableBackend::new()),
        BackendKind::Alsa => Box::new(alsa::AlsaBackend::new()),
        BackendKind::PipeWire => Box::new(pipewire::PipeWireBackend::new()),
    }
}
