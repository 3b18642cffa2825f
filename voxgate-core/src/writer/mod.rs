//! Output writers (encoder sinks).
//!
//! A `Writer` turns interleaved PCM bytes into one output file at a time.
//! Instances are reusable: `open` → `write`* → `close` → `open` again. The
//! recorder owns exactly one writer and only ever drives it from the writer
//! thread.
//!
//! Format support is checked by [`create_writer`], never at write time.

pub mod raw;
pub mod wav;

#[cfg(feature = "mp3")]
pub mod mp3;
#[cfg(feature = "opus")]
pub mod opus;
#[cfg(feature = "vorbis")]
pub mod vorbis;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::audio::{SampleFormat, StreamSpec};
use crate::error::{Result, VoxError};

/// Capability set of an output encoder.
pub trait Writer: Send {
    fn kind(&self) -> WriterKind;

    /// Canonical file extension, without the dot.
    fn extension(&self) -> &'static str {
        self.kind().extension()
    }

    fn is_open(&self) -> bool;

    /// Start a new output file. Any open stream is closed first.
    fn open(&mut self, path: &Path) -> Result<()>;

    /// Append interleaved samples. Returns the number of whole frames
    /// consumed; a trailing partial frame is ignored.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Finalize the current file. Closing a closed writer is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// Available writer variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterKind {
    /// Headerless PCM passthrough.
    Raw,
    /// RIFF/WAVE container.
    #[default]
    Wav,
    /// MPEG Layer III through LAME.
    Mp3,
    /// Vorbis in an Ogg container.
    #[serde(alias = "ogg")]
    Vorbis,
    /// Opus in an Ogg container.
    Opus,
}

impl WriterKind {
    pub const ALL: [WriterKind; 5] = [
        WriterKind::Raw,
        WriterKind::Wav,
        WriterKind::Mp3,
        WriterKind::Vorbis,
        WriterKind::Opus,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            WriterKind::Raw => "raw",
            WriterKind::Wav => "wav",
            WriterKind::Mp3 => "mp3",
            WriterKind::Vorbis => "ogg",
            WriterKind::Opus => "opus",
        }
    }

    fn valid_options() -> String {
        Self::ALL
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for WriterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for WriterKind {
    type Err = VoxError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "pcm" => Ok(WriterKind::Raw),
            "wav" | "wave" => Ok(WriterKind::Wav),
            "mp3" | "lame" => Ok(WriterKind::Mp3),
            "ogg" | "vorbis" => Ok(WriterKind::Vorbis),
            "opus" => Ok(WriterKind::Opus),
            other => Err(VoxError::InvalidParameter(format!(
                "unknown output format '{other}' (valid: {})",
                Self::valid_options()
            ))),
        }
    }
}

/// Bit-rate bounds in bits per second. `min == max` asks for a constant
/// rate; otherwise encoders run variable rate around `nominal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct BitrateConfig {
    pub min: u32,
    pub nominal: u32,
    pub max: u32,
}

impl Default for BitrateConfig {
    fn default() -> Self {
        Self {
            min: 32_000,
            nominal: 64_000,
            max: 128_000,
        }
    }
}

impl BitrateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min == 0 || self.min > self.nominal || self.nominal > self.max {
            return Err(VoxError::InvalidParameter(format!(
                "bitrates must satisfy 0 < min <= nominal <= max (got {}/{}/{})",
                self.min, self.nominal, self.max
            )));
        }
        Ok(())
    }

    pub fn is_constant(&self) -> bool {
        self.min == self.max
    }
}

/// Encoder settings that are not part of the PCM stream itself.
#[derive(Debug, Clone, Default)]
pub struct EncoderOptions {
    pub bitrate: BitrateConfig,
}

/// Build a writer for `spec`, rejecting formats the variant cannot encode.
pub fn create_writer(
    kind: WriterKind,
    spec: StreamSpec,
    options: &EncoderOptions,
) -> Result<Box<dyn Writer>> {
    if spec.channels == 0 || spec.rate == 0 {
        return Err(VoxError::InvalidParameter(format!(
            "writer needs non-zero channels and rate (got {} ch @ {} Hz)",
            spec.channels, spec.rate
        )));
    }

    let bitrate = options.bitrate;
    match kind {
        WriterKind::Raw => Ok(Box::new(raw::RawWriter::new(spec))),
        WriterKind::Wav => Ok(Box::new(wav::WavWriter::new(spec)?)),
        #[cfg(feature = "mp3")]
        WriterKind::Mp3 => Ok(Box::new(mp3::Mp3Writer::new(spec, bitrate)?)),
        #[cfg(feature = "vorbis")]
        WriterKind::Vorbis => Ok(Box::new(vorbis::VorbisWriter::new(spec, bitrate)?)),
        #[cfg(feature = "opus")]
        WriterKind::Opus => Ok(Box::new(opus::OpusWriter::new(spec, bitrate)?)),
        #[allow(unreachable_patterns)]
        other => {
            let _ = bitrate;
            Err(VoxError::UnsupportedFormat {
                writer: other.extension(),
                detail: format!("this build (compiled without the {} feature)", other.feature()),
            })
        }
    }
}

impl WriterKind {
    /// Cargo feature that compiles this writer in.
    fn feature(self) -> &'static str {
        match self {
            WriterKind::Raw | WriterKind::Wav => "default",
            WriterKind::Mp3 => "mp3",
            WriterKind::Vorbis => "vorbis",
            WriterKind::Opus => "opus",
        }
    }
}

/// Whole interleaved frames contained in `data`.
pub(crate) fn whole_frames(spec: &StreamSpec, data: &[u8]) -> usize {
    data.len() / spec.frame_bytes()
}

/// Samples of `bytes` widened to signed 16 bit.
#[cfg_attr(
    not(any(feature = "mp3", feature = "opus", feature = "vorbis")),
    allow(dead_code)
)]
pub(crate) fn samples_i16(format: SampleFormat, bytes: &[u8]) -> impl Iterator<Item = i16> + '_ {
    let width = format.bytes_per_sample();
    bytes.chunks_exact(width).map(move |s| match format {
        SampleFormat::U8 => (i16::from(s[0]) - 128) << 8,
        SampleFormat::S16Le => i16::from_le_bytes([s[0], s[1]]),
    })
}
