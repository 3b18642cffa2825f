//! MPEG Layer III output via LAME (`mp3lame-encoder`).
//!
//! `min == max` encodes at that constant rate, rounded down to the nearest
//! MPEG bit-rate. Otherwise LAME runs in VBR mode with a quality chosen from
//! the nominal rate. A fresh encoder backs every file and `close` flushes
//! the padded final frames.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use mp3lame_encoder::{Bitrate, Builder, Encoder, FlushGap, InterleavedPcm, MonoPcm, Quality, VbrMode};
use tracing::{debug, warn};

use super::{samples_i16, whole_frames, BitrateConfig, Writer, WriterKind};
use crate::audio::StreamSpec;
use crate::error::{Result, VoxError};

/// Input rates LAME encodes without resampling.
pub const SUPPORTED_RATES: [u32; 9] = [
    8_000, 11_025, 12_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000,
];

/// Worst-case size of LAME's final flush.
const FLUSH_BYTES: usize = 7_200;

/// MPEG bit-rates in kbit/s.
const BITRATES_KBPS: [u32; 16] = [8, 16, 24, 32, 40, 48, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];

struct Mp3Stream {
    file: BufWriter<File>,
    encoder: Encoder,
}

pub struct Mp3Writer {
    spec: StreamSpec,
    bitrate: BitrateConfig,
    samples: Vec<i16>,
    encoded: Vec<u8>,
    stream: Option<Mp3Stream>,
}

fn lame_error(stage: &str, e: impl fmt::Debug) -> VoxError {
    VoxError::Encoder(format!("lame {stage}: {e:?}"))
}

/// Largest MPEG bit-rate not above `bps`, in kbit/s.
fn constant_kbps(bps: u32) -> u32 {
    let kbps = bps / 1_000;
    BITRATES_KBPS
        .iter()
        .rev()
        .copied()
        .find(|k| *k <= kbps)
        .unwrap_or(BITRATES_KBPS[0])
}

fn bitrate_for(kbps: u32) -> Bitrate {
    match kbps {
        320 => Bitrate::Kbps320,
        256 => Bitrate::Kbps256,
        224 => Bitrate::Kbps224,
        192 => Bitrate::Kbps192,
        160 => Bitrate::Kbps160,
        128 => Bitrate::Kbps128,
        112 => Bitrate::Kbps112,
        96 => Bitrate::Kbps96,
        80 => Bitrate::Kbps80,
        64 => Bitrate::Kbps64,
        48 => Bitrate::Kbps48,
        40 => Bitrate::Kbps40,
        32 => Bitrate::Kbps32,
        24 => Bitrate::Kbps24,
        16 => Bitrate::Kbps16,
        _ => Bitrate::Kbps8,
    }
}

fn vbr_quality(nominal: u32) -> Quality {
    match nominal / 1_000 {
        192.. => Quality::Best,
        128..=191 => Quality::VeryNice,
        96..=127 => Quality::Good,
        64..=95 => Quality::Decent,
        _ => Quality::Worst,
    }
}

impl Mp3Writer {
    /// Validate the stream parameters by building one encoder up front.
    pub fn new(spec: StreamSpec, bitrate: BitrateConfig) -> Result<Self> {
        if !SUPPORTED_RATES.contains(&spec.rate) {
            return Err(VoxError::UnsupportedFormat {
                writer: "mp3",
                detail: format!("{} Hz sample rate", spec.rate),
            });
        }
        if !(1..=2).contains(&spec.channels) {
            return Err(VoxError::UnsupportedFormat {
                writer: "mp3",
                detail: format!("{} channels", spec.channels),
            });
        }
        bitrate.validate()?;
        Self::build_encoder(&spec, &bitrate)?;

        Ok(Self {
            spec,
            bitrate,
            samples: Vec::new(),
            encoded: Vec::new(),
            stream: None,
        })
    }

    fn build_encoder(spec: &StreamSpec, bitrate: &BitrateConfig) -> Result<Encoder> {
        let mut builder = Builder::new()
            .ok_or_else(|| VoxError::Encoder("lame: could not allocate encoder".into()))?;
        builder
            .set_num_channels(spec.channels as u8)
            .map_err(|e| lame_error("channels", e))?;
        builder
            .set_sample_rate(spec.rate)
            .map_err(|e| lame_error("sample rate", e))?;
        if bitrate.is_constant() {
            builder
                .set_brate(bitrate_for(constant_kbps(bitrate.nominal)))
                .map_err(|e| lame_error("bitrate", e))?;
        } else {
            builder
                .set_vbr_mode(VbrMode::Mtrh)
                .map_err(|e| lame_error("vbr mode", e))?;
            builder
                .set_vbr_quality(vbr_quality(bitrate.nominal))
                .map_err(|e| lame_error("vbr quality", e))?;
        }
        builder
            .set_quality(Quality::Good)
            .map_err(|e| lame_error("quality", e))?;
        builder.build().map_err(|e| lame_error("init", e))
    }
}

impl Writer for Mp3Writer {
    fn kind(&self) -> WriterKind {
        WriterKind::Mp3
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        self.close()?;
        let file = BufWriter::new(File::create(path)?);
        let encoder = Self::build_encoder(&self.spec, &self.bitrate)?;
        self.stream = Some(Mp3Stream { file, encoder });
        debug!(path = %path.display(), "mp3 stream opened");
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(VoxError::not_open("mp3"));
        };
        let frames = whole_frames(&self.spec, data);
        if frames == 0 {
            return Ok(0);
        }

        let bytes = &data[..frames * self.spec.frame_bytes()];
        self.samples.clear();
        self.samples.extend(samples_i16(self.spec.format, bytes));
        self.encoded.clear();
        self.encoded
            .reserve(mp3lame_encoder::max_required_buffer_size(frames));

        let encoded = if self.spec.channels == 1 {
            stream
                .encoder
                .encode_to_vec(MonoPcm(&self.samples), &mut self.encoded)
        } else {
            stream
                .encoder
                .encode_to_vec(InterleavedPcm(&self.samples), &mut self.encoded)
        };
        encoded.map_err(|e| lame_error("encode", e))?;
        stream.file.write_all(&self.encoded)?;
        Ok(frames)
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        self.encoded.clear();
        self.encoded.reserve(FLUSH_BYTES);
        stream
            .encoder
            .flush_to_vec::<FlushGap>(&mut self.encoded)
            .map_err(|e| lame_error("flush", e))?;
        stream.file.write_all(&self.encoded)?;
        stream.file.flush()?;
        debug!("mp3 stream finalized");
        Ok(())
    }
}

impl Drop for Mp3Writer {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("mp3 writer close on drop failed: {e}");
        }
    }
}
