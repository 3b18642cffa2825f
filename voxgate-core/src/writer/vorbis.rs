//! Ogg Vorbis output via `vorbis_rs` (libvorbis, aoTuV tuned).
//!
//! Samples are deinterleaved into planar `f32` blocks. Bit-rate mapping:
//!
//! | bounds                 | libvorbis strategy                 |
//! |------------------------|------------------------------------|
//! | `min == max`           | constrained ABR capped at nominal  |
//! | `max <= nominal`       | constrained ABR capped at `max`    |
//! | otherwise              | VBR targeting nominal              |

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::num::{NonZeroU32, NonZeroU8};
use std::path::Path;

use tracing::{debug, warn};
use vorbis_rs::{VorbisBitrateManagementStrategy, VorbisEncoder, VorbisEncoderBuilder};

use super::{samples_i16, whole_frames, BitrateConfig, Writer, WriterKind};
use crate::audio::StreamSpec;
use crate::error::{Result, VoxError};

const FULL_SCALE: f32 = 32_768.0;

pub struct VorbisWriter {
    spec: StreamSpec,
    bitrate: BitrateConfig,
    /// One sample vector per channel, reused across writes.
    planar: Vec<Vec<f32>>,
    encoder: Option<VorbisEncoder<BufWriter<File>>>,
}

fn vorbis_error(e: vorbis_rs::VorbisError) -> VoxError {
    VoxError::Encoder(format!("vorbis: {e}"))
}

fn non_zero(bps: u32) -> Result<NonZeroU32> {
    NonZeroU32::new(bps)
        .ok_or_else(|| VoxError::InvalidParameter("vorbis bitrate must be non-zero".into()))
}

fn strategy(bitrate: &BitrateConfig) -> Result<VorbisBitrateManagementStrategy> {
    Ok(if bitrate.is_constant() {
        VorbisBitrateManagementStrategy::ConstrainedAbr {
            maximum_bitrate: non_zero(bitrate.nominal)?,
        }
    } else if bitrate.max <= bitrate.nominal {
        VorbisBitrateManagementStrategy::ConstrainedAbr {
            maximum_bitrate: non_zero(bitrate.max)?,
        }
    } else {
        VorbisBitrateManagementStrategy::Vbr {
            target_bitrate: non_zero(bitrate.nominal)?,
        }
    })
}

impl VorbisWriter {
    /// Validate the stream parameters by setting up a throwaway encoder.
    pub fn new(spec: StreamSpec, bitrate: BitrateConfig) -> Result<Self> {
        if u8::try_from(spec.channels).is_err() {
            return Err(VoxError::UnsupportedFormat {
                writer: "ogg",
                detail: format!("{} channels", spec.channels),
            });
        }
        bitrate.validate()?;
        Self::build_encoder(&spec, &bitrate, io::sink())?;

        Ok(Self {
            spec,
            bitrate,
            planar: vec![Vec::new(); usize::from(spec.channels)],
            encoder: None,
        })
    }

    fn build_encoder<W: Write>(
        spec: &StreamSpec,
        bitrate: &BitrateConfig,
        sink: W,
    ) -> Result<VorbisEncoder<W>> {
        let rate = NonZeroU32::new(spec.rate)
            .ok_or_else(|| VoxError::InvalidParameter("vorbis needs a non-zero rate".into()))?;
        let channels = u8::try_from(spec.channels)
            .ok()
            .and_then(NonZeroU8::new)
            .ok_or_else(|| VoxError::UnsupportedFormat {
                writer: "ogg",
                detail: format!("{} channels", spec.channels),
            })?;

        let mut builder = VorbisEncoderBuilder::new(rate, channels, sink).map_err(vorbis_error)?;
        builder.bitrate_management_strategy(strategy(bitrate)?);
        builder.build().map_err(|e| VoxError::UnsupportedFormat {
            writer: "ogg",
            detail: format!("{} Hz x {} at these bitrates ({e})", spec.rate, spec.channels),
        })
    }
}

impl Writer for VorbisWriter {
    fn kind(&self) -> WriterKind {
        WriterKind::Vorbis
    }

    fn is_open(&self) -> bool {
        self.encoder.is_some()
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        self.close()?;
        let file = BufWriter::new(File::create(path)?);
        self.encoder = Some(Self::build_encoder(&self.spec, &self.bitrate, file)?);
        debug!(path = %path.display(), "vorbis stream opened");
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(VoxError::not_open("ogg"));
        };
        let frames = whole_frames(&self.spec, data);
        if frames == 0 {
            return Ok(0);
        }

        let channels = usize::from(self.spec.channels);
        for plane in &mut self.planar {
            plane.clear();
        }
        let bytes = &data[..frames * self.spec.frame_bytes()];
        for (i, sample) in samples_i16(self.spec.format, bytes).enumerate() {
            self.planar[i % channels].push(f32::from(sample) / FULL_SCALE);
        }

        encoder
            .encode_audio_block(&self.planar)
            .map_err(vorbis_error)?;
        Ok(frames)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(encoder) = self.encoder.take() {
            let mut file = encoder.finish().map_err(vorbis_error)?;
            file.flush()?;
            debug!("vorbis stream finalized");
        }
        Ok(())
    }
}

impl Drop for VorbisWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("vorbis writer close on drop failed: {e}");
        }
    }
}
