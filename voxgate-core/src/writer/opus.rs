//! Opus audio in an Ogg container.
//!
//! PCM is buffered into 20 ms frames and each frame becomes one Opus packet.
//! Granule positions count 48 kHz samples whatever the input rate, and
//! include the encoder pre-skip. Each packet is held back until the next
//! one is encoded, so `close` can flag the true last packet end-of-stream
//! (padding a trailing partial frame with silence) with the granule of the
//! last real sample.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ogg::writing::{PacketWriteEndInfo, PacketWriter};
use tracing::{debug, warn};

use super::{samples_i16, whole_frames, BitrateConfig, Writer, WriterKind};
use crate::audio::{SampleFormat, StreamSpec};
use crate::error::{Result, VoxError};

/// Input rates libopus accepts.
pub const SUPPORTED_RATES: [u32; 5] = [8_000, 12_000, 16_000, 24_000, 48_000];

const FRAME_MS: u32 = 20;
const GRANULE_RATE: u64 = 48_000;
/// Upper bound for a single encoded packet.
const MAX_PACKET_BYTES: usize = 4_000;
const VENDOR: &str = "voxgate";

struct OggStream {
    packets: PacketWriter<'static, BufWriter<File>>,
    serial: u32,
    encoder: opus::Encoder,
    /// Interleaved samples waiting for a full frame.
    pending: Vec<i16>,
    /// Last encoded packet and its granule, written once its successor
    /// exists or at close with the end-of-stream flag.
    held: Option<(Vec<u8>, u64)>,
    /// Frames (per channel) handed to the encoder, padding excluded.
    frames_in: u64,
    /// Frames (per channel) covered by encoded packets.
    frames_packed: u64,
}

impl OggStream {
    fn encode_packet(&mut self, per_packet: usize, granule: u64, scratch: &mut [u8]) -> Result<()> {
        let len = self
            .encoder
            .encode(&self.pending[..per_packet], scratch)
            .map_err(opus_error)?;
        self.pending.drain(..per_packet);
        if let Some((packet, granule)) = self.held.take() {
            self.packets
                .write_packet(packet, self.serial, PacketWriteEndInfo::NormalPacket, granule)?;
        }
        self.held = Some((scratch[..len].to_vec(), granule));
        Ok(())
    }
}

pub struct OpusWriter {
    spec: StreamSpec,
    bitrate: BitrateConfig,
    /// Frames per channel in one 20 ms packet.
    frame_size: usize,
    pre_skip: u16,
    scratch: Vec<u8>,
    stream: Option<OggStream>,
}

fn opus_error(e: opus::Error) -> VoxError {
    VoxError::Encoder(format!("opus: {e}"))
}

/// Granule position after `frames` input frames.
fn granule_at(pre_skip: u16, rate: u32, frames: u64) -> u64 {
    u64::from(pre_skip) + frames * GRANULE_RATE / u64::from(rate)
}

impl OpusWriter {
    /// Validate the stream parameters by building one encoder up front.
    pub fn new(spec: StreamSpec, bitrate: BitrateConfig) -> Result<Self> {
        if spec.format != SampleFormat::S16Le {
            return Err(VoxError::unsupported_format("opus", spec.format));
        }
        if !SUPPORTED_RATES.contains(&spec.rate) {
            return Err(VoxError::UnsupportedFormat {
                writer: "opus",
                detail: format!("{} Hz sample rate", spec.rate),
            });
        }
        if !(1..=2).contains(&spec.channels) {
            return Err(VoxError::UnsupportedFormat {
                writer: "opus",
                detail: format!("{} channels", spec.channels),
            });
        }
        bitrate.validate()?;

        let mut encoder = Self::build_encoder(&spec, &bitrate)?;
        let lookahead = encoder.get_lookahead().map_err(opus_error)?;
        let pre_skip = (lookahead.max(0) as u64 * GRANULE_RATE / u64::from(spec.rate)) as u16;

        Ok(Self {
            spec,
            bitrate,
            frame_size: (spec.rate * FRAME_MS / 1000) as usize,
            pre_skip,
            scratch: vec![0; MAX_PACKET_BYTES],
            stream: None,
        })
    }

    fn build_encoder(spec: &StreamSpec, bitrate: &BitrateConfig) -> Result<opus::Encoder> {
        let channels = if spec.channels == 1 {
            opus::Channels::Mono
        } else {
            opus::Channels::Stereo
        };
        let mut encoder = opus::Encoder::new(spec.rate, channels, opus::Application::Audio)
            .map_err(opus_error)?;
        let target = bitrate.nominal.clamp(6_000, 510_000);
        encoder
            .set_bitrate(opus::Bitrate::Bits(target as i32))
            .map_err(opus_error)?;
        // min == max pins the rate; a ceiling at the target keeps VBR under it.
        encoder
            .set_vbr(!bitrate.is_constant())
            .map_err(opus_error)?;
        encoder
            .set_vbr_constraint(bitrate.max <= bitrate.nominal)
            .map_err(opus_error)?;
        Ok(encoder)
    }

    fn samples_per_packet(&self) -> usize {
        self.frame_size * usize::from(self.spec.channels)
    }

    fn write_headers(&self, stream: &mut OggStream) -> Result<()> {
        let mut head = Vec::with_capacity(19);
        head.extend_from_slice(b"OpusHead");
        head.push(1); // version
        head.push(self.spec.channels as u8);
        head.extend_from_slice(&self.pre_skip.to_le_bytes());
        head.extend_from_slice(&self.spec.rate.to_le_bytes());
        head.extend_from_slice(&0i16.to_le_bytes()); // output gain
        head.push(0); // mapping family: mono/stereo
        stream
            .packets
            .write_packet(head, stream.serial, PacketWriteEndInfo::EndPage, 0)?;

        let comment = format!("ENCODER={VENDOR} {}", env!("CARGO_PKG_VERSION"));
        let mut tags = Vec::new();
        tags.extend_from_slice(b"OpusTags");
        tags.extend_from_slice(&(VENDOR.len() as u32).to_le_bytes());
        tags.extend_from_slice(VENDOR.as_bytes());
        tags.extend_from_slice(&1u32.to_le_bytes());
        tags.extend_from_slice(&(comment.len() as u32).to_le_bytes());
        tags.extend_from_slice(comment.as_bytes());
        stream
            .packets
            .write_packet(tags, stream.serial, PacketWriteEndInfo::EndPage, 0)?;
        Ok(())
    }
}

impl Writer for OpusWriter {
    fn kind(&self) -> WriterKind {
        WriterKind::Opus
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        self.close()?;

        let file = BufWriter::new(File::create(path)?);
        let mut stream = OggStream {
            packets: PacketWriter::new(file),
            serial: rand::random(),
            encoder: Self::build_encoder(&self.spec, &self.bitrate)?,
            pending: Vec::with_capacity(self.samples_per_packet() * 2),
            held: None,
            frames_in: 0,
            frames_packed: 0,
        };
        self.write_headers(&mut stream)?;
        debug!(serial = stream.serial, pre_skip = self.pre_skip, "opus stream opened");
        self.stream = Some(stream);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let frames = whole_frames(&self.spec, data);
        let per_packet = self.samples_per_packet();
        let frame_size = self.frame_size as u64;
        let (pre_skip, rate) = (self.pre_skip, self.spec.rate);
        let Some(stream) = self.stream.as_mut() else {
            return Err(VoxError::not_open("opus"));
        };

        let bytes = &data[..frames * self.spec.frame_bytes()];
        stream
            .pending
            .extend(samples_i16(SampleFormat::S16Le, bytes));
        stream.frames_in += frames as u64;

        while stream.pending.len() >= per_packet {
            stream.frames_packed += frame_size;
            let granule = granule_at(pre_skip, rate, stream.frames_packed);
            stream.encode_packet(per_packet, granule, &mut self.scratch)?;
        }
        Ok(frames)
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        let per_packet = self.samples_per_packet();
        let end = granule_at(self.pre_skip, self.spec.rate, stream.frames_in);

        // A partial frame is padded with silence. Without one, the last real
        // packet carries the end-of-stream flag; a stream with no audio at
        // all still gets a single silent packet so it has an end.
        if !stream.pending.is_empty() || stream.held.is_none() {
            stream.pending.resize(per_packet, 0);
            stream.encode_packet(per_packet, end, &mut self.scratch)?;
        }
        if let Some((packet, _)) = stream.held.take() {
            stream
                .packets
                .write_packet(packet, stream.serial, PacketWriteEndInfo::EndStream, end)?;
        }
        let mut file = stream.packets.into_inner();
        file.flush()?;
        debug!(granule = end, "opus stream finalized");
        Ok(())
    }
}

impl Drop for OpusWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("opus writer close on drop failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(rate: u32, channels: u16) -> StreamSpec {
        StreamSpec::new(SampleFormat::S16Le, channels, rate)
    }

    #[test]
    fn rejects_u8_samples() {
        let err = OpusWriter::new(
            StreamSpec::new(SampleFormat::U8, 1, 48_000),
            BitrateConfig::default(),
        )
        .err()
        .expect("u8 must be rejected");
        assert!(matches!(err, VoxError::UnsupportedFormat { writer: "opus", .. }));
    }

    #[test]
    fn rejects_unsupported_rate_and_channels() {
        assert!(OpusWriter::new(spec(44_100, 1), BitrateConfig::default()).is_err());
        assert!(OpusWriter::new(spec(48_000, 3), BitrateConfig::default()).is_err());
    }

    #[test]
    fn encodes_a_decodable_ogg_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.opus");
        let mut writer = OpusWriter::new(spec(16_000, 1), BitrateConfig::default()).unwrap();

        writer.open(&path).unwrap();
        // 250 ms of a square wave: 12 full packets plus a 10 ms remainder.
        let pcm: Vec<u8> = (0..4_000)
            .flat_map(|i| (if i % 40 < 20 { 4_000i16 } else { -4_000 }).to_le_bytes())
            .collect();
        assert_eq!(writer.write(&pcm).unwrap(), 4_000);
        writer.close().unwrap();

        let file = std::fs::File::open(&path).unwrap();
        let mut reader = ogg::reading::PacketReader::new(file);

        let head = reader.read_packet_expected().unwrap();
        assert!(head.data.starts_with(b"OpusHead"));
        assert_eq!(head.data[9], 1);
        let tags = reader.read_packet_expected().unwrap();
        assert!(tags.data.starts_with(b"OpusTags"));

        let mut audio_packets = 0;
        let mut last = None;
        while let Some(packet) = reader.read_packet().unwrap() {
            audio_packets += 1;
            last = Some(packet);
        }
        let last = last.expect("audio packets");
        assert_eq!(audio_packets, 13);
        assert!(last.last_in_stream());
        let pre_skip = u64::from(u16::from_le_bytes([head.data[10], head.data[11]]));
        assert_eq!(last.absgp_page(), pre_skip + 4_000 * 3);
    }

    #[test]
    fn frame_aligned_input_ends_on_the_last_real_packet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aligned.opus");
        let mut writer = OpusWriter::new(spec(16_000, 1), BitrateConfig::default()).unwrap();

        writer.open(&path).unwrap();
        // Exactly ten 20 ms packets.
        let pcm: Vec<u8> = (0..3_200).flat_map(|i| ((i % 64) as i16 * 300).to_le_bytes()).collect();
        writer.write(&pcm).unwrap();
        writer.close().unwrap();

        let mut reader = ogg::reading::PacketReader::new(std::fs::File::open(&path).unwrap());
        let head = reader.read_packet_expected().unwrap();
        reader.read_packet_expected().unwrap();
        let mut packets = Vec::new();
        while let Some(packet) = reader.read_packet().unwrap() {
            packets.push(packet);
        }
        assert_eq!(packets.len(), 10);
        let last = packets.last().unwrap();
        assert!(last.last_in_stream());
        let pre_skip = u64::from(u16::from_le_bytes([head.data[10], head.data[11]]));
        assert_eq!(last.absgp_page(), pre_skip + 3_200 * 3);
    }

    #[test]
    fn write_without_open_is_an_error() {
        let mut writer = OpusWriter::new(spec(48_000, 1), BitrateConfig::default()).unwrap();
        assert!(matches!(writer.write(&[0, 0]), Err(VoxError::Encoder(_))));
    }

    #[test]
    fn close_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.opus");
        let mut writer = OpusWriter::new(spec(48_000, 2), BitrateConfig::default()).unwrap();
        writer.open(&path).unwrap();
        writer.close().unwrap();
        let size = std::fs::metadata(&path).unwrap().len();
        writer.close().unwrap();
        assert!(!writer.is_open());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size);
    }
}
