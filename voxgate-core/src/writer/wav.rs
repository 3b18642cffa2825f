//! RIFF/WAVE output via `hound`.
//!
//! U8 audio is stored as 8-bit PCM (hound takes it as `i8` and writes the
//! unsigned form), S16 as 16-bit PCM. `close` finalizes the header; a writer
//! dropped mid-file still patches the header through hound's own `Drop`, so
//! an interrupted recording stays playable.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use tracing::warn;

use super::{whole_frames, Writer, WriterKind};
use crate::audio::{SampleFormat, StreamSpec};
use crate::error::{Result, VoxError};

type HoundWriter = hound::WavWriter<BufWriter<File>>;

pub struct WavWriter {
    spec: StreamSpec,
    inner: Option<HoundWriter>,
}

impl WavWriter {
    pub fn new(spec: StreamSpec) -> Result<Self> {
        Ok(Self { spec, inner: None })
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.spec.channels,
            sample_rate: self.spec.rate,
            bits_per_sample: match self.spec.format {
                SampleFormat::U8 => 8,
                SampleFormat::S16Le => 16,
            },
            sample_format: hound::SampleFormat::Int,
        }
    }
}

fn encoder_error(e: hound::Error) -> VoxError {
    match e {
        hound::Error::IoError(io) => VoxError::Io(io),
        other => VoxError::Encoder(format!("wav: {other}")),
    }
}

impl Writer for WavWriter {
    fn kind(&self) -> WriterKind {
        WriterKind::Wav
    }

    fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        self.close()?;
        let writer = hound::WavWriter::create(path, self.wav_spec()).map_err(encoder_error)?;
        self.inner = Some(writer);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let Some(writer) = self.inner.as_mut() else {
            return Err(VoxError::not_open("wav"));
        };
        let frames = whole_frames(&self.spec, data);
        let bytes = &data[..frames * self.spec.frame_bytes()];

        match self.spec.format {
            SampleFormat::U8 => {
                for &b in bytes {
                    writer
                        .write_sample((i16::from(b) - 128) as i8)
                        .map_err(encoder_error)?;
                }
            }
            SampleFormat::S16Le => {
                for pair in bytes.chunks_exact(2) {
                    writer
                        .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                        .map_err(encoder_error)?;
                }
            }
        }
        Ok(frames)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.inner.take() {
            writer.finalize().map_err(encoder_error)?;
        }
        Ok(())
    }
}

impl Drop for WavWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("wav writer close on drop failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s16_round_trips_through_hound() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let mut writer = WavWriter::new(StreamSpec::new(SampleFormat::S16Le, 1, 16_000)).unwrap();

        writer.open(&path).unwrap();
        let samples: Vec<u8> = [-300i16, 0, 1200]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        assert_eq!(writer.write(&samples).unwrap(), 3);
        writer.close().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, vec![-300, 0, 1200]);
    }

    #[test]
    fn u8_is_stored_as_8_bit_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip8.wav");
        let mut writer = WavWriter::new(StreamSpec::new(SampleFormat::U8, 2, 8_000)).unwrap();

        writer.open(&path).unwrap();
        assert_eq!(writer.write(&[0, 128, 255, 130, 99]).unwrap(), 2);
        writer.close().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 8);
        assert_eq!(reader.spec().channels, 2);
        let read: Vec<i8> = reader.samples::<i8>().map(|s| s.unwrap()).collect();
        assert_eq!(read, vec![-128, 0, 127, 2]);
    }

    #[test]
    fn close_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twice.wav");
        let mut writer = WavWriter::new(StreamSpec::new(SampleFormat::S16Le, 1, 8_000)).unwrap();
        writer.open(&path).unwrap();
        writer.write(&[0, 1, 0, 2]).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.len(), 2);
    }

    #[test]
    fn write_without_open_is_an_error() {
        let mut writer = WavWriter::new(StreamSpec::new(SampleFormat::S16Le, 1, 8_000)).unwrap();
        let err = writer.write(&[0, 1]).unwrap_err();
        assert!(err.to_string().contains("without an open output file"));
    }
}
