//! PCM sample formats and loudness measurement.
//!
//! Captured audio travels through the pipeline as interleaved little-endian
//! bytes. `SampleFormat` knows how wide one sample is and how to turn a
//! chunk of them into an RMS level in dB-FS; `StreamSpec` bundles the format
//! with the channel count and rate fixed for one recorder.

pub mod device;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VoxError;

/// Level reported for digital silence (and for empty chunks).
pub const SILENCE_FLOOR_DB: f64 = -96.0;

/// Supported PCM sample encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// 8-bit unsigned, silence at 128.
    U8,
    /// 16-bit signed little-endian.
    #[default]
    S16Le,
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 2] = [SampleFormat::U8, SampleFormat::S16Le];

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16Le => "s16le",
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16Le => 2,
        }
    }

    /// Number of whole samples contained in `bytes`.
    pub fn samples_in(self, bytes: &[u8]) -> usize {
        bytes.len() / self.bytes_per_sample()
    }

    /// RMS level of `bytes` in dB relative to full scale.
    ///
    /// Samples are scaled by the positive peak of their signed range
    /// (127 for U8 around its 128 midpoint, 32767 for S16). Trailing bytes
    /// that do not form a whole sample are ignored. The result is clamped
    /// between [`SILENCE_FLOOR_DB`] and 0 dB, never NaN or -inf.
    pub fn rms_db(self, bytes: &[u8]) -> f64 {
        let samples = self.samples_in(bytes);
        if samples == 0 {
            return SILENCE_FLOOR_DB;
        }

        let sum_sq: f64 = match self {
            SampleFormat::U8 => bytes[..samples]
                .iter()
                .map(|&b| {
                    let x = (f64::from(b) - 128.0) / f64::from(i8::MAX);
                    x * x
                })
                .sum(),
            SampleFormat::S16Le => bytes[..samples * 2]
                .chunks_exact(2)
                .map(|pair| {
                    let x = f64::from(i16::from_le_bytes([pair[0], pair[1]]))
                        / f64::from(i16::MAX);
                    x * x
                })
                .sum(),
        };

        let rms = (sum_sq / samples as f64).sqrt();
        if rms <= 0.0 {
            return SILENCE_FLOOR_DB;
        }
        (20.0 * rms.log10()).clamp(SILENCE_FLOOR_DB, 0.0)
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleFormat {
    type Err = VoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "u8" => Ok(SampleFormat::U8),
            "s16le" | "s16_le" | "s16" => Ok(SampleFormat::S16Le),
            other => Err(VoxError::InvalidParameter(format!(
                "unknown sample format '{other}' (valid: u8, s16le)"
            ))),
        }
    }
}

/// Immutable description of the PCM stream a recorder captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpec {
    pub format: SampleFormat,
    pub channels: u16,
    pub rate: u32,
}

impl StreamSpec {
    pub fn new(format: SampleFormat, channels: u16, rate: u32) -> Self {
        Self {
            format,
            channels,
            rate,
        }
    }

    /// Bytes in one interleaved frame (one sample per channel).
    pub fn frame_bytes(&self) -> usize {
        self.format.bytes_per_sample() * usize::from(self.channels)
    }

    /// Frames in one 100 ms read period.
    pub fn period_frames(&self) -> usize {
        (self.rate / 10).max(1) as usize
    }

    pub fn period_bytes(&self) -> usize {
        self.period_frames() * self.frame_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn s16_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn u8_rms_matches_reference_level() {
        let data: Vec<u8> = (1..=8).map(|i| i * 10).collect();
        assert_abs_diff_eq!(SampleFormat::U8.rms_db(&data), -3.38, epsilon = 0.01);
    }

    #[test]
    fn s16_rms_matches_reference_level() {
        let data = s16_bytes(&[1000, 2000, 3000, 4000, 5000, 6000, 7000, 8000]);
        assert_abs_diff_eq!(SampleFormat::S16Le.rms_db(&data), -16.24, epsilon = 0.01);
    }

    #[test]
    fn silence_yields_floor_not_nan() {
        let zeros = s16_bytes(&[0; 64]);
        let level = SampleFormat::S16Le.rms_db(&zeros);
        assert!(!level.is_nan());
        assert_eq!(level, SILENCE_FLOOR_DB);

        let centered = vec![128u8; 64];
        assert_eq!(SampleFormat::U8.rms_db(&centered), SILENCE_FLOOR_DB);
        assert_eq!(SampleFormat::S16Le.rms_db(&[]), SILENCE_FLOOR_DB);
    }

    #[test]
    fn full_scale_is_clamped_to_zero() {
        let data = s16_bytes(&[i16::MIN; 16]);
        assert_abs_diff_eq!(SampleFormat::S16Le.rms_db(&data), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn trailing_partial_sample_is_ignored() {
        let mut data = s16_bytes(&[1000; 4]);
        let whole = SampleFormat::S16Le.rms_db(&data);
        data.push(0xff);
        assert_eq!(SampleFormat::S16Le.rms_db(&data), whole);
    }

    #[test]
    fn format_names_round_trip_through_from_str() {
        for format in SampleFormat::ALL {
            assert_eq!(format.name().parse::<SampleFormat>().unwrap(), format);
        }
        assert_eq!("S16_LE".parse::<SampleFormat>().unwrap(), SampleFormat::S16Le);
        assert!("f32".parse::<SampleFormat>().is_err());
    }

    #[test]
    fn stream_spec_derives_period_geometry() {
        let spec = StreamSpec::new(SampleFormat::S16Le, 2, 44_100);
        assert_eq!(spec.frame_bytes(), 4);
        assert_eq!(spec.period_frames(), 4_410);
        assert_eq!(spec.period_bytes(), 17_640);
    }
}
