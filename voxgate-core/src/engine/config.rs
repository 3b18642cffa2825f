//! Immutable recorder configuration.
//!
//! Built once by the host (CLI flags, settings file) and cloned into both
//! execution contexts when the recorder is constructed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::rotation::{OutputNamer, SplitPolicy};
use crate::audio::{SampleFormat, StreamSpec};
use crate::backend::BackendKind;
use crate::error::{Result, VoxError};
use crate::writer::{BitrateConfig, EncoderOptions, WriterKind};

/// Default output name template (strftime syntax, extension appended).
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "rec-%d-%H:%M:%S";

/// Configuration for [`Recorder`](super::Recorder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct RecorderConfig {
    pub format: SampleFormat,
    pub channels: u16,
    /// Sample rate in Hz. Default: 44100.
    pub rate: u32,
    /// Activation level in dB-FS. Default: -34 (2 % of full scale).
    pub threshold_db: f64,
    /// Recording continues this long after the last loud chunk. Default: 500.
    pub fadeout_ms: u64,
    /// Start a new file after this much time without writes. 0 disables.
    pub split_ms: u64,
    pub output_template: String,
    /// Report levels only; no files are written.
    pub monitor: bool,
    /// 0 = quiet, 1 = report overruns and file changes, 2+ = chatty.
    pub verbose: u8,
    pub backend: BackendKind,
    pub writer: WriterKind,
    pub bitrate: BitrateConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            format: SampleFormat::S16Le,
            channels: 1,
            rate: 44_100,
            threshold_db: -34.0,
            fadeout_ms: 500,
            split_ms: 0,
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            monitor: false,
            verbose: 0,
            backend: BackendKind::default(),
            writer: WriterKind::default(),
            bitrate: BitrateConfig::default(),
        }
    }
}

impl RecorderConfig {
    pub fn stream_spec(&self) -> StreamSpec {
        StreamSpec::new(self.format, self.channels, self.rate)
    }

    pub fn fadeout(&self) -> Duration {
        Duration::from_millis(self.fadeout_ms)
    }

    pub fn split_policy(&self) -> SplitPolicy {
        SplitPolicy::from_millis(self.split_ms)
    }

    pub fn encoder_options(&self) -> EncoderOptions {
        EncoderOptions {
            bitrate: self.bitrate,
        }
    }

    /// Reject values no pipeline could run with.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(VoxError::InvalidParameter("channels must be at least 1".into()));
        }
        if self.rate == 0 {
            return Err(VoxError::InvalidParameter("sample rate must be positive".into()));
        }
        if !self.threshold_db.is_finite() {
            return Err(VoxError::InvalidParameter(format!(
                "activation threshold must be finite (got {})",
                self.threshold_db
            )));
        }
        OutputNamer::validate_template(&self.output_template)?;
        self.bitrate.validate()?;
        Ok(())
    }
}
