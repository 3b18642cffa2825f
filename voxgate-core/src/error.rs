use thiserror::Error;

use crate::audio::SampleFormat;

/// All errors produced by voxgate-core.
#[derive(Debug, Error)]
pub enum VoxError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{writer} writer does not support {detail}")]
    UnsupportedFormat {
        writer: &'static str,
        detail: String,
    },

    #[error("invalid capture device '{device}': {reason}")]
    InvalidDevice { device: String, reason: String },

    #[error("invalid output file template '{0}'")]
    InvalidTemplate(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("couldn't allocate ring buffer of {bytes} bytes")]
    Allocation { bytes: usize },

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("capture device lost: {0}")]
    DeviceLost(String),

    #[error("encoder error: {0}")]
    Encoder(String),

    #[error("recorder was already started")]
    AlreadyStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VoxError {
    pub(crate) fn unsupported_format(writer: &'static str, format: SampleFormat) -> Self {
        VoxError::UnsupportedFormat {
            writer,
            detail: format!("{format} samples"),
        }
    }

    /// Data handed to a writer that has no file open.
    pub(crate) fn not_open(writer: &'static str) -> Self {
        VoxError::Encoder(format!("{writer}: write without an open output file"))
    }

    /// True for errors raised by the capture side rather than the writer side.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            VoxError::InvalidDevice { .. }
                | VoxError::NoDefaultInputDevice
                | VoxError::AudioDevice(_)
                | VoxError::AudioStream(_)
                | VoxError::DeviceLost(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VoxError>;
