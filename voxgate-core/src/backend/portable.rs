//! Cross-platform capture through cpal.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), so the stream is built, played, and dropped inside
//! [`Backend::start`] on the caller's thread. `open` only resolves and
//! checks the device.
//!
//! The input callback runs on the driver's thread. It converts samples to
//! little-endian bytes in a reused buffer and hands them to
//! [`Ingest::process`], which never waits for space.

use super::{Backend, BackendKind};
use crate::audio::device::DeviceInfo;
use crate::audio::StreamSpec;
use crate::engine::Ingest;
use crate::error::{Result, VoxError};

#[cfg(feature = "audio-cpal")]
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
#[cfg(feature = "audio-cpal")]
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use std::time::Duration;
#[cfg(feature = "audio-cpal")]
use tracing::{info, warn};

/// How often the parked caller checks for stop and device loss.
#[cfg(feature = "audio-cpal")]
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
pub struct PortableBackend {
    selector: Option<String>,
    spec: Option<StreamSpec>,
}

impl PortableBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `"default"` (or empty) is the host default input, a number is an index
/// into the input device list, anything else must match a device name.
#[cfg(feature = "audio-cpal")]
fn resolve_device(host: &cpal::Host, selector: &str) -> Result<cpal::Device> {
    if selector.is_empty() || selector == "default" {
        return host
            .default_input_device()
            .ok_or(VoxError::NoDefaultInputDevice);
    }

    let mut devices = host
        .input_devices()
        .map_err(|e| VoxError::AudioDevice(e.to_string()))?;
    let found = match selector.parse::<usize>() {
        Ok(index) => devices.nth(index),
        Err(_) => devices.find(|device| {
            device
                .name()
                .map(|name| name == selector)
                .unwrap_or(false)
        }),
    };
    found.ok_or_else(|| VoxError::InvalidDevice {
        device: selector.to_string(),
        reason: "no such input device".into(),
    })
}

#[cfg(feature = "audio-cpal")]
impl Backend for PortableBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpal
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host
            .default_input_device()
            .and_then(|device| device.name().ok());
        let devices = host
            .input_devices()
            .map_err(|e| VoxError::AudioDevice(e.to_string()))?;

        Ok(devices
            .enumerate()
            .map(|(index, device)| {
                let name = device.name().unwrap_or_else(|_| format!("input {index}"));
                let mut info = DeviceInfo::new(index.to_string(), name);
                info.is_default = default_name.as_deref() == Some(info.name.as_str());
                info
            })
            .collect())
    }

    fn open(&mut self, device: &str, spec: StreamSpec) -> Result<()> {
        let host = cpal::default_host();
        let resolved = resolve_device(&host, device)?;
        info!(
            device = resolved.name().unwrap_or_default().as_str(),
            channels = spec.channels,
            rate = spec.rate,
            "opening cpal capture"
        );
        self.selector = Some(device.to_string());
        self.spec = Some(spec);
        Ok(())
    }

    fn start(&mut self, ingest: Ingest) -> Result<()> {
        let (Some(selector), Some(spec)) = (self.selector.as_deref(), self.spec) else {
            return Err(VoxError::AudioStream("cpal capture started before open".into()));
        };

        let host = cpal::default_host();
        let device = resolve_device(&host, selector)?;
        let config = cpal::StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let lost = Arc::new(AtomicBool::new(false));
        let on_error = {
            let lost = Arc::clone(&lost);
            move |err: cpal::StreamError| match err {
                cpal::StreamError::DeviceNotAvailable => {
                    lost.store(true, Ordering::Release);
                }
                other => warn!("transient audio stream error: {other}"),
            }
        };

        let stream = match spec.format {
            crate::audio::SampleFormat::U8 => {
                let ingest = ingest.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[u8], _info: &cpal::InputCallbackInfo| {
                        if ingest.is_running() {
                            ingest.process(data);
                        }
                    },
                    on_error,
                    None,
                )
            }
            crate::audio::SampleFormat::S16Le => {
                let ingest = ingest.clone();
                let mut bytes: Vec<u8> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info: &cpal::InputCallbackInfo| {
                        if !ingest.is_running() {
                            return;
                        }
                        bytes.clear();
                        bytes.extend(data.iter().flat_map(|s| s.to_le_bytes()));
                        ingest.process(&bytes);
                    },
                    on_error,
                    None,
                )
            }
        }
        .map_err(|e| VoxError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| VoxError::AudioStream(e.to_string()))?;
        info!("cpal capture running");

        while ingest.is_running() && !lost.load(Ordering::Acquire) {
            std::thread::sleep(POLL_INTERVAL);
        }
        drop(stream);

        if lost.load(Ordering::Acquire) {
            return Err(VoxError::DeviceLost(format!(
                "input device '{selector}' is no longer available"
            )));
        }
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl Backend for PortableBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpal
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Err(VoxError::AudioDevice("compiled without audio-cpal feature".into()))
    }

    fn open(&mut self, _device: &str, _spec: StreamSpec) -> Result<()> {
        Err(VoxError::AudioDevice("compiled without audio-cpal feature".into()))
    }

    fn start(&mut self, _ingest: Ingest) -> Result<()> {
        Err(VoxError::AudioDevice("compiled without audio-cpal feature".into()))
    }

    fn stop(&mut self) {}
}
