//! ALSA capture through `arecord`.

use std::process::Command;
use std::time::Duration;

use tracing::info;

use super::process::CaptureProcess;
use super::{Backend, BackendKind};
use crate::audio::device::DeviceInfo;
use crate::audio::{SampleFormat, StreamSpec};
use crate::engine::Ingest;
use crate::error::{Result, VoxError};

const PROGRAM: &str = "arecord";

/// Time allowed for `arecord` to reject a bad PCM name.
const OPEN_GRACE: Duration = Duration::from_millis(200);

#[derive(Default)]
pub struct AlsaBackend {
    process: Option<CaptureProcess>,
}

impl AlsaBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sample_format_arg(format: SampleFormat) -> &'static str {
    match format {
        SampleFormat::U8 => "U8",
        SampleFormat::S16Le => "S16_LE",
    }
}

pub(crate) fn capture_command(device: &str, spec: StreamSpec) -> Command {
    let mut command = Command::new(PROGRAM);
    command
        .arg("-q")
        .args(["-D", device])
        .args(["-t", "raw"])
        .args(["-f", sample_format_arg(spec.format)])
        .arg("-c")
        .arg(spec.channels.to_string())
        .arg("-r")
        .arg(spec.rate.to_string());
    command
}

/// Parse the PCM hint list printed by `arecord -L`.
///
/// Unindented lines start a device (its PCM name); the first indented line
/// after it is the display name and any further ones form the description.
pub fn parse_pcm_hints(output: &str) -> Vec<DeviceInfo> {
    let mut devices: Vec<DeviceInfo> = Vec::new();
    let mut details: Vec<&str> = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            details.push(line.trim());
        } else {
            apply_details(devices.last_mut(), &details);
            details.clear();
            let id = line.trim();
            let mut device = DeviceInfo::new(id, id);
            device.is_default = id == "default";
            devices.push(device);
        }
    }
    apply_details(devices.last_mut(), &details);
    devices
}

fn apply_details(device: Option<&mut DeviceInfo>, details: &[&str]) {
    let (Some(device), Some((name, rest))) = (device, details.split_first()) else {
        return;
    };
    device.name = (*name).to_string();
    if !rest.is_empty() {
        device.description = Some(rest.join(" "));
    }
}

impl Backend for AlsaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Alsa
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let output = Command::new(PROGRAM)
            .arg("-L")
            .output()
            .map_err(|e| VoxError::AudioDevice(format!("{PROGRAM} -L: {e}")))?;
        if !output.status.success() {
            return Err(VoxError::AudioDevice(format!(
                "{PROGRAM} -L failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_pcm_hints(&String::from_utf8_lossy(&output.stdout)))
    }

    fn open(&mut self, device: &str, spec: StreamSpec) -> Result<()> {
        self.stop();
        let device = if device.is_empty() { "default" } else { device };
        info!(device, channels = spec.channels, rate = spec.rate, "opening ALSA capture");

        let mut process = CaptureProcess::spawn(
            BackendKind::Alsa.label(),
            capture_command(device, spec),
        )?;
        process.ensure_running(OPEN_GRACE, device)?;
        self.process = Some(process);
        Ok(())
    }

    fn start(&mut self, ingest: Ingest) -> Result<()> {
        let process = self.process.as_mut().ok_or_else(|| {
            VoxError::AudioStream("ALSA capture started before open".into())
        })?;
        process.pump(&ingest)
    }

    fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HINTS: &str = "\
null
    Discard all samples (playback) or generate zero samples (capture)
default
    Playback/recording through the PulseAudio sound server
hw:CARD=PCH,DEV=0
    HDA Intel PCH, ALC3246 Analog
    Direct hardware device without any conversions
dsnoop:CARD=PCH,DEV=0
";

    #[test]
    fn parses_arecord_hint_list() {
        let devices = parse_pcm_hints(HINTS);
        assert_eq!(devices.len(), 4);

        assert_eq!(devices[0].id, "null");
        assert!(devices[0].name.starts_with("Discard all samples"));
        assert!(devices[0].description.is_none());

        assert!(devices[1].is_default);
        assert_eq!(devices.iter().filter(|d| d.is_default).count(), 1);

        let hw = &devices[2];
        assert_eq!(hw.id, "hw:CARD=PCH,DEV=0");
        assert_eq!(hw.name, "HDA Intel PCH, ALC3246 Analog");
        assert_eq!(
            hw.description.as_deref(),
            Some("Direct hardware device without any conversions")
        );

        assert_eq!(devices[3].name, devices[3].id);
    }

    #[test]
    fn empty_output_has_no_devices() {
        assert!(parse_pcm_hints("\n\n").is_empty());
    }

    #[test]
    fn command_line_matches_stream_spec() {
        let command = capture_command("hw:1", StreamSpec::new(SampleFormat::S16Le, 2, 48_000));
        let args: Vec<_> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            ["-q", "-D", "hw:1", "-t", "raw", "-f", "S16_LE", "-c", "2", "-r", "48000"]
        );
    }

    #[test]
    fn start_without_open_fails() {
        use crate::buffering::RingBuffer;
        use crate::engine::pipeline::Shared;
        use crate::engine::RecorderConfig;
        use crate::vad::EnergyGate;
        use std::sync::Arc;

        let config = RecorderConfig::default();
        let ring = RingBuffer::new(16, 2).unwrap();
        let gate = EnergyGate::new(config.threshold_db, config.fadeout());
        let shared = Arc::new(Shared::new(&config, ring, Box::new(gate)));

        let mut backend = AlsaBackend::new();
        assert!(backend.start(Ingest::new(shared)).is_err());
        backend.stop();
    }
}
