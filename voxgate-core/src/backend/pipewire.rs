//! PipeWire capture through `pw-record`.
//!
//! Sources are listed from `pw-dump`: every node whose `media.class` is
//! `Audio/Source`, addressed by `node.name`. The default source comes from
//! the `default` metadata object.

use std::collections::HashMap;
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::process::CaptureProcess;
use super::{Backend, BackendKind};
use crate::audio::device::DeviceInfo;
use crate::audio::{SampleFormat, StreamSpec};
use crate::engine::Ingest;
use crate::error::{Result, VoxError};

const PROGRAM: &str = "pw-record";
const DUMP_PROGRAM: &str = "pw-dump";
const SOURCE_CLASS: &str = "Audio/Source";
const DEFAULT_SOURCE_KEY: &str = "default.audio.source";

/// Time allowed for `pw-record` to reject a bad target.
const OPEN_GRACE: Duration = Duration::from_millis(200);

#[derive(Default)]
pub struct PipeWireBackend {
    process: Option<CaptureProcess>,
}

impl PipeWireBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn capture_command(device: &str, spec: StreamSpec) -> Command {
    let mut command = Command::new(PROGRAM);
    if !is_default_selector(device) {
        command.args(["--target", device]);
    }
    command
        .arg("--rate")
        .arg(spec.rate.to_string())
        .arg("--channels")
        .arg(spec.channels.to_string())
        .arg("--format")
        .arg(match spec.format {
            SampleFormat::U8 => "u8",
            SampleFormat::S16Le => "s16",
        })
        .arg("-");
    command
}

fn is_default_selector(device: &str) -> bool {
    device.is_empty() || device == "default"
}

#[derive(Debug, Deserialize)]
struct DumpObject {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    info: Option<NodeInfo>,
    #[serde(default)]
    props: HashMap<String, Value>,
    #[serde(default)]
    metadata: Vec<MetadataEntry>,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    #[serde(default)]
    props: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct MetadataEntry {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: Value,
}

fn prop<'a>(props: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    props.get(key).and_then(Value::as_str)
}

/// Extract capture sources from `pw-dump` JSON output.
pub fn parse_pw_dump(json: &str) -> Result<Vec<DeviceInfo>> {
    let objects: Vec<DumpObject> = serde_json::from_str(json)
        .map_err(|e| VoxError::AudioDevice(format!("unreadable {DUMP_PROGRAM} output: {e}")))?;

    let default_source = objects
        .iter()
        .filter(|o| o.kind.ends_with(":Metadata"))
        .filter(|o| prop(&o.props, "metadata.name") == Some("default"))
        .flat_map(|o| o.metadata.iter())
        .find(|entry| entry.key == DEFAULT_SOURCE_KEY)
        .and_then(|entry| default_source_name(&entry.value));

    let devices = objects
        .iter()
        .filter(|o| o.kind.ends_with(":Node"))
        .filter_map(|o| o.info.as_ref())
        .filter(|info| prop(&info.props, "media.class") == Some(SOURCE_CLASS))
        .filter_map(|info| {
            let id = prop(&info.props, "node.name")?;
            let name = prop(&info.props, "node.description")
                .or_else(|| prop(&info.props, "node.nick"))
                .unwrap_or(id);
            let mut device = DeviceInfo::new(id, name);
            device.is_default = default_source.as_deref() == Some(id);
            Some(device)
        })
        .collect();
    Ok(devices)
}

/// The metadata value is `{"name": ...}`, sometimes still JSON-encoded as a
/// string.
fn default_source_name(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_string),
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| v.get("name").and_then(Value::as_str).map(str::to_string)),
        _ => None,
    }
}

impl Backend for PipeWireBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::PipeWire
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let output = Command::new(DUMP_PROGRAM)
            .output()
            .map_err(|e| VoxError::AudioDevice(format!("{DUMP_PROGRAM}: {e}")))?;
        if !output.status.success() {
            return Err(VoxError::AudioDevice(format!(
                "{DUMP_PROGRAM} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_pw_dump(&String::from_utf8_lossy(&output.stdout))
    }

    fn open(&mut self, device: &str, spec: StreamSpec) -> Result<()> {
        self.stop();
        if !is_default_selector(device) {
            match self.list_devices() {
                Ok(devices) if !devices.iter().any(|d| d.matches(device)) => {
                    return Err(VoxError::InvalidDevice {
                        device: device.to_string(),
                        reason: "no PipeWire source with that name".into(),
                    });
                }
                Ok(_) => {}
                Err(e) => warn!("could not verify PipeWire source '{device}': {e}"),
            }
        }
        info!(device, channels = spec.channels, rate = spec.rate, "opening PipeWire capture");

        let mut process = CaptureProcess::spawn(
            BackendKind::PipeWire.label(),
            capture_command(device, spec),
        )?;
        process.ensure_running(OPEN_GRACE, device)?;
        self.process = Some(process);
        Ok(())
    }

    fn start(&mut self, ingest: Ingest) -> Result<()> {
        let process = self.process.as_mut().ok_or_else(|| {
            VoxError::AudioStream("PipeWire capture started before open".into())
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

    const DUMP: &str = r#"[
      { "id": 0, "type": "PipeWire:Interface:Core", "info": { "props": {} } },
      {
        "id": 44,
        "type": "PipeWire:Interface:Node",
        "info": { "props": {
          "media.class": "Audio/Sink",
          "node.name": "alsa_output.pci-0000_00_1f.3.analog-stereo",
          "node.description": "Built-in Audio Analog Stereo"
        } }
      },
      {
        "id": 45,
        "type": "PipeWire:Interface:Node",
        "info": { "props": {
          "media.class": "Audio/Source",
          "node.name": "alsa_input.pci-0000_00_1f.3.analog-stereo",
          "node.description": "Built-in Audio Analog Stereo"
        } }
      },
      {
        "id": 61,
        "type": "PipeWire:Interface:Node",
        "info": { "props": {
          "media.class": "Audio/Source",
          "node.name": "alsa_input.usb-Blue_Yeti-00.analog-stereo"
        } }
      },
      {
        "id": 32,
        "type": "PipeWire:Interface:Metadata",
        "props": { "metadata.name": "default" },
        "metadata": [
          { "subject": 0, "key": "default.audio.sink", "type": "Spa:String:JSON",
            "value": { "name": "alsa_output.pci-0000_00_1f.3.analog-stereo" } },
          { "subject": 0, "key": "default.audio.source", "type": "Spa:String:JSON",
            "value": { "name": "alsa_input.usb-Blue_Yeti-00.analog-stereo" } }
        ]
      }
    ]"#;

    #[test]
    fn keeps_only_audio_sources() {
        let devices = parse_pw_dump(DUMP).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "alsa_input.pci-0000_00_1f.3.analog-stereo");
        assert_eq!(devices[0].name, "Built-in Audio Analog Stereo");
        assert!(!devices[0].is_default);

        assert_eq!(devices[1].name, devices[1].id);
        assert!(devices[1].is_default);
    }

    #[test]
    fn string_encoded_default_is_understood() {
        let value = Value::String(r#"{"name":"mic"}"#.into());
        assert_eq!(default_source_name(&value).as_deref(), Some("mic"));
        assert!(default_source_name(&Value::Null).is_none());
    }

    #[test]
    fn malformed_dump_is_an_error() {
        assert!(parse_pw_dump("{ not json").is_err());
        assert!(parse_pw_dump("[]").unwrap().is_empty());
    }

    #[test]
    fn default_device_omits_target() {
        let spec = StreamSpec::new(SampleFormat::U8, 1, 8_000);
        let args: Vec<_> = capture_command("default", spec)
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            ["--rate", "8000", "--channels", "1", "--format", "u8", "-"]
        );

        let targeted: Vec<_> = capture_command("mic", spec)
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(&targeted[..2], ["--target", "mic"]);
    }
}
