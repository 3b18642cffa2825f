//! Capture device descriptions shared by every backend.

use serde::{Deserialize, Serialize};

/// Metadata about a capture device, as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Identifier accepted by `Backend::open` (name, index, or PCM string).
    pub id: String,
    /// Human-readable device name.
    pub name: String,
    /// Longer description, when the backend provides one.
    pub description: Option<String>,
    /// Whether this is the backend's default input.
    pub is_default: bool,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            is_default: false,
        }
    }

    /// True when `selector` names this device by id or by name.
    pub fn matches(&self, selector: &str) -> bool {
        self.id == selector || self.name == selector
    }
}

/// Render a device list the way `--list-devices` prints it.
pub fn format_device_list(devices: &[DeviceInfo]) -> String {
    let mut out = String::new();
    for device in devices {
        let marker = if device.is_default { '*' } else { ' ' };
        out.push_str(&format!("{marker} {}", device.id));
        if device.name != device.id {
            out.push_str(&format!(" ({})", device.name));
        }
        if let Some(desc) = &device.description {
            out.push_str(&format!(" - {desc}"));
        }
        out.push('\n');
    }
    out
}
