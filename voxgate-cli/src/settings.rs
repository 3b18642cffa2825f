//! Optional defaults file (JSON), read once per run.
//!
//! Flags given on the command line override whatever the file says. The
//! file is only written on `--write-config`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use voxgate_core::engine::DEFAULT_OUTPUT_TEMPLATE;
use voxgate_core::RecorderConfig;

pub const FADEOUT_MS_RANGE: (u64, u64) = (100, 1_000_000);
pub const SPLIT_SECS_MAX: u64 = 1_000_000;
const MAX_CHANNELS: u16 = 32;
const RATE_RANGE: (u32, u32) = (1_000, 384_000);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Settings {
    /// Backend-specific capture device; `None` means the default input.
    pub device: Option<String>,
    #[serde(flatten)]
    pub recorder: RecorderConfig,
}

impl Settings {
    pub fn normalize(&mut self) {
        let rec = &mut self.recorder;
        rec.channels = rec.channels.clamp(1, MAX_CHANNELS);
        rec.rate = rec.rate.clamp(RATE_RANGE.0, RATE_RANGE.1);
        rec.threshold_db = if rec.threshold_db.is_finite() {
            rec.threshold_db.clamp(-96.0, 0.0)
        } else {
            RecorderConfig::default().threshold_db
        };
        rec.fadeout_ms = rec.fadeout_ms.clamp(FADEOUT_MS_RANGE.0, FADEOUT_MS_RANGE.1);
        rec.split_ms = rec.split_ms.min(SPLIT_SECS_MAX * 1_000);

        let template = rec.output_template.trim();
        rec.output_template = if template.is_empty() {
            DEFAULT_OUTPUT_TEMPLATE.into()
        } else {
            template.to_string()
        };

        let b = &mut rec.bitrate;
        let mut sorted = [b.min.max(1), b.nominal.max(1), b.max.max(1)];
        sorted.sort_unstable();
        [b.min, b.nominal, b.max] = sorted;

        self.device = self
            .device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }
}

/// Convert the classic `--sig-level` percentage of full scale to dB-FS.
pub fn percent_to_db(percent: u8) -> f64 {
    if percent == 0 {
        return -96.0;
    }
    (20.0 * (f64::from(percent.min(100)) / 100.0).log10()).max(-96.0)
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voxgate")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("voxgate")
            .join("settings.json")
    }
}

/// Load and normalize settings.
///
/// A missing file yields defaults. A malformed one yields defaults plus the
/// parse error, which the caller reports once logging is set up from the
/// merged verbosity.
pub fn load_settings(path: &Path) -> (Settings, Option<serde_json::Error>) {
    let (mut settings, problem) = match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<Settings>(&raw) {
            Ok(settings) => (settings, None),
            Err(e) => (Settings::default(), Some(e)),
        },
        Err(_) => (Settings::default(), None),
    };
    settings.normalize();
    (settings, problem)
}

pub fn save_settings(path: &Path, settings: &Settings) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}
