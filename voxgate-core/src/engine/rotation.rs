//! Output file rotation and naming.

use std::fmt::Display;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, TimeZone};

use crate::error::{Result, VoxError};

/// Upper bound on `-N` suffixes tried before giving up on a unique name.
const MAX_NAME_SUFFIX: u32 = 9_999;

/// When the writer thread should retire the current file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitPolicy {
    interval: Option<Duration>,
}

impl SplitPolicy {
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval: interval.filter(|d| !d.is_zero()),
        }
    }

    /// `0` disables splitting.
    pub fn from_millis(ms: u64) -> Self {
        Self::new(Some(Duration::from_millis(ms)))
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// True once more than the split interval has passed since `last_write`.
    pub fn expired(&self, last_write: Option<Instant>, now: Instant) -> bool {
        match (self.interval, last_write) {
            (Some(interval), Some(last)) => now.saturating_duration_since(last) > interval,
            _ => false,
        }
    }

    /// Time left before the split interval is reached, if splitting applies.
    pub fn remaining(&self, last_write: Option<Instant>, now: Instant) -> Option<Duration> {
        let interval = self.interval?;
        let last = last_write?;
        Some(interval.saturating_sub(now.saturating_duration_since(last)))
    }
}

/// Derives output paths from a strftime template plus the writer extension.
#[derive(Debug, Clone)]
pub struct OutputNamer {
    template: String,
    extension: &'static str,
}

impl OutputNamer {
    pub fn new(template: &str, extension: &'static str) -> Result<Self> {
        Self::validate_template(template)?;
        Ok(Self {
            template: template.to_string(),
            extension,
        })
    }

    /// Reject empty templates and unknown conversion specifiers.
    pub fn validate_template(template: &str) -> Result<()> {
        if template.trim().is_empty() {
            return Err(VoxError::InvalidTemplate(template.to_string()));
        }
        if StrftimeItems::new(template).any(|item| matches!(item, Item::Error)) {
            return Err(VoxError::InvalidTemplate(template.to_string()));
        }
        Ok(())
    }

    pub fn extension(&self) -> &'static str {
        self.extension
    }

    /// Name for a file started at `when`, without collision handling.
    pub fn path_at<Tz>(&self, when: &DateTime<Tz>) -> PathBuf
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let stem = when
            .format_with_items(StrftimeItems::new(&self.template))
            .to_string();
        PathBuf::from(format!("{stem}.{}", self.extension))
    }

    /// Name for a file started now.
    ///
    /// An existing file is never reused: `-1`, `-2`, ... is appended to the
    /// stem until the name is free. Missing parent directories are created.
    pub fn next_path(&self) -> Result<PathBuf> {
        let now = Local::now();
        let base = self.path_at(&now);
        if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if !base.exists() {
            return Ok(base);
        }

        let stem = base.with_extension("");
        for n in 1..=MAX_NAME_SUFFIX {
            let candidate = PathBuf::from(format!("{}-{n}.{}", stem.display(), self.extension));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(VoxError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free output name for {}", base.display()),
        )))
    }
}
