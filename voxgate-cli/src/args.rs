//! CLI argument definitions using Clap

use std::path::PathBuf;

use clap::{value_parser, ArgAction, Parser};
use voxgate_core::{BackendKind, SampleFormat, WriterKind};

use crate::settings::{percent_to_db, Settings, FADEOUT_MS_RANGE, SPLIT_SECS_MAX};

/// voxgate - voice/sound activated recorder
#[derive(Parser, Debug)]
#[command(name = "voxgate")]
#[command(version)]
#[command(about = "Record audio to rotating files whenever the signal is loud enough")]
#[command(
    after_help = "The output template is a strftime(3) format string used to name output \
                  files; the writer's extension is appended. Default: rec-%d-%H:%M:%S"
)]
pub struct Cli {
    /// Audio backend: cpal, alsa, pipewire
    #[arg(short = 'B', long, value_name = "BACKEND", env = "VOXGATE_BACKEND")]
    pub backend: Option<BackendKind>,

    /// List capture devices of the selected backend and exit
    #[arg(short = 'L', long)]
    pub list_devices: bool,

    /// Capture device (backend-specific; "default" for the system default)
    #[arg(short = 'D', long, value_name = "DEV")]
    pub device: Option<String>,

    /// Sample format: u8, s16le
    #[arg(short = 'F', long = "sample-format", value_name = "FMT")]
    pub sample_format: Option<SampleFormat>,

    /// Number of channels
    #[arg(short = 'C', long, value_name = "NN", value_parser = value_parser!(u16).range(1..=32))]
    pub channels: Option<u16>,

    /// Sample rate in Hz
    #[arg(
        short = 'R',
        long,
        value_name = "NN",
        value_parser = value_parser!(u32).range(1_000..=384_000)
    )]
    pub rate: Option<u32>,

    /// Activation threshold in percent of full scale [0, 100]
    #[arg(
        short = 'l',
        long = "sig-level",
        value_name = "NN",
        value_parser = value_parser!(u8).range(0..=100),
        conflicts_with = "threshold_db"
    )]
    pub sig_level: Option<u8>,

    /// Activation threshold in dB-FS (e.g. -34)
    #[arg(long, value_name = "DB", allow_negative_numbers = true)]
    pub threshold_db: Option<f64>,

    /// Keep recording this many ms after the signal drops
    #[arg(
        short = 'f',
        long = "fadeout-lag",
        value_name = "MS",
        value_parser = value_parser!(u64).range(FADEOUT_MS_RANGE.0..=FADEOUT_MS_RANGE.1)
    )]
    pub fadeout_ms: Option<u64>,

    /// Start a new file after this many seconds without writes (0 = never)
    #[arg(
        short = 's',
        long = "split-time",
        value_name = "SECS",
        value_parser = value_parser!(u64).range(0..=SPLIT_SECS_MAX)
    )]
    pub split_secs: Option<u64>,

    /// Output format: raw, wav, mp3, ogg, opus
    #[arg(short = 'o', long = "out-format", value_name = "FMT")]
    pub out_format: Option<WriterKind>,

    /// Minimum encoder bitrate (bit/s)
    #[arg(long, value_name = "BPS")]
    pub bitrate_min: Option<u32>,

    /// Nominal encoder bitrate (bit/s)
    #[arg(long, value_name = "BPS")]
    pub bitrate: Option<u32>,

    /// Maximum encoder bitrate (bit/s)
    #[arg(long, value_name = "BPS")]
    pub bitrate_max: Option<u32>,

    /// Show the signal level meter instead of recording
    #[arg(short = 'm', long = "sig-meter")]
    pub monitor: bool,

    /// Increase verbosity (repeatable)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Settings file supplying defaults
    #[arg(long, value_name = "PATH", env = "VOXGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Save the effective settings to the settings file and exit
    #[arg(long)]
    pub write_config: bool,

    /// strftime(3) template for output file names
    #[arg(value_name = "OUTPUT_TEMPLATE")]
    pub output_template: Option<String>,
}

impl Cli {
    /// Overlay explicitly given flags on `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        let rec = &mut settings.recorder;
        if let Some(backend) = self.backend {
            rec.backend = backend;
        }
        if let Some(device) = &self.device {
            settings.device = Some(device.clone());
        }
        if let Some(format) = self.sample_format {
            rec.format = format;
        }
        if let Some(channels) = self.channels {
            rec.channels = channels;
        }
        if let Some(rate) = self.rate {
            rec.rate = rate;
        }
        if let Some(level) = self.sig_level {
            rec.threshold_db = percent_to_db(level);
        }
        if let Some(db) = self.threshold_db {
            rec.threshold_db = db;
        }
        if let Some(ms) = self.fadeout_ms {
            rec.fadeout_ms = ms;
        }
        if let Some(secs) = self.split_secs {
            rec.split_ms = secs * 1_000;
        }
        if let Some(kind) = self.out_format {
            rec.writer = kind;
        }
        if let Some(min) = self.bitrate_min {
            rec.bitrate.min = min;
        }
        if let Some(nominal) = self.bitrate {
            rec.bitrate.nominal = nominal;
        }
        if let Some(max) = self.bitrate_max {
            rec.bitrate.max = max;
        }
        if self.monitor {
            rec.monitor = true;
        }
        rec.verbose = rec.verbose.max(self.verbose);
        if let Some(template) = &self.output_template {
            rec.output_template = template.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("voxgate").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn settings_file_verbosity_survives_the_merge() {
        let mut settings = Settings::default();
        settings.recorder.verbose = 2;
        parse(&[]).apply(&mut settings);
        assert_eq!(settings.recorder.verbose, 2);

        settings.recorder.verbose = 1;
        parse(&["-vvv"]).apply(&mut settings);
        assert_eq!(settings.recorder.verbose, 3);
    }

    #[test]
    fn classic_flags_override_settings() {
        let cli = parse(&[
            "-D", "hw:1", "-C", "2", "-R", "48000", "-l", "10", "-f", "1500", "-s", "60", "-o",
            "ogg", "-vv", "take-%H%M",
        ]);
        let mut settings = Settings::default();
        cli.apply(&mut settings);

        let rec = &settings.recorder;
        assert_eq!(settings.device.as_deref(), Some("hw:1"));
        assert_eq!((rec.channels, rec.rate), (2, 48_000));
        assert!((rec.threshold_db - -20.0).abs() < 1e-9);
        assert_eq!(rec.fadeout_ms, 1_500);
        assert_eq!(rec.split_ms, 60_000);
        assert_eq!(rec.writer, WriterKind::Vorbis);
        assert_eq!(rec.verbose, 2);
        assert_eq!(rec.output_template, "take-%H%M");
    }

    #[test]
    fn absent_flags_keep_file_values() {
        let mut settings = Settings::default();
        settings.recorder.fadeout_ms = 2_000;
        settings.recorder.backend = BackendKind::Alsa;
        parse(&[]).apply(&mut settings);
        assert_eq!(settings.recorder.fadeout_ms, 2_000);
        assert_eq!(settings.recorder.backend, BackendKind::Alsa);
    }

    #[test]
    fn negative_db_threshold_is_accepted() {
        let cli = parse(&["--threshold-db", "-45.5", "-B", "pw", "-F", "u8"]);
        let mut settings = Settings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.recorder.threshold_db, -45.5);
        assert_eq!(settings.recorder.backend, BackendKind::PipeWire);
        assert_eq!(settings.recorder.format, SampleFormat::U8);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(Cli::try_parse_from(["voxgate", "-f", "50"]).is_err());
        assert!(Cli::try_parse_from(["voxgate", "-l", "101"]).is_err());
        assert!(Cli::try_parse_from(["voxgate", "-o", "mp3"]).is_err());
        assert!(Cli::try_parse_from(["voxgate", "-l", "5", "--threshold-db", "-30"]).is_err());
    }
}
