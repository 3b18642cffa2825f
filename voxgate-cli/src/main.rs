//! voxgate command-line entry point.
//!
//! ## Runtime note
//!
//! `Recorder::start` blocks until capture ends, so it runs under
//! `spawn_blocking`. Signal handling and the level meter are ordinary async
//! tasks on the same runtime; they talk to the recorder only through its
//! `StopHandle` and level broadcast.

mod args;
mod settings;

use std::io::Write;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use voxgate_core::{create_backend, format_device_list, LevelEvent, Recorder, StopHandle};

use args::Cli;
use settings::{default_settings_path, load_settings, save_settings};

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "voxgate=info",
        1 => "voxgate=debug",
        _ => "voxgate=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings_path = cli.config.clone().unwrap_or_else(default_settings_path);
    let (mut settings, problem) = load_settings(&settings_path);
    cli.apply(&mut settings);

    // After the merge, so a settings-file verbosity counts too.
    init_tracing(settings.recorder.verbose);
    if let Some(e) = problem {
        warn!(path = %settings_path.display(), "ignoring malformed settings file: {e}");
    }

    if cli.write_config {
        save_settings(&settings_path, &settings)?;
        println!("settings written to {}", settings_path.display());
        return Ok(());
    }

    let config = settings.recorder.clone();
    if cli.list_devices {
        let backend = create_backend(config.backend);
        let devices = backend
            .list_devices()
            .with_context(|| format!("listing {} capture devices", config.backend.label()))?;
        print!("{}", format_device_list(&devices));
        return Ok(());
    }

    info!("voxgate {}", env!("CARGO_PKG_VERSION"));
    let monitor = config.monitor;
    let mut recorder = Recorder::from_config(config).context("configuring recorder")?;
    let device = settings.device.as_deref().unwrap_or("default");
    recorder
        .open(device)
        .with_context(|| format!("opening capture device '{device}'"))?;

    let signals = tokio::spawn(watch_signals(recorder.stop_handle()));
    let meter = monitor.then(|| spawn_meter(recorder.subscribe_levels()));

    let outcome = tokio::task::spawn_blocking(move || recorder.start())
        .await
        .context("recorder thread panicked")?;

    signals.abort();
    if let Some(meter) = meter {
        meter.abort();
        println!();
    }
    outcome.context("recording stopped")?;
    Ok(())
}

/// First Ctrl-C/SIGTERM stops gracefully; a second one exits at once.
async fn watch_signals(stop: StopHandle) {
    if let Err(e) = wait_for_signal().await {
        warn!("signal handling unavailable: {e}");
        return;
    }
    info!("stopping; signal again to exit immediately");
    stop.stop();

    if wait_for_signal().await.is_ok() {
        warn!("second signal, exiting without finalizing output");
        std::process::exit(130);
    }
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

fn spawn_meter(mut levels: broadcast::Receiver<LevelEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        loop {
            match levels.recv().await {
                Ok(event) => {
                    let _ = write!(stdout, "\rSignal RMS: {:5.1} dB", event.level_db);
                    let _ = stdout.flush();
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}
