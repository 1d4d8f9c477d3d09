//! # pawguard
//!
//! Keeps pets away from places they should not be. Scans for the BLE beacons
//! on their collars and fires a deterrent while one is too close.
//!
//! ## Running
//!
//! ```bash
//! # Development, simulated beacons
//! cargo run --package pawguard-daemon --features mock-bluetooth -- --simulate --config config.toml
//!
//! # Production (on Raspberry Pi)
//! pawguard --production
//!
//! # Validate a configuration file and exit
//! pawguard --check --config /etc/pawguard/config.toml
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pawguard_core::{
    default_config_path, ConfigSnapshot, ConfigStore, PawguardError, ReloadWatcher, Scanner,
};
use pawguard_daemon::{logging, signals, Daemon};
use tracing::{error, info, warn};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "pawguard", version, about = "BLE beacon proximity deterrent")]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log to rolling files as JSON in addition to stdout
    #[arg(long)]
    production: bool,

    /// Override the log directory used in production mode
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Override the event log location
    #[arg(long, value_name = "PATH")]
    event_log: Option<PathBuf>,

    /// Bluetooth adapter name (defaults to the system default adapter)
    #[arg(long, value_name = "NAME")]
    adapter: Option<String>,

    /// Use simulated beacons instead of a Bluetooth adapter
    #[arg(long)]
    simulate: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = logging::init(args.production, args.log_dir.as_deref()) {
        eprintln!("pawguard: failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(code = e.error_code(), "{e}");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(args: Args) -> Result<(), PawguardError> {
    let path = args.config.clone().unwrap_or_else(default_config_path);
    let store = ConfigStore::open(&path)?;

    if args.check {
        info!(
            path = %path.display(),
            beacons = store.current().beacons().len(),
            "Configuration is valid"
        );
        return Ok(());
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting pawguard");

    let scanner = build_scanner(&args, &store.current()).await?;

    let reloads = match store.watch() {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!(error = %e, "File watching unavailable, reload with SIGHUP");
            ReloadWatcher::manual()
        }
    };
    signals::forward_hangup(reloads.sender())?;
    let shutdown = signals::shutdown_signal()?;

    let daemon = Daemon::new(store, scanner, reloads, args.event_log)?;
    daemon
        .run(async {
            let _ = shutdown.await;
        })
        .await
}

#[cfg(feature = "bluetooth")]
#[cfg_attr(not(feature = "mock-bluetooth"), allow(unused_variables))]
async fn build_scanner(
    args: &Args,
    snapshot: &ConfigSnapshot,
) -> Result<Box<dyn Scanner>, PawguardError> {
    #[cfg(feature = "mock-bluetooth")]
    if args.simulate {
        return Ok(simulated_scanner(snapshot));
    }
    #[cfg(not(feature = "mock-bluetooth"))]
    if args.simulate {
        warn!("Built without mock-bluetooth, ignoring --simulate");
    }

    let scanner = pawguard_core::BluerScanner::new(args.adapter.as_deref()).await?;
    Ok(Box::new(scanner))
}

#[cfg(not(feature = "bluetooth"))]
#[allow(clippy::unused_async)]
async fn build_scanner(
    args: &Args,
    snapshot: &ConfigSnapshot,
) -> Result<Box<dyn Scanner>, PawguardError> {
    if args.adapter.is_some() {
        warn!("Built without Bluetooth support, ignoring --adapter");
    }
    Ok(simulated_scanner(snapshot))
}

#[cfg(any(feature = "mock-bluetooth", not(feature = "bluetooth")))]
fn simulated_scanner(snapshot: &ConfigSnapshot) -> Box<dyn Scanner> {
    info!("Using simulated beacons");
    let identifiers = snapshot
        .beacons()
        .iter()
        .map(|beacon| beacon.identifier().to_string());
    Box::new(pawguard_core::SimulatedScanner::new(identifiers, -75))
}
