//! # pawguard-core
//!
//! Core logic for the pawguard pet proximity deterrent.
//!
//! Animals wear BLE beacons. Each scan cycle the engine smooths every
//! beacon's RSSI, decides with hysteresis whether it is too close, and fires
//! the deterrent for as long as it stays close.
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`window`] - Fixed-size RSSI window with moving average and stdev
//! - [`beacon`] - Per-beacon hysteresis state and missing-sample decay
//! - [`engine`] - The scan-process-alert cycle
//! - [`config`] - Configuration file model, validation, and snapshot store
//! - [`reload`] - File-change and signal driven reload requests
//! - [`alert`] - Alert variant selection and delivery
//! - [`bluetooth`] - Scan capability and its BlueZ implementation
//! - [`deterrent`] - Deterrent capability (HTTP, GPIO, none)
//! - [`audio`] - Best-effort sound playback
//! - [`storage`] - Append-only JSON-lines event log
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Readings, events, and cycle reports

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod alert;
pub mod audio;
pub mod beacon;
pub mod bluetooth;
pub mod config;
pub mod deterrent;
pub mod engine;
pub mod error;
pub mod reload;
pub mod storage;
pub mod types;
pub mod window;

// Re-export primary types for convenience
pub use alert::{AlertDeliveryError, AlertDispatcher, AlertOutcome};
pub use audio::{AudioPlayer, CommandAudioPlayer, NoopAudioPlayer};
pub use beacon::BeaconState;
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluerScanner;
#[cfg(any(feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use bluetooth::SimulatedScanner;
pub use bluetooth::{ScanError, ScanResult, Scanner};
pub use config::{
    default_alert_catalog, default_config_path, is_valid_mac_address, normalize_identifier,
    AlertVariant, AudioConfig, Beacon, ConfigError, ConfigFile, ConfigResult, ConfigSnapshot,
    ConfigStore, DetectionParams, DeterrentConfig,
};
pub use deterrent::{Deterrent, GpioDeterrent, HttpDeterrent, NoopDeterrent};
pub use engine::ProximityEngine;
pub use error::{Error, PawguardError, Result};
pub use reload::{ReloadReason, ReloadRequest, ReloadSender, ReloadWatcher};
pub use storage::{
    default_data_dir, default_event_log_path, EventLog, EventSink, LogWriteError,
    MemoryEventSink,
};
pub use types::{BeaconStatus, CycleReport, Event, Proximity, Reading};
pub use window::SignalWindow;
