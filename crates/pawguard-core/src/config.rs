//! Configuration loading, validation, and the hot-swappable snapshot store.
//!
//! The configuration file is TOML and contains:
//! - The beacon roster (identifier, name, hysteresis thresholds, description)
//! - Detection parameters (window size, missing factor, scan and pulse times)
//! - Startup-only capability settings (deterrent, audio, alert catalog, event log)
//!
//! Only the roster and detection parameters are hot-reloaded. A reload either
//! produces a fully validated [`ConfigSnapshot`] or leaves the previous one
//! active.

use std::collections::HashSet;
use std::num::{NonZeroU32, NonZeroUsize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Default number of samples in the moving-average window.
pub const DEFAULT_MOVING_AVERAGE_SIZE: usize = 5;

/// Default number of consecutive absent cycles before one sample is evicted.
pub const DEFAULT_MISSING_FACTOR: u32 = 3;

/// Default scan duration in seconds.
pub const DEFAULT_SCAN_TIME_SECS: f64 = 1.25;

/// Default deterrent pulse duration in seconds.
pub const DEFAULT_PULSE_TIME_SECS: f64 = 0.25;

/// Upper bound for every duration setting, in seconds.
pub const MAX_DURATION_SECS: f64 = 3600.0;

static MAC_ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("valid regex"));

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// The configuration file exists but could not be read.
    #[error("Failed to read configuration file {path}: {source}")]
    ReadError {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML or is missing required fields.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A single field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error(
        "Configuration is invalid: {}",
        .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
    )]
    MultipleValidationErrors(Vec<ConfigError>),

    /// The configuration file could not be watched for changes.
    #[error("Failed to watch {path}: {source}")]
    WatchFailed {
        /// Path being watched.
        path: String,
        /// Underlying watcher error.
        #[source]
        source: notify::Error,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check whether a string is a Bluetooth MAC address (`XX:XX:XX:XX:XX:XX`).
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS_RE.is_match(address)
}

/// Canonical form of a beacon identifier, used for matching scan readings.
#[must_use]
pub fn normalize_identifier(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

// =============================================================================
// Beacon
// =============================================================================

/// A tracked beacon and its hysteresis thresholds.
///
/// Immutable once built. A reload replaces every beacon rather than editing
/// thresholds in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    identifier: String,
    name: String,
    max_rssi: i16,
    recovery_rssi: i16,
    description: String,
}

impl Beacon {
    /// Build a beacon, rejecting thresholds where `recovery_rssi >= max_rssi`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the thresholds leave no
    /// hysteresis band.
    pub fn new(
        identifier: &str,
        name: impl Into<String>,
        max_rssi: i16,
        recovery_rssi: i16,
        description: impl Into<String>,
    ) -> ConfigResult<Self> {
        let name = name.into();
        if recovery_rssi >= max_rssi {
            return Err(ConfigError::validation(
                format!("beacons.{name}.recovery_rssi"),
                format!(
                    "recovery_rssi ({recovery_rssi}) must be less than max_rssi ({max_rssi})"
                ),
            ));
        }
        Ok(Self {
            identifier: normalize_identifier(identifier),
            name,
            max_rssi,
            recovery_rssi,
            description: description.into(),
        })
    }

    /// Normalised MAC address.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Average RSSI at or above which the beacon is too close.
    #[must_use]
    pub const fn max_rssi(&self) -> i16 {
        self.max_rssi
    }

    /// Average RSSI at or below which a close beacon counts as far again.
    #[must_use]
    pub const fn recovery_rssi(&self) -> i16 {
        self.recovery_rssi
    }

    /// Free-text description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

// =============================================================================
// File model
// =============================================================================

/// A beacon entry as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconEntry {
    /// Bluetooth MAC address.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Threshold for entering the too-close state (dBm).
    pub max_rssi: i16,
    /// Threshold for leaving the too-close state (dBm).
    pub recovery_rssi: i16,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
}

/// How the deterrent is fired.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeterrentConfig {
    /// Log only.
    #[default]
    None,
    /// POST the pulse duration to an HTTP endpoint.
    Http {
        /// Endpoint URL.
        url: String,
        /// Request timeout in seconds.
        #[serde(default = "default_http_timeout")]
        timeout_secs: f64,
    },
    /// Drive a sysfs GPIO line high for the pulse duration.
    Gpio {
        /// GPIO line number (must already be exported).
        pin: u32,
        /// Sysfs root, overridable for testing.
        #[serde(default = "default_gpio_root")]
        sysfs_root: PathBuf,
    },
}

fn default_http_timeout() -> f64 {
    2.0
}

fn default_gpio_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

/// Audio playback settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Whether to play sounds at all.
    #[serde(default)]
    pub enabled: bool,
    /// External player executable.
    #[serde(default = "default_player")]
    pub player: String,
    /// Directory containing the alert sound files.
    #[serde(default = "default_sounds_dir")]
    pub sounds_dir: PathBuf,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            player: default_player(),
            sounds_dir: default_sounds_dir(),
        }
    }
}

fn default_player() -> String {
    "ffplay".to_string()
}

fn default_sounds_dir() -> PathBuf {
    PathBuf::from("/usr/share/pawguard/sounds")
}

/// One entry of the alert catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertVariant {
    /// Sound file name, relative to the sounds directory.
    pub filename: String,
    /// Playback volume, 0-100.
    pub volume: u8,
    /// Maximum playback time in seconds.
    pub max_duration: f64,
}

impl AlertVariant {
    /// Maximum playback time.
    #[must_use]
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs_f64(self.max_duration)
    }
}

/// Built-in alert catalog used when the file has no `[[alerts]]` tables.
#[must_use]
pub fn default_alert_catalog() -> Vec<AlertVariant> {
    [
        ("hiss.wav", 90, 2.0),
        ("clap.wav", 80, 1.5),
        ("no.wav", 100, 1.0),
        ("whistle.wav", 70, 2.5),
    ]
    .into_iter()
    .map(|(filename, volume, max_duration)| AlertVariant {
        filename: filename.to_string(),
        volume,
        max_duration,
    })
    .collect()
}

/// The configuration file as parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Moving-average window size.
    #[serde(default = "default_moving_average_size")]
    pub moving_average_size: usize,
    /// Absent cycles per evicted sample.
    #[serde(default = "default_missing_factor")]
    pub missing_factor: u32,
    /// Scan duration in seconds.
    #[serde(default = "default_scan_time")]
    pub scan_time: f64,
    /// Deterrent pulse duration in seconds.
    #[serde(default = "default_pulse_time")]
    pub pulse_time: f64,
    /// Event log location. Falls back to the data directory.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
    /// Tracked beacons.
    pub beacons: Vec<BeaconEntry>,
    /// Deterrent settings.
    #[serde(default)]
    pub deterrent: DeterrentConfig,
    /// Audio settings.
    #[serde(default)]
    pub audio: AudioConfig,
    /// Alert catalog override.
    #[serde(default)]
    pub alerts: Option<Vec<AlertVariant>>,
}

const fn default_moving_average_size() -> usize {
    DEFAULT_MOVING_AVERAGE_SIZE
}

const fn default_missing_factor() -> u32 {
    DEFAULT_MISSING_FACTOR
}

const fn default_scan_time() -> f64 {
    DEFAULT_SCAN_TIME_SECS
}

const fn default_pulse_time() -> f64 {
    DEFAULT_PULSE_TIME_SECS
}

impl ConfigFile {
    /// Parse a TOML document without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] on syntax errors or missing
    /// required fields.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] or [`ConfigError::ReadError`] if the
    /// file cannot be read, and [`ConfigError::ParseError`] if it is malformed.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::NotFound(display));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: display,
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Validate every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns the single error, or [`ConfigError::MultipleValidationErrors`]
    /// when more than one field is invalid.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.moving_average_size == 0 {
            errors.push(ConfigError::validation(
                "moving_average_size",
                "must be at least 1",
            ));
        }
        if self.missing_factor == 0 {
            errors.push(ConfigError::validation("missing_factor", "must be at least 1"));
        }
        check_seconds(&mut errors, "scan_time", self.scan_time);
        check_seconds(&mut errors, "pulse_time", self.pulse_time);

        if self.beacons.is_empty() {
            errors.push(ConfigError::validation("beacons", "at least one beacon is required"));
        }
        let mut seen = HashSet::new();
        for (index, entry) in self.beacons.iter().enumerate() {
            let field = format!("beacons[{index}]");
            if !is_valid_mac_address(entry.identifier.trim()) {
                errors.push(ConfigError::validation(
                    format!("{field}.identifier"),
                    format!("'{}' is not a MAC address (XX:XX:XX:XX:XX:XX)", entry.identifier),
                ));
            } else if !seen.insert(normalize_identifier(&entry.identifier)) {
                errors.push(ConfigError::validation(
                    format!("{field}.identifier"),
                    format!("'{}' is listed more than once", entry.identifier),
                ));
            }
            if entry.name.trim().is_empty() {
                errors.push(ConfigError::validation(
                    format!("{field}.name"),
                    "must not be empty",
                ));
            }
            if entry.recovery_rssi >= entry.max_rssi {
                errors.push(ConfigError::validation(
                    format!("{field}.recovery_rssi"),
                    format!(
                        "recovery_rssi ({}) must be less than max_rssi ({})",
                        entry.recovery_rssi, entry.max_rssi
                    ),
                ));
            }
        }

        match &self.deterrent {
            DeterrentConfig::Http { url, timeout_secs } => {
                if reqwest::Url::parse(url).is_err() {
                    errors.push(ConfigError::validation(
                        "deterrent.url",
                        format!("'{url}' is not a valid URL"),
                    ));
                }
                check_seconds(&mut errors, "deterrent.timeout_secs", *timeout_secs);
            }
            DeterrentConfig::Gpio { .. } | DeterrentConfig::None => {}
        }

        if let Some(alerts) = &self.alerts {
            if alerts.is_empty() {
                errors.push(ConfigError::validation(
                    "alerts",
                    "the alert catalog must not be empty",
                ));
            }
            for (index, alert) in alerts.iter().enumerate() {
                if alert.filename.trim().is_empty() {
                    errors.push(ConfigError::validation(
                        format!("alerts[{index}].filename"),
                        "must not be empty",
                    ));
                }
                if alert.volume > 100 {
                    errors.push(ConfigError::validation(
                        format!("alerts[{index}].volume"),
                        "must be between 0 and 100",
                    ));
                }
                check_seconds(
                    &mut errors,
                    &format!("alerts[{index}].max_duration"),
                    alert.max_duration,
                );
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// The alert catalog in effect.
    #[must_use]
    pub fn alert_catalog(&self) -> Vec<AlertVariant> {
        self.alerts.clone().unwrap_or_else(default_alert_catalog)
    }

    /// Validate and convert into an immutable snapshot.
    ///
    /// # Errors
    ///
    /// Returns any validation error from [`ConfigFile::validate`].
    pub fn to_snapshot(&self, generation: u64) -> ConfigResult<ConfigSnapshot> {
        self.validate()?;

        let beacons = self
            .beacons
            .iter()
            .map(|entry| {
                Beacon::new(
                    &entry.identifier,
                    entry.name.trim(),
                    entry.max_rssi,
                    entry.recovery_rssi,
                    entry.description.clone(),
                )
                .map(Arc::new)
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        let params = DetectionParams {
            moving_average_size: NonZeroUsize::new(self.moving_average_size)
                .ok_or_else(|| ConfigError::validation("moving_average_size", "must be at least 1"))?,
            missing_factor: NonZeroU32::new(self.missing_factor)
                .ok_or_else(|| ConfigError::validation("missing_factor", "must be at least 1"))?,
            scan_time: Duration::from_secs_f64(self.scan_time),
            pulse_time: Duration::from_secs_f64(self.pulse_time),
        };

        Ok(ConfigSnapshot {
            beacons,
            params,
            generation,
        })
    }
}

/// Durations are positive, finite, and at most an hour.
fn check_seconds(errors: &mut Vec<ConfigError>, field: &str, value: f64) {
    if !(value.is_finite() && value > 0.0 && value <= MAX_DURATION_SECS) {
        errors.push(ConfigError::validation(
            field,
            format!("must be between 0 and {MAX_DURATION_SECS} seconds, got {value}"),
        ));
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Tunable detection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionParams {
    /// Samples kept per beacon.
    pub moving_average_size: NonZeroUsize,
    /// Absent cycles per evicted sample.
    pub missing_factor: NonZeroU32,
    /// How long each scan listens.
    pub scan_time: Duration,
    /// How long the deterrent fires.
    pub pulse_time: Duration,
}

/// An immutable, validated view of the roster and detection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    beacons: Vec<Arc<Beacon>>,
    params: DetectionParams,
    generation: u64,
}

impl ConfigSnapshot {
    /// Tracked beacons in configuration order.
    #[must_use]
    pub fn beacons(&self) -> &[Arc<Beacon>] {
        &self.beacons
    }

    /// Detection parameters.
    #[must_use]
    pub const fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Number of successful loads before this snapshot, starting at 0.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

// =============================================================================
// Store
// =============================================================================

/// Owns the active configuration snapshot and the file it came from.
///
/// The store is owned by the run loop. Reloads replace the snapshot pointer
/// as a whole; readers holding an older `Arc` keep a consistent view.
#[derive(Debug)]
pub struct ConfigStore {
    source: PathBuf,
    settings: ConfigFile,
    current: Arc<ConfigSnapshot>,
}

impl ConfigStore {
    /// Load the initial configuration. Failure here is fatal to the caller.
    ///
    /// # Errors
    ///
    /// Returns any read, parse, or validation error.
    pub fn open(source: impl Into<PathBuf>) -> ConfigResult<Self> {
        let source = source.into();
        let settings = ConfigFile::from_path(&source)?;
        let snapshot = settings.to_snapshot(0)?;
        info!(
            path = %source.display(),
            beacons = snapshot.beacons().len(),
            "Loaded configuration"
        );
        Ok(Self {
            source,
            settings,
            current: Arc::new(snapshot),
        })
    }

    /// Re-read the source file and swap in the new snapshot.
    ///
    /// On error the previously active snapshot is kept.
    ///
    /// # Errors
    ///
    /// Returns any read, parse, or validation error.
    pub fn load(&mut self) -> ConfigResult<Arc<ConfigSnapshot>> {
        let text = std::fs::read_to_string(&self.source).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(self.source.display().to_string())
            } else {
                ConfigError::ReadError {
                    path: self.source.display().to_string(),
                    source,
                }
            }
        })?;
        self.load_str(&text)
    }

    /// Parse `text` and swap in the new snapshot.
    ///
    /// Capability sections (`deterrent`, `audio`, `alerts`, `event_log`) are
    /// read at startup only; changes to them are reported and ignored.
    ///
    /// # Errors
    ///
    /// Returns any parse or validation error, leaving the store unchanged.
    pub fn load_str(&mut self, text: &str) -> ConfigResult<Arc<ConfigSnapshot>> {
        let parsed = ConfigFile::from_toml_str(text)?;
        let snapshot = Arc::new(parsed.to_snapshot(self.current.generation() + 1)?);

        if parsed.deterrent != self.settings.deterrent
            || parsed.audio != self.settings.audio
            || parsed.alerts != self.settings.alerts
            || parsed.event_log != self.settings.event_log
        {
            warn!("Capability settings changed; restart the daemon to apply them");
        }

        self.settings.beacons = parsed.beacons;
        self.settings.moving_average_size = parsed.moving_average_size;
        self.settings.missing_factor = parsed.missing_factor;
        self.settings.scan_time = parsed.scan_time;
        self.settings.pulse_time = parsed.pulse_time;
        self.current = Arc::clone(&snapshot);

        info!(
            generation = snapshot.generation(),
            beacons = snapshot.beacons().len(),
            "Configuration reloaded"
        );
        Ok(snapshot)
    }

    /// The active snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.current)
    }

    /// Settings as loaded at startup, with the roster kept current.
    #[must_use]
    pub const fn settings(&self) -> &ConfigFile {
        &self.settings
    }

    /// Path of the configuration file.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Default configuration file location.
///
/// On Raspberry Pi: `/etc/pawguard/config.toml`
/// For development: the platform config directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/pawguard/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "pawguard").map_or_else(
            || PathBuf::from("./config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}
