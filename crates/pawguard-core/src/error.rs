//! Unified error types for the pawguard core library.
//!
//! This module provides a unified error type [`PawguardError`] covering every
//! failure mode. Each module also has its own specific error type
//! ([`ConfigError`], [`ScanError`], [`AlertDeliveryError`], [`LogWriteError`])
//! which converts into it.
//!
//! Only some of these stop the daemon:
//!
//! | Error                  | Effect                                          |
//! |------------------------|-------------------------------------------------|
//! | `ConfigError`          | fatal at startup, previous snapshot kept on reload |
//! | `ScanError`            | cycle runs with no readings                     |
//! | `AlertDeliveryError`   | logged, annotated on the alert event            |
//! | `LogWriteError`        | fatal                                           |
//!
//! # Example
//!
//! ```rust
//! use pawguard_core::error::{PawguardError, Result};
//! use std::path::PathBuf;
//!
//! fn require_config(path: &PathBuf) -> Result<()> {
//!     if !path.exists() {
//!         return Err(PawguardError::ConfigNotFound(path.clone()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::alert::AlertDeliveryError;
use crate::bluetooth::ScanError;
use crate::config::ConfigError;
use crate::storage::LogWriteError;

/// The unified error type for all pawguard operations.
#[derive(Debug, Error)]
pub enum PawguardError {
    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    BluetoothAdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    BluetoothAdapterPoweredOff,

    /// Bluetooth scanning failed.
    #[error("Bluetooth scan failed: {0}")]
    BluetoothScanFailed(String),

    // =========================================================================
    // ALERT DELIVERY ERRORS
    // =========================================================================
    /// The deterrent could not be fired.
    #[error("Deterrent delivery failed: {0}")]
    DeterrentFailed(String),

    /// The alert sound could not be played.
    #[error("Audio playback failed: {0}")]
    AudioFailed(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// The event log could not be written.
    #[error("Event log write failed: {0}")]
    EventLogError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for pawguard operations.
pub type Result<T> = std::result::Result<T, PawguardError>;

/// Short alias for [`PawguardError`].
pub type Error = PawguardError;

impl PawguardError {
    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to Bluetooth operations.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound
                | Self::BluetoothAdapterPoweredOff
                | Self::BluetoothScanFailed(_)
        )
    }

    /// Returns `true` if this error is about delivering an alert.
    #[inline]
    #[must_use]
    pub const fn is_delivery_error(&self) -> bool {
        matches!(self, Self::DeterrentFailed(_) | Self::AudioFailed(_))
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::EventLogError(_) | Self::IoError(_))
    }

    /// Returns `true` if the detection loop can carry on after this error.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BluetoothScanFailed(_) | Self::DeterrentFailed(_) | Self::AudioFailed(_)
        )
    }

    /// Process exit code for this error.
    #[inline]
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            // EX_CONFIG
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_) => {
                78
            }
            // EX_UNAVAILABLE
            Self::BluetoothAdapterNotFound
            | Self::BluetoothAdapterPoweredOff
            | Self::BluetoothScanFailed(_)
            | Self::DeterrentFailed(_)
            | Self::AudioFailed(_) => 69,
            // EX_IOERR
            Self::EventLogError(_) | Self::IoError(_) => 74,
        }
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::BluetoothAdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::BluetoothAdapterPoweredOff => "BLUETOOTH_ADAPTER_POWERED_OFF",
            Self::BluetoothScanFailed(_) => "BLUETOOTH_SCAN_FAILED",
            Self::DeterrentFailed(_) => "DETERRENT_FAILED",
            Self::AudioFailed(_) => "AUDIO_FAILED",
            Self::EventLogError(_) => "EVENT_LOG_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<ConfigError> for PawguardError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path.into()),
            ConfigError::ReadError { path, source } => {
                Self::ConfigParseError(format!("Failed to read {path}: {source}"))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            e @ (ConfigError::ValidationError { .. } | ConfigError::MultipleValidationErrors(_)) => {
                Self::ConfigValidationError(e.to_string())
            }
            ConfigError::WatchFailed { path, source } => {
                Self::IoError(std::io::Error::other(format!("Failed to watch {path}: {source}")))
            }
        }
    }
}

impl From<ScanError> for PawguardError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::AdapterNotFound => Self::BluetoothAdapterNotFound,
            ScanError::AdapterPoweredOff => Self::BluetoothAdapterPoweredOff,
            e @ (ScanError::SessionInitFailed { .. }
            | ScanError::DiscoveryFailed { .. }
            | ScanError::ScanTimeout { .. }) => Self::BluetoothScanFailed(e.to_string()),
        }
    }
}

impl From<AlertDeliveryError> for PawguardError {
    fn from(err: AlertDeliveryError) -> Self {
        match err {
            e @ (AlertDeliveryError::Http { .. }
            | AlertDeliveryError::HttpStatus { .. }
            | AlertDeliveryError::Gpio { .. }) => Self::DeterrentFailed(e.to_string()),
            e @ (AlertDeliveryError::AudioUnavailable { .. }
            | AlertDeliveryError::SoundMissing(_)) => Self::AudioFailed(e.to_string()),
        }
    }
}

impl From<LogWriteError> for PawguardError {
    fn from(err: LogWriteError) -> Self {
        Self::EventLogError(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
