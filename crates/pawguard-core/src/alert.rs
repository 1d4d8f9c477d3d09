//! Alert dispatch.
//!
//! When a beacon is too close the dispatcher picks a sound from the alert
//! catalog at random, fires the deterrent and starts playback together, then
//! records an alert event. Delivery failures are logged and annotated on the
//! event; only a failure to write the event itself is returned.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::audio::AudioPlayer;
use crate::config::{default_alert_catalog, AlertVariant, Beacon};
use crate::deterrent::Deterrent;
use crate::storage::{EventSink, LogWriteError};
use crate::types::Event;

/// Errors delivering the deterrent or the alert sound.
#[derive(Debug, Error)]
pub enum AlertDeliveryError {
    /// The HTTP deterrent request failed.
    #[error("Deterrent request failed: {message}")]
    Http {
        /// Error detail.
        message: String,
    },

    /// The HTTP deterrent answered with a non-success status.
    #[error("Deterrent endpoint returned HTTP {status}")]
    HttpStatus {
        /// Response status code.
        status: u16,
    },

    /// Writing the GPIO line failed.
    #[error("Failed to drive GPIO {}: {source}", path.display())]
    Gpio {
        /// Sysfs value file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The audio player could not be started.
    #[error("Audio player '{program}' unavailable: {source}")]
    AudioUnavailable {
        /// Player executable.
        program: String,
        /// Spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The selected sound file does not exist.
    #[error("Sound file not found: {}", .0.display())]
    SoundMissing(PathBuf),
}

/// What happened when an alert fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertOutcome {
    /// Sound chosen for this alert.
    pub alert_filename: String,
    /// Combined delivery failure message, if any.
    pub error: Option<String>,
}

/// Selects an alert variant and drives the deterrent and audio capabilities.
pub struct AlertDispatcher {
    catalog: Vec<AlertVariant>,
    deterrent: Box<dyn Deterrent>,
    audio: Box<dyn AudioPlayer>,
    rng: StdRng,
}

impl AlertDispatcher {
    /// Create a dispatcher. An empty catalog falls back to the built-in one.
    #[must_use]
    pub fn new(
        catalog: Vec<AlertVariant>,
        deterrent: Box<dyn Deterrent>,
        audio: Box<dyn AudioPlayer>,
    ) -> Self {
        let catalog = if catalog.is_empty() {
            default_alert_catalog()
        } else {
            catalog
        };
        Self {
            catalog,
            deterrent,
            audio,
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a fixed seed for variant selection.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// The alert catalog.
    #[must_use]
    pub fn catalog(&self) -> &[AlertVariant] {
        &self.catalog
    }

    /// Fire an alert for `beacon` and record it.
    ///
    /// # Errors
    ///
    /// Returns [`LogWriteError`] if the alert event could not be persisted.
    /// Deterrent and audio failures are not errors.
    pub async fn trigger(
        &mut self,
        beacon: &Beacon,
        pulse_time: Duration,
        sink: &mut dyn EventSink,
    ) -> Result<AlertOutcome, LogWriteError> {
        let variant = self
            .catalog
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| default_alert_catalog().remove(0));

        let (pulse, playback) = tokio::join!(
            self.deterrent.pulse(pulse_time),
            self.audio.play(&variant)
        );

        let mut failures = Vec::new();
        if let Err(e) = pulse {
            warn!(beacon = beacon.name(), error = %e, "Deterrent delivery failed");
            failures.push(e.to_string());
        }
        if let Err(e) = playback {
            warn!(beacon = beacon.name(), sound = %variant.filename, error = %e, "Alert sound failed");
            failures.push(e.to_string());
        }
        let error = (!failures.is_empty()).then(|| failures.join("; "));

        sink.append(&Event::Alert {
            time: Utc::now(),
            alert_filename: variant.filename.clone(),
            beacon_name: Some(beacon.name().to_string()),
            error: error.clone(),
        })?;

        info!(beacon = beacon.name(), sound = %variant.filename, volume = variant.volume, "Alert triggered");

        Ok(AlertOutcome {
            alert_filename: variant.filename,
            error,
        })
    }
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}
