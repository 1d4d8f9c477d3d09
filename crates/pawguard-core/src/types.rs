//! Shared types.
//!
//! Scan readings flow into the engine; events flow out to the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::AlertOutcome;

/// One advertisement seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Bluetooth MAC address of the advertiser.
    pub identifier: String,

    /// Received signal strength in dBm.
    pub rssi: i16,
}

impl Reading {
    /// Create a reading.
    #[must_use]
    pub fn new(identifier: impl Into<String>, rssi: i16) -> Self {
        Self {
            identifier: identifier.into(),
            rssi,
        }
    }
}

/// A record in the append-only event log.
///
/// Serialised as one JSON object per line, tagged by `event_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Event {
    /// A tracked beacon was heard during a scan.
    BeaconDetection {
        /// When the reading was recorded.
        time: DateTime<Utc>,
        /// Display name of the beacon.
        beacon_name: String,
        /// Received signal strength in dBm.
        rssi: i16,
    },

    /// The deterrent was triggered.
    Alert {
        /// When the alert fired.
        time: DateTime<Utc>,
        /// Sound file chosen for this alert.
        alert_filename: String,
        /// Beacon that caused the alert.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        beacon_name: Option<String>,
        /// Delivery failure, if the deterrent or audio call failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Proximity state of a beacon after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Proximity {
    /// Outside the alert threshold, or no data.
    Far,
    /// Too close; the deterrent fires each cycle.
    Close,
}

impl Proximity {
    /// Map the hysteresis flag to a state.
    #[must_use]
    pub const fn from_too_close(too_close: bool) -> Self {
        if too_close {
            Self::Close
        } else {
            Self::Far
        }
    }
}

impl std::fmt::Display for Proximity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Far => f.write_str("FAR"),
            Self::Close => f.write_str("CLOSE"),
        }
    }
}

/// Status of one beacon at the end of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconStatus {
    /// Normalised MAC address.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Moving average, if any samples are held.
    pub average: Option<f64>,
    /// Sample standard deviation, if at least two samples are held.
    pub stdev: Option<f64>,
    /// Hysteresis state.
    pub proximity: Proximity,
    /// Whether this beacon was heard this cycle.
    pub seen: bool,
    /// The alert fired for this beacon this cycle, if any.
    pub alert: Option<AlertOutcome>,
}

/// Outcome of one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Snapshot generation the cycle ran against.
    pub generation: u64,
    /// Whether the scan failed and was treated as empty.
    pub scan_failed: bool,
    /// Per-beacon status in roster order.
    pub beacons: Vec<BeaconStatus>,
}

impl CycleReport {
    /// Number of alerts fired this cycle.
    #[must_use]
    pub fn alert_count(&self) -> usize {
        self.beacons.iter().filter(|b| b.alert.is_some()).count()
    }

    /// Status of the beacon with the given name.
    #[must_use]
    pub fn beacon(&self, name: &str) -> Option<&BeaconStatus> {
        self.beacons.iter().find(|b| b.name == name)
    }
}
