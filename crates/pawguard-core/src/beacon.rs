//! Per-beacon tracking state.
//!
//! A [`BeaconState`] smooths a beacon's RSSI through a [`SignalWindow`] and
//! applies two-threshold hysteresis:
//!
//! ```text
//!            average >= max_rssi
//!     FAR  ───────────────────────▶  CLOSE
//!          ◀───────────────────────
//!          average <= recovery_rssi
//! ```
//!
//! Averages strictly between the two thresholds never change the state.
//!
//! When a beacon goes unheard, its window decays slowly: one sample is evicted
//! every `missing_factor` consecutive absent cycles, so a single dropped
//! advertisement does not read as the animal walking away.

use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::alert::AlertOutcome;
use crate::config::{Beacon, DetectionParams};
use crate::types::{BeaconStatus, Event, Proximity};
use crate::window::SignalWindow;

/// Runtime state for one tracked beacon.
#[derive(Debug, Clone)]
pub struct BeaconState {
    beacon: Arc<Beacon>,
    window: SignalWindow,
    too_close: bool,
    missing: u32,
    missing_factor: NonZeroU32,
}

impl BeaconState {
    /// Fresh state: empty window, FAR, full missing countdown.
    #[must_use]
    pub fn new(beacon: Arc<Beacon>, params: &DetectionParams) -> Self {
        Self {
            beacon,
            window: SignalWindow::new(params.moving_average_size),
            too_close: false,
            missing: params.missing_factor.get(),
            missing_factor: params.missing_factor,
        }
    }

    /// Record a reading heard this cycle.
    ///
    /// Resets the missing countdown and returns the detection event to log.
    #[must_use = "the detection event must be written to the event log"]
    pub fn record_detection(&mut self, rssi: i16, time: DateTime<Utc>) -> Event {
        self.window.push(rssi);
        self.missing = self.missing_factor.get();
        Event::BeaconDetection {
            time,
            beacon_name: self.beacon.name().to_string(),
            rssi,
        }
    }

    /// Record that the beacon was not heard this cycle.
    ///
    /// Returns the evicted sample when the countdown runs out.
    pub fn record_absence(&mut self) -> Option<i16> {
        self.missing = self.missing.saturating_sub(1);
        if self.missing == 0 {
            self.missing = self.missing_factor.get();
            self.window.evict_oldest()
        } else {
            None
        }
    }

    /// Evaluate the hysteresis decision against the current average.
    ///
    /// An empty window means no data and reads as not too close, without
    /// touching the stored state.
    pub fn is_too_close(&mut self) -> bool {
        let Some(average) = self.window.average() else {
            return false;
        };
        if self.too_close && average <= f64::from(self.beacon.recovery_rssi()) {
            self.too_close = false;
        } else if !self.too_close && average >= f64::from(self.beacon.max_rssi()) {
            self.too_close = true;
        }
        self.too_close
    }

    /// The beacon's configuration.
    #[must_use]
    pub const fn beacon(&self) -> &Arc<Beacon> {
        &self.beacon
    }

    /// The sample window.
    #[must_use]
    pub const fn window(&self) -> &SignalWindow {
        &self.window
    }

    /// Absent cycles left before the next eviction.
    #[must_use]
    pub const fn missing_countdown(&self) -> u32 {
        self.missing
    }

    /// Status line data for reporting. Does not re-evaluate hysteresis.
    #[must_use]
    pub fn status(
        &self,
        seen: bool,
        too_close: bool,
        alert: Option<AlertOutcome>,
    ) -> BeaconStatus {
        BeaconStatus {
            identifier: self.beacon.identifier().to_string(),
            name: self.beacon.name().to_string(),
            average: self.window.average(),
            stdev: self.window.stdev(),
            proximity: Proximity::from_too_close(too_close),
            seen,
            alert,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use std::time::Duration;

    fn params(window: usize, missing_factor: u32) -> DetectionParams {
        DetectionParams {
            moving_average_size: NonZeroUsize::new(window).unwrap(),
            missing_factor: NonZeroU32::new(missing_factor).unwrap(),
            scan_time: Duration::from_millis(10),
            pulse_time: Duration::from_millis(10),
        }
    }

    fn state(window: usize, missing_factor: u32) -> BeaconState {
        let beacon = Beacon::new("AA:BB:CC:DD:EE:FF", "Minidou", -65, -69, "collar").unwrap();
        BeaconState::new(Arc::new(beacon), &params(window, missing_factor))
    }

    fn detect(state: &mut BeaconState, rssi: i16) {
        let _ = state.record_detection(rssi, Utc::now());
    }

    #[test]
    fn test_empty_window_is_not_too_close() {
        let mut s = state(3, 3);
        assert!(!s.is_too_close());
        assert!(!s.is_too_close());
    }

    #[test]
    fn test_hysteresis_enter_hold_and_recover() {
        let mut s = state(1, 3);

        detect(&mut s, -65);
        assert!(s.is_too_close(), "reading equal to max_rssi enters CLOSE");

        for rssi in [-66, -67, -68] {
            detect(&mut s, rssi);
            assert!(s.is_too_close(), "{rssi} is in the dead zone, stays CLOSE");
        }

        detect(&mut s, -69);
        assert!(!s.is_too_close(), "reading equal to recovery_rssi leaves CLOSE");

        for rssi in [-68, -66] {
            detect(&mut s, rssi);
            assert!(!s.is_too_close(), "{rssi} is in the dead zone, stays FAR");
        }
    }

    #[test]
    fn test_is_too_close_is_idempotent() {
        let mut s = state(3, 3);
        detect(&mut s, -60);
        let first = s.is_too_close();
        assert_eq!(first, s.is_too_close());

        detect(&mut s, -80);
        detect(&mut s, -80);
        let first = s.is_too_close();
        assert_eq!(first, s.is_too_close());
    }

    #[test]
    fn test_missing_decay_evicts_one_sample_per_factor() {
        let mut s = state(5, 3);
        for rssi in [-70, -71, -72] {
            detect(&mut s, rssi);
        }

        assert_eq!(s.record_absence(), None);
        assert_eq!(s.record_absence(), None);
        assert_eq!(s.record_absence(), Some(-70));
        assert_eq!(s.window().len(), 2);
        assert_eq!(s.missing_countdown(), 3);

        assert_eq!(s.record_absence(), None);
        assert_eq!(s.record_absence(), None);
        assert_eq!(s.record_absence(), Some(-71));
        assert_eq!(s.window().len(), 1);
    }

    #[test]
    fn test_detection_resets_missing_countdown() {
        let mut s = state(5, 3);
        detect(&mut s, -70);
        s.record_absence();
        s.record_absence();
        assert_eq!(s.missing_countdown(), 1);

        detect(&mut s, -71);
        assert_eq!(s.missing_countdown(), 3);

        assert_eq!(s.record_absence(), None);
        assert_eq!(s.record_absence(), None);
        assert_eq!(s.window().len(), 2);
    }

    #[test]
    fn test_decay_to_empty_reads_safe_but_keeps_flag() {
        let mut s = state(1, 1);
        detect(&mut s, -50);
        assert!(s.is_too_close());

        assert_eq!(s.record_absence(), Some(-50));
        assert!(s.window().is_empty());
        assert!(!s.is_too_close());

        // The flag itself was not cleared, so a dead-zone reading stays CLOSE.
        detect(&mut s, -67);
        assert!(s.is_too_close());
    }

    #[test]
    fn test_record_detection_event() {
        let mut s = state(3, 3);
        let time = Utc::now();
        let event = s.record_detection(-61, time);
        assert_eq!(
            event,
            Event::BeaconDetection {
                time,
                beacon_name: "Minidou".to_string(),
                rssi: -61,
            }
        );
    }
}
