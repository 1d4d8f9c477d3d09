//! The scan-process-alert cycle.
//!
//! Each call to [`ProximityEngine::run_cycle`]:
//!
//! 1. Captures the current configuration snapshot
//! 2. Scans for `scan_time`
//! 3. Splits tracked beacons into heard and missing
//! 4. Records detections (logging each) and absences
//! 5. Evaluates every beacon once and alerts for each one that is too close
//!
//! Alerts repeat every cycle while a beacon stays close. Snapshots are only
//! swapped through [`ProximityEngine::apply_snapshot`], which the run loop
//! calls between cycles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::alert::AlertDispatcher;
use crate::beacon::BeaconState;
use crate::bluetooth::{ScanError, Scanner};
use crate::config::{normalize_identifier, ConfigSnapshot};
use crate::storage::{EventSink, LogWriteError};
use crate::types::{CycleReport, Reading};

/// Slack added on top of twice the scan time before a scan counts as hung.
const SCAN_GRACE: Duration = Duration::from_secs(1);

/// Consecutive scan failures after which each further failure is an error.
const SCAN_FAILURE_ALARM: u32 = 10;

/// Drives proximity detection for every tracked beacon.
pub struct ProximityEngine {
    scanner: Box<dyn Scanner>,
    dispatcher: AlertDispatcher,
    sink: Box<dyn EventSink>,
    snapshot: Arc<ConfigSnapshot>,
    states: Vec<BeaconState>,
    scan_failures: u32,
}

impl ProximityEngine {
    /// Create an engine tracking the beacons in `snapshot`.
    #[must_use]
    pub fn new(
        snapshot: Arc<ConfigSnapshot>,
        scanner: Box<dyn Scanner>,
        dispatcher: AlertDispatcher,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let states = build_states(&snapshot);
        Self {
            scanner,
            dispatcher,
            sink,
            snapshot,
            states,
            scan_failures: 0,
        }
    }

    /// Switch to a new snapshot, discarding all beacon state.
    ///
    /// Returns `false` if `snapshot` is already active.
    pub fn apply_snapshot(&mut self, snapshot: Arc<ConfigSnapshot>) -> bool {
        if Arc::ptr_eq(&self.snapshot, &snapshot) {
            return false;
        }
        info!(
            from = self.snapshot.generation(),
            to = snapshot.generation(),
            beacons = snapshot.beacons().len(),
            "Applying new configuration, beacon state reset"
        );
        self.states = build_states(&snapshot);
        self.snapshot = snapshot;
        true
    }

    /// The snapshot the next cycle will use.
    #[must_use]
    pub const fn snapshot(&self) -> &Arc<ConfigSnapshot> {
        &self.snapshot
    }

    /// Tracked beacon states in roster order.
    #[must_use]
    pub fn states(&self) -> &[BeaconState] {
        &self.states
    }

    /// Run one full cycle.
    ///
    /// # Errors
    ///
    /// Returns [`LogWriteError`] if a detection or alert event could not be
    /// persisted. Scan and delivery failures are handled internally.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, LogWriteError> {
        let snapshot = Arc::clone(&self.snapshot);
        let params = *snapshot.params();

        let (readings, scan_failed) = match self.scan(params.scan_time).await {
            Ok(readings) => {
                if self.scan_failures > 0 {
                    info!(failures = self.scan_failures, "Scanning recovered");
                }
                self.scan_failures = 0;
                (readings, false)
            }
            Err(e) => {
                self.scan_failures = self.scan_failures.saturating_add(1);
                if self.scan_failures >= SCAN_FAILURE_ALARM {
                    error!(error = %e, consecutive = self.scan_failures, "Scan keeps failing");
                } else {
                    warn!(error = %e, consecutive = self.scan_failures, "Scan failed, treating all beacons as missing");
                }
                (Vec::new(), true)
            }
        };

        let strongest = strongest_readings(readings);
        let now = Utc::now();

        let mut seen = Vec::with_capacity(self.states.len());
        for state in &mut self.states {
            if let Some(&rssi) = strongest.get(state.beacon().identifier()) {
                let event = state.record_detection(rssi, now);
                self.sink.append(&event)?;
                debug!(beacon = state.beacon().name(), rssi, "Detected");
                seen.push(true);
            } else {
                if let Some(evicted) = state.record_absence() {
                    debug!(beacon = state.beacon().name(), evicted, "Missing, oldest sample evicted");
                }
                seen.push(false);
            }
        }

        let mut report = CycleReport {
            generation: snapshot.generation(),
            scan_failed,
            beacons: Vec::with_capacity(self.states.len()),
        };

        for (state, heard) in self.states.iter_mut().zip(seen) {
            let too_close = state.is_too_close();
            let average = format_stat(state.window().average());
            let stdev = format_stat(state.window().stdev());

            let alert = if too_close {
                warn!(
                    beacon = state.beacon().name(),
                    %average,
                    %stdev,
                    status = "CLOSE",
                    "{} is too close", state.beacon().name()
                );
                let outcome = self
                    .dispatcher
                    .trigger(state.beacon(), params.pulse_time, self.sink.as_mut())
                    .await?;
                Some(outcome)
            } else {
                info!(
                    beacon = state.beacon().name(),
                    %average,
                    %stdev,
                    status = "FAR",
                    "{} is far enough away", state.beacon().name()
                );
                None
            };
            report.beacons.push(state.status(heard, too_close, alert));
        }

        Ok(report)
    }

    async fn scan(&mut self, duration: Duration) -> Result<Vec<Reading>, ScanError> {
        let started = Instant::now();
        let limit = duration * 2 + SCAN_GRACE;
        let result = match timeout(limit, self.scanner.scan(duration)).await {
            Ok(result) => result,
            Err(_) => Err(ScanError::ScanTimeout {
                duration_secs: limit.as_secs_f64(),
            }),
        };
        // A scan that fails immediately still occupies its window so the
        // loop keeps its cadence.
        if result.is_err() {
            if let Some(rest) = duration.checked_sub(started.elapsed()) {
                sleep(rest).await;
            }
        }
        result
    }
}

impl std::fmt::Debug for ProximityEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProximityEngine")
            .field("generation", &self.snapshot.generation())
            .field("states", &self.states)
            .field("scan_failures", &self.scan_failures)
            .finish_non_exhaustive()
    }
}

fn build_states(snapshot: &ConfigSnapshot) -> Vec<BeaconState> {
    snapshot
        .beacons()
        .iter()
        .map(|beacon| BeaconState::new(Arc::clone(beacon), snapshot.params()))
        .collect()
}

/// Strongest reading per normalised identifier.
fn strongest_readings(readings: Vec<Reading>) -> HashMap<String, i16> {
    let mut strongest: HashMap<String, i16> = HashMap::with_capacity(readings.len());
    for reading in readings {
        strongest
            .entry(normalize_identifier(&reading.identifier))
            .and_modify(|rssi| *rssi = (*rssi).max(reading.rssi))
            .or_insert(reading.rssi);
    }
    strongest
}

fn format_stat(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertDeliveryError;
    use crate::audio::NoopAudioPlayer;
    use crate::config::{default_alert_catalog, ConfigFile, ConfigStore};
    use crate::deterrent::Deterrent;
    use crate::storage::MemoryEventSink;
    use crate::types::{Event, Proximity};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const MINIDOU: &str = "80:E4:DA:71:1B:75";
    const RIGATONI: &str = "FB:CA:63:B8:C7:2B";

    /// Replays scripted scan results, then returns empty scans.
    struct ScriptedScanner(VecDeque<Result<Vec<Reading>, ScanError>>);

    impl ScriptedScanner {
        fn new(script: Vec<Result<Vec<Reading>, ScanError>>) -> Self {
            Self(script.into())
        }
    }

    #[async_trait]
    impl Scanner for ScriptedScanner {
        async fn scan(&mut self, _duration: Duration) -> Result<Vec<Reading>, ScanError> {
            self.0.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    struct CountingDeterrent(Arc<AtomicUsize>);

    #[async_trait]
    impl Deterrent for CountingDeterrent {
        async fn pulse(&self, _duration: Duration) -> Result<(), AlertDeliveryError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Event sink whose contents stay visible after the engine takes ownership.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<MemoryEventSink>>);

    impl EventSink for SharedSink {
        fn append(&mut self, event: &Event) -> Result<(), LogWriteError> {
            self.0.lock().unwrap().append(event)
        }
    }

    impl SharedSink {
        fn events(&self) -> Vec<Event> {
            self.0.lock().unwrap().events().to_vec()
        }
    }

    struct BrokenSink;

    impl EventSink for BrokenSink {
        fn append(&mut self, _event: &Event) -> Result<(), LogWriteError> {
            Err(LogWriteError::Write {
                path: "/dev/full".into(),
                source: std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full"),
            })
        }
    }

    fn config_text(window: usize) -> String {
        format!(
            r#"
            moving_average_size = {window}
            missing_factor = 3
            scan_time = 0.01

            [[beacons]]
            identifier = "{MINIDOU}"
            name = "Minidou"
            max_rssi = -65
            recovery_rssi = -69
            "#
        )
    }

    fn snapshot(text: &str) -> Arc<ConfigSnapshot> {
        Arc::new(ConfigFile::from_toml_str(text).unwrap().to_snapshot(0).unwrap())
    }

    fn readings(id: &str, rssi: i16) -> Result<Vec<Reading>, ScanError> {
        Ok(vec![Reading::new(id, rssi)])
    }

    fn engine(
        snapshot: Arc<ConfigSnapshot>,
        script: Vec<Result<Vec<Reading>, ScanError>>,
    ) -> (ProximityEngine, Arc<AtomicUsize>, SharedSink) {
        let pulses = Arc::new(AtomicUsize::new(0));
        let sink = SharedSink::default();
        let dispatcher = AlertDispatcher::new(
            default_alert_catalog(),
            Box::new(CountingDeterrent(Arc::clone(&pulses))),
            Box::new(NoopAudioPlayer),
        )
        .with_seed(3);
        let engine = ProximityEngine::new(
            snapshot,
            Box::new(ScriptedScanner::new(script)),
            dispatcher,
            Box::new(sink.clone()),
        );
        (engine, pulses, sink)
    }

    #[tokio::test]
    async fn test_far_then_close_alerts_every_cycle() {
        let script = vec![
            readings(MINIDOU, -70),
            readings(MINIDOU, -70),
            readings(MINIDOU, -70),
            readings(MINIDOU, -60),
            readings(MINIDOU, -60),
            readings(MINIDOU, -60),
            readings(MINIDOU, -60),
        ];
        let (mut engine, pulses, sink) = engine(snapshot(&config_text(3)), script);

        for _ in 0..3 {
            let report = engine.run_cycle().await.unwrap();
            assert_eq!(report.beacons[0].proximity, Proximity::Far);
            assert_eq!(report.alert_count(), 0);
        }
        assert_eq!(engine.states()[0].window().average(), Some(-70.0));

        // -60,-70,-70 averages -66.7: still below max_rssi.
        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.beacons[0].proximity, Proximity::Far);

        // -60,-60,-70 averages -63.3: crosses max_rssi.
        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.beacons[0].proximity, Proximity::Close);
        assert!(report.beacons[0].alert.is_some());

        for _ in 0..2 {
            let report = engine.run_cycle().await.unwrap();
            assert_eq!(report.beacons[0].proximity, Proximity::Close);
            assert_eq!(report.alert_count(), 1);
        }
        assert_eq!(engine.states()[0].window().average(), Some(-60.0));
        assert_eq!(pulses.load(Ordering::SeqCst), 3);

        let events = sink.events();
        let detections = events
            .iter()
            .filter(|e| matches!(e, Event::BeaconDetection { .. }))
            .count();
        let alerts = events
            .iter()
            .filter(|e| matches!(e, Event::Alert { .. }))
            .count();
        assert_eq!(detections, 7);
        assert_eq!(alerts, 3);
    }

    #[tokio::test]
    async fn test_unknown_identifiers_ignored_and_case_insensitive() {
        let script = vec![Ok(vec![
            Reading::new("00:11:22:33:44:55", -30),
            Reading::new(MINIDOU.to_lowercase(), -80),
            Reading::new(MINIDOU, -75),
        ])];
        let (mut engine, _, sink) = engine(snapshot(&config_text(3)), script);

        let report = engine.run_cycle().await.unwrap();
        assert!(report.beacons[0].seen);
        assert_eq!(report.beacons[0].average, Some(-75.0));
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_beacon_decays() {
        let mut script = vec![readings(MINIDOU, -60), readings(MINIDOU, -62)];
        script.extend((0..3).map(|_| Ok(Vec::new())));
        let (mut engine, _, _) = engine(snapshot(&config_text(5)), script);

        engine.run_cycle().await.unwrap();
        engine.run_cycle().await.unwrap();
        assert_eq!(engine.states()[0].window().len(), 2);

        engine.run_cycle().await.unwrap();
        engine.run_cycle().await.unwrap();
        assert_eq!(engine.states()[0].window().len(), 2);

        let report = engine.run_cycle().await.unwrap();
        assert!(!report.beacons[0].seen);
        assert_eq!(engine.states()[0].window().iter().collect::<Vec<_>>(), vec![-62]);
        // Still close: a stale strong reading keeps the deterrent going.
        assert_eq!(report.beacons[0].proximity, Proximity::Close);
    }

    #[tokio::test]
    async fn test_scan_failure_counts_as_absence() {
        let script = vec![
            readings(MINIDOU, -70),
            Err(ScanError::DiscoveryFailed {
                message: "adapter busy".to_string(),
            }),
            readings(MINIDOU, -71),
        ];
        let (mut engine, _, _) = engine(snapshot(&config_text(3)), script);

        engine.run_cycle().await.unwrap();
        let report = engine.run_cycle().await.unwrap();
        assert!(report.scan_failed);
        assert!(!report.beacons[0].seen);
        assert_eq!(engine.states()[0].missing_countdown(), 2);

        let report = engine.run_cycle().await.unwrap();
        assert!(!report.scan_failed);
        assert_eq!(engine.states()[0].missing_countdown(), 3);
    }

    #[tokio::test]
    async fn test_report_carries_alert_outcome() {
        struct UnreachableDeterrent;

        #[async_trait]
        impl Deterrent for UnreachableDeterrent {
            async fn pulse(&self, _duration: Duration) -> Result<(), AlertDeliveryError> {
                Err(AlertDeliveryError::HttpStatus { status: 503 })
            }
        }

        let dispatcher = AlertDispatcher::new(
            default_alert_catalog(),
            Box::new(UnreachableDeterrent),
            Box::new(NoopAudioPlayer),
        );
        let mut engine = ProximityEngine::new(
            snapshot(&config_text(1)),
            Box::new(ScriptedScanner::new(vec![
                readings(MINIDOU, -80),
                readings(MINIDOU, -50),
            ])),
            dispatcher,
            Box::new(SharedSink::default()),
        );

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.beacons[0].proximity, Proximity::Far);
        assert_eq!(report.beacons[0].alert, None);

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.beacons[0].proximity, Proximity::Close);
        let outcome = report.beacons[0].alert.as_ref().expect("alert fired");
        assert!(outcome.error.as_deref().unwrap().contains("503"));
        assert_eq!(report.alert_count(), 1);
    }

    #[tokio::test]
    async fn test_log_write_failure_is_fatal() {
        let dispatcher = AlertDispatcher::new(
            default_alert_catalog(),
            Box::new(CountingDeterrent(Arc::new(AtomicUsize::new(0)))),
            Box::new(NoopAudioPlayer),
        );
        let mut engine = ProximityEngine::new(
            snapshot(&config_text(3)),
            Box::new(ScriptedScanner::new(vec![readings(MINIDOU, -70)])),
            dispatcher,
            Box::new(BrokenSink),
        );
        assert!(engine.run_cycle().await.is_err());
    }

    #[tokio::test]
    async fn test_reload_discards_state() {
        let two_beacons = format!(
            r#"{}
            [[beacons]]
            identifier = "{RIGATONI}"
            name = "Rigatoni"
            max_rssi = -80
            recovery_rssi = -85
            "#,
            config_text(3)
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(two_beacons.as_bytes()).unwrap();
        let mut store = ConfigStore::open(file.path()).unwrap();

        let script = vec![
            Ok(vec![Reading::new(MINIDOU, -50), Reading::new(RIGATONI, -60)]),
            Ok(Vec::new()),
        ];
        let (mut engine, _, _) = engine(store.current(), script);

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.alert_count(), 2);

        // Rigatoni removed, Pepper added, Minidou thresholds unchanged.
        let reloaded = format!(
            r#"{}
            [[beacons]]
            identifier = "11:22:33:44:55:66"
            name = "Pepper"
            max_rssi = -70
            recovery_rssi = -75
            "#,
            config_text(3)
        );
        let snapshot = store.load_str(&reloaded).unwrap();
        assert!(engine.apply_snapshot(snapshot));
        assert!(!engine.apply_snapshot(store.current()));

        assert!(engine.states().iter().all(|s| s.window().is_empty()));
        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.generation, 1);
        assert!(report.beacon("Rigatoni").is_none());
        let minidou = report.beacon("Minidou").unwrap();
        assert_eq!(minidou.average, None);
        assert_eq!(minidou.proximity, Proximity::Far);
        let pepper = report.beacon("Pepper").unwrap();
        assert_eq!(pepper.proximity, Proximity::Far);
        assert_eq!(report.alert_count(), 0);
    }

    #[tokio::test]
    async fn test_bad_reload_keeps_running_on_previous_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config_text(1).as_bytes()).unwrap();
        let mut store = ConfigStore::open(file.path()).unwrap();

        let script = vec![readings(MINIDOU, -60), readings(MINIDOU, -60)];
        let (mut engine, pulses, _) = engine(store.current(), script);
        engine.run_cycle().await.unwrap();

        std::fs::write(
            file.path(),
            config_text(1).replace("recovery_rssi = -69", "recovery_rssi = -65"),
        )
        .unwrap();
        assert!(store.load().is_err());
        assert!(!engine.apply_snapshot(store.current()));

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.generation, 0);
        assert_eq!(report.beacons[0].proximity, Proximity::Close);
        assert_eq!(pulses.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_strongest_readings() {
        let strongest = strongest_readings(vec![
            Reading::new("aa:bb:cc:dd:ee:ff", -80),
            Reading::new("AA:BB:CC:DD:EE:FF", -70),
            Reading::new("AA:BB:CC:DD:EE:FF", -75),
        ]);
        assert_eq!(strongest.get("AA:BB:CC:DD:EE:FF"), Some(&-70));
    }

    #[test]
    fn test_format_stat() {
        assert_eq!(format_stat(None), "n/a");
        assert_eq!(format_stat(Some(-66.666)), "-66.7");
    }
}
