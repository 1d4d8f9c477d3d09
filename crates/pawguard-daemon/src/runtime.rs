//! Daemon wiring and the detection loop.
//!
//! [`Daemon`] owns the configuration store, the engine, and the reload
//! channel. The loop applies pending reloads, then runs one cycle, until the
//! shutdown future resolves or the event log fails.

use std::future::Future;
use std::path::PathBuf;

use pawguard_core::{
    audio, default_event_log_path, deterrent, AlertDispatcher, ConfigStore, EventLog,
    PawguardError, ProximityEngine, ReloadWatcher, Scanner,
};
use tracing::{error, info};

/// A running pawguard instance.
#[derive(Debug)]
pub struct Daemon {
    store: ConfigStore,
    engine: ProximityEngine,
    reloads: ReloadWatcher,
}

impl Daemon {
    /// Build the capabilities described by the store's settings.
    ///
    /// `event_log` overrides the configured event log path.
    ///
    /// # Errors
    ///
    /// Returns an error if the deterrent cannot be constructed or the event
    /// log cannot be opened.
    pub fn new(
        store: ConfigStore,
        scanner: Box<dyn Scanner>,
        reloads: ReloadWatcher,
        event_log: Option<PathBuf>,
    ) -> Result<Self, PawguardError> {
        let settings = store.settings();

        let deterrent = deterrent::from_config(&settings.deterrent)?;
        let audio = audio::from_config(&settings.audio);
        let dispatcher = AlertDispatcher::new(settings.alert_catalog(), deterrent, audio);

        let log_path = event_log
            .or_else(|| settings.event_log.clone())
            .unwrap_or_else(default_event_log_path);
        let sink = EventLog::open(&log_path)?;
        info!(path = %log_path.display(), "Event log opened");

        let engine = ProximityEngine::new(store.current(), scanner, dispatcher, Box::new(sink));
        Ok(Self::from_parts(store, engine, reloads))
    }

    /// Assemble a daemon from prebuilt parts.
    #[must_use]
    pub const fn from_parts(
        store: ConfigStore,
        engine: ProximityEngine,
        reloads: ReloadWatcher,
    ) -> Self {
        Self {
            store,
            engine,
            reloads,
        }
    }

    /// The engine driven by this daemon.
    #[must_use]
    pub const fn engine(&self) -> &ProximityEngine {
        &self.engine
    }

    /// The configuration store.
    #[must_use]
    pub const fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Apply any pending reload request.
    ///
    /// Returns `true` if a new snapshot became active. A configuration that
    /// fails to load is logged and the previous one stays in force.
    pub fn apply_pending_reloads(&mut self) -> bool {
        let mut pending = None;
        while let Some(request) = self.reloads.try_next() {
            pending = Some(request);
        }
        let Some(request) = pending else {
            return false;
        };

        match self.store.load() {
            Ok(snapshot) => self.engine.apply_snapshot(snapshot),
            Err(e) => {
                error!(
                    reason = ?request.reason,
                    error = %e,
                    "Rejected configuration reload, keeping previous configuration"
                );
                false
            }
        }
    }

    /// Run cycles until `shutdown` resolves.
    ///
    /// A cycle in progress when shutdown arrives is abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`PawguardError::EventLogError`] if an event could not be
    /// persisted.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), PawguardError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            beacons = self.engine.snapshot().beacons().len(),
            "Detection loop started"
        );

        loop {
            self.apply_pending_reloads();

            tokio::select! {
                () = &mut shutdown => {
                    info!("Detection loop stopped");
                    return Ok(());
                }
                result = self.engine.run_cycle() => {
                    result?;
                }
            }
        }
    }
}
