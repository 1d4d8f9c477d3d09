//! Bluetooth Low Energy scanning.
//!
//! This module provides:
//! - The [`Scanner`] capability the engine calls once per cycle
//! - [`BluerScanner`], backed by BlueZ (feature `bluetooth`)
//! - [`SimulatedScanner`], a random-walk source for running without hardware
//!   (feature `mock-bluetooth`)

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Reading;

/// Errors from the scan capability.
#[derive(Debug, Error)]
pub enum ScanError {
    /// No Bluetooth adapter is present.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// The adapter exists but could not be powered on.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// Connecting to the Bluetooth daemon failed.
    #[error("Failed to open Bluetooth session: {message}")]
    SessionInitFailed {
        /// Error detail.
        message: String,
    },

    /// Starting or running discovery failed.
    #[error("Bluetooth discovery failed: {message}")]
    DiscoveryFailed {
        /// Error detail.
        message: String,
    },

    /// The scan did not return in time.
    #[error("Scan timed out after {duration_secs:.2} seconds")]
    ScanTimeout {
        /// How long the engine waited.
        duration_secs: f64,
    },
}

/// Result type for scan operations.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Source of RSSI readings.
#[async_trait]
pub trait Scanner: Send {
    /// Listen for roughly `duration` and return every advertisement heard.
    ///
    /// May return an empty list. Identifiers need not be normalised.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError`] if the radio could not be used.
    async fn scan(&mut self, duration: Duration) -> ScanResult<Vec<Reading>>;
}

#[cfg(feature = "bluetooth")]
pub use self::bluez::BluerScanner;

#[cfg(feature = "bluetooth")]
mod bluez {
    use std::collections::HashMap;
    use std::future::Future;
    use std::time::Duration;

    use async_trait::async_trait;
    use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
    use futures::{Stream, StreamExt};
    use tracing::{debug, info};

    use super::{ScanError, ScanResult, Scanner};
    use crate::types::Reading;

    /// Scanner backed by BlueZ over D-Bus.
    pub struct BluerScanner {
        // Kept alive for the adapter's D-Bus connection.
        _session: Session,
        adapter: Adapter,
    }

    impl BluerScanner {
        /// Open a session and power on the adapter.
        ///
        /// Uses the default adapter unless `adapter_name` (e.g. `hci0`) is given.
        ///
        /// # Errors
        ///
        /// Returns an error if BlueZ is unreachable or the adapter cannot be
        /// powered on.
        pub async fn new(adapter_name: Option<&str>) -> ScanResult<Self> {
            let session = Session::new()
                .await
                .map_err(|e| ScanError::SessionInitFailed {
                    message: e.to_string(),
                })?;

            let adapter = match adapter_name {
                Some(name) => session.adapter(name),
                None => session.default_adapter().await,
            }
            .map_err(|_| ScanError::AdapterNotFound)?;

            adapter
                .set_powered(true)
                .await
                .map_err(|_| ScanError::AdapterPoweredOff)?;

            adapter
                .set_discovery_filter(DiscoveryFilter {
                    transport: DiscoveryTransport::Le,
                    duplicate_data: true,
                    ..Default::default()
                })
                .await
                .map_err(|e| ScanError::DiscoveryFailed {
                    message: e.to_string(),
                })?;

            info!(adapter = adapter.name(), "Bluetooth adapter ready");

            Ok(Self {
                _session: session,
                adapter,
            })
        }
    }

    #[async_trait]
    impl Scanner for BluerScanner {
        async fn scan(&mut self, duration: Duration) -> ScanResult<Vec<Reading>> {
            let events = self
                .adapter
                .discover_devices_with_changes()
                .await
                .map_err(|e| ScanError::DiscoveryFailed {
                    message: e.to_string(),
                })?;
            let mut events = Box::pin(events);

            let adapter = self.adapter.clone();
            let heard = collect_rssi(&mut events, duration, move |address| {
                current_rssi(adapter.clone(), address)
            })
            .await;
            drop(events);

            let readings = heard
                .into_iter()
                .map(|(address, rssi)| Reading::new(address.to_string(), rssi))
                .collect();
            Ok(readings)
        }
    }

    /// RSSI of a device right now, or `None` if BlueZ has none.
    async fn current_rssi(adapter: Adapter, address: Address) -> Option<i16> {
        let device = match adapter.device(address) {
            Ok(device) => device,
            Err(e) => {
                debug!(%address, error = %e, "Unknown device");
                return None;
            }
        };
        match device.rssi().await {
            Ok(rssi) => rssi,
            Err(e) => {
                debug!(%address, error = %e, "Could not read RSSI");
                None
            }
        }
    }

    /// Collect the latest RSSI of every device reported until `window`
    /// elapses or the stream ends.
    ///
    /// RSSI must be read while discovery is running, since BlueZ clears it
    /// when discovery stops. Devices without an RSSI (stale cache entries
    /// replayed at the start of discovery) are skipped.
    async fn collect_rssi<S, F, Fut>(
        events: &mut S,
        window: Duration,
        mut rssi_of: F,
    ) -> HashMap<Address, i16>
    where
        S: Stream<Item = AdapterEvent> + Unpin,
        F: FnMut(Address) -> Fut,
        Fut: Future<Output = Option<i16>>,
    {
        let mut heard = HashMap::new();
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = &mut deadline => break,
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        if let Some(rssi) = rssi_of(address).await {
                            heard.insert(address, rssi);
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
        heard
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use futures::stream;
        use std::collections::VecDeque;
        use std::sync::Mutex;

        const A: Address = Address([0x80, 0xE4, 0xDA, 0x71, 0x1B, 0x75]);
        const B: Address = Address([0xFB, 0xCA, 0x63, 0xB8, 0xC7, 0x2B]);
        const C: Address = Address([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

        #[tokio::test]
        async fn test_collect_keeps_latest_and_skips_missing_rssi() {
            let mut events = stream::iter(vec![
                AdapterEvent::DeviceAdded(A),
                AdapterEvent::DeviceAdded(C),
                AdapterEvent::DeviceAdded(B),
                AdapterEvent::DeviceAdded(A),
            ]);
            let values = Mutex::new(VecDeque::from(vec![Some(-80), None, Some(-70), Some(-62)]));

            let heard = collect_rssi(&mut events, Duration::from_secs(5), |_| {
                let next = values.lock().unwrap().pop_front().flatten();
                async move { next }
            })
            .await;

            assert_eq!(heard.len(), 2);
            assert_eq!(heard[&A], -62);
            assert_eq!(heard[&B], -70);
            assert!(!heard.contains_key(&C));
        }

        #[tokio::test]
        async fn test_collect_stops_at_deadline() {
            let mut events =
                stream::iter(vec![AdapterEvent::DeviceAdded(A)]).chain(stream::pending());
            let heard =
                collect_rssi(&mut events, Duration::from_millis(20), |_| async { Some(-50) }).await;
            assert_eq!(heard.get(&A), Some(&-50));
        }
    }
}

#[cfg(any(feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use self::simulated::SimulatedScanner;

#[cfg(any(feature = "mock-bluetooth", not(feature = "bluetooth")))]
mod simulated {
    use std::time::Duration;

    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::{ScanResult, Scanner};
    use crate::types::Reading;

    /// Chance that a beacon is not heard in a given cycle.
    const DROP_PROBABILITY: f64 = 0.15;

    /// Scanner producing random-walk RSSI values for a fixed set of beacons.
    pub struct SimulatedScanner {
        beacons: Vec<(String, i16)>,
        rng: StdRng,
    }

    impl SimulatedScanner {
        /// Simulate the given identifiers, each starting at `start_rssi`.
        #[must_use]
        pub fn new(identifiers: impl IntoIterator<Item = String>, start_rssi: i16) -> Self {
            Self {
                beacons: identifiers.into_iter().map(|id| (id, start_rssi)).collect(),
                rng: StdRng::from_entropy(),
            }
        }

        /// Use a fixed seed for reproducible runs.
        #[must_use]
        pub fn with_seed(mut self, seed: u64) -> Self {
            self.rng = StdRng::seed_from_u64(seed);
            self
        }
    }

    #[async_trait]
    impl Scanner for SimulatedScanner {
        async fn scan(&mut self, duration: Duration) -> ScanResult<Vec<Reading>> {
            tokio::time::sleep(duration).await;

            let mut readings = Vec::new();
            for (identifier, rssi) in &mut self.beacons {
                *rssi = (*rssi + self.rng.gen_range(-3..=3)).clamp(-100, -30);
                if !self.rng.gen_bool(DROP_PROBABILITY) {
                    readings.push(Reading::new(identifier.clone(), *rssi));
                }
            }
            Ok(readings)
        }
    }

}
