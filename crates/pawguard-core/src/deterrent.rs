//! Deterrent capability.
//!
//! The deterrent is an impulse of a configured duration. How it is delivered
//! is chosen once at startup from `[deterrent] kind`:
//! - `http` - POST `{"pulse_time": <secs>}` to an endpoint
//! - `gpio` - hold a sysfs GPIO line high for the pulse duration
//! - `none` - log only

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::alert::AlertDeliveryError;
use crate::config::DeterrentConfig;

/// Fires the physical deterrent.
#[async_trait]
pub trait Deterrent: Send + Sync {
    /// Fire for `duration`.
    ///
    /// # Errors
    ///
    /// Returns [`AlertDeliveryError`] if the deterrent could not be reached.
    async fn pulse(&self, duration: Duration) -> Result<(), AlertDeliveryError>;
}

/// Build the deterrent selected by configuration.
///
/// # Errors
///
/// Returns [`AlertDeliveryError::Http`] if the HTTP client cannot be built.
pub fn from_config(config: &DeterrentConfig) -> Result<Box<dyn Deterrent>, AlertDeliveryError> {
    Ok(match config {
        DeterrentConfig::None => Box::new(NoopDeterrent),
        DeterrentConfig::Http { url, timeout_secs } => Box::new(HttpDeterrent::new(
            url.clone(),
            Duration::from_secs_f64(*timeout_secs),
        )?),
        DeterrentConfig::Gpio { pin, sysfs_root } => {
            Box::new(GpioDeterrent::new(sysfs_root.clone(), *pin))
        }
    })
}

/// Deterrent that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDeterrent;

#[async_trait]
impl Deterrent for NoopDeterrent {
    async fn pulse(&self, duration: Duration) -> Result<(), AlertDeliveryError> {
        debug!(pulse_ms = duration.as_millis(), "Deterrent disabled, skipping pulse");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct PulseRequest {
    pulse_time: f64,
}

/// Deterrent driven through an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpDeterrent {
    client: reqwest::Client,
    url: String,
}

impl HttpDeterrent {
    /// Create a client posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`AlertDeliveryError::Http`] if the client cannot be built.
    pub fn new(url: String, timeout: Duration) -> Result<Self, AlertDeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlertDeliveryError::Http {
                message: e.to_string(),
            })?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Deterrent for HttpDeterrent {
    async fn pulse(&self, duration: Duration) -> Result<(), AlertDeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(&PulseRequest {
                pulse_time: duration.as_secs_f64(),
            })
            .send()
            .await
            .map_err(|e| AlertDeliveryError::Http {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertDeliveryError::HttpStatus {
                status: status.as_u16(),
            });
        }
        debug!(url = %self.url, pulse_ms = duration.as_millis(), "Deterrent pulsed");
        Ok(())
    }
}

/// Deterrent on a sysfs GPIO line.
///
/// The line must already be exported and configured as an output.
#[derive(Debug, Clone)]
pub struct GpioDeterrent {
    value_path: PathBuf,
}

impl GpioDeterrent {
    /// Drive `<sysfs_root>/gpio<pin>/value`.
    #[must_use]
    pub fn new(sysfs_root: PathBuf, pin: u32) -> Self {
        Self {
            value_path: sysfs_root.join(format!("gpio{pin}")).join("value"),
        }
    }

    async fn set(&self, high: bool) -> Result<(), AlertDeliveryError> {
        tokio::fs::write(&self.value_path, if high { "1" } else { "0" })
            .await
            .map_err(|source| AlertDeliveryError::Gpio {
                path: self.value_path.clone(),
                source,
            })
    }
}

#[async_trait]
impl Deterrent for GpioDeterrent {
    async fn pulse(&self, duration: Duration) -> Result<(), AlertDeliveryError> {
        self.set(true).await?;
        tokio::time::sleep(duration).await;
        self.set(false).await
    }
}
