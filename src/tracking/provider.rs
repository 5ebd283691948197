//! Boundary with the platform positioning subsystem.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use super::profile::SamplingParams;

/// One raw position reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Horizontal accuracy radius in meters; `None` when the provider gave none.
    #[serde(default)]
    pub accuracy: Option<f32>,
    #[serde(default)]
    pub speed: Option<f32>,
    #[serde(default)]
    pub bearing: Option<f32>,
    /// Capture time on the device clock, milliseconds since the epoch.
    pub time_ms: i64,
}

impl Fix {
    /// The accuracy radius if it is a usable, non-negative number.
    pub fn usable_accuracy(&self) -> Option<f32> {
        self.accuracy
            .filter(|radius| radius.is_finite() && *radius >= 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SatelliteStatus {
    pub visible: u32,
    pub used_in_fix: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("location permission revoked")]
    PermissionDenied,

    #[error("location provider unavailable: {0}")]
    Unavailable(String),

    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),
}

/// Everything a live subscription can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Fix(Fix),
    Satellites(SatelliteStatus),
    Fault(ProviderError),
}

/// Platform positioning capability.
///
/// `subscribe` returns the receiving end of the delivery stream; the stream
/// ends when the provider drops its sender (for example on `unsubscribe`).
pub trait PositionProvider: Send + Sync + 'static {
    fn subscribe(
        &self,
        params: SamplingParams,
    ) -> impl Future<Output = Result<mpsc::Receiver<ProviderEvent>, ProviderError>> + Send;

    fn unsubscribe(&self) -> impl Future<Output = ()> + Send;

    /// Cheap read of the provider's cached fix; never starts an acquisition.
    fn last_known_fix(&self) -> impl Future<Output = Option<Fix>> + Send;
}

/// Battery level reader, consulted when a sample is accepted.
pub trait BatterySource: Send + Sync + 'static {
    fn battery_percent(&self) -> Option<u8>;
}

/// For hosts without a battery reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBattery;

impl BatterySource for NoBattery {
    fn battery_percent(&self) -> Option<u8> {
        None
    }
}
