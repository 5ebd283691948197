//! Upload boundary with the remote collector.
//!
//! Each collection is one POST of a JSON array. The upload counts as
//! delivered only when the server answers 2xx with `{"success": true}`.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::db::{Attempt, Sample};
use crate::settings::SyncSettings;

/// Wire sentinel for an unknown numeric value.
const UNKNOWN: i64 = -1;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no endpoint configured for {0}")]
    NotConfigured(&'static str),

    #[error("invalid transport configuration: {0}")]
    Config(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("server answered with status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("server did not confirm the upload")]
    NotConfirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationPayload {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub accuracy: f32,
    pub speed: f32,
    pub bearing: f32,
    pub timestamp: i64,
    pub battery: i64,
}

impl LocationPayload {
    pub fn from_sample(sample: &Sample, device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            latitude: sample.latitude,
            longitude: sample.longitude,
            altitude: sample.altitude,
            accuracy: sample.accuracy,
            speed: sample.speed,
            bearing: sample.bearing,
            timestamp: sample.timestamp_ms,
            battery: sample.battery.map_or(UNKNOWN, i64::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptPayload {
    pub device_id: String,
    pub timestamp: i64,
    pub satellites: u32,
    pub accuracy: f32,
    pub status: &'static str,
    pub reason: String,
}

impl AttemptPayload {
    pub fn from_attempt(attempt: &Attempt, device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            timestamp: attempt.timestamp_ms,
            satellites: attempt.satellites,
            accuracy: attempt.accuracy.unwrap_or(UNKNOWN as f32),
            status: attempt.status.as_str(),
            reason: attempt.reason.clone(),
        }
    }
}

/// Remote collector for both collections.
pub trait Transport: Send + Sync + 'static {
    fn send_locations(
        &self,
        payload: Vec<LocationPayload>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send_attempts(
        &self,
        payload: Vec<AttemptPayload>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Accept only an explicit `"success": true`; anything else is a failure.
pub fn parse_confirmation(body: &[u8]) -> Result<(), TransportError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| TransportError::Malformed(e.to_string()))?;
    match value.get("success").and_then(serde_json::Value::as_bool) {
        Some(true) => Ok(()),
        _ => Err(TransportError::NotConfirmed),
    }
}

pub struct HttpTransport {
    http: reqwest::Client,
    locations_url: Option<String>,
    attempts_url: Option<String>,
}

impl HttpTransport {
    pub fn new(settings: &SyncSettings) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(Self {
            http,
            locations_url: settings.locations_url.clone(),
            attempts_url: settings.attempts_url.clone(),
        })
    }

    async fn post<T: Serialize>(&self, url: &str, payload: &T) -> Result<(), TransportError> {
        let response = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        parse_confirmation(&bytes)
    }
}

impl Transport for HttpTransport {
    async fn send_locations(&self, payload: Vec<LocationPayload>) -> Result<(), TransportError> {
        let url = self
            .locations_url
            .as_deref()
            .ok_or(TransportError::NotConfigured("locations"))?;
        self.post(url, &payload).await
    }

    async fn send_attempts(&self, payload: Vec<AttemptPayload>) -> Result<(), TransportError> {
        let url = self
            .attempts_url
            .as_deref()
            .ok_or(TransportError::NotConfigured("attempts"))?;
        self.post(url, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AttemptStatus;

    #[test]
    fn confirmation_requires_explicit_success() {
        assert!(parse_confirmation(br#"{"success": true, "inserted": 3}"#).is_ok());
        assert!(matches!(
            parse_confirmation(br#"{"success": false}"#),
            Err(TransportError::NotConfirmed)
        ));
        assert!(matches!(
            parse_confirmation(br#"{"ok": true}"#),
            Err(TransportError::NotConfirmed)
        ));
        assert!(matches!(
            parse_confirmation(br#"{"success": "true"}"#),
            Err(TransportError::NotConfirmed)
        ));
        assert!(matches!(
            parse_confirmation(b"<html>502</html>"),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_values_use_wire_sentinel() {
        let sample = Sample {
            id: Some(7),
            latitude: 1.0,
            longitude: 2.0,
            altitude: 3.0,
            accuracy: 4.0,
            speed: 0.0,
            bearing: 0.0,
            timestamp_ms: 99,
            battery: None,
            synced: false,
        };
        let json = serde_json::to_value(LocationPayload::from_sample(&sample, "dev-1")).unwrap();
        assert_eq!(json["battery"], -1);
        assert_eq!(json["device_id"], "dev-1");
        assert_eq!(json["timestamp"], 99);

        let attempt = Attempt {
            id: Some(1),
            timestamp_ms: 5,
            satellites: 2,
            accuracy: None,
            status: AttemptStatus::NoSignal,
            reason: "gps off".into(),
        };
        let json = serde_json::to_value(AttemptPayload::from_attempt(&attempt, "dev-1")).unwrap();
        assert_eq!(json["accuracy"], -1.0);
        assert_eq!(json["status"], "no_signal");
    }

    #[tokio::test]
    async fn unconfigured_endpoint_is_an_error() {
        let transport = HttpTransport::new(&SyncSettings::default()).unwrap();
        assert!(matches!(
            transport.send_locations(Vec::new()).await,
            Err(TransportError::NotConfigured("locations"))
        ));
    }
}
