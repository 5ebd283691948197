//! Accepted position samples.
//!
//! A sample is an immutable fact: once inserted only its `synced` flag may
//! change, and only after the server confirmed the upload that carried it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Row id, assigned by the store on insert.
    pub id: Option<i64>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Horizontal accuracy radius in meters.
    pub accuracy: f32,
    pub speed: f32,
    pub bearing: f32,
    /// Capture time on the device clock, milliseconds since the epoch.
    pub timestamp_ms: i64,
    /// Battery percentage at capture, `None` when the level was unavailable.
    pub battery: Option<u8>,
    pub synced: bool,
}
