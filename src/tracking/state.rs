use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::profile::Profile;
use super::provider::SatelliteStatus;

const FRESH_SILENCE_MS: i64 = 5 * 60 * 1000;
const STALE_SILENCE_MS: i64 = 15 * 60 * 1000;

/// Per-session counters shared by the delivery worker, the watchdog, the
/// heartbeat and status readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingState {
    pub running: bool,
    pub profile: Profile,
    pub session_started_ms: Option<i64>,
    /// Capture time of the last accepted sample; `None` until the first one.
    pub last_accepted_ms: Option<i64>,
    pub accepted_count: u64,
    pub restart_count: u32,
    pub satellites_used: u32,
    pub satellites_visible: u32,
    pub last_accuracy: Option<f32>,
}

impl Default for TrackingState {
    fn default() -> Self {
        Self {
            running: false,
            profile: Profile::default(),
            session_started_ms: None,
            last_accepted_ms: None,
            accepted_count: 0,
            restart_count: 0,
            satellites_used: 0,
            satellites_visible: 0,
            last_accuracy: None,
        }
    }
}

impl TrackingState {
    pub fn begin_session(&mut self, profile: Profile, now_ms: i64) {
        *self = Self {
            running: true,
            profile,
            session_started_ms: Some(now_ms),
            ..Self::default()
        };
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Only called once the sample is durably stored.
    pub fn record_accepted(&mut self, captured_at_ms: i64) {
        // Heartbeat and delivery can race; never move the marker backwards.
        self.last_accepted_ms = Some(
            self.last_accepted_ms
                .map_or(captured_at_ms, |last| last.max(captured_at_ms)),
        );
        self.accepted_count += 1;
    }

    pub fn record_satellites(&mut self, status: SatelliteStatus) {
        self.satellites_visible = status.visible;
        self.satellites_used = status.used_in_fix;
    }

    pub fn record_restart(&mut self) -> u32 {
        self.restart_count += 1;
        self.restart_count
    }

    pub fn silence_ms(&self, now_ms: i64) -> Option<i64> {
        self.last_accepted_ms.map(|last| (now_ms - last).max(0))
    }
}

/// Cloneable handle over one lock. Accessors copy out and release
/// immediately, so no caller can hold the lock across an `.await`.
#[derive(Clone, Default)]
pub struct SharedTrackingState {
    inner: Arc<Mutex<TrackingState>>,
}

impl SharedTrackingState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackingState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> TrackingState {
        self.lock().clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut TrackingState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn last_accepted_ms(&self) -> Option<i64> {
        self.lock().last_accepted_ms
    }

    pub fn satellites_used(&self) -> u32 {
        self.lock().satellites_used
    }

    pub fn restart_count(&self) -> u32 {
        self.lock().restart_count
    }

    pub fn accepted_count(&self) -> u64 {
        self.lock().accepted_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "level", content = "satellites")]
pub enum SignalQuality {
    NoFix,
    Weak(u32),
    Good(u32),
    Excellent(u32),
}

impl SignalQuality {
    pub fn from_satellites(used: u32) -> Self {
        match used {
            0 => SignalQuality::NoFix,
            n if n < 4 => SignalQuality::Weak(n),
            n if n < 8 => SignalQuality::Good(n),
            n => SignalQuality::Excellent(n),
        }
    }

    pub fn label(&self) -> String {
        match self {
            SignalQuality::NoFix => "no GPS".to_string(),
            SignalQuality::Weak(n) => format!("weak GPS ({n})"),
            SignalQuality::Good(n) => format!("good GPS ({n})"),
            SignalQuality::Excellent(n) => format!("excellent GPS ({n})"),
        }
    }
}

/// How long the trail has been quiet, bucketed for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilenceLevel {
    AwaitingFirstFix,
    Fresh,
    Stale,
    Critical,
}

impl SilenceLevel {
    pub fn from_silence(silence_ms: Option<i64>) -> Self {
        match silence_ms {
            None => SilenceLevel::AwaitingFirstFix,
            Some(ms) if ms <= FRESH_SILENCE_MS => SilenceLevel::Fresh,
            Some(ms) if ms <= STALE_SILENCE_MS => SilenceLevel::Stale,
            Some(_) => SilenceLevel::Critical,
        }
    }
}

/// Point-in-time status for a UI or CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStatus {
    pub running: bool,
    pub profile: Profile,
    pub accepted_count: u64,
    pub last_accepted_ms: Option<i64>,
    pub silence_ms: Option<i64>,
    pub silence_level: SilenceLevel,
    pub restart_count: u32,
    pub satellites_visible: u32,
    pub satellites_used: u32,
    pub signal_quality: SignalQuality,
    pub last_accuracy: Option<f32>,
    pub pending_samples: u64,
}

impl TrackingStatus {
    pub fn from_state(state: &TrackingState, now_ms: i64, pending_samples: u64) -> Self {
        let silence_ms = state.silence_ms(now_ms);
        Self {
            running: state.running,
            profile: state.profile,
            accepted_count: state.accepted_count,
            last_accepted_ms: state.last_accepted_ms,
            silence_ms,
            silence_level: SilenceLevel::from_silence(silence_ms),
            restart_count: state.restart_count,
            satellites_visible: state.satellites_visible,
            satellites_used: state.satellites_used,
            signal_quality: SignalQuality::from_satellites(state.satellites_used),
            last_accuracy: state.last_accuracy,
            pending_samples,
        }
    }
}
