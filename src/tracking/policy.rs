//! Accept/reject policy for raw fixes.
//!
//! Every evaluation yields exactly one [`Attempt`]; only accepted fixes also
//! yield a [`Sample`]. The function is pure: callers supply the clock and the
//! last-accepted timestamp and apply the resulting writes themselves.

use crate::db::{Attempt, AttemptStatus, Sample};

use super::provider::{Fix, ProviderError};

/// Below this radius a fix is always kept.
pub const EXCELLENT_ACCURACY_M: f32 = 30.0;
/// Upper bound (inclusive) of the acceptable band.
pub const ACCEPTABLE_ACCURACY_M: f32 = 100.0;
/// A poor fix is still kept once the trail has been silent this long.
pub const EMERGENCY_WINDOW_MS: i64 = 5 * 60 * 1000;

pub const REASON_EXCELLENT: &str = "excellent precision";
pub const REASON_ACCEPTABLE: &str = "acceptable precision";
pub const REASON_EMERGENCY: &str = "accepted as emergency fallback";
pub const REASON_DISCARDED: &str = "discarded, still within emergency window";
pub const REASON_NO_ACCURACY: &str = "no accuracy reported";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyInput {
    /// Capture time of the last accepted sample in this session.
    pub last_accepted_ms: Option<i64>,
    pub satellites_used: u32,
    pub battery: Option<u8>,
    /// Decision time stamped on the attempt.
    pub now_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: AttemptStatus,
    pub attempt: Attempt,
    pub sample: Option<Sample>,
}

impl Evaluation {
    pub fn accepted(&self) -> bool {
        self.sample.is_some()
    }
}

pub fn evaluate(fix: &Fix, input: &PolicyInput) -> Evaluation {
    let Some(accuracy) = fix.usable_accuracy() else {
        return Evaluation {
            decision: AttemptStatus::NoSignal,
            attempt: attempt(input, None, AttemptStatus::NoSignal, REASON_NO_ACCURACY.into()),
            sample: None,
        };
    };

    let (decision, reason, keep) = if accuracy < EXCELLENT_ACCURACY_M {
        (AttemptStatus::Success, REASON_EXCELLENT.to_string(), true)
    } else if accuracy <= ACCEPTABLE_ACCURACY_M {
        (AttemptStatus::Success, REASON_ACCEPTABLE.to_string(), true)
    } else {
        match input.last_accepted_ms.map(|last| fix.time_ms.saturating_sub(last)) {
            None => (
                AttemptStatus::PoorAccuracy,
                format!("{REASON_EMERGENCY} ({accuracy:.0} m, first sample of session)"),
                true,
            ),
            Some(elapsed) if elapsed > EMERGENCY_WINDOW_MS => (
                AttemptStatus::PoorAccuracy,
                format!(
                    "{REASON_EMERGENCY} ({accuracy:.0} m, {}s since last sample)",
                    elapsed / 1000
                ),
                true,
            ),
            Some(elapsed) => (
                AttemptStatus::PoorAccuracy,
                format!(
                    "{REASON_DISCARDED} ({accuracy:.0} m, {}s since last sample)",
                    elapsed.max(0) / 1000
                ),
                false,
            ),
        }
    };

    let sample = keep.then(|| Sample {
        id: None,
        latitude: fix.latitude,
        longitude: fix.longitude,
        altitude: fix.altitude.unwrap_or(0.0),
        accuracy,
        speed: fix.speed.unwrap_or(0.0),
        bearing: fix.bearing.unwrap_or(0.0),
        timestamp_ms: fix.time_ms,
        battery: input.battery,
        synced: false,
    });

    Evaluation {
        decision,
        attempt: attempt(input, Some(accuracy), decision, reason),
        sample,
    }
}

/// Attempt logged when the provider reports a fault instead of a fix.
pub fn provider_fault_attempt(error: &ProviderError, satellites_used: u32, now_ms: i64) -> Attempt {
    Attempt {
        id: None,
        timestamp_ms: now_ms,
        satellites: satellites_used,
        accuracy: None,
        status: AttemptStatus::NoSignal,
        reason: error.to_string(),
    }
}

fn attempt(
    input: &PolicyInput,
    accuracy: Option<f32>,
    status: AttemptStatus,
    reason: String,
) -> Attempt {
    Attempt {
        id: None,
        timestamp_ms: input.now_ms,
        satellites: input.satellites_used,
        accuracy,
        status,
        reason,
    }
}
