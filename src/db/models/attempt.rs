//! Attempt log records.
//!
//! One record per classification decision or watchdog restart. Records are
//! never updated; they are only removed in bulk.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    PoorAccuracy,
    NoSignal,
    Timeout,
}

impl AttemptStatus {
    pub const ALL: [AttemptStatus; 4] = [
        AttemptStatus::Success,
        AttemptStatus::PoorAccuracy,
        AttemptStatus::NoSignal,
        AttemptStatus::Timeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::PoorAccuracy => "poor_accuracy",
            AttemptStatus::NoSignal => "no_signal",
            AttemptStatus::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: Option<i64>,
    /// Decision time, milliseconds since the epoch.
    pub timestamp_ms: i64,
    pub satellites: u32,
    /// Accuracy radius in meters, `None` when unknown.
    pub accuracy: Option<f32>,
    pub status: AttemptStatus,
    pub reason: String,
}

/// Attempt counts grouped by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptStats {
    pub success: u64,
    pub poor_accuracy: u64,
    pub no_signal: u64,
    pub timeout: u64,
}

impl AttemptStats {
    pub fn total(&self) -> u64 {
        self.success + self.poor_accuracy + self.no_signal + self.timeout
    }

    pub fn get(&self, status: AttemptStatus) -> u64 {
        match status {
            AttemptStatus::Success => self.success,
            AttemptStatus::PoorAccuracy => self.poor_accuracy,
            AttemptStatus::NoSignal => self.no_signal,
            AttemptStatus::Timeout => self.timeout,
        }
    }

    pub(crate) fn add(&mut self, status: AttemptStatus, count: u64) {
        match status {
            AttemptStatus::Success => self.success += count,
            AttemptStatus::PoorAccuracy => self.poor_accuracy += count,
            AttemptStatus::NoSignal => self.no_signal += count,
            AttemptStatus::Timeout => self.timeout += count,
        }
    }

    /// Share of attempts that produced a sample, in `0.0..=1.0`.
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.success as f64 / total as f64
        }
    }
}
