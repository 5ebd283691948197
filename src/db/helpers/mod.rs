use std::convert::TryFrom;

use anyhow::{anyhow, Result};

use crate::db::models::AttemptStatus;

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} value {value} out of range"))
}

/// Battery levels outside 0..=100 (including the legacy -1 marker) read as unavailable.
pub fn parse_battery(value: Option<i64>) -> Option<u8> {
    value
        .filter(|level| (0..=100).contains(level))
        .map(|level| level as u8)
}

pub fn parse_attempt_status(value: &str) -> Result<AttemptStatus> {
    match value {
        "success" => Ok(AttemptStatus::Success),
        "poor_accuracy" => Ok(AttemptStatus::PoorAccuracy),
        "no_signal" => Ok(AttemptStatus::NoSignal),
        "timeout" => Ok(AttemptStatus::Timeout),
        other => Err(anyhow!("unknown attempt status {other}")),
    }
}

/// `?1, ?2, ..., ?n` for an `IN (...)` clause.
pub fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}
