use chrono::{DateTime, Local, TimeZone, Utc};

/// Wall clock in milliseconds since the epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Local `YYYY-MM-DD HH:MM:SS` for log lines and CLI output.
pub fn format_ms(timestamp_ms: i64) -> String {
    match Utc.timestamp_millis_opt(timestamp_ms).single() {
        Some(utc) => DateTime::<Local>::from(utc)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => format!("invalid time ({timestamp_ms})"),
    }
}

/// Compact "how long ago" text: `now`, `12min`, `3h 05min`.
pub fn format_elapsed(elapsed_ms: i64) -> String {
    let minutes = elapsed_ms.max(0) / 60_000;
    if minutes < 1 {
        "now".to_string()
    } else if minutes < 60 {
        format!("{minutes}min")
    } else {
        format!("{}h {:02}min", minutes / 60, minutes % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_text() {
        assert_eq!(format_elapsed(-5), "now");
        assert_eq!(format_elapsed(59_000), "now");
        assert_eq!(format_elapsed(12 * 60_000), "12min");
        assert_eq!(format_elapsed(185 * 60_000), "3h 05min");
    }

    #[test]
    fn out_of_range_timestamp_is_reported() {
        assert!(format_ms(i64::MAX).starts_with("invalid"));
        assert_eq!(format_ms(0).len(), 19);
    }
}
