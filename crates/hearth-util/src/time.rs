//! Time utilities for hearthd
//!
//! Screen-time budgets and spend limits are reset at local midnight and on
//! the first of the month, so day/month boundaries are computed in the local
//! timezone.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `HEARTH_MOCK_TIME` environment variable overrides the
//! system time for all time-sensitive operations. Mock time advances at the
//! real rate from the given starting point.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 14:30:00`)

use chrono::{DateTime, Datelike, Local, Months, NaiveDate, NaiveDateTime, TimeZone};
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "HEARTH_MOCK_TIME";

const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // wraps Local::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let raw = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            let Ok(naive) = NaiveDateTime::parse_from_str(&raw, MOCK_TIME_FORMAT) else {
                tracing::warn!(
                    mock_time = %raw,
                    expected_format = MOCK_TIME_FORMAT,
                    "Invalid mock time format"
                );
                return None;
            };
            let Some(mock_dt) = Local.from_local_datetime(&naive).single() else {
                tracing::warn!(mock_time = %raw, "Mock time is ambiguous in local timezone");
                return None;
            };
            let offset = mock_dt.signed_duration_since(chrono::Local::now());
            tracing::info!(mock_time = %raw, offset_secs = offset.num_seconds(), "Mock time enabled");
            Some(offset)
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Current local time, respecting `HEARTH_MOCK_TIME` in debug builds.
#[allow(clippy::disallowed_methods)]
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();
    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Local midnight at the start of the day containing `dt`.
pub fn start_of_day(dt: &DateTime<Local>) -> DateTime<Local> {
    local_midnight(dt.date_naive()).unwrap_or(*dt)
}

/// Local midnight on the first day of the month containing `dt`.
pub fn start_of_month(dt: &DateTime<Local>) -> DateTime<Local> {
    dt.date_naive()
        .with_day(1)
        .and_then(local_midnight)
        .unwrap_or_else(|| start_of_day(dt))
}

/// Local midnight at the start of the day after the one containing `dt`.
pub fn start_of_next_day(dt: &DateTime<Local>) -> DateTime<Local> {
    dt.date_naive()
        .succ_opt()
        .and_then(local_midnight)
        .unwrap_or_else(|| *dt + chrono::Duration::days(1))
}

/// Local midnight on the first day of the month after the one containing `dt`.
pub fn start_of_next_month(dt: &DateTime<Local>) -> DateTime<Local> {
    dt.date_naive()
        .with_day(1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .and_then(local_midnight)
        .unwrap_or_else(|| start_of_next_day(dt))
}

fn local_midnight(day: NaiveDate) -> Option<DateTime<Local>> {
    let naive = day.and_hms_opt(0, 0, 0)?;
    // DST transitions can make midnight ambiguous; take the earliest instant
    Local.from_local_datetime(&naive).earliest()
}

/// Non-negative wall-clock span between two instants.
pub fn elapsed_between(start: &DateTime<Local>, end: &DateTime<Local>) -> Duration {
    end.signed_duration_since(*start)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn start_of_day_is_local_midnight() {
        let dt = Local.with_ymd_and_hms(2025, 12, 26, 15, 42, 7).unwrap();
        let sod = start_of_day(&dt);
        assert_eq!(sod.date_naive(), dt.date_naive());
        assert_eq!((sod.hour(), sod.minute(), sod.second()), (0, 0, 0));
    }

    #[test]
    fn start_of_month_is_first_day() {
        let dt = Local.with_ymd_and_hms(2025, 12, 26, 15, 0, 0).unwrap();
        let som = start_of_month(&dt);
        assert_eq!(som.day(), 1);
        assert_eq!(som.month(), 12);
        assert_eq!(som.hour(), 0);
    }

    #[test]
    fn next_boundaries_roll_over() {
        let dt = Local.with_ymd_and_hms(2025, 12, 31, 23, 59, 0).unwrap();
        let next_day = start_of_next_day(&dt);
        assert_eq!((next_day.year(), next_day.month(), next_day.day()), (2026, 1, 1));
        assert_eq!(next_day.hour(), 0);

        let next_month = start_of_next_month(&dt);
        assert_eq!(next_month, next_day);
    }

    #[test]
    fn elapsed_between_never_negative() {
        let a = Local.with_ymd_and_hms(2025, 12, 26, 15, 0, 0).unwrap();
        let b = a + chrono::Duration::minutes(5);
        assert_eq!(elapsed_between(&a, &b), Duration::from_secs(300));
        assert_eq!(elapsed_between(&b, &a), Duration::ZERO);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn now_advances() {
        let t1 = now();
        std::thread::sleep(Duration::from_millis(20));
        assert!(now() > t1);
    }
}
