//! Time sources for the aggregation pipeline.
//!
//! Two kinds of time flow through the system: rounded wall-clock
//! timestamps that identify a period on the grid, and a wrapping
//! monotonic millisecond counter used to compute exact durations. The
//! counter wraps after ~49.7 days, so a finished duration is only valid
//! for periods shorter than half of that.

use chrono::{DateTime, Timelike, Utc};
use once_cell::sync::Lazy;
use std::time::Instant;

static ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Current monotonic tick, in milliseconds since process start,
/// truncated to 32 bits.
#[inline]
pub fn precise_ms() -> u32 {
    ORIGIN.elapsed().as_millis() as u32
}

/// Duration in milliseconds between two wrapping ticks.
#[inline]
pub fn duration_ms(start: u32, end: u32) -> u32 {
    end.wrapping_sub(start)
}

/// Round a timestamp down to whole seconds.
pub fn round_down_to_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Round a timestamp down to the start of its minute.
pub fn round_down_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    round_down_to_second(ts).with_second(0).unwrap_or(ts)
}

/// Rebuild a timestamp from epoch milliseconds, falling back to the
/// epoch itself for out-of-range input.
pub fn timestamp_from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_precise_ms_advances() {
        let a = precise_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = precise_ms();
        assert!(duration_ms(a, b) >= 5);
    }

    #[test]
    fn test_duration_wraps() {
        assert_eq!(duration_ms(u32::MAX - 10, 20), 31);
        assert_eq!(duration_ms(100, 100), 0);
    }

    #[test]
    fn test_rounding() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 10, 17, 42).unwrap()
            + chrono::Duration::milliseconds(357);
        let sec = round_down_to_second(ts);
        assert_eq!(sec.timestamp_subsec_millis(), 0);
        assert_eq!(sec.second(), 42);

        let min = round_down_to_minute(ts);
        assert_eq!(min.second(), 0);
        assert_eq!(min.minute(), 17);
    }

    #[test]
    fn test_timestamp_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 10, 17, 42).unwrap();
        assert_eq!(timestamp_from_ms(ts.timestamp_millis()), ts);
    }
}
