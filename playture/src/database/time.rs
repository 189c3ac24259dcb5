//! Timestamp helpers for the database layer.
//!
//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC).

use chrono::Utc;

/// Current time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Milliseconds elapsed between `start_ms` and `end_ms`, never negative.
#[inline]
pub fn elapsed_ms(start_ms: i64, end_ms: i64) -> i64 {
    end_ms.saturating_sub(start_ms).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_clamps() {
        assert_eq!(elapsed_ms(1_000, 4_500), 3_500);
        assert_eq!(elapsed_ms(5_000, 4_000), 0);
    }
}
