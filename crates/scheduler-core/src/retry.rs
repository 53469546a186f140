//! Retry backoff for failed job runs (spec §4.I Retries).

use std::time::Duration;

/// Delay before attempt `attempt` (1-indexed) of a job whose manifest sets
/// `retry_backoff_ms`: `retry_backoff_ms * 2^(attempt-1)`. Attempt 1 is the first retry
/// after the initial failed run, not the initial run itself.
pub fn retry_backoff(attempt: u32, retry_backoff_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let multiplier = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    Duration::from_millis(retry_backoff_ms.saturating_mul(multiplier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        assert_eq!(retry_backoff(1, 1_000), Duration::from_millis(1_000));
        assert_eq!(retry_backoff(2, 1_000), Duration::from_millis(2_000));
        assert_eq!(retry_backoff(3, 1_000), Duration::from_millis(4_000));
        assert_eq!(retry_backoff(4, 1_000), Duration::from_millis(8_000));
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        let backoff = retry_backoff(128, 1_000);
        assert_eq!(backoff, Duration::from_millis(u64::MAX));
    }
}
