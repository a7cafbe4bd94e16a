//! Per-target retry backoff

use rand::Rng;
use std::time::Duration;

use crate::core::types::RetryPolicy;

const BASE_DELAY: Duration = Duration::from_millis(250);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Delay before the given retry attempt (zero-based)
///
/// Exponential backoff with full jitter, capped at ten seconds. When the
/// upstream supplied `Retry-After` and the policy honors it, that wins.
pub fn backoff_delay(
    policy: &RetryPolicy,
    attempt: u32,
    retry_after: Option<Duration>,
) -> Duration {
    if policy.use_retry_after_header {
        if let Some(hinted) = retry_after {
            return hinted.min(MAX_DELAY);
        }
    }

    let exponential = BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_DELAY);
    let jitter_ms = rand::thread_rng().gen_range(0..=exponential.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

/// Parse a `Retry-After` header value (delta-seconds form)
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value?.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(use_header: bool) -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            on_status_codes: vec![429, 503],
            use_retry_after_header: use_header,
        }
    }

    #[test]
    fn retry_after_wins_when_honored() {
        let delay = backoff_delay(&policy(true), 0, Some(Duration::from_secs(3)));
        assert_eq!(delay, Duration::from_secs(3));
    }

    #[test]
    fn retry_after_ignored_when_not_honored() {
        // With jitter the delay is bounded by the exponential window
        let delay = backoff_delay(&policy(false), 0, Some(Duration::from_secs(60)));
        assert!(delay <= BASE_DELAY);
    }

    #[test]
    fn backoff_window_grows_and_caps() {
        for attempt in 0..12 {
            let delay = backoff_delay(&policy(false), attempt, None);
            assert!(delay <= MAX_DELAY);
        }
    }

    #[test]
    fn header_parsing() {
        assert_eq!(parse_retry_after(Some("5")), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(Some("not-a-number")), None);
        assert_eq!(parse_retry_after(None), None);
    }
}
