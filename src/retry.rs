//! Retry policy: exponential backoff with jitter, honoring a server's
//! `Retry-After` header when present (§3 `RetryPolicy`, SPEC_FULL §3).

use crate::error::Error;
use http::HeaderMap;
use std::time::{Duration, SystemTime};
use tokio::time::sleep;

/// Schedule and budget for retrying a request (§3 `RetryPolicy`).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    /// Overall wall-clock budget across all attempts; `None` is unbounded.
    pub max_time: Option<Duration>,
    /// Response status codes that trigger a retry (§3 "set of status codes").
    pub statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
            max_time: None,
            statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

/// `WithDefaultRetry()`'s status set (§4.G): `{408, 429, 500, 502, 503, 504}`.
pub const DEFAULT_RETRY_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

impl RetryPolicy {
    /// A policy that never retries — the request is attempted exactly once.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// The `WithDefaultRetry()` builder convenience (§4.G): 3 retries, 1s
    /// base delay, the default status set.
    #[must_use]
    pub fn with_default_retry() -> Self {
        Self {
            max_attempts: 4, // 1 initial + 3 retries
            base_delay: Duration::from_secs(1),
            statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_retryable(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }
}

/// One recorded retry attempt, for diagnostics and lifecycle hooks.
#[derive(Debug, Clone)]
pub struct RetryInfo {
    pub attempt: u32,
    pub status_code: Option<u16>,
    pub delay: Duration,
    pub reason: String,
}

/// Parses a `Retry-After` header (seconds or HTTP-date), per RFC 7231.
/// Returns `None` if absent, malformed, or in the past.
#[must_use]
pub fn parse_retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?;
    parse_retry_after_value(value)
}

#[must_use]
pub fn parse_retry_after_value(value: &str) -> Option<Duration> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = httpdate::parse_http_date(value).ok()?;
    date.duration_since(SystemTime::now()).ok()
}

/// Determines if an HTTP status code is retryable: 408, 429, and 5xx
/// except 501/505 (§3 "Invariants").
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    match status {
        408 | 429 => true,
        500..=599 => !matches!(status, 501 | 505),
        _ => false,
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn exponential_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.base_delay.as_millis() as f64;
    let capped_attempt = attempt.min(30) as i32;
    let delay_ms =
        (base * policy.backoff_multiplier.powi(capped_attempt)).min(policy.max_delay.as_millis() as f64);

    let final_ms = if policy.jitter {
        delay_ms * fastrand::f64().mul_add(0.25, 1.0)
    } else {
        delay_ms
    } as u64;

    Duration::from_millis(final_ms)
}

/// Computes the delay before `attempt`, preferring a `Retry-After` value
/// over the calculated backoff when it is larger, capped at `max_delay`
/// either way (SPEC_FULL §3).
#[must_use]
pub fn next_delay(policy: &RetryPolicy, attempt: u32, retry_after: Option<Duration>) -> Duration {
    let calculated = exponential_delay(policy, attempt);
    retry_after.map_or(calculated, |server_delay| {
        calculated.max(server_delay).min(policy.max_delay)
    })
}

/// Runs `operation` under `policy`, retrying on a retryable error or status
/// until attempts or the overall time budget is exhausted.
///
/// `operation` returns `Ok((T, Option<u16>))` where the status, if present,
/// is consulted for retry eligibility even on a successful transport round
/// trip (e.g. a 503 response). A transport-level `Err` is always retryable.
///
/// `on_retry`, when given, fires between attempts (not on the final,
/// non-retried one) with the 1-based upcoming attempt number and the
/// error or status that triggered the retry — this is the single retry
/// loop the engine itself runs, so its lifecycle hook is threaded through
/// here rather than re-implemented at the call site.
///
/// # Errors
/// Returns [`Error::retry_limit_exceeded`] once attempts are exhausted, or
/// propagates a non-retryable error immediately.
pub async fn execute_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    on_retry: Option<&crate::request::RetryHook>,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<(T, Option<u16>, Option<Duration>), Error>>,
{
    let start = std::time::Instant::now();
    let mut last_error = String::new();

    for attempt in 0..policy.max_attempts {
        match operation(attempt).await {
            Ok((value, status, retry_after)) => {
                if status.is_some_and(|s| policy.is_retryable(s)) {
                    let is_last = attempt + 1 >= policy.max_attempts;
                    let err = Error::protocol_error(format!("status {}", status.unwrap()));
                    last_error = err.to_string();
                    if is_last || budget_exhausted(policy, start) {
                        break;
                    }
                    if let Some(hook) = on_retry {
                        hook(attempt + 1, &err);
                    }
                    sleep(next_delay(policy, attempt, retry_after)).await;
                    continue;
                }
                return Ok(value);
            }
            Err(err) => {
                let is_last = attempt + 1 >= policy.max_attempts;
                last_error = err.to_string();
                if is_last || budget_exhausted(policy, start) {
                    break;
                }
                if let Some(hook) = on_retry {
                    hook(attempt + 1, &err);
                }
                sleep(next_delay(policy, attempt, None)).await;
            }
        }
    }

    Err(Error::retry_limit_exceeded(policy.max_attempts, last_error))
}

fn budget_exhausted(policy: &RetryPolicy, start: std::time::Instant) -> bool {
    policy.max_time.is_some_and(|budget| start.elapsed() >= budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn exponential_backoff_without_jitter() {
        let policy = RetryPolicy {
            jitter: false,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            ..RetryPolicy::default()
        };
        assert_eq!(exponential_delay(&policy, 0).as_millis(), 100);
        assert_eq!(exponential_delay(&policy, 1).as_millis(), 200);
        assert_eq!(exponential_delay(&policy, 2).as_millis(), 400);
        assert_eq!(exponential_delay(&policy, 10).as_millis(), 1000);
    }

    #[test]
    fn retry_after_header_wins_when_larger() {
        let policy = RetryPolicy {
            jitter: false,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            ..RetryPolicy::default()
        };
        let delay = next_delay(&policy, 0, Some(Duration::from_secs(3)));
        assert_eq!(delay.as_secs(), 3);
    }

    #[test]
    fn retry_after_is_capped_at_max_delay() {
        let policy = RetryPolicy {
            jitter: false,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            ..RetryPolicy::default()
        };
        let delay = next_delay(&policy, 0, Some(Duration::from_secs(60)));
        assert_eq!(delay.as_secs(), 5);
    }

    #[test]
    fn retryable_status_table() {
        assert!(is_retryable_status(408));
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(501));
        assert!(!is_retryable_status(505));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn parse_retry_after_seconds_and_missing() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", "120".parse().unwrap());
        assert_eq!(parse_retry_after_header(&headers), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after_header(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn retry_budget_is_honored() {
        // §8 "retry budget": a policy with N max attempts makes at most N
        // attempts total (1 initial + N-1 retries), then fails.
        let policy = RetryPolicy {
            max_attempts: 3,
            jitter: false,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        };
        let calls = Cell::new(0u32);
        let result: Result<(), Error> = execute_with_retry(&policy, None, |_attempt| {
            calls.set(calls.get() + 1);
            async { Err(Error::network_error("boom")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn succeeds_without_exhausting_budget() {
        let policy = RetryPolicy::default();
        let calls = Cell::new(0u32);
        let result = execute_with_retry(&policy, None, |_attempt| {
            calls.set(calls.get() + 1);
            async { Ok::<_, Error>((42, None, None)) }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.get(), 1);
    }
}
