//! Per-remote rate limiting and remote error classification.
//!
//! Every remote call first asks its limiter for a permit. The NYT client uses
//! [`AdaptiveLimiter::try_acquire`] so an exhausted local quota surfaces as
//! [`FetchError::RateLimited`] immediately and the cache can degrade instead
//! of blocking. On a 429 from the server the governor is slowed down and the
//! error is returned to the caller unchanged.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use thiserror::Error;

/// Type alias for governor's direct rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Retry hint used when a 429 carries no usable `Retry-After` header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Name of the NYT bestseller remote in [`RateLimiters`].
pub const NYT: &str = "NYT";
/// Name of the Google Books remote in [`RateLimiters`].
pub const GOOGLE_BOOKS: &str = "Google Books";
/// Name of the Wikidata remote in [`RateLimiters`].
pub const WIKIDATA: &str = "Wikidata";
/// Name of the Open Library remote in [`RateLimiters`].
pub const OPEN_LIBRARY: &str = "Open Library";

/// Error returned by a remote fetch, distinguishing rate limiting from other failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Quota exhausted, locally or by a 429 from the server.
    #[error("rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    /// Network error, bad status, timeout or malformed body.
    #[error("{0}")]
    Failed(String),
    /// The caller passed an empty cache key.
    #[error("cache key must not be empty")]
    InvalidKey,
}

impl FetchError {
    /// The retry hint, if this is a rate-limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}

impl From<String> for FetchError {
    fn from(s: String) -> Self {
        FetchError::Failed(s)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Failed(format!("request timed out: {e}"))
        } else {
            FetchError::Failed(e.to_string())
        }
    }
}

/// Rate limiter with adaptive slowdown via ArcSwap.
///
/// When a 429 is received, the governor is atomically swapped to a slower rate.
/// After a cooldown period (60s) with no 429s, the original rate is restored.
pub struct AdaptiveLimiter {
    limiter: ArcSwap<DirectLimiter>,
    /// Base period between replenished permits.
    base_period: Duration,
    burst: NonZeroU32,
    /// Current slowdown factor (1 = normal, 2 = half rate, etc.).
    current_factor: AtomicU32,
    last_429: std::sync::Mutex<Option<Instant>>,
}

impl AdaptiveLimiter {
    /// Create a limiter replenishing one permit per `period`, allowing `burst` at once.
    pub fn new(period: Duration, burst: u32) -> Self {
        let period = period.max(Duration::from_millis(1));
        let burst = NonZeroU32::new(burst.max(1)).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: ArcSwap::from(Arc::new(build_limiter(period, burst))),
            base_period: period,
            burst,
            current_factor: AtomicU32::new(1),
            last_429: std::sync::Mutex::new(None),
        }
    }

    /// Allow `n` requests per second, no burst.
    pub fn per_second(n: u32) -> Self {
        let ms = 1000 / n.max(1) as u64;
        Self::new(Duration::from_millis(ms), 1)
    }

    /// Allow `n` requests per rolling minute, all of which may be spent at once.
    pub fn per_minute(n: u32) -> Self {
        let n = n.max(1);
        Self::new(Duration::from_millis(60_000 / n as u64), n)
    }

    /// Wait until the limiter allows a request.
    pub async fn acquire(&self) {
        self.try_decay();
        let limiter = self.limiter.load();
        limiter.until_ready().await;
    }

    /// Take a permit without waiting. On refusal returns how long until one frees up.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.try_decay();
        let limiter = self.limiter.load();
        limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
    }

    /// Called when a 429 is received. Doubles the slowdown factor and swaps the governor.
    pub fn on_rate_limited(&self) {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now());
        }

        // Double factor, cap at 16x slowdown
        let _ = self
            .current_factor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                Some((f * 2).min(16))
            });

        let factor = self.current_factor.load(Ordering::SeqCst);
        if let Some(scaled) = self.base_period.checked_mul(factor) {
            self.limiter
                .store(Arc::new(build_limiter(scaled, self.burst)));
        }
    }

    /// If 60s have passed since the last 429, restore the original rate.
    fn try_decay(&self) {
        let should_restore = self
            .last_429
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.elapsed().as_secs() >= 60))
            .unwrap_or(false);

        if should_restore && self.current_factor.load(Ordering::SeqCst) > 1 {
            self.current_factor.store(1, Ordering::SeqCst);
            self.limiter
                .store(Arc::new(build_limiter(self.base_period, self.burst)));
        }
    }
}

fn build_limiter(period: Duration, burst: NonZeroU32) -> DirectLimiter {
    // `period` is clamped to >= 1ms by the constructor, so the quota always exists.
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst);
    DirectLimiter::direct(quota)
}

/// Collection of per-remote rate limiters.
pub struct RateLimiters {
    limiters: HashMap<&'static str, AdaptiveLimiter>,
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new(20)
    }
}

impl RateLimiters {
    /// Build limiters; `nyt_calls_per_minute` comes from config.
    pub fn new(nyt_calls_per_minute: u32) -> Self {
        let mut limiters = HashMap::new();

        // NYT Books API: sliding quota, several category lists fetched back to back
        limiters.insert(NYT, AdaptiveLimiter::per_minute(nyt_calls_per_minute));

        // Google Books: keyless quota is generous but bursty lookups get 429'd
        limiters.insert(GOOGLE_BOOKS, AdaptiveLimiter::per_second(2));

        // Wikidata SPARQL endpoint asks clients to stay well below 1/s
        limiters.insert(WIKIDATA, AdaptiveLimiter::new(Duration::from_millis(500), 1));

        // Open Library is only hit when Google Books has nothing
        limiters.insert(OPEN_LIBRARY, AdaptiveLimiter::per_second(1));

        Self { limiters }
    }

    /// Get the rate limiter for a given remote, if one exists.
    pub fn get(&self, name: &str) -> Option<&AdaptiveLimiter> {
        self.limiters.get(name)
    }
}

impl std::fmt::Debug for RateLimiters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.limiters.keys().collect();
        names.sort();
        f.debug_struct("RateLimiters").field("remotes", &names).finish()
    }
}

/// Check if an HTTP response is a 429 and extract Retry-After if present.
///
/// Returns `Err(FetchError::RateLimited { .. })` if 429, `Ok(())` otherwise.
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), FetchError> {
    if resp.status().as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        Err(FetchError::RateLimited { retry_after })
    } else {
        Ok(())
    }
}

/// Classify a non-success response: 429 becomes `RateLimited`, anything else `Failed`.
pub fn check_response_status(resp: &reqwest::Response) -> Result<(), FetchError> {
    check_rate_limit_response(resp)?;
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(FetchError::Failed(format!("HTTP {}", status)))
    }
}

/// Retry hint for a `Retry-After` date that is already in the past.
pub const PAST_DATE_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    retry_after_from_date(value, Utc::now())
}

/// Time from `now` until an HTTP-date `Retry-After` value.
///
/// Dates at or before `now` yield [`PAST_DATE_RETRY_AFTER`]; unparseable
/// values yield `None`.
fn retry_after_from_date(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    match (date.with_timezone(&Utc) - now).to_std() {
        Ok(wait) if !wait.is_zero() => Some(wait),
        _ => Some(PAST_DATE_RETRY_AFTER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── parse_retry_after ──────────────────────────────────────────────

    #[test]
    fn parse_integer_seconds() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
    }

    #[test]
    fn parse_padded_seconds() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
    }

    #[test]
    fn parse_http_date_relative_to_now() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2026 07:27:00 GMT")
            .unwrap()
            .with_timezone(&Utc);
        let val = "Wed, 21 Oct 2026 07:28:00 GMT";
        assert_eq!(retry_after_from_date(val, now), Some(Duration::from_secs(60)));
    }

    #[test]
    fn parse_far_future_http_date() {
        let wait = parse_retry_after("Wed, 21 Oct 2099 07:28:00 GMT").unwrap();
        assert!(wait > Duration::from_secs(50 * 365 * 24 * 3600), "got {wait:?}");
    }

    #[test]
    fn parse_past_http_date_uses_short_wait() {
        let val = "Wed, 21 Oct 2015 07:28:00 GMT";
        assert_eq!(parse_retry_after(val), Some(PAST_DATE_RETRY_AFTER));
    }

    #[test]
    fn parse_malformed_http_date_none() {
        assert_eq!(parse_retry_after("Wed, 32 Foo 2015 GMT"), None);
    }

    #[test]
    fn parse_garbage_none() {
        assert_eq!(parse_retry_after("soon"), None);
    }

    // ── response classification ────────────────────────────────────────

    #[test]
    fn ok_on_200() {
        let http_resp = http::Response::builder().status(200).body("").unwrap();
        let resp = reqwest::Response::from(http_resp);
        assert!(check_rate_limit_response(&resp).is_ok());
        assert!(check_response_status(&resp).is_ok());
    }

    #[test]
    fn rate_limited_429_without_header_uses_default() {
        let http_resp = http::Response::builder().status(429).body("").unwrap();
        let resp = reqwest::Response::from(http_resp);
        let err = check_rate_limit_response(&resp).unwrap_err();
        assert_eq!(
            err,
            FetchError::RateLimited {
                retry_after: DEFAULT_RETRY_AFTER
            }
        );
    }

    #[test]
    fn rate_limited_429_with_retry_after() {
        let http_resp = http::Response::builder()
            .status(429)
            .header("retry-after", "10")
            .body("")
            .unwrap();
        let resp = reqwest::Response::from(http_resp);
        let err = check_response_status(&resp).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn server_error_is_failed() {
        let http_resp = http::Response::builder().status(503).body("").unwrap();
        let resp = reqwest::Response::from(http_resp);
        match check_response_status(&resp).unwrap_err() {
            FetchError::Failed(msg) => assert!(msg.contains("503")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn fetch_error_display() {
        let err = FetchError::RateLimited {
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 42s");
        assert!(err.is_rate_limited());
        assert_eq!(FetchError::Failed("boom".into()).retry_after(), None);
    }

    // ── AdaptiveLimiter ────────────────────────────────────────────────

    #[test]
    fn on_rate_limited_doubles_and_caps() {
        let limiter = AdaptiveLimiter::per_second(10);
        assert_eq!(limiter.current_factor.load(Ordering::SeqCst), 1);
        limiter.on_rate_limited();
        assert_eq!(limiter.current_factor.load(Ordering::SeqCst), 2);
        for _ in 0..10 {
            limiter.on_rate_limited();
        }
        assert_eq!(limiter.current_factor.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn per_minute_burst_then_refusal() {
        let limiter = AdaptiveLimiter::per_minute(3);
        for _ in 0..3 {
            assert!(limiter.try_acquire().is_ok());
        }
        let wait = limiter.try_acquire().unwrap_err();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(20));
    }

    #[tokio::test]
    async fn acquire_completes() {
        let limiter = AdaptiveLimiter::per_second(10);
        limiter.acquire().await;
    }

    #[tokio::test]
    async fn decay_restores_after_60s() {
        let limiter = AdaptiveLimiter::per_second(10);
        limiter.on_rate_limited();
        limiter.on_rate_limited();
        assert_eq!(limiter.current_factor.load(Ordering::SeqCst), 4);

        {
            let mut last = limiter.last_429.lock().unwrap();
            *last = Some(Instant::now() - Duration::from_secs(61));
        }

        limiter.acquire().await;
        assert_eq!(limiter.current_factor.load(Ordering::SeqCst), 1);
    }

    // ── RateLimiters ───────────────────────────────────────────────────

    #[test]
    fn default_has_expected_remotes() {
        let limiters = RateLimiters::default();
        for name in [NYT, GOOGLE_BOOKS, WIKIDATA, OPEN_LIBRARY] {
            assert!(limiters.get(name).is_some(), "missing limiter for {name}");
        }
        assert!(limiters.get("Goodreads").is_none());
    }

    #[test]
    fn nyt_quota_follows_config() {
        let tight = RateLimiters::new(1);
        let nyt = tight.get(NYT).unwrap();
        assert!(nyt.try_acquire().is_ok());
        assert!(nyt.try_acquire().is_err());
    }
}
