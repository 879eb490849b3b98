//! The rate-limited requester every other component fetches through.
//!
//! This module provides the [`Requester`] struct which issues outbound GET
//! requests while enforcing a sliding-window call budget and absorbing HTTP
//! 429 throttling responses.
//!
//! # 429 backoff is global
//!
//! When one caller receives a 429, it holds the shared backoff gate for the
//! whole `Retry-After` sleep. Every other caller re-checks that gate right
//! before dispatching, so no new request reaches the server until the backoff
//! ends and all parked callers wake together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, ClientBuilder};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::RequestError;
use super::window::RateWindow;
use crate::user_agent;

/// Connect timeout for the default client (seconds).
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Read timeout for the default client (seconds). Archive pages are small but
/// large tag listings can be slow to render server-side.
const READ_TIMEOUT_SECS: u64 = 120;

/// Maximum honored Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Configuration for a [`Requester`].
///
/// The default budget of 30 calls per 150-second window works out to one call
/// every 5 seconds sustained, which stays under the archive's observed
/// throttling threshold.
#[derive(Debug, Clone)]
pub struct RequesterConfig {
    /// Maximum calls allowed per trailing window.
    pub max_calls: usize,
    /// Window length.
    pub window: Duration,
    /// Whether 429 responses are absorbed by sleeping and retrying.
    ///
    /// When false, a 429 surfaces as [`RequestError::RateLimited`].
    pub backoff: bool,
    /// Sleep applied when a 429 carries no parseable Retry-After hint.
    pub default_retry_after: Duration,
    /// Optional rate parameter for exponentially distributed jitter before
    /// each request. `None` disables jitter.
    pub jitter_lambda: Option<f64>,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            max_calls: 30,
            window: Duration::from_secs(150),
            backoff: true,
            default_retry_after: Duration::from_secs(60),
            jitter_lambda: None,
        }
    }
}

/// Rate-limited HTTP requester.
///
/// Designed to be wrapped in `Arc` and shared by every component that needs
/// network access. The requester owns a pooled `reqwest::Client`; callers may
/// pass their own session per request (e.g. an authenticated client) and still
/// go through the shared rate limit.
///
/// The requester returns raw responses. It never interprets page content, and
/// non-429 HTTP error statuses are the caller's to classify.
#[derive(Debug)]
pub struct Requester {
    /// Default pooled client used when the caller supplies no session.
    client: Client,
    /// Sliding-window call budget shared by all callers.
    window: RateWindow,
    /// Held for the duration of a 429 sleep; all callers must pass it before
    /// dispatching, so one backoff pauses everyone.
    backoff_gate: Mutex<()>,
    config: RequesterConfig,
    /// Monotonic count of logical fetches (diagnostics only; retries within
    /// one fetch are not counted separately).
    total: AtomicU64,
}

impl Default for Requester {
    fn default() -> Self {
        Self::new(RequesterConfig::default())
    }
}

impl Requester {
    /// Creates a requester with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(config: RequesterConfig) -> Self {
        let client = build_client().expect("failed to build HTTP client with static configuration");
        Self {
            client,
            window: RateWindow::new(config.max_calls, config.window),
            backoff_gate: Mutex::new(()),
            config,
            total: AtomicU64::new(0),
        }
    }

    /// Total number of logical fetches issued through this requester.
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Number of calls recorded inside the current trailing window.
    pub async fn current_window_count(&self) -> usize {
        self.window.current_count().await
    }

    /// Issues a request, blocking until the rate window has capacity and any
    /// active 429 backoff has ended.
    ///
    /// `method` is matched case-insensitively; everything other than `HEAD`
    /// dispatches as GET, mirroring the read-only nature of the archive
    /// surface this crate covers.
    ///
    /// # Errors
    ///
    /// Returns `RequestError` if:
    /// - The URL is invalid
    /// - The request fails (network error, timeout)
    /// - The server returns 429 and backoff is disabled in the configuration
    #[instrument(skip(self, session), fields(url = %url))]
    pub async fn fetch(
        &self,
        method: &str,
        url: &str,
        session: Option<&Client>,
    ) -> Result<reqwest::Response, RequestError> {
        Url::parse(url).map_err(|_| RequestError::invalid_url(url))?;

        if let Some(lambda) = self.config.jitter_lambda {
            let jitter = exponential_jitter(lambda);
            debug!(jitter_ms = jitter.as_millis(), "applying request jitter");
            tokio::time::sleep(jitter).await;
        }

        self.total.fetch_add(1, Ordering::Relaxed);
        let client = session.unwrap_or(&self.client);

        loop {
            self.window.acquire().await;
            // Re-checked after the window wait: if another caller entered
            // backoff meanwhile, park here until it releases the gate.
            drop(self.backoff_gate.lock().await);

            let request = match method.to_ascii_uppercase().as_str() {
                "HEAD" => client.head(url),
                _ => client.get(url),
            };
            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    RequestError::timeout(url)
                } else {
                    RequestError::network(url, e)
                }
            })?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);

            if !self.config.backoff {
                return Err(RequestError::rate_limited(url, retry_after));
            }

            let wait = retry_after.unwrap_or(self.config.default_retry_after);
            warn!(
                wait_secs = wait.as_secs(),
                "rate limited by server, pausing all requests"
            );

            // Hold the gate for the whole sleep so no other caller dispatches.
            let _pause = self.backoff_gate.lock().await;
            tokio::time::sleep(wait).await;
        }
    }
}

/// Builds the default pooled client with timeouts, gzip, cookies and the
/// crate's self-identifying User-Agent.
fn build_client() -> Result<Client, reqwest::Error> {
    ClientBuilder::new()
        .user_agent(user_agent::default_user_agent())
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .read_timeout(Duration::from_secs(READ_TIMEOUT_SECS))
        .cookie_store(true)
        .build()
}

/// Samples an exponentially distributed delay with rate `lambda`.
fn exponential_jitter(lambda: f64) -> Duration {
    let u: f64 = rand::thread_rng().gen_range(f64::EPSILON..1.0);
    let secs = -u.ln() / lambda.max(f64::EPSILON);
    Duration::from_secs_f64(secs.min(MAX_RETRY_AFTER.as_secs_f64()))
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports the two formats from RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2026 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();
        if let Ok(duration) = datetime.duration_since(now) {
            if duration > MAX_RETRY_AFTER {
                warn!(
                    delay_secs = duration.as_secs(),
                    max_secs = MAX_RETRY_AFTER.as_secs(),
                    "Retry-After date exceeds maximum, capping at 1 hour"
                );
                return Some(MAX_RETRY_AFTER);
            }
            Some(duration)
        } else {
            debug!(header_value, "Retry-After date is in the past, returning zero");
            Some(Duration::ZERO)
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_zero() {
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_negative() {
        assert_eq!(parse_retry_after("-5"), None);
    }

    #[test]
    fn test_parse_retry_after_invalid() {
        assert_eq!(parse_retry_after("invalid"), None);
    }

    #[test]
    fn test_parse_retry_after_whitespace() {
        assert_eq!(parse_retry_after("  120  "), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_retry_after_http_date_past() {
        let past_date = "Wed, 01 Jan 2020 00:00:00 GMT";
        assert_eq!(parse_retry_after(past_date), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_http_date_future() {
        let future_time = std::time::SystemTime::now() + Duration::from_secs(60);
        let future_date = httpdate::fmt_http_date(future_time);

        let duration = parse_retry_after(&future_date).unwrap();
        assert!(
            duration >= Duration::from_secs(55) && duration <= Duration::from_secs(65),
            "Duration should be ~60s, got {duration:?}"
        );
    }

    #[test]
    fn test_exponential_jitter_is_bounded() {
        for _ in 0..100 {
            let jitter = exponential_jitter(5.0);
            assert!(jitter <= MAX_RETRY_AFTER);
        }
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_url() {
        let requester = Requester::new(RequesterConfig::default());
        let result = requester.fetch("GET", "not a valid url", None).await;
        assert!(matches!(result, Err(RequestError::InvalidUrl { .. })));
    }

    #[test]
    fn test_total_requests_starts_at_zero() {
        let requester = Requester::new(RequesterConfig::default());
        assert_eq!(requester.total_requests(), 0);
    }
}
