//! Cooperative rate-limit gate over the tracked per-endpoint counters.
//!
//! The gate is consulted before every outbound call and fed the observed
//! response headers afterwards. It is cooperative, not hard: two workers
//! can both read `remaining = 1` and proceed. Upstream APIs answer with
//! 429 and the tracked headers converge.

use crate::store;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde_json::{Value, json};
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The wait inside [`RateLimitGate::check`] never exceeds one lease
/// duration, so a blocked handler cannot outlive its own claim by much.
const MAX_WAIT: Duration = Duration::from_secs(store::LEASE_MINUTES as u64 * 60);

/// Per `(api, endpoint)` token gate consulting the store.
#[derive(Clone)]
pub struct RateLimitGate {
    pool: PgPool,
    shutdown: CancellationToken,
}

impl RateLimitGate {
    /// Creates a gate over `pool`, honoring `shutdown` during waits.
    pub fn new(pool: PgPool, shutdown: CancellationToken) -> Self {
        Self { pool, shutdown }
    }

    /// Returns whether a call to `(api_name, endpoint)` may proceed.
    ///
    /// Untracked endpoints and open windows pass immediately. An exhausted
    /// window with a future `reset_at` blocks until the reset (capped at
    /// [`MAX_WAIT`]); a shutdown during the wait refuses the call instead.
    /// This wait is the only blocking operation in the engine below
    /// handler level.
    pub async fn check(&self, api_name: &str, endpoint: &str) -> sqlx::Result<bool> {
        let Some(limit) = store::get_rate_limit(&self.pool, api_name, endpoint).await? else {
            return Ok(true);
        };

        if limit.requests_remaining > 0 {
            return Ok(true);
        }

        let Some(reset_at) = limit.reset_at else {
            return Ok(true);
        };

        let now = Utc::now();
        if reset_at <= now {
            return Ok(true);
        }

        let wait = (reset_at - now).to_std().unwrap_or(MAX_WAIT).min(MAX_WAIT);
        debug!(
            api = api_name,
            endpoint,
            wait_secs = wait.as_secs(),
            "rate limit exhausted, waiting for reset"
        );

        tokio::select! {
            _ = self.shutdown.cancelled() => Ok(false),
            _ = tokio::time::sleep(wait) => Ok(true),
        }
    }

    /// Records observed rate-limit state after an outbound call.
    pub async fn update(
        &self,
        api_name: &str,
        endpoint: &str,
        observed: &ObservedRateLimit,
    ) -> sqlx::Result<()> {
        store::track_rate_limit(
            &self.pool,
            api_name,
            endpoint,
            observed.remaining,
            observed.limit,
            observed.reset_at,
            Some(observed.snapshot()),
        )
        .await
    }

    /// Extracts and records whatever rate-limit headers a response carried.
    /// Responses without them leave the tracked state untouched.
    pub async fn record_headers(
        &self,
        api_name: &str,
        endpoint: &str,
        headers: &HeaderMap,
    ) -> sqlx::Result<()> {
        if let Some(observed) = ObservedRateLimit::from_headers(headers) {
            self.update(api_name, endpoint, &observed).await?;
        }
        Ok(())
    }
}

/// Rate-limit state parsed out of response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRateLimit {
    /// Requests left in the current window.
    pub remaining: i32,
    /// Window size; zero when the API does not report one.
    pub limit: i32,
    /// When the window resets, if reported.
    pub reset_at: Option<DateTime<Utc>>,
}

impl ObservedRateLimit {
    /// Parses the `x-ratelimit-*` family, with `retry-after` (seconds)
    /// filling in the reset when no epoch header is present. Returns `None`
    /// when the response carries no remaining-count at all.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let remaining = header_i64(headers, "x-ratelimit-remaining")?;
        let limit = header_i64(headers, "x-ratelimit-limit").unwrap_or(0);
        let reset_at = header_i64(headers, "x-ratelimit-reset")
            .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single())
            .or_else(|| {
                header_i64(headers, "retry-after")
                    .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
            });

        Some(Self {
            remaining: remaining as i32,
            limit: limit as i32,
            reset_at,
        })
    }

    fn snapshot(&self) -> Value {
        json!({
            "remaining": self.remaining,
            "limit": self.limit,
            "reset_at": self.reset_at,
        })
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                reqwest::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn parses_ratelimit_headers() {
        let observed = ObservedRateLimit::from_headers(&headers(&[
            ("x-ratelimit-remaining", "17"),
            ("x-ratelimit-limit", "100"),
            ("x-ratelimit-reset", "1735689600"),
        ]))
        .unwrap();

        assert_eq!(observed.remaining, 17);
        assert_eq!(observed.limit, 100);
        assert_eq!(
            observed.reset_at,
            Utc.timestamp_opt(1_735_689_600, 0).single()
        );
    }

    #[test]
    fn retry_after_fills_in_the_reset() {
        let observed = ObservedRateLimit::from_headers(&headers(&[
            ("x-ratelimit-remaining", "0"),
            ("retry-after", "30"),
        ]))
        .unwrap();

        assert_eq!(observed.remaining, 0);
        let reset_at = observed.reset_at.unwrap();
        let delta = reset_at - Utc::now();
        assert!(delta.num_seconds() >= 28 && delta.num_seconds() <= 31);
    }

    #[test]
    fn responses_without_headers_are_ignored() {
        assert_eq!(
            ObservedRateLimit::from_headers(&headers(&[("content-type", "application/json")])),
            None
        );
    }
}
