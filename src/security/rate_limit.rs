use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::ApiConfig;

/// Independent limit buckets; a client exhausting one does not affect the others
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateScope {
    Api,
    Checkout,
    QuoteRequest,
    Upload,
    AdminLogin,
}

impl RateScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateScope::Api => "api",
            RateScope::Checkout => "checkout",
            RateScope::QuoteRequest => "quote_request",
            RateScope::Upload => "upload",
            RateScope::AdminLogin => "admin_login",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl RateLimitConfig {
    /// `requests` per `window`, allowing the full amount as an initial burst
    pub fn per_window(requests: u32, window: Duration) -> Self {
        let requests = requests.max(1) as f64;
        Self {
            capacity: requests,
            refill_per_sec: requests / window.as_secs_f64().max(1.0),
        }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

/// Token buckets per `(scope, client key)`
pub struct RateLimiter {
    enabled: bool,
    limits: HashMap<RateScope, RateLimitConfig>,
    buckets: Mutex<HashMap<(RateScope, String), Bucket>>,
}

impl RateLimiter {
    pub fn new(enabled: bool, limits: HashMap<RateScope, RateLimitConfig>) -> Self {
        Self {
            enabled,
            limits,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(api: &ApiConfig) -> Self {
        let minute = Duration::from_secs(60);
        let hour = Duration::from_secs(3600);
        let limits = HashMap::from([
            (
                RateScope::Api,
                RateLimitConfig::per_window(api.rate_limit_requests, Duration::from_secs(api.rate_limit_window_secs)),
            ),
            (RateScope::Checkout, RateLimitConfig::per_window(api.checkout_limit_per_minute, minute)),
            (RateScope::QuoteRequest, RateLimitConfig::per_window(api.quote_limit_per_hour, hour)),
            (RateScope::Upload, RateLimitConfig::per_window(api.upload_limit_per_hour, hour)),
            (RateScope::AdminLogin, RateLimitConfig::per_window(api.admin_login_limit_per_minute, minute)),
        ]);
        Self::new(api.enable_rate_limiting, limits)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn check(&self, scope: RateScope, key: &str) -> Decision {
        self.check_at(scope, key, Instant::now()).await
    }

    pub async fn check_at(&self, scope: RateScope, key: &str, now: Instant) -> Decision {
        if !self.enabled {
            return Decision::Allowed;
        }
        let Some(cfg) = self.limits.get(&scope).copied() else {
            return Decision::Allowed;
        };

        let mut lock = self.buckets.lock().await;
        let bucket = lock.entry((scope, key.to_string())).or_insert_with(|| Bucket {
            tokens: cfg.capacity,
            last_refill: now,
        });
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + (elapsed * cfg.refill_per_sec)).min(cfg.capacity);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision::Allowed
        } else {
            let missing = 1.0 - bucket.tokens;
            let wait = (missing / cfg.refill_per_sec).ceil().max(1.0);
            Decision::Limited {
                retry_after_secs: wait as u64,
            }
        }
    }

    /// Forget full buckets so idle clients don't accumulate
    pub async fn prune(&self) -> usize {
        let now = Instant::now();
        let mut lock = self.buckets.lock().await;
        let before = lock.len();
        lock.retain(|(scope, _), bucket| {
            let Some(cfg) = self.limits.get(scope) else { return false };
            let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens + elapsed * cfg.refill_per_sec < cfg.capacity
        });
        before - lock.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: u32, window_secs: u64) -> RateLimiter {
        let limits = HashMap::from([
            (RateScope::Checkout, RateLimitConfig::per_window(capacity, Duration::from_secs(window_secs))),
            (RateScope::Api, RateLimitConfig::per_window(100, Duration::from_secs(60))),
        ]);
        RateLimiter::new(true, limits)
    }

    #[tokio::test]
    async fn allows_burst_then_limits() {
        let limiter = limiter(3, 60);
        let now = Instant::now();
        for _ in 0..3 {
            assert_eq!(limiter.check_at(RateScope::Checkout, "1.2.3.4", now).await, Decision::Allowed);
        }
        match limiter.check_at(RateScope::Checkout, "1.2.3.4", now).await {
            Decision::Limited { retry_after_secs } => assert_eq!(retry_after_secs, 20),
            other => panic!("expected limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn refills_over_time() {
        let limiter = limiter(1, 10);
        let start = Instant::now();
        assert_eq!(limiter.check_at(RateScope::Checkout, "k", start).await, Decision::Allowed);
        assert!(matches!(limiter.check_at(RateScope::Checkout, "k", start).await, Decision::Limited { .. }));
        let later = start + Duration::from_secs(11);
        assert_eq!(limiter.check_at(RateScope::Checkout, "k", later).await, Decision::Allowed);
    }

    #[tokio::test]
    async fn keys_and_scopes_are_independent() {
        let limiter = limiter(1, 60);
        let now = Instant::now();
        assert_eq!(limiter.check_at(RateScope::Checkout, "a", now).await, Decision::Allowed);
        assert_eq!(limiter.check_at(RateScope::Checkout, "b", now).await, Decision::Allowed);
        assert_eq!(limiter.check_at(RateScope::Api, "a", now).await, Decision::Allowed);
        // Unconfigured scopes are never limited
        assert_eq!(limiter.check_at(RateScope::Upload, "a", now).await, Decision::Allowed);
    }

    #[tokio::test]
    async fn disabled_limiter_allows_everything() {
        let limiter = RateLimiter::new(false, HashMap::new());
        for _ in 0..1000 {
            assert_eq!(limiter.check(RateScope::Api, "x").await, Decision::Allowed);
        }
    }
}
