/// Security module for the credential endpoints
/// Features:
/// - Per-client rate limiting (credential stuffing and reset-mail flooding)
/// - Request body size cap
/// - Security headers on every response

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use actix_web::HttpRequest;

use crate::error::AppError;

/// Configuration for rate limiting
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Max requests per minute per client address
    pub requests_per_minute: u32,
    /// Max JSON body size in bytes
    pub max_content_length: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 10,
            max_content_length: 4096,
        }
    }
}

/// Token bucket refilled continuously at `requests_per_minute / 60` per second
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    capacity: u32,
    refill_rate: f64,
}

impl TokenBucket {
    fn new(capacity: u32, requests_per_minute: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: Instant::now(),
            capacity,
            refill_rate: requests_per_minute as f64 / 60.0,
        }
    }

    fn try_take_token(&mut self) -> bool {
        let now = Instant::now();
        let elapsed_secs = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed_secs * self.refill_rate).min(self.capacity as f64);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// A bucket idle this long has refilled completely and can be dropped.
const IDLE_BUCKET_TTL: Duration = Duration::from_secs(60);

struct Buckets {
    by_client: HashMap<String, TokenBucket>,
    last_sweep: Instant,
}

impl Buckets {
    /// Drop every bucket untouched for `IDLE_BUCKET_TTL`, at most once per TTL.
    fn evict_idle(&mut self, now: Instant) {
        if now.duration_since(self.last_sweep) < IDLE_BUCKET_TTL {
            return;
        }
        let before = self.by_client.len();
        self.by_client
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < IDLE_BUCKET_TTL);
        self.last_sweep = now;

        let evicted = before - self.by_client.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.by_client.len(), "Evicted idle rate limit buckets");
        }
    }
}

/// Rate limiter manager - tracks one bucket per client address
pub struct RateLimiterManager {
    config: RateLimitConfig,
    buckets: Mutex<Buckets>,
}

impl RateLimiterManager {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(Buckets {
                by_client: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Check if a request from `client` is allowed
    pub fn check_rate_limit(&self, client: &str) -> Result<(), AppError> {
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buckets.evict_idle(Instant::now());

        let requests_per_minute = self.config.requests_per_minute;
        let limiter = buckets
            .by_client
            .entry(client.to_string())
            .or_insert_with(|| TokenBucket::new(requests_per_minute, requests_per_minute));

        if limiter.try_take_token() {
            Ok(())
        } else {
            tracing::warn!(client = %client, "Rate limit exceeded");
            Err(AppError::RateLimited(format!(
                "Rate limit exceeded: max {} requests per minute",
                requests_per_minute
            )))
        }
    }
}

/// Client address used for rate limiting and the audit trail.
pub fn client_addr(req: &HttpRequest) -> Option<String> {
    req.peer_addr().map(|addr| addr.ip().to_string())
}

/// Security headers for HTTP responses
pub struct SecurityHeaders;

impl SecurityHeaders {
    pub fn get_headers() -> Vec<(&'static str, &'static str)> {
        vec![
            ("X-Content-Type-Options", "nosniff"),
            ("X-Frame-Options", "DENY"),
            ("Referrer-Policy", "no-referrer"),
            ("Cache-Control", "no-store"),
            ("Content-Security-Policy", "default-src 'none'; frame-ancestors 'none'"),
            ("Strict-Transport-Security", "max-age=31536000; includeSubDomains"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(requests_per_minute: u32) -> RateLimiterManager {
        RateLimiterManager::new(RateLimitConfig {
            requests_per_minute,
            max_content_length: 1024,
        })
    }

    #[test]
    fn test_rate_limiter_allows_initial_requests() {
        let manager = manager(3);
        for _ in 0..3 {
            assert!(manager.check_rate_limit("127.0.0.1").is_ok());
        }
    }

    #[test]
    fn test_rate_limiter_blocks_after_capacity() {
        let manager = manager(2);
        assert!(manager.check_rate_limit("10.0.0.1").is_ok());
        assert!(manager.check_rate_limit("10.0.0.1").is_ok());
        assert!(matches!(
            manager.check_rate_limit("10.0.0.1"),
            Err(AppError::RateLimited(_))
        ));

        // Other clients have their own bucket
        assert!(manager.check_rate_limit("10.0.0.2").is_ok());
    }

    #[test]
    fn test_idle_buckets_are_evicted() {
        let manager = manager(2);
        for i in 0..100 {
            manager.check_rate_limit(&format!("10.1.0.{}", i)).unwrap();
        }

        let mut buckets = manager.buckets.lock().unwrap();
        assert_eq!(buckets.by_client.len(), 100);

        // Too soon for a sweep
        buckets.evict_idle(Instant::now());
        assert_eq!(buckets.by_client.len(), 100);

        buckets.evict_idle(Instant::now() + Duration::from_secs(61));
        assert!(buckets.by_client.is_empty());
    }

    #[test]
    fn test_eviction_keeps_recent_buckets() {
        let manager = manager(2);
        manager.check_rate_limit("10.2.0.1").unwrap();

        let mut buckets = manager.buckets.lock().unwrap();
        let now = Instant::now() + Duration::from_secs(61);
        buckets
            .by_client
            .insert("10.2.0.2".to_string(), TokenBucket {
                tokens: 0.0,
                last_refill: now,
                capacity: 2,
                refill_rate: 2.0 / 60.0,
            });

        buckets.evict_idle(now);
        assert!(!buckets.by_client.contains_key("10.2.0.1"));
        assert!(buckets.by_client.contains_key("10.2.0.2"));
    }

    #[test]
    fn test_security_headers() {
        let names: Vec<_> = SecurityHeaders::get_headers()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert!(names.contains(&"X-Content-Type-Options"));
        assert!(names.contains(&"Cache-Control"));
    }
}
