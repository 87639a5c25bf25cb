//! Per-client rate limiting.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{body::Body, http::Request, middleware::Next, response::IntoResponse};
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::http::middleware::Middleware;
use crate::http::request::{client_ip, peer_ip};
use crate::http::response::ApiError;
use crate::observability::Logger;

/// A simple token bucket rate limiter.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token buckets keyed by client address.
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    rps: f64,
    burst: f64,
    trust_forwarded: bool,
    idle: Duration,
    last_sweep: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let rps = f64::from(config.requests_per_second);
        let burst = f64::from(config.burst_size);
        // A bucket idle for burst/rps seconds is full again, so dropping it
        // earlier would hand out extra tokens.
        let refill = Duration::try_from_secs_f64(burst / rps).unwrap_or(Duration::MAX);
        Self {
            buckets: DashMap::new(),
            rps,
            burst,
            trust_forwarded: config.trust_forwarded_headers,
            idle: Duration::from_secs(config.idle_timeout_secs).max(refill),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Bucket key for `request`: the socket peer, or the forwarded client
    /// address when forwarding headers are trusted.
    pub fn key<B>(&self, request: &Request<B>) -> String {
        if self.trust_forwarded {
            client_ip(request)
        } else {
            peer_ip(request).unwrap_or_default()
        }
    }

    /// Take one token for `key`; false when the bucket is empty.
    pub fn check(&self, key: &str) -> bool {
        self.evict_idle();
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst));
        bucket.try_acquire(self.burst, self.rps)
    }

    /// Drop buckets untouched for the idle window, at most once per window.
    fn evict_idle(&self) {
        let Ok(mut last) = self.last_sweep.try_lock() else { return };
        let now = Instant::now();
        if now.duration_since(*last) < self.idle {
            return;
        }
        *last = now;
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_update) < self.idle);
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

/// Middleware for the `rate_limit` registry entry.
pub fn rate_limit(limiter: Arc<RateLimiter>, logger: Logger) -> Middleware {
    Middleware::from_fn(move |request: Request<Body>, next: Next| {
        let limiter = Arc::clone(&limiter);
        let logger = logger.clone();
        async move {
            let key = limiter.key(&request);
            if limiter.check(&key) {
                next.run(request).await
            } else {
                logger.with_field("client_ip", key).warn("rate limit exceeded");
                ApiError::too_many_requests().into_response()
            }
        }
    })
}
