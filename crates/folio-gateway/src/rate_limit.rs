use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter keyed by client and route.
pub struct RateLimiter {
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    /// - `max_tokens`: maximum burst size
    /// - `refill_rate`: tokens added per second
    pub fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            max_tokens,
            refill_rate,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Allow `requests` per minute per key, all of them usable as a burst.
    pub fn per_minute(requests: u32) -> Self {
        let requests = f64::from(requests);
        Self::new(requests, requests / 60.0)
    }

    /// Try to consume one token for `key`.
    /// Returns `true` if allowed, `false` if rate limited.
    pub async fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.max_tokens,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.max_tokens);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Remove buckets with no activity for `max_idle`.
    pub async fn cleanup(&self, max_idle: Duration) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, b| now.duration_since(b.last_refill) < max_idle);
    }
}

/// Client address: the socket peer when the server records it, else the
/// first `x-forwarded-for` hop.
fn client_key(request: &Request) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rejects requests over the limit with `429`. Each route has its own bucket
/// per client.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = format!("{}:{}", client_key(&request), request.uri().path());

    if !limiter.check(&key).await {
        warn!(key = %key, "Rate limited request");
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
    }

    next.run(request).await
}
