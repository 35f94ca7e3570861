//! Fixed-window rate limiting keyed by client, method and path.
//!
//! A window starts with the first request from a key and resets wholesale
//! once it expires, so a client can send up to `2 × quota` requests across a
//! window boundary.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;

use crate::AppState;
use crate::error::GatewayError;

/// Requests allowed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub quota: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    #[must_use]
    pub fn new(quota: u32, window: Duration) -> Self {
        Self { quota, window }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub client: String,
    pub method: String,
    pub path: String,
}

impl RateLimitKey {
    pub fn new(
        client: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            client: client.into(),
            method: method.into(),
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Instant,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, rounded up.
    #[must_use]
    pub fn reset_after_secs(&self, now: Instant) -> u64 {
        let left = self.reset_at.saturating_duration_since(now);
        left.as_millis().div_ceil(1000).try_into().unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowRecord {
    count: u32,
    reset_at: Instant,
}

/// In-memory fixed-window counter.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    records: Mutex<HashMap<RateLimitKey, WindowRecord>>,
    sweep_threshold: usize,
}

impl FixedWindowRateLimiter {
    /// `sweep_threshold` is the map size above which expired records are
    /// dropped on the next check.
    #[must_use]
    pub fn new(sweep_threshold: usize) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            sweep_threshold,
        }
    }

    pub fn check(&self, key: &RateLimitKey, policy: RateLimitPolicy) -> RateLimitDecision {
        self.check_at(key, policy, Instant::now())
    }

    pub fn check_at(
        &self,
        key: &RateLimitKey,
        policy: RateLimitPolicy,
        now: Instant,
    ) -> RateLimitDecision {
        let mut records = self.records.lock();
        if records.len() > self.sweep_threshold {
            records.retain(|_, r| now <= r.reset_at);
        }

        let decision = |allowed, count: u32, reset_at| RateLimitDecision {
            allowed,
            limit: policy.quota,
            remaining: policy.quota.saturating_sub(count),
            reset_at,
        };

        if policy.quota == 0 {
            return decision(false, 0, now + policy.window);
        }

        match records.get_mut(key) {
            Some(record) if now <= record.reset_at => {
                if record.count < policy.quota {
                    record.count += 1;
                    decision(true, record.count, record.reset_at)
                } else {
                    decision(false, record.count, record.reset_at)
                }
            }
            _ => {
                let record = WindowRecord {
                    count: 1,
                    reset_at: now + policy.window,
                };
                records.insert(key.clone(), record);
                decision(true, 1, record.reset_at)
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

/// Client address: peer IP, else the first `X-Forwarded-For` hop, else
/// `X-Real-IP`.
fn client_key(req: &Request) -> String {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    let headers = req.headers();
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| header("x-real-ip"))
        .unwrap_or("unknown")
        .to_string()
}

fn set_headers(headers: &mut HeaderMap, decision: &RateLimitDecision, now: Instant) {
    let pairs = [
        ("x-ratelimit-limit", u64::from(decision.limit)),
        ("x-ratelimit-remaining", u64::from(decision.remaining)),
        ("x-ratelimit-reset", decision.reset_after_secs(now)),
    ];
    for (name, value) in pairs {
        if let Ok(v) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(name, v);
        }
    }
}

/// Middleware enforcing the configured per-route policies.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let settings = &state.config.resilience;
    if !settings.rate_limit_enabled {
        return Ok(next.run(req).await);
    }

    let key = RateLimitKey::new(client_key(&req), req.method().as_str(), req.uri().path());
    let policy = settings.rate_limit.policy_for(&key.path);
    let now = Instant::now();
    let decision = state.rate_limiter.check_at(&key, policy, now);

    if !decision.allowed {
        tracing::warn!(
            name: "rate_limit.denied",
            client = %key.client,
            method = %key.method,
            path = %key.path,
            limit = decision.limit,
            "rate limit exceeded"
        );
        return Err(GatewayError::RateLimitExceeded {
            retry_after_secs: decision.reset_after_secs(now).max(1),
        });
    }

    let mut response = next.run(req).await;
    set_headers(response.headers_mut(), &decision, now);
    Ok(response)
}
