//! Rate limiting middleware
//!
//! Per-caller-IP request limiting for the administration surface, using the `governor`
//! crate the same way the reference server crate does.

use crate::error::ServerError;
use crate::state::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc};

/// Tracks one rate limiter per caller IP. Entries are cheap and never evicted except by
/// [`IpRateLimiter::cleanup`], called periodically rather than per request.
pub struct IpRateLimiter {
    limiters: Arc<dashmap::DashMap<String, GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>>,
    requests_per_minute: u32,
    burst_size: u32,
}

impl IpRateLimiter {
    pub fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        Self {
            limiters: Arc::new(dashmap::DashMap::new()),
            requests_per_minute,
            burst_size,
        }
    }

    pub fn from_config(config: &crate::config::RateLimitConfig) -> Self {
        Self::new(config.requests_per_minute, config.burst_size)
    }

    pub fn check(&self, ip: &str) -> Result<(), ServerError> {
        let limiter = self.limiters.entry(ip.to_string()).or_insert_with(|| {
            let quota = Quota::per_minute(NonZeroU32::new(self.requests_per_minute).unwrap_or(NonZeroU32::new(60).unwrap()))
                .allow_burst(NonZeroU32::new(self.burst_size).unwrap_or(NonZeroU32::new(10).unwrap()));
            GovernorRateLimiter::direct(quota)
        });

        limiter
            .check()
            .map_err(|_| ServerError::RateLimitExceeded(format!("rate limit exceeded for {ip}")))
    }

    pub fn cleanup(&self) {
        if self.limiters.len() > 10_000 {
            tracing::warn!(entries = self.limiters.len(), "rate limiter cache is large, clearing");
            self.limiters.clear();
        }
    }
}

/// Per-request rate limit check, keyed by `ConnectInfo` peer address.
pub async fn layer(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    if !state.config().rate_limit.enabled {
        return Ok(next.run(req).await);
    }

    state.rate_limiter.check(&addr.ip().to_string())?;

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_rate_limiter_allows_first_requests() {
        let limiter = IpRateLimiter::new(60, 10);
        assert!(limiter.check("192.168.1.1").is_ok());
        assert!(limiter.check("192.168.1.2").is_ok());
    }

    #[test]
    fn test_ip_rate_limiter_blocks_over_burst() {
        let limiter = IpRateLimiter::new(1, 1);
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_err());
    }
}
