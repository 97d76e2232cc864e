use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultKeyedRateLimiter, Quota, RateLimiter,
};

use crate::error::AppError;

/// Tracked clients beyond which idle limiter state is pruned.
const PRUNE_THRESHOLD: usize = 10_000;

/// Requests allowed per client within a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    fn quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.max_requests).unwrap_or(NonZeroU32::MIN);
        let replenish = (self.window / burst.get()).max(Duration::from_millis(1));
        Quota::with_period(replenish)
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst)
    }
}

/// key: api-rate-limit -> per-client request budget on /api routes
#[derive(Clone)]
pub struct ApiRateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
}

impl ApiRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::keyed(config.quota())),
        }
    }

    /// Spends one request of `client`'s budget, or reports the wait in whole seconds.
    pub fn check(&self, client: IpAddr) -> Result<(), u64> {
        if self.limiter.len() > PRUNE_THRESHOLD {
            self.limiter.retain_recent();
        }
        self.limiter.check_key(&client).map_err(|negative| {
            negative
                .wait_time_from(DefaultClock::default().now())
                .as_secs()
                .max(1)
        })
    }
}

fn client_ip<B>(request: &Request<B>) -> Option<IpAddr> {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|value| value.trim().parse::<IpAddr>().ok());

    forwarded.or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

pub async fn rate_limit<B>(
    State(limiter): State<ApiRateLimiter>,
    request: Request<B>,
    next: Next<B>,
) -> Result<Response, AppError> {
    let Some(client) = client_ip(&request) else {
        tracing::debug!("could not determine client address for rate limiting");
        return Ok(next.run(request).await);
    };

    match limiter.check(client) {
        Ok(()) => Ok(next.run(request).await),
        Err(retry_after_secs) => {
            tracing::warn!(%client, retry_after_secs, "rate limit exceeded");
            Err(AppError::TooManyRequests { retry_after_secs })
        }
    }
}
