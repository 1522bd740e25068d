//! Global rate limiting using the token bucket algorithm

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use finsight_common::errors::{AppError, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Process-wide limiter shared by every route
pub struct GlobalRateLimiter {
    limiter: DefaultDirectRateLimiter,
    requests_per_second: u32,
}

impl GlobalRateLimiter {
    pub fn check(&self) -> Result<()> {
        self.limiter.check().map_err(|_| AppError::RateLimited {
            limit: self.requests_per_second,
        })
    }
}

/// Create a new rate limiter; zero rates are configuration errors.
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Result<Arc<GlobalRateLimiter>> {
    let rate = NonZeroU32::new(requests_per_second)
        .ok_or_else(|| AppError::configuration("rate_limit.requests_per_second must be positive"))?;
    let burst = NonZeroU32::new(burst)
        .ok_or_else(|| AppError::configuration("rate_limit.burst must be positive"))?;

    Ok(Arc::new(GlobalRateLimiter {
        limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
        requests_per_second,
    }))
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    request: Request,
    next: Next,
    limiter: Arc<GlobalRateLimiter>,
) -> Response {
    match limiter.check() {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            e.into_response()
        }
    }
}
