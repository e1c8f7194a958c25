use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{DefaultDirectRateLimiter, Quota};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

use crate::api::error::ErrorBody;

/// Per-minute request quota shared by every caller of a router.
pub struct RateLimiter {
    scope: &'static str,
    limiter: DefaultDirectRateLimiter,
}

impl RateLimiter {
    pub fn per_minute(scope: &'static str, requests: u32) -> Self {
        let requests = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        Self {
            scope,
            limiter: governor::RateLimiter::direct(Quota::per_minute(requests)),
        }
    }

    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

#[derive(Debug)]
pub struct RateLimitExceeded;

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> Response {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorBody {
                error: "rate_limited".to_string(),
                message: "Rate limit exceeded. Please try again later.".to_string(),
            }),
        )
            .into_response()
    }
}

pub async fn rate_limit_middleware(State(limiter): State<Arc<RateLimiter>>, req: Request, next: Next) -> Response {
    if !limiter.check() {
        warn!(scope = limiter.scope, path = %req.uri().path(), "Rate limit exceeded");
        return RateLimitExceeded.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_is_enforced() {
        let limiter = RateLimiter::per_minute("api", 3);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn zero_quota_still_lets_one_request_through() {
        let limiter = RateLimiter::per_minute("api", 0);
        assert!(limiter.check());
    }
}
