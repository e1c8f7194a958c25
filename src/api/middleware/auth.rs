use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::debug;

use crate::api::error::ErrorBody;
use crate::api::routes::AppState;
use crate::auth::verify_token;

/// Resolves the bearer token into a `Principal` request extension, or
/// answers 401.
pub async fn auth_middleware(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let principal = match token.and_then(|token| verify_token(&state.jwt_secret, token)) {
        Some(principal) => principal,
        None => {
            debug!(path = %req.uri().path(), "Rejected unauthenticated request");
            return unauthorized();
        }
    };

    req.extensions_mut().insert(principal);
    next.run(req).await
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error: "unauthorized".to_string(),
            message: "A valid bearer token is required".to_string(),
        }),
    )
        .into_response()
}
