use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;
use crate::core::jobs::ops::INTERNAL_TOKEN_HEADER;

pub async fn require_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // None when no token is configured, otherwise whether the header matched.
    let token_check = state.internal_token.as_deref().map(|expected| {
        req.headers()
            .get(INTERNAL_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|given| constant_time_eq(expected, given))
    });

    match token_check {
        Some(true) => next.run(req).await,
        Some(false) => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "success": false,
                "error": format!("Missing or invalid {INTERNAL_TOKEN_HEADER} header")
            })),
        )
            .into_response(),
        // No token configured: open access only on loopback (safe for local dev)
        None if state.loopback_bind => next.run(req).await,
        None => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "success": false,
                "error": "No internal token configured. Set [server].internal_token before exposing the API on a non-loopback address."
            })),
        )
            .into_response(),
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
