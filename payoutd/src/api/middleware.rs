//! Scheduler Authentication Middleware
//!
//! The automated trigger path is only for the trusted scheduler. A request
//! passes if it carries the scheduler marker header (`x-scheduler-cron`,
//! added by the platform cron runner) or the configured shared token in
//! `x-scheduler-token`. Everything else is rejected with 401.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use super::AppState;

const SCHEDULER_MARKER_HEADER: &str = "x-scheduler-cron";
const SCHEDULER_TOKEN_HEADER: &str = "x-scheduler-token";

pub async fn scheduler_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let headers = request.headers();

    let marker = headers.contains_key(SCHEDULER_MARKER_HEADER);
    let token_ok = match (&state.scheduler_token, headers.get(SCHEDULER_TOKEN_HEADER)) {
        (Some(expected), Some(given)) => given.to_str().map_or(false, |t| t == expected),
        _ => false,
    };

    if !marker && !token_ok {
        warn!(
            path = %request.uri().path(),
            has_marker = marker,
            "unauthorized scheduler trigger rejected"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized" })),
        )
            .into_response();
    }

    next.run(request).await
}
