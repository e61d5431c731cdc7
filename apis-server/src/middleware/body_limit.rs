use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use common_http_errors::ApiError;
use http_body_util::Limited;

use crate::app::AppState;

/// Caps the request body at the route's configured limit. A declared
/// Content-Length over the cap is rejected up front; bodies that stream past
/// it fail at read time inside the extractors.
pub async fn body_size_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let limit = state
        .config
        .body_limit
        .limit_for(request.method().as_str(), request.uri().path());

    if let Some(declared) = content_length(request.headers()) {
        if declared > limit as u64 {
            return Err(ApiError::payload_too_large("Request body too large"));
        }
    }

    let (parts, body) = request.into_parts();
    let request = Request::from_parts(parts, Body::new(Limited::new(body, limit)));
    Ok(next.run(request).await)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse().ok())
}
