use axum::extract::Request;
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use common_http_errors::ApiError;
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::cookies::{cookie_value, CSRF_COOKIE};

pub const CSRF_HEADER: &str = "x-csrf-token";

/// 32 bytes of OS randomness, hex-encoded.
pub fn generate_csrf_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn tokens_match(cookie: &str, header: &str) -> bool {
    cookie.len() == header.len()
        && ConstantTimeEq::ct_eq(cookie.as_bytes(), header.as_bytes()).unwrap_u8() == 1
}

/// Double-submit check for state-changing methods: the cookie the server set
/// at login must match the header the client echoes back.
pub async fn csrf_guard(request: Request, next: Next) -> Result<Response, ApiError> {
    if matches!(*request.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
        return Ok(next.run(request).await);
    }

    let headers = request.headers();
    let cookie = cookie_value(headers, CSRF_COOKIE).ok_or_else(|| {
        warn!(path = %request.uri().path(), "CSRF cookie absent on state-changing request");
        ApiError::forbidden("CSRF token missing from cookie")
    })?;
    let header = headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            warn!(path = %request.uri().path(), "CSRF header absent on state-changing request");
            ApiError::forbidden("CSRF token missing from header")
        })?;

    if !tokens_match(&cookie, header) {
        warn!(path = %request.uri().path(), "CSRF token mismatch");
        return Err(ApiError::forbidden("CSRF token mismatch"));
    }

    Ok(next.run(request).await)
}
