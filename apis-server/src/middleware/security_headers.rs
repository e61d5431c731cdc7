use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

/// Whether the request arrived over TLS, as reported by the reverse proxy.
pub fn request_over_tls(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .map(|proto| proto.trim().eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}

/// Baseline security headers on every response. Content-Security-Policy is
/// owned by the reverse proxy.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let over_tls = request_over_tls(request.headers());
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("x-xss-protection", HeaderValue::from_static("1; mode=block"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    if over_tls {
        headers.insert(
            "strict-transport-security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_proto_detection() {
        let mut headers = HeaderMap::new();
        assert!(!request_over_tls(&headers));

        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert!(request_over_tls(&headers));

        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
        assert!(!request_over_tls(&headers));

        headers.insert("x-forwarded-proto", HeaderValue::from_static("https, http"));
        assert!(request_over_tls(&headers));
    }
}
