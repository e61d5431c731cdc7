use axum::http::{header::COOKIE, HeaderMap};

use crate::config::Config;
use crate::middleware::security_headers::request_over_tls;

/// Cookie names are part of the client contract; do not rename.
pub const SESSION_COOKIE: &str = "apis_session";
pub const CSRF_COOKIE: &str = "apis_csrf_token";

pub const SESSION_MAX_AGE_SECS: i64 = 12 * 3600;
pub const CSRF_MAX_AGE_SECS: i64 = 7 * 24 * 3600;

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    let prefix = format!("{name}=");
    raw.split(';')
        .map(|segment| segment.trim())
        .find_map(|segment| segment.strip_prefix(&prefix))
        .map(|value| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Secure flag: explicit configuration wins, otherwise follow the protocol
/// the proxy says the request arrived on.
pub fn secure_cookies(config: &Config, headers: &HeaderMap) -> bool {
    config
        .secure_cookies
        .unwrap_or_else(|| request_over_tls(headers))
}

pub fn build_session_cookie(token: &str, secure: bool) -> String {
    assemble_cookie(SESSION_COOKIE, token, SESSION_MAX_AGE_SECS, true, secure)
}

pub fn clear_session_cookie(secure: bool) -> String {
    assemble_cookie(SESSION_COOKIE, "", 0, true, secure)
}

/// The CSRF cookie is deliberately readable by the client: the double-submit
/// pattern needs the browser to echo it back in a header.
pub fn build_csrf_cookie(token: &str, secure: bool) -> String {
    assemble_cookie(CSRF_COOKIE, token, CSRF_MAX_AGE_SECS, false, secure)
}

pub fn clear_csrf_cookie(secure: bool) -> String {
    assemble_cookie(CSRF_COOKIE, "", 0, false, secure)
}

fn assemble_cookie(name: &str, value: &str, max_age: i64, http_only: bool, secure: bool) -> String {
    let mut parts = Vec::new();
    parts.push(format!("{name}={value}"));
    parts.push("Path=/".to_string());
    parts.push(format!("Max-Age={}", max_age.max(0)));
    if max_age <= 0 {
        parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".to_string());
    }
    if http_only {
        parts.push("HttpOnly".to_string());
    }
    parts.push("SameSite=Strict".to_string());
    if secure {
        parts.push("Secure".to_string());
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_value_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("other=1; apis_session=tok-123; apis_csrf_token=abc"),
        );
        assert_eq!(
            cookie_value(&headers, SESSION_COOKIE).as_deref(),
            Some("tok-123")
        );
        assert_eq!(cookie_value(&headers, CSRF_COOKIE).as_deref(), Some("abc"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn session_cookie_is_http_only_and_strict() {
        let cookie = build_session_cookie("tok", true);
        assert!(cookie.starts_with("apis_session=tok"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("Path=/"));
    }

    #[test]
    fn csrf_cookie_is_readable_by_the_client() {
        let cookie = build_csrf_cookie("abc", false);
        assert!(!cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(!cookie.contains("Secure"));
        assert!(cookie.contains(&format!("Max-Age={CSRF_MAX_AGE_SECS}")));
    }

    #[test]
    fn clearing_expires_the_cookie() {
        let cookie = clear_csrf_cookie(false);
        assert!(cookie.starts_with("apis_csrf_token=;"));
        assert!(cookie.contains("Max-Age=0"));
        assert!(cookie.contains("Expires=Thu, 01 Jan 1970"));
    }
}
