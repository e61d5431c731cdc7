use axum::extract::{Request, State};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use common_auth::{
    AuthError, ExternalTokenValidator, LocalTokenCodec, Principal, RevocationStore,
};
use common_http_errors::ApiError;
use tracing::{debug, warn};

use crate::app::AppState;
use crate::config::AuthMode;
use crate::cookies::{cookie_value, SESSION_COOKIE};

/// Token identity the auth stage validated, kept around so logout can revoke
/// exactly this token.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub jti: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The auth stage variant is chosen once at startup; requests never
/// re-dispatch on configuration.
#[derive(Clone)]
pub enum AuthStage {
    Disabled {
        principal: Principal,
    },
    Local {
        codec: LocalTokenCodec,
        revocation: RevocationStore,
    },
    External {
        validator: ExternalTokenValidator,
        revocation: RevocationStore,
    },
}

impl AuthStage {
    pub fn mode(&self) -> AuthMode {
        match self {
            AuthStage::Disabled { .. } => AuthMode::Disabled,
            AuthStage::Local { .. } => AuthMode::Local,
            AuthStage::External { .. } => AuthMode::External,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthStage::Disabled { .. } => "disabled",
            AuthStage::Local { .. } => "local",
            AuthStage::External { .. } => "external",
        }
    }

    pub fn local_codec(&self) -> Option<&LocalTokenCodec> {
        match self {
            AuthStage::Local { codec, .. } => Some(codec),
            _ => None,
        }
    }

    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> Result<(Principal, Option<SessionToken>), ApiError> {
        match self {
            AuthStage::Disabled { principal } => Ok((principal.clone(), None)),
            AuthStage::Local { codec, revocation } => {
                let token = extract_credential(headers)
                    .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
                let claims = codec.validate(&token).map_err(auth_error_response)?;

                if revocation.is_revoked(&claims.jti) {
                    warn!(jti = %claims.jti, "rejected revoked token");
                    return Err(ApiError::unauthorized("Token revoked"));
                }
                if let Some(issued_at) = claims.issued_at() {
                    if revocation.is_user_revoked(&claims.sub, issued_at) {
                        warn!(user_id = %claims.sub, "rejected token issued before user-wide revocation");
                        return Err(ApiError::unauthorized("Token revoked"));
                    }
                }

                let session = SessionToken {
                    jti: claims.jti.clone(),
                    issued_at: claims.issued_at(),
                    expires_at: claims.expires_at(),
                };
                Ok((Principal::from_local_claims(&claims), Some(session)))
            }
            AuthStage::External {
                validator,
                revocation,
            } => {
                let token = extract_credential(headers)
                    .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
                let claims = validator.validate(&token).await.map_err(auth_error_response)?;

                if let Some(jti) = &claims.jti {
                    if revocation.is_revoked(jti) {
                        warn!(jti = %jti, "rejected revoked token");
                        return Err(ApiError::unauthorized("Token revoked"));
                    }
                }
                match claims.issued_at() {
                    Some(issued_at) => {
                        if revocation.is_user_revoked(&claims.sub, issued_at) {
                            warn!(user_id = %claims.sub, "rejected token issued before user-wide revocation");
                            return Err(ApiError::unauthorized("Token revoked"));
                        }
                    }
                    None => {
                        debug!(user_id = %claims.sub, "external token has no iat; revoke-before check skipped");
                    }
                }

                let session = claims.jti.clone().map(|jti| SessionToken {
                    jti,
                    issued_at: claims.issued_at(),
                    expires_at: claims.expires_at(),
                });
                Ok((Principal::from_external_claims(&claims), session))
            }
        }
    }
}

/// The Authorization header wins over the session cookie when both are
/// present; API clients that set the header mean it.
fn extract_credential(headers: &HeaderMap) -> Option<String> {
    if let Some(raw) = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()) {
        if let Some(token) = raw.trim().strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    cookie_value(headers, SESSION_COOKIE)
}

fn auth_error_response(err: AuthError) -> ApiError {
    warn!(error = %err, "token validation failed");
    match err {
        AuthError::Expired => ApiError::unauthorized("Token expired"),
        AuthError::Revoked => ApiError::unauthorized("Token revoked"),
        AuthError::JwksUnavailable(_) => {
            ApiError::unauthorized("authentication service unavailable")
        }
        _ => ApiError::unauthorized("Invalid token"),
    }
}

pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let outcome = state.auth.authenticate(request.headers()).await;
    state.metrics.auth_decision(state.auth.kind(), outcome.is_ok());
    let (principal, session) = outcome?;

    request.extensions_mut().insert(principal);
    if let Some(session) = session {
        request.extensions_mut().insert(session);
    }
    Ok(next.run(request).await)
}

/// Attaches a Principal when credentials validate, and stays silent when they
/// do not. The super-admin gate behind it owes every failure the same
/// generic answer.
pub async fn authenticate_optional(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Ok((principal, session)) = state.auth.authenticate(request.headers()).await {
        request.extensions_mut().insert(principal);
        if let Some(session) = session {
            request.extensions_mut().insert(session);
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("apis_session=cookie-token"),
        );
        assert_eq!(extract_credential(&headers).as_deref(), Some("header-token"));
    }

    #[test]
    fn cookie_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("apis_session=cookie-token"),
        );
        assert_eq!(extract_credential(&headers).as_deref(), Some("cookie-token"));
    }

    #[test]
    fn malformed_bearer_falls_through_to_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("apis_session=cookie-token"),
        );
        assert_eq!(extract_credential(&headers).as_deref(), Some("cookie-token"));

        let mut empty_bearer = HeaderMap::new();
        empty_bearer.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_credential(&empty_bearer), None);
    }
}
