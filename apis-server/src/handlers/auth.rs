use axum::extract::State;
use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Duration, Utc};
use common_auth::{LocalClaims, Principal};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use tracing::{error, info, warn};

use crate::app::AppState;
use crate::config::AuthMode;
use crate::cookies::{
    build_csrf_cookie, build_session_cookie, clear_csrf_cookie, clear_session_cookie,
    secure_cookies,
};
use crate::middleware::auth::SessionToken;
use crate::middleware::csrf::generate_csrf_token;

const MAX_FAILED_ATTEMPTS: i16 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const SESSION_TTL_HOURS: i64 = 12;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: PublicUser,
}

#[derive(Serialize)]
pub struct PublicUser {
    pub id: String,
    pub tenant_id: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub must_change_password: bool,
}

#[derive(FromRow)]
struct AuthRow {
    id: String,
    tenant_id: String,
    email: String,
    display_name: String,
    password_hash: String,
    role: String,
    is_active: bool,
    failed_attempts: i16,
    locked_until: Option<DateTime<Utc>>,
    must_change_password: bool,
}

fn invalid_credentials() -> ApiError {
    ApiError::unauthorized("Invalid credentials")
}

/// Password login for the local scheme. Issues the signed session token and
/// the CSRF cookie in one response.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    if state.auth.mode() != AuthMode::Local {
        return Err(ApiError::not_found("Not found"));
    }
    let codec = state
        .auth
        .local_codec()
        .ok_or_else(|| ApiError::internal("An error occurred while processing your request"))?;

    state.metrics.login_attempt("attempt");

    let email = body.email.trim();
    let row = sqlx::query_as::<_, AuthRow>(
        "SELECT id, tenant_id, email, display_name, password_hash, role, is_active,
                failed_attempts, locked_until, must_change_password
         FROM users
         WHERE email = $1 AND password_hash IS NOT NULL",
    )
    .bind(email)
    .fetch_optional(&state.pool)
    .await
    .map_err(|err| {
        error!(error = %err, "login lookup failed");
        ApiError::internal("An error occurred while processing your request")
    })?;

    let Some(mut row) = row else {
        state.metrics.login_attempt("invalid_credentials");
        return Err(invalid_credentials());
    };

    if !row.is_active {
        state.metrics.login_attempt("account_disabled");
        warn!(user_id = %row.id, "login attempt for disabled account");
        return Err(ApiError::forbidden("Account disabled"));
    }

    let now = Utc::now();
    if let Some(locked_until) = row.locked_until {
        if locked_until > now {
            state.metrics.login_attempt("account_locked");
            return Err(ApiError::forbidden("Account locked"));
        }
        // Lockout has lapsed; clean up before verifying.
        if let Err(err) =
            sqlx::query("UPDATE users SET failed_attempts = 0, locked_until = NULL WHERE id = $1")
                .bind(&row.id)
                .execute(&state.pool)
                .await
        {
            warn!(user_id = %row.id, error = %err, "failed to reset expired lockout");
        } else {
            row.failed_attempts = 0;
            row.locked_until = None;
        }
    }

    let password_valid = bcrypt::verify(&body.password, &row.password_hash).unwrap_or(false);
    if !password_valid {
        let attempts = row.failed_attempts.saturating_add(1);
        let lock_until = if attempts >= MAX_FAILED_ATTEMPTS {
            Some(now + Duration::minutes(LOCKOUT_MINUTES))
        } else {
            None
        };
        if let Err(err) =
            sqlx::query("UPDATE users SET failed_attempts = $1, locked_until = $2 WHERE id = $3")
                .bind(attempts)
                .bind(lock_until)
                .bind(&row.id)
                .execute(&state.pool)
                .await
        {
            warn!(user_id = %row.id, error = %err, "failed to record failed login attempt");
        }

        state.metrics.login_attempt("invalid_credentials");
        if lock_until.is_some() {
            return Err(ApiError::forbidden("Account locked"));
        }
        return Err(invalid_credentials());
    }

    if let Err(err) = sqlx::query(
        "UPDATE users SET failed_attempts = 0, locked_until = NULL, last_login_at = $1 WHERE id = $2",
    )
    .bind(now)
    .bind(&row.id)
    .execute(&state.pool)
    .await
    {
        warn!(user_id = %row.id, error = %err, "failed to stamp last_login_at");
    }

    let claims = LocalClaims::new(
        row.id.clone(),
        row.tenant_id.clone(),
        row.role.clone(),
        Duration::hours(SESSION_TTL_HOURS),
    );
    let token = codec.sign(&claims).map_err(|err| {
        error!(error = %err, "failed to sign session token");
        ApiError::internal("An error occurred while processing your request")
    })?;

    state.metrics.login_attempt("success");
    info!(user_id = %row.id, tenant_id = %row.tenant_id, jti = %claims.jti, "user logged in");

    let secure = secure_cookies(&state.config, &headers);
    let csrf_token = generate_csrf_token();

    let body = LoginResponse {
        token: token.clone(),
        user: PublicUser {
            id: row.id,
            tenant_id: row.tenant_id,
            email: row.email,
            display_name: row.display_name,
            role: row.role,
            must_change_password: row.must_change_password,
        },
    };
    let mut response = (StatusCode::OK, Json(body)).into_response();
    append_cookie(&mut response, &build_session_cookie(&token, secure))?;
    append_cookie(&mut response, &build_csrf_cookie(&csrf_token, secure))?;
    Ok(response)
}

/// Revokes the presented token's jti and clears both cookies.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    session: Option<Extension<SessionToken>>,
) -> Result<Response, ApiError> {
    if let Some(Extension(session)) = session {
        let expires_at = session
            .expires_at
            .unwrap_or_else(|| Utc::now() + Duration::hours(SESSION_TTL_HOURS));
        state.revocation.revoke_token(&session.jti, expires_at);
        info!(jti = %session.jti, "session token revoked");
    }
    cleared_session_response(&state, &headers)
}

/// Invalidates every token issued to this user up to now.
pub async fn logout_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(principal): Extension<Principal>,
) -> Result<Response, ApiError> {
    state.revocation.revoke_user_before(&principal.user_id, Utc::now());
    info!(user_id = %principal.user_id, "all sessions revoked for user");
    cleared_session_response(&state, &headers)
}

pub async fn me(Extension(principal): Extension<Principal>) -> Json<Principal> {
    Json(principal)
}

fn cleared_session_response(state: &AppState, headers: &HeaderMap) -> Result<Response, ApiError> {
    let secure = secure_cookies(&state.config, headers);
    let mut response = (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response();
    append_cookie(&mut response, &clear_session_cookie(secure))?;
    append_cookie(&mut response, &clear_csrf_cookie(secure))?;
    Ok(response)
}

fn append_cookie(response: &mut Response, cookie: &str) -> Result<(), ApiError> {
    let value = HeaderValue::from_str(cookie).map_err(|err| {
        error!(error = %err, "failed to encode cookie header");
        ApiError::internal("An error occurred while processing your request")
    })?;
    response.headers_mut().append(SET_COOKIE, value);
    Ok(())
}
