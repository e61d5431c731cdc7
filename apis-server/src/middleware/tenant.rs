use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use common_auth::Principal;
use common_http_errors::ApiError;
use sqlx::PgConnection;
use tracing::{debug, error, warn};

use crate::app::AppState;
use crate::config::AuthMode;
use crate::db::{publish_tenant, tenant_id_is_valid, RequestDb};
use crate::tenancy::{self, UserRecord};

/// User row resolved during tenant binding, available to handlers.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRecord);

const GENERIC_INTERNAL: &str = "An error occurred while processing your request";

/// Binds the request to its tenant: acquires the connection, resolves the
/// effective tenant id, publishes it into the database session, resolves (or
/// provisions) the user, and cross-checks record against token. The
/// connection rides the request extensions and returns to the pool when the
/// request is done, panics included.
pub async fn bind_tenant(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = request
        .extensions()
        .get::<Principal>()
        .cloned()
        .ok_or_else(|| {
            error!("tenant binding ran without a principal on the request");
            ApiError::internal(GENERIC_INTERNAL)
        })?;

    let db = RequestDb::acquire(&state.pool).await?;
    let (principal, user) = {
        let mut guard = db.lock().await;
        bind(&state, &mut guard, principal).await?
    };

    debug!(
        tenant_id = %principal.tenant_id,
        user_id = %principal.user_id,
        "tenant bound to request"
    );

    request.extensions_mut().insert(principal);
    if let Some(user) = user {
        request.extensions_mut().insert(CurrentUser(user));
    }
    request.extensions_mut().insert(db);
    Ok(next.run(request).await)
}

async fn bind(
    state: &AppState,
    conn: &mut PgConnection,
    mut principal: Principal,
) -> Result<(Principal, Option<UserRecord>), ApiError> {
    let mut tenant_id = principal.tenant_id.clone();

    if tenant_id.is_empty() {
        if state.auth.mode() != AuthMode::External {
            warn!(user_id = %principal.user_id, "token carried no tenant id");
            return Err(ApiError::forbidden("organization identity required"));
        }
        match tenancy::resolve_external_tenant(conn, &principal.user_id).await {
            Ok(Some(resolved)) => {
                debug!(user_id = %principal.user_id, tenant_id = %resolved, "resolved tenant via fallback lookup");
                tenant_id = resolved;
            }
            Ok(None) => {
                warn!(user_id = %principal.user_id, "no user row for external identity without org claim");
                return Err(ApiError::forbidden("organization identity required"));
            }
            Err(err) => {
                error!(error = %err, "tenant fallback lookup failed");
                return Err(ApiError::internal(GENERIC_INTERNAL));
            }
        }
    }

    if !tenant_id_is_valid(&tenant_id) {
        warn!(user_id = %principal.user_id, "malformed tenant identifier");
        return Err(ApiError::bad_request("Invalid tenant identifier"));
    }

    publish_tenant(conn, &tenant_id).await.map_err(|err| {
        error!(error = %err, %tenant_id, "failed to publish tenant on connection");
        ApiError::internal(GENERIC_INTERNAL)
    })?;

    let user = match state.auth.mode() {
        // The mock identity has no backing row; the session still carries the
        // tenant so row-level security behaves like every other mode.
        AuthMode::Disabled => None,
        AuthMode::Local => {
            let user = tenancy::lookup_user_by_id(conn, &principal.user_id)
                .await
                .map_err(|err| {
                    error!(error = %err, "user lookup failed");
                    ApiError::internal(GENERIC_INTERNAL)
                })?
                .ok_or_else(|| {
                    warn!(user_id = %principal.user_id, "no user row for authenticated subject");
                    ApiError::forbidden("user not found")
                })?;
            Some(user)
        }
        AuthMode::External => {
            match tenancy::tenant_status(conn, &tenant_id).await.map_err(|err| {
                error!(error = %err, "tenant status lookup failed");
                ApiError::internal(GENERIC_INTERNAL)
            })? {
                Some(status) if status != "active" => {
                    warn!(%tenant_id, %status, "blocked request for non-active tenant");
                    return Err(ApiError::forbidden("organization is not active"));
                }
                _ => {}
            }

            let user = match tenancy::lookup_user_by_external_id(conn, &principal.user_id)
                .await
                .map_err(|err| {
                    error!(error = %err, "user lookup failed");
                    ApiError::internal(GENERIC_INTERNAL)
                })? {
                Some(user) => user,
                None => tenancy::provision_external_user(conn, &principal, &tenant_id)
                    .await
                    .map_err(|err| {
                        error!(error = %err, %tenant_id, "just-in-time provisioning failed");
                        ApiError::internal(GENERIC_INTERNAL)
                    })?
                    .ok_or_else(|| {
                        error!(%tenant_id, "provisioning did not yield a user row");
                        ApiError::internal(GENERIC_INTERNAL)
                    })?,
            };
            Some(user)
        }
    };

    if let Some(user) = &user {
        if user.tenant_id != tenant_id {
            error!(
                token_tenant_id = %tenant_id,
                record_tenant_id = %user.tenant_id,
                user_id = %user.id,
                "tenant mismatch between token and user record"
            );
            return Err(ApiError::forbidden("access denied"));
        }
        if !user.is_active {
            warn!(user_id = %user.id, "blocked request for inactive user");
            return Err(ApiError::forbidden("access denied"));
        }
        if principal.email.is_empty() {
            principal.email = user.email.clone();
        }
        if principal.display_name.is_empty() {
            principal.display_name = user.display_name.clone();
        }
    }

    principal.tenant_id = tenant_id;
    Ok((principal, user))
}
