use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use common_auth::Principal;
use common_http_errors::ApiError;
use tracing::{info, warn};

use crate::app::AppState;
use crate::config::AuthMode;

/// Cross-tenant administration gate. Only exists in external-identity mode;
/// local deployments answer 404 so the endpoint's existence is not
/// advertised. Unauthenticated and unauthorized both receive the same
/// generic denial.
pub async fn require_super_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.auth.mode() != AuthMode::External {
        return Err(ApiError::not_found("Not found"));
    }

    match request.extensions().get::<Principal>() {
        Some(principal) if state.config.is_super_admin(&principal.email) => {
            info!(
                user_id = %principal.user_id,
                email = %principal.email,
                path = %request.uri().path(),
                "super-admin access granted"
            );
            Ok(next.run(request).await)
        }
        Some(principal) => {
            warn!(
                user_id = %principal.user_id,
                path = %request.uri().path(),
                "super-admin access denied"
            );
            Err(ApiError::forbidden("Access denied"))
        }
        None => {
            warn!(path = %request.uri().path(), "super-admin access denied for unauthenticated request");
            Err(ApiError::forbidden("Access denied"))
        }
    }
}

/// Role check for handlers that restrict an operation beyond authentication.
pub fn require_role(principal: &Principal, allowed: &[&str]) -> Result<(), ApiError> {
    if allowed.iter().any(|role| principal.role == *role) {
        Ok(())
    } else {
        warn!(
            user_id = %principal.user_id,
            role = %principal.role,
            "role check failed"
        );
        Err(ApiError::forbidden("Access denied"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: &str) -> Principal {
        Principal {
            user_id: "u1".to_string(),
            tenant_id: "t1".to_string(),
            email: "u1@example.com".to_string(),
            display_name: "U One".to_string(),
            role: role.to_string(),
            roles: vec![role.to_string()],
            impersonator_id: None,
            impersonating: false,
            original_tenant_id: None,
        }
    }

    #[test]
    fn role_gate_allows_listed_roles_only() {
        assert!(require_role(&principal("admin"), &["admin"]).is_ok());
        assert!(require_role(&principal("member"), &["admin", "member"]).is_ok());
        assert!(require_role(&principal("member"), &["admin"]).is_err());
        assert!(require_role(&principal(""), &["admin"]).is_err());
    }
}
