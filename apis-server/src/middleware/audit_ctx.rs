use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use common_audit::{client_ip_from_headers, AuditContext};
use common_auth::Principal;

use crate::middleware::device::UnitContext;

/// Enriches the request with the audit triple once an identity is bound.
/// Device requests audit under their unit id.
pub async fn audit_context(mut request: Request, next: Next) -> Response {
    let client_ip = client_ip_from_headers(request.headers());

    let context = if let Some(principal) = request.extensions().get::<Principal>() {
        Some(AuditContext {
            tenant_id: principal.tenant_id.clone(),
            user_id: principal.user_id.clone(),
            client_ip,
        })
    } else {
        request
            .extensions()
            .get::<UnitContext>()
            .map(|unit| AuditContext {
                tenant_id: unit.tenant_id.clone(),
                user_id: unit.unit_id.clone(),
                client_ip,
            })
    };

    if let Some(context) = context {
        request.extensions_mut().insert(context);
    }
    next.run(request).await
}
