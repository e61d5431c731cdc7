use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use common_auth::Principal;
use common_http_errors::ApiError;
use tracing::{error, warn};

use crate::app::AppState;
use crate::middleware::device::UnitContext;

/// Per-tenant gate; requires tenant binding (or device auth) to have run.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let tenant_id = request
        .extensions()
        .get::<Principal>()
        .map(|principal| principal.tenant_id.clone())
        .or_else(|| {
            request
                .extensions()
                .get::<UnitContext>()
                .map(|unit| unit.tenant_id.clone())
        })
        .filter(|tenant_id| !tenant_id.is_empty());

    let Some(tenant_id) = tenant_id else {
        // Pipeline assembly bug: this layer only belongs after binding.
        error!(path = %request.uri().path(), "rate limiter ran without a bound tenant");
        return Err(ApiError::too_many_requests("Rate limit exceeded", 60));
    };

    let decision = state.rate_limiter.allow(&tenant_id);
    state.metrics.rate_limit_decision(decision.allowed);
    if !decision.allowed {
        warn!(
            %tenant_id,
            retry_after = decision.retry_after,
            "tenant over rate limit"
        );
        return Err(ApiError::too_many_requests(
            "Rate limit exceeded",
            decision.retry_after,
        ));
    }

    Ok(next.run(request).await)
}
