use axum::{Extension, Json};
use common_http_errors::ApiError;
use tracing::error;

use crate::db::RequestDb;
use crate::tenancy::{self, TenantRecord};

/// Cross-tenant listing for super-admins; the storage layer's policies widen
/// visibility for this role.
pub async fn list_tenants(
    Extension(db): Extension<RequestDb>,
) -> Result<Json<Vec<TenantRecord>>, ApiError> {
    let mut conn = db.lock().await;
    let tenants = tenancy::list_tenants(&mut conn).await.map_err(|err| {
        error!(error = %err, "tenant listing failed");
        ApiError::internal("An error occurred while processing your request")
    })?;
    Ok(Json(tenants))
}
