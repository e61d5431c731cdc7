use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use common_audit::{AuditAction, AuditContext, AuditEvent};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use tracing::{error, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::db::RequestDb;

#[derive(Debug, Serialize, FromRow)]
pub struct Hive {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub site_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct NewHive {
    pub name: String,
    #[serde(default)]
    pub site_id: Option<String>,
}

/// Row-level security scopes this to the tenant published on the request
/// connection; the query itself carries no tenant filter.
pub async fn list_hives(Extension(db): Extension<RequestDb>) -> Result<Json<Vec<Hive>>, ApiError> {
    let mut conn = db.lock().await;
    let hives = sqlx::query_as::<_, Hive>(
        "SELECT id, tenant_id, name, site_id, created_at FROM hives ORDER BY name",
    )
    .fetch_all(&mut **conn)
    .await
    .map_err(|err| {
        error!(error = %err, "hive listing failed");
        ApiError::internal("An error occurred while processing your request")
    })?;
    Ok(Json(hives))
}

pub async fn create_hive(
    State(state): State<AppState>,
    Extension(db): Extension<RequestDb>,
    Extension(audit): Extension<AuditContext>,
    Json(body): Json<NewHive>,
) -> Result<(StatusCode, Json<Hive>), ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Hive name must not be empty"));
    }

    let hive = {
        let mut conn = db.lock().await;
        sqlx::query_as::<_, Hive>(
            "INSERT INTO hives (id, tenant_id, name, site_id, created_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, tenant_id, name, site_id, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&audit.tenant_id)
        .bind(name)
        .bind(&body.site_id)
        .bind(Utc::now())
        .fetch_one(&mut **conn)
        .await
        .map_err(|err| {
            error!(error = %err, "hive insert failed");
            ApiError::internal("An error occurred while processing your request")
        })?
    };

    let event = AuditEvent::new(
        &audit,
        "hive",
        Some(hive.id.clone()),
        AuditAction::Create,
        json!(null),
        json!({ "name": hive.name, "site_id": hive.site_id }),
    );
    if let Err(err) = state.audit.record(&event).await {
        warn!(error = %err, hive_id = %hive.id, "audit write failed");
    }

    Ok((StatusCode::CREATED, Json(hive)))
}
