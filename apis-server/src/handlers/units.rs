use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use common_http_errors::ApiError;
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::db::RequestDb;
use crate::middleware::device::UnitContext;

#[derive(Deserialize)]
pub struct UnitReport {
    #[serde(default)]
    pub battery_mv: Option<i32>,
    #[serde(default)]
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub detections: Option<i32>,
}

/// Heartbeat/observation ingest from an authenticated edge unit.
pub async fn submit_report(
    Extension(db): Extension<RequestDb>,
    Extension(unit): Extension<UnitContext>,
    Json(body): Json<UnitReport>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let mut conn = db.lock().await;
    sqlx::query(
        "INSERT INTO unit_reports (id, tenant_id, unit_id, site_id, battery_mv, temperature_c, detections, reported_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&unit.tenant_id)
    .bind(&unit.unit_id)
    .bind(&unit.site_id)
    .bind(body.battery_mv)
    .bind(body.temperature_c)
    .bind(body.detections)
    .bind(Utc::now())
    .execute(&mut **conn)
    .await
    .map_err(|err| {
        error!(error = %err, unit_id = %unit.unit_id, "unit report insert failed");
        ApiError::internal("An error occurred while processing your request")
    })?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}
