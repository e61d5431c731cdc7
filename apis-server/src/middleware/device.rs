use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use common_http_errors::ApiError;
use sqlx::FromRow;
use tracing::{debug, error, warn};

use crate::app::AppState;
use crate::db::{publish_tenant, tenant_id_is_valid, RequestDb};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Indexed lookup prefix; the prefix alone never authenticates anything.
const API_KEY_PREFIX_LEN: usize = 12;

/// Edge unit bound to the request by API-key authentication.
#[derive(Debug, Clone)]
pub struct UnitContext {
    pub unit_id: String,
    pub tenant_id: String,
    pub site_id: Option<String>,
}

#[derive(FromRow)]
struct UnitKeyRow {
    unit_id: String,
    tenant_id: String,
    site_id: Option<String>,
    api_key_hash: String,
}

const GENERIC_INTERNAL: &str = "An error occurred while processing your request";

fn invalid_key() -> ApiError {
    ApiError::unauthorized("Invalid API key")
}

/// Machine-client counterpart of the user auth stage: prefix-indexed lookup,
/// bcrypt verification of the full presented key, then the same tenant
/// session publication every user request gets. The raw key is never stored
/// or logged.
pub async fn authenticate_device(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            state.metrics.auth_decision("device", false);
            invalid_key()
        })?;

    let Some(prefix) = presented.get(..API_KEY_PREFIX_LEN) else {
        state.metrics.auth_decision("device", false);
        warn!("presented API key shorter than the lookup prefix");
        return Err(invalid_key());
    };

    let db = RequestDb::acquire(&state.pool).await?;
    let unit = {
        let mut guard = db.lock().await;

        let candidates = sqlx::query_as::<_, UnitKeyRow>(
            "SELECT unit_id, tenant_id, site_id, api_key_hash
             FROM unit_api_keys
             WHERE api_key_prefix = $1 AND status = 'active'",
        )
        .bind(prefix)
        .fetch_all(&mut **guard)
        .await
        .map_err(|err| {
            error!(error = %err, "API key lookup failed");
            ApiError::internal(GENERIC_INTERNAL)
        })?;

        let matched = candidates
            .into_iter()
            .find(|row| bcrypt::verify(&presented, &row.api_key_hash).unwrap_or(false));
        let Some(row) = matched else {
            state.metrics.auth_decision("device", false);
            warn!("API key verification failed");
            return Err(invalid_key());
        };

        if !tenant_id_is_valid(&row.tenant_id) {
            error!(unit_id = %row.unit_id, "unit row carries a malformed tenant identifier");
            return Err(ApiError::bad_request("Invalid tenant identifier"));
        }
        publish_tenant(&mut guard, &row.tenant_id).await.map_err(|err| {
            error!(error = %err, "failed to publish tenant on connection");
            ApiError::internal(GENERIC_INTERNAL)
        })?;

        if let Err(err) = sqlx::query("UPDATE unit_api_keys SET last_seen = NOW() WHERE unit_id = $1")
            .bind(&row.unit_id)
            .execute(&mut **guard)
            .await
        {
            warn!(error = %err, unit_id = %row.unit_id, "failed to stamp last_seen");
        }

        UnitContext {
            unit_id: row.unit_id,
            tenant_id: row.tenant_id,
            site_id: row.site_id,
        }
    };

    state.metrics.auth_decision("device", true);
    debug!(unit_id = %unit.unit_id, tenant_id = %unit.tenant_id, "device authenticated");

    request.extensions_mut().insert(unit);
    request.extensions_mut().insert(db);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcrypt_verifies_full_key_not_prefix() {
        let raw_key = "unitkey-0123456789abcdef";
        let hash = bcrypt::hash(raw_key, 4).unwrap();
        assert!(bcrypt::verify(raw_key, &hash).unwrap());
        assert!(!bcrypt::verify(&raw_key[..API_KEY_PREFIX_LEN], &hash).unwrap());
        assert!(!bcrypt::verify("unitkey-0123456789abcdeX", &hash).unwrap());
    }

    #[test]
    fn prefix_slicing_respects_short_keys() {
        let short = "tiny";
        assert!(short.get(..API_KEY_PREFIX_LEN).is_none());
        let exact = "0123456789ab";
        assert_eq!(exact.get(..API_KEY_PREFIX_LEN), Some("0123456789ab"));
    }
}
