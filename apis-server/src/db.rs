use std::sync::Arc;

use common_http_errors::ApiError;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};
use tokio::sync::{Mutex, MutexGuard};
use tracing::error;

const TENANT_ID_MAX_LEN: usize = 64;

/// The request's exclusive database connection. Dropping the last clone
/// returns the connection to the pool, which is how release stays guaranteed
/// on every exit path, panics included: the extension map unwinds, the guard
/// drops, the pool gets its connection back.
#[derive(Clone)]
pub struct RequestDb {
    conn: Arc<Mutex<PoolConnection<Postgres>>>,
}

impl RequestDb {
    pub async fn acquire(pool: &PgPool) -> Result<Self, ApiError> {
        let conn = pool.acquire().await.map_err(|err| {
            error!(error = %err, "failed to acquire database connection");
            ApiError::service_unavailable("Database temporarily unavailable")
        })?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: PoolConnection<Postgres>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, PoolConnection<Postgres>> {
        self.conn.lock().await
    }
}

/// Strict allowlist for tenant identifiers before they get anywhere near a
/// database session setting.
pub fn tenant_id_is_valid(tenant_id: &str) -> bool {
    !tenant_id.is_empty()
        && tenant_id.len() <= TENANT_ID_MAX_LEN
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Publishes the tenant onto the connection's session. The `true` scope means
/// an unset value reads back as NULL, which the row-level-security policies
/// treat as "no rows".
pub async fn publish_tenant(conn: &mut PgConnection, tenant_id: &str) -> sqlx::Result<()> {
    sqlx::query("SELECT set_config('app.tenant_id', $1, true)")
        .bind(tenant_id)
        .execute(conn)
        .await
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_allows_alphanumerics_hyphens_underscores() {
        assert!(tenant_id_is_valid("t1"));
        assert!(tenant_id_is_valid("acme-west_2"));
        assert!(tenant_id_is_valid("A"));
        assert!(tenant_id_is_valid(&"a".repeat(64)));
    }

    #[test]
    fn tenant_id_rejects_injection_shapes() {
        assert!(!tenant_id_is_valid(""));
        assert!(!tenant_id_is_valid("t1'; DROP TABLE users;--"));
        assert!(!tenant_id_is_valid("t1 t2"));
        assert!(!tenant_id_is_valid("t1\n"));
        assert!(!tenant_id_is_valid("tenant.id"));
        assert!(!tenant_id_is_valid(&"a".repeat(65)));
    }
}
