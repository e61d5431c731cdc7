use chrono::{DateTime, Utc};
use common_auth::Principal;
use serde::Serialize;
use sqlx::{Connection, FromRow, PgConnection};
use tracing::debug;

/// Tenant-scoped user row, as resolved or provisioned during tenant binding.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserRecord {
    pub id: String,
    pub tenant_id: String,
    pub external_user_id: Option<String>,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub is_active: bool,
    pub must_change_password: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TenantRecord {
    pub id: String,
    pub name: String,
    pub plan: Option<String>,
    pub status: String,
}

const USER_COLUMNS: &str = "id, tenant_id, external_user_id, email, display_name, role, \
                            is_active, must_change_password, last_login_at, created_at, updated_at";

/// Resolves the tenant of an external identity whose token carried no org
/// claim. The lookup runs under a scoped bypass flag that the storage layer's
/// policies recognise, inside a transaction that is always rolled back so the
/// flag cannot outlive this call.
pub async fn resolve_external_tenant(
    conn: &mut PgConnection,
    external_user_id: &str,
) -> sqlx::Result<Option<String>> {
    let mut tx = Connection::begin(conn).await?;
    sqlx::query("SELECT set_config('app.org_fallback_mode', 'true', true)")
        .execute(&mut *tx)
        .await?;
    let tenant_id: Option<String> =
        sqlx::query_scalar("SELECT tenant_id FROM users WHERE external_user_id = $1")
            .bind(external_user_id)
            .fetch_optional(&mut *tx)
            .await?;
    tx.rollback().await?;
    Ok(tenant_id)
}

pub async fn lookup_user_by_id(
    conn: &mut PgConnection,
    user_id: &str,
) -> sqlx::Result<Option<UserRecord>> {
    sqlx::query_as::<_, UserRecord>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
    ))
    .bind(user_id)
    .fetch_optional(conn)
    .await
}

pub async fn lookup_user_by_external_id(
    conn: &mut PgConnection,
    external_user_id: &str,
) -> sqlx::Result<Option<UserRecord>> {
    sqlx::query_as::<_, UserRecord>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE external_user_id = $1"
    ))
    .bind(external_user_id)
    .fetch_optional(conn)
    .await
}

/// Tenant status, with absence of the column value meaning active.
pub async fn tenant_status(
    conn: &mut PgConnection,
    tenant_id: &str,
) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar("SELECT COALESCE(status, 'active') FROM tenants WHERE id = $1")
        .bind(tenant_id)
        .fetch_optional(conn)
        .await
}

/// Record role granted to a just-provisioned external identity.
pub fn record_role_for(principal_role: &str) -> &'static str {
    if principal_role == "admin" {
        "admin"
    } else {
        "member"
    }
}

/// Idempotent first-login provisioning: find-or-create the tenant, then the
/// user keyed by the external subject. Concurrent first requests race through
/// conflict-ignoring inserts and converge on the re-select.
pub async fn provision_external_user(
    conn: &mut PgConnection,
    principal: &Principal,
    tenant_id: &str,
) -> sqlx::Result<Option<UserRecord>> {
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO tenants (id, name, status, created_at, updated_at)
         VALUES ($1, $1, 'active', $2, $2)
         ON CONFLICT DO NOTHING",
    )
    .bind(tenant_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO users (id, tenant_id, external_user_id, email, display_name, role,
                            is_active, must_change_password, created_at, updated_at)
         VALUES ($1, $2, $1, $3, $4, $5, TRUE, FALSE, $6, $6)
         ON CONFLICT DO NOTHING",
    )
    .bind(&principal.user_id)
    .bind(tenant_id)
    .bind(&principal.email)
    .bind(&principal.display_name)
    .bind(record_role_for(&principal.role))
    .bind(now)
    .execute(&mut *conn)
    .await?;

    debug!(
        user_id = %principal.user_id,
        tenant_id,
        "ensured tenant and user rows for external identity"
    );
    lookup_user_by_external_id(conn, &principal.user_id).await
}

pub async fn list_tenants(conn: &mut PgConnection) -> sqlx::Result<Vec<TenantRecord>> {
    sqlx::query_as::<_, TenantRecord>(
        "SELECT id, name, plan, COALESCE(status, 'active') AS status FROM tenants ORDER BY id",
    )
    .fetch_all(conn)
    .await
}
