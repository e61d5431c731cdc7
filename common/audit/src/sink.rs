use async_trait::async_trait;
use axum::http::HeaderMap;
use sqlx::PgPool;
use tracing::debug;

use crate::model::{AuditError, AuditEvent, AuditResult};

/// Destination for audit rows. Handlers call this through the trait so tests
/// can swap in a no-op sink.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> AuditResult<()>;
}

/// Writes audit rows through the storage layer. Immutability (no UPDATE or
/// DELETE) is enforced by policies on the table itself.
#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, event: &AuditEvent) -> AuditResult<()> {
        sqlx::query(
            "INSERT INTO audit_log (id, tenant_id, user_id, client_ip, entity_type, entity_id, action, old_values, new_values, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(event.id)
        .bind(&event.tenant_id)
        .bind(&event.user_id)
        .bind(&event.client_ip)
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(event.action.as_str())
        .bind(&event.old_values)
        .bind(&event.new_values)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(|err| AuditError::Storage(err.to_string()))?;

        debug!(
            tenant_id = %event.tenant_id,
            user_id = %event.user_id,
            entity_type = %event.entity_type,
            action = event.action.as_str(),
            "Recorded audit event"
        );
        Ok(())
    }
}

/// Discards events; used by unit tests and tools that run without storage.
#[derive(Clone, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _event: &AuditEvent) -> AuditResult<()> {
        Ok(())
    }
}

/// Client address as reported by the reverse proxy, falling back to the
/// direct peer header.
pub fn client_ip_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next().map(|part| part.trim().to_string()))
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_ip_prefers_forwarded_for_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip_from_headers(&headers).as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn client_ip_absent_when_no_proxy_headers() {
        let headers = HeaderMap::new();
        assert_eq!(client_ip_from_headers(&headers), None);
    }
}
