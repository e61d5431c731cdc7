use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Request-scoped identity attached by the middleware pipeline; every audit
/// row carries this triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditContext {
    pub tenant_id: String,
    pub user_id: String,
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub client_ip: Option<String>,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub action: AuditAction,
    pub old_values: serde_json::Value,
    pub new_values: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        context: &AuditContext,
        entity_type: impl Into<String>,
        entity_id: Option<String>,
        action: AuditAction,
        old_values: serde_json::Value,
        new_values: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
            client_ip: context.client_ip.clone(),
            entity_type: entity_type.into(),
            entity_id,
            action,
            old_values,
            new_values,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub type AuditResult<T> = Result<T, AuditError>;
