use serde::Serialize;

use crate::claims::{ExternalClaims, LocalClaims};
use crate::roles::select_primary_role;

/// The authenticated identity for a single request. Built by the auth stage,
/// completed by tenant binding, gone when the response is written.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub user_id: String,
    pub tenant_id: String,
    pub email: String,
    pub display_name: String,
    /// Primary role, selected deterministically.
    pub role: String,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonator_id: Option<String>,
    pub impersonating: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_tenant_id: Option<String>,
}

impl Principal {
    pub fn from_local_claims(claims: &LocalClaims) -> Self {
        Self {
            user_id: claims.sub.clone(),
            tenant_id: claims.tenant_id.clone(),
            email: String::new(),
            display_name: String::new(),
            role: claims.role.clone(),
            roles: vec![claims.role.clone()],
            impersonator_id: claims.impersonator_id.clone(),
            impersonating: claims.impersonating.unwrap_or(false),
            original_tenant_id: claims.original_tenant_id.clone(),
        }
    }

    pub fn from_external_claims(claims: &ExternalClaims) -> Self {
        let roles = claims.roles().to_vec();
        Self {
            user_id: claims.sub.clone(),
            // May be empty; tenant binding resolves the fallback.
            tenant_id: claims.org_id.clone().unwrap_or_default(),
            email: claims.email.clone().unwrap_or_default(),
            display_name: claims.display_name(),
            role: select_primary_role(&roles),
            roles,
            impersonator_id: None,
            impersonating: false,
            original_tenant_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn local_principal_mirrors_claims() {
        let claims = LocalClaims::new("u1", "t1", "admin", Duration::minutes(30));
        let principal = Principal::from_local_claims(&claims);
        assert_eq!(principal.user_id, "u1");
        assert_eq!(principal.tenant_id, "t1");
        assert_eq!(principal.role, "admin");
        assert_eq!(principal.roles, ["admin"]);
        assert!(!principal.impersonating);
    }

    #[test]
    fn external_principal_selects_primary_role() {
        let raw = serde_json::json!({
            "sub": "u9",
            "org_id": "t9",
            "email": "a@b.c",
            "realm_access": {"roles": ["viewer", "user", "admin"]},
            "exp": 2_000_000_000u32,
            "iss": "https://idp.example",
        });
        let claims: ExternalClaims = serde_json::from_value(raw).unwrap();
        let principal = Principal::from_external_claims(&claims);
        assert_eq!(principal.role, "admin");
        assert_eq!(principal.tenant_id, "t9");
        assert_eq!(principal.email, "a@b.c");
    }

    #[test]
    fn external_principal_empty_org_id_stays_empty() {
        let raw = serde_json::json!({
            "sub": "u9",
            "exp": 2_000_000_000u32,
            "iss": "https://idp.example",
        });
        let claims: ExternalClaims = serde_json::from_value(raw).unwrap();
        let principal = Principal::from_external_claims(&claims);
        assert!(principal.tenant_id.is_empty());
        assert_eq!(principal.role, "");
    }
}
