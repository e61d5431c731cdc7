use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::extract::State;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use common_audit::{AuditSink, PgAuditSink};
use common_auth::{
    ExternalTokenValidator, JwksCache, JwksConfig, LocalTokenCodec, Principal, RevocationConfig,
    RevocationStore,
};
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::config::{AuthMode, Config};
use crate::handlers::{admin, auth, hives, units};
use crate::metrics::ServerMetrics;
use crate::middleware::audit_ctx::audit_context;
use crate::middleware::auth::{authenticate, authenticate_optional, AuthStage};
use crate::middleware::authz::require_super_admin;
use crate::middleware::body_limit::body_size_guard;
use crate::middleware::csrf::csrf_guard;
use crate::middleware::device::authenticate_device;
use crate::middleware::rate_limit::rate_limit;
use crate::middleware::security_headers::security_headers;
use crate::middleware::tenant::bind_tenant;
use crate::rate_limit::TenantRateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub auth: Arc<AuthStage>,
    pub revocation: RevocationStore,
    pub rate_limiter: TenantRateLimiter,
    pub audit: Arc<dyn AuditSink>,
    pub metrics: Arc<ServerMetrics>,
}

impl AppState {
    pub fn new(config: Config, pool: PgPool) -> Result<Self> {
        config.validate()?;

        let revocation = RevocationStore::new(RevocationConfig::default());
        let auth = match config.auth_mode {
            AuthMode::Disabled => {
                warn!("authentication is DISABLED; every request runs as the mock identity");
                AuthStage::Disabled {
                    principal: mock_principal(),
                }
            }
            AuthMode::Local => {
                let secret = config.jwt_secret.as_deref().unwrap_or_default();
                let codec = LocalTokenCodec::new(secret)
                    .map_err(|err| anyhow!("failed to initialise token codec: {err}"))?;
                AuthStage::Local {
                    codec,
                    revocation: revocation.clone(),
                }
            }
            AuthMode::External => {
                let oidc = config
                    .oidc
                    .clone()
                    .ok_or_else(|| anyhow!("external auth mode requires OIDC configuration"))?;
                let mut jwks_config = JwksConfig::new(oidc.issuer.clone());
                if let Some(base) = oidc.discovery_base_url.clone() {
                    jwks_config = jwks_config.with_discovery_base_url(base);
                }
                if let Some(host) = oidc.host_header.clone() {
                    jwks_config = jwks_config.with_host_header(host);
                }
                let jwks = Arc::new(JwksCache::new(jwks_config)?);
                AuthStage::External {
                    validator: ExternalTokenValidator::new(jwks, oidc.issuer, oidc.client_id),
                    revocation: revocation.clone(),
                }
            }
        };

        let rate_limiter = TenantRateLimiter::new(&config.rate_limit);
        let metrics = Arc::new(ServerMetrics::new()?);
        let audit: Arc<dyn AuditSink> = Arc::new(PgAuditSink::new(pool.clone()));

        Ok(Self {
            pool,
            config: Arc::new(config),
            auth: Arc::new(auth),
            revocation,
            rate_limiter,
            audit,
            metrics,
        })
    }
}

fn mock_principal() -> Principal {
    Principal {
        user_id: "dev-user".to_string(),
        tenant_id: "dev-tenant".to_string(),
        email: "dev@example.test".to_string(),
        display_name: "Local Developer".to_string(),
        role: "admin".to_string(),
        roles: vec!["admin".to_string()],
        impersonator_id: None,
        impersonating: false,
        original_tenant_id: None,
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(response) => response,
        Err(err) => {
            warn!(?err, "failed to render metrics");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(axum::body::Body::from("metrics unavailable"))
                .expect("failed to build metrics error response")
        }
    }
}

/// Assembles the request pipeline. Per route class, stages run top-down:
/// security headers, body cap, CSRF, authentication (user or device), tenant
/// binding, audit enrichment, rate limiting, authorization, handler.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/logout_all", post(auth::logout_all))
        .route("/api/hives", get(hives::list_hives).post(hives::create_hive))
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(from_fn(audit_context))
        .layer(from_fn_with_state(state.clone(), bind_tenant))
        .layer(from_fn_with_state(state.clone(), authenticate))
        .layer(from_fn(csrf_guard));

    let device = Router::new()
        .route("/api/units/report", post(units::submit_report))
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(from_fn(audit_context))
        .layer(from_fn_with_state(state.clone(), authenticate_device));

    // The gate answers unauthenticated and unauthorized identically, so the
    // auth stage here only attaches identity instead of rejecting.
    let admin_routes = Router::new()
        .route("/admin/tenants", get(admin::list_tenants))
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(from_fn(audit_context))
        .layer(from_fn_with_state(state.clone(), bind_tenant))
        .layer(from_fn_with_state(state.clone(), require_super_admin))
        .layer(from_fn_with_state(state.clone(), authenticate_optional))
        .layer(from_fn(csrf_guard));

    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/auth/login", post(auth::login))
        .merge(protected)
        .merge(device)
        .merge(admin_routes)
        .layer(from_fn_with_state(state.clone(), body_size_guard))
        .layer(from_fn(security_headers))
        .layer(cors_layer(&state.config))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = if config.cors_origins.is_empty() {
        ["http://localhost:3000", "http://localhost:5173"]
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect()
    } else {
        config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect()
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-csrf-token"),
            HeaderName::from_static("x-api-key"),
        ])
        .allow_credentials(true)
}
