//! End-to-end checks against a live Postgres. Gated behind the `integration`
//! feature; point TEST_DATABASE_URL at a scratch database first:
//!
//!     TEST_DATABASE_URL=postgres://localhost/apis_test \
//!         cargo test -p apis-server --features integration
#![cfg(feature = "integration")]

use std::time::Duration as StdDuration;

use apis_server::config::{
    AuthMode, BodyLimitConfig, Config, Environment, RateLimitConfig,
};
use apis_server::tenancy;
use apis_server::{build_router, AppState};
use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{header, StatusCode};
use chrono::{Duration, Utc};
use common_auth::{LocalClaims, LocalTokenCodec, Principal};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tower::ServiceExt;
use uuid::Uuid;

const TEST_SECRET: &str = "integration-test-secret";
const SCHEMA: &str = include_str!("../db/schema.sql");

static SCHEMA_APPLIED: tokio::sync::OnceCell<()> = tokio::sync::OnceCell::const_new();

async fn test_pool() -> PgPool {
    let url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must point at a scratch database");
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .acquire_timeout(StdDuration::from_secs(5))
        .connect(&url)
        .await
        .expect("failed to connect to test database");

    SCHEMA_APPLIED
        .get_or_init(|| async {
            pool.execute(SCHEMA).await.expect("failed to apply schema");
        })
        .await;
    pool
}

fn local_config() -> Config {
    Config {
        environment: Environment::Test,
        auth_mode: AuthMode::Local,
        disable_auth_ack: None,
        jwt_secret: Some(TEST_SECRET.to_string()),
        oidc: None,
        super_admin_emails: Vec::new(),
        rate_limit: RateLimitConfig {
            max_requests: 1000,
            window: StdDuration::from_secs(60),
        },
        body_limit: BodyLimitConfig::default(),
        secure_cookies: None,
        database_url: String::new(),
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: Vec::new(),
    }
}

async fn seed_tenant(pool: &PgPool, tenant_id: &str) {
    sqlx::query(
        "INSERT INTO tenants (id, name, status) VALUES ($1, $1, 'active')
         ON CONFLICT DO NOTHING",
    )
    .bind(tenant_id)
    .execute(pool)
    .await
    .unwrap();
}

async fn seed_password_user(pool: &PgPool, user_id: &str, tenant_id: &str, password: &str) {
    seed_tenant(pool, tenant_id).await;
    let hash = bcrypt::hash(password, 4).unwrap();
    sqlx::query(
        "INSERT INTO users (id, tenant_id, email, display_name, password_hash, role)
         VALUES ($1, $2, $3, $4, $5, 'admin')
         ON CONFLICT DO NOTHING",
    )
    .bind(user_id)
    .bind(tenant_id)
    .bind(format!("{user_id}@apis.test"))
    .bind(user_id)
    .bind(hash)
    .execute(pool)
    .await
    .unwrap();
}

fn cookie_from_response(response: &axum::response::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| {
            cookie
                .split(';')
                .next()
                .and_then(|pair| pair.trim().strip_prefix(&format!("{name}=")))
                .map(str::to_string)
        })
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn local_login_logout_cycle() {
    let pool = test_pool().await;
    let user_id = format!("u-cycle-{}", Uuid::new_v4());
    let tenant_id = format!("t-cycle-{}", Uuid::new_v4().simple());
    seed_password_user(&pool, &user_id, &tenant_id, "hunter2-strong").await;

    let state = AppState::new(local_config(), pool).unwrap();
    let app = build_router(state);

    let login = app
        .clone()
        .oneshot(
            Request::post("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(
                    r#"{{"email":"{user_id}@apis.test","password":"hunter2-strong"}}"#
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);

    let session = cookie_from_response(&login, "apis_session").unwrap();
    let csrf = cookie_from_response(&login, "apis_csrf_token").unwrap();
    assert!(!session.is_empty());
    assert_eq!(csrf.len(), 64);

    let listing = app
        .clone()
        .oneshot(
            Request::get("/api/hives")
                .header(header::COOKIE, format!("apis_session={session}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(listing.status(), StatusCode::OK);

    let logout = app
        .clone()
        .oneshot(
            Request::post("/auth/logout")
                .header(
                    header::COOKIE,
                    format!("apis_session={session}; apis_csrf_token={csrf}"),
                )
                .header("x-csrf-token", &csrf)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(logout.status(), StatusCode::OK);

    let replay = app
        .oneshot(
            Request::get("/api/hives")
                .header(header::COOKIE, format!("apis_session={session}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(replay).await;
    assert_eq!(body["error"], "Token revoked");
    assert_eq!(body["code"], 401);
}

#[tokio::test]
async fn tenant_mismatch_is_denied_with_logged_defence() {
    let pool = test_pool().await;
    let user_id = format!("u-mismatch-{}", Uuid::new_v4());
    let stored_tenant = format!("t-stored-{}", Uuid::new_v4().simple());
    let token_tenant = format!("t-token-{}", Uuid::new_v4().simple());
    seed_password_user(&pool, &user_id, &stored_tenant, "pw-irrelevant").await;
    seed_tenant(&pool, &token_tenant).await;

    let state = AppState::new(local_config(), pool).unwrap();
    let claims = LocalClaims::new(
        user_id.clone(),
        token_tenant.clone(),
        "admin",
        Duration::minutes(30),
    );
    let token = LocalTokenCodec::new(TEST_SECRET).unwrap().sign(&claims).unwrap();

    let response = build_router(state)
        .oneshot(
            Request::get("/api/hives")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "access denied");
    assert_eq!(body["code"], 403);
}

#[tokio::test]
async fn jit_provisioning_is_idempotent() {
    let pool = test_pool().await;
    let sub = format!("u-jit-{}", Uuid::new_v4());
    let tenant = format!("t-jit-{}", Uuid::new_v4().simple());
    let principal = external_principal(&sub, &tenant);

    let mut conn = pool.acquire().await.unwrap();
    let first = tenancy::provision_external_user(&mut conn, &principal, &tenant)
        .await
        .unwrap()
        .expect("user provisioned");
    assert_eq!(first.tenant_id, tenant);
    assert_eq!(first.external_user_id.as_deref(), Some(sub.as_str()));
    assert_eq!(first.role, "member");

    let second = tenancy::provision_external_user(&mut conn, &principal, &tenant)
        .await
        .unwrap()
        .expect("user still present");
    assert_eq!(second.id, first.id);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE external_user_id = $1")
        .bind(&sub)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn concurrent_first_logins_provision_one_row() {
    let pool = test_pool().await;
    let sub = format!("u-race-{}", Uuid::new_v4());
    let tenant = format!("t-race-{}", Uuid::new_v4().simple());

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        let principal = external_principal(&sub, &tenant);
        let tenant = tenant.clone();
        tasks.push(tokio::spawn(async move {
            let mut conn = pool.acquire().await.unwrap();
            tenancy::provision_external_user(&mut conn, &principal, &tenant)
                .await
                .unwrap()
                .expect("row after provisioning")
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE external_user_id = $1")
        .bind(&sub)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(users, 1);
    let tenants: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tenants WHERE id = $1")
        .bind(&tenant)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(tenants, 1);
}

#[tokio::test]
async fn org_fallback_lookup_resolves_and_rolls_back() {
    let pool = test_pool().await;
    let sub = format!("u-fallback-{}", Uuid::new_v4());
    let tenant = format!("t-fallback-{}", Uuid::new_v4().simple());
    let principal = external_principal(&sub, &tenant);

    let mut conn = pool.acquire().await.unwrap();
    tenancy::provision_external_user(&mut conn, &principal, &tenant)
        .await
        .unwrap();

    let resolved = tenancy::resolve_external_tenant(&mut conn, &sub).await.unwrap();
    assert_eq!(resolved.as_deref(), Some(tenant.as_str()));

    let missing = tenancy::resolve_external_tenant(&mut conn, "nobody-here")
        .await
        .unwrap();
    assert!(missing.is_none());

    // The bypass flag must not survive the lookup's transaction.
    let flag: Option<String> =
        sqlx::query_scalar("SELECT current_setting('app.org_fallback_mode', true)")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
    assert!(flag.is_none() || flag.as_deref() == Some(""));
}

#[tokio::test]
async fn device_key_flow_accepts_reports_and_rejects_bad_keys() {
    let pool = test_pool().await;
    let tenant = format!("t-unit-{}", Uuid::new_v4().simple());
    let unit_id = format!("unit-{}", Uuid::new_v4().simple());
    seed_tenant(&pool, &tenant).await;

    let raw_key = format!("apk_{}", Uuid::new_v4().simple());
    let hash = bcrypt::hash(&raw_key, 4).unwrap();
    sqlx::query(
        "INSERT INTO unit_api_keys (unit_id, tenant_id, api_key_hash, api_key_prefix, status)
         VALUES ($1, $2, $3, $4, 'active')",
    )
    .bind(&unit_id)
    .bind(&tenant)
    .bind(&hash)
    .bind(&raw_key[..12])
    .execute(&pool)
    .await
    .unwrap();

    let state = AppState::new(local_config(), pool.clone()).unwrap();
    let app = build_router(state);

    let accepted = app
        .clone()
        .oneshot(
            Request::post("/api/units/report")
                .header("x-api-key", &raw_key)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"battery_mv":3600,"temperature_c":34.5}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);

    let reports: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM unit_reports WHERE unit_id = $1")
        .bind(&unit_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(reports, 1);

    let last_seen: Option<chrono::DateTime<Utc>> =
        sqlx::query_scalar("SELECT last_seen FROM unit_api_keys WHERE unit_id = $1")
            .bind(&unit_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(last_seen.is_some());

    // Same prefix, wrong key: the prefix alone is not authentication.
    let forged = format!("{}{}", &raw_key[..12], "0000000000000000");
    let rejected = app
        .oneshot(
            Request::post("/api/units/report")
                .header("x-api-key", &forged)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(rejected).await["error"], "Invalid API key");
}

#[tokio::test]
async fn created_hives_are_audited() {
    let pool = test_pool().await;
    let user_id = format!("u-audit-{}", Uuid::new_v4());
    let tenant = format!("t-audit-{}", Uuid::new_v4().simple());
    seed_password_user(&pool, &user_id, &tenant, "hunter2-strong").await;

    let state = AppState::new(local_config(), pool.clone()).unwrap();
    let app = build_router(state);

    let login = app
        .clone()
        .oneshot(
            Request::post("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(
                    r#"{{"email":"{user_id}@apis.test","password":"hunter2-strong"}}"#
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);
    let session = cookie_from_response(&login, "apis_session").unwrap();
    let csrf = cookie_from_response(&login, "apis_csrf_token").unwrap();

    let created = app
        .oneshot(
            Request::post("/api/hives")
                .header(
                    header::COOKIE,
                    format!("apis_session={session}; apis_csrf_token={csrf}"),
                )
                .header("x-csrf-token", &csrf)
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::from(r#"{"name":"North Field 1"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let hive = body_json(created).await;
    assert_eq!(hive["tenant_id"], tenant);

    let row: (String, String, Option<String>) = sqlx::query_as(
        "SELECT action, user_id, client_ip FROM audit_log WHERE entity_type = 'hive' AND entity_id = $1",
    )
    .bind(hive["id"].as_str().unwrap())
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row.0, "create");
    assert_eq!(row.1, user_id);
    assert_eq!(row.2.as_deref(), Some("203.0.113.9"));
}

fn external_principal(sub: &str, tenant: &str) -> Principal {
    Principal {
        user_id: sub.to_string(),
        tenant_id: tenant.to_string(),
        email: format!("{sub}@apis.test"),
        display_name: sub.to_string(),
        role: "user".to_string(),
        roles: vec!["user".to_string()],
        impersonator_id: None,
        impersonating: false,
        original_tenant_id: None,
    }
}
