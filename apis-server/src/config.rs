use std::env;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Disabled,
    Local,
    External,
}

impl AuthMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(AuthMode::Disabled),
            "local" => Ok(AuthMode::Local),
            "external" => Ok(AuthMode::External),
            other => Err(anyhow!(
                "Unsupported AUTH_MODE '{other}'. Use disabled, local, or external."
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Development,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub issuer: String,
    pub client_id: String,
    pub discovery_base_url: Option<String>,
    pub host_header: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyLimitOverride {
    pub method: String,
    pub path: String,
    pub max_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct BodyLimitConfig {
    pub default_bytes: usize,
    pub upload_bytes: usize,
    pub overrides: Vec<BodyLimitOverride>,
}

impl Default for BodyLimitConfig {
    fn default() -> Self {
        Self {
            default_bytes: 1024 * 1024,
            upload_bytes: 16 * 1024 * 1024,
            overrides: Vec::new(),
        }
    }
}

impl BodyLimitConfig {
    /// Effective cap for a route: exact override first, default otherwise.
    pub fn limit_for(&self, method: &str, path: &str) -> usize {
        self.overrides
            .iter()
            .find(|entry| entry.method.eq_ignore_ascii_case(method) && entry.path == path)
            .map(|entry| entry.max_bytes)
            .unwrap_or(self.default_bytes)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub auth_mode: AuthMode,
    pub disable_auth_ack: Option<String>,
    pub jwt_secret: Option<String>,
    pub oidc: Option<OidcConfig>,
    pub super_admin_emails: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub body_limit: BodyLimitConfig,
    /// Explicit override for the Secure cookie flag; derived from the
    /// forwarded protocol when unset.
    pub secure_cookies: Option<bool>,
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let environment = Environment::parse(&env::var("APP_ENV").unwrap_or_default());
        let auth_mode = AuthMode::parse(&env::var("AUTH_MODE").unwrap_or_else(|_| "local".into()))?;

        let oidc = match env::var("OIDC_ISSUER") {
            Ok(issuer) => Some(OidcConfig {
                issuer,
                client_id: env::var("OIDC_CLIENT_ID").unwrap_or_default(),
                discovery_base_url: optional_env("OIDC_DISCOVERY_BASE_URL"),
                host_header: optional_env("OIDC_DISCOVERY_HOST_HEADER"),
            }),
            Err(_) => None,
        };

        let rate_limit = RateLimitConfig {
            max_requests: parsed_env("RATE_LIMIT_MAX_REQUESTS")?
                .unwrap_or(RateLimitConfig::default().max_requests),
            window: Duration::from_secs(
                parsed_env("RATE_LIMIT_WINDOW_SECS")?.unwrap_or(60),
            ),
        };

        let body_limit = BodyLimitConfig {
            default_bytes: parsed_env("BODY_LIMIT_DEFAULT_BYTES")?
                .unwrap_or(BodyLimitConfig::default().default_bytes),
            upload_bytes: parsed_env("BODY_LIMIT_UPLOAD_BYTES")?
                .unwrap_or(BodyLimitConfig::default().upload_bytes),
            overrides: env::var("BODY_LIMIT_OVERRIDES")
                .ok()
                .map(|raw| parse_body_limit_overrides(&raw))
                .transpose()
                .context("Failed to parse BODY_LIMIT_OVERRIDES")?
                .unwrap_or_default(),
        };

        let config = Self {
            environment,
            auth_mode,
            disable_auth_ack: optional_env("DISABLE_AUTH_ACK"),
            jwt_secret: optional_env("JWT_SECRET"),
            oidc,
            super_admin_emails: env::var("SUPER_ADMIN_EMAILS")
                .ok()
                .map(|raw| parse_email_list(&raw))
                .unwrap_or_default(),
            rate_limit,
            body_limit,
            secure_cookies: env::var("SECURE_COOKIES")
                .ok()
                .map(|raw| parse_bool(&raw))
                .transpose()
                .context("Failed to parse SECURE_COOKIES")?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parsed_env("PORT")?.unwrap_or(8080),
            cors_origins: env::var("CORS_ORIGINS")
                .ok()
                .map(|raw| {
                    raw.split(',')
                        .map(|origin| origin.trim().to_string())
                        .filter(|origin| !origin.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Startup invariants. Violations abort the process before it serves a
    /// single request.
    pub fn validate(&self) -> Result<()> {
        match self.auth_mode {
            AuthMode::Disabled => {
                if self.environment == Environment::Production {
                    bail!(
                        "AUTH_MODE=disabled is not permitted when APP_ENV=production. \
                         Refusing to start."
                    );
                }
                if self.disable_auth_ack.as_deref() != Some("yes") {
                    bail!(
                        "AUTH_MODE=disabled requires DISABLE_AUTH_ACK=yes to acknowledge \
                         that every request will run as a mock identity."
                    );
                }
            }
            AuthMode::Local => {
                if self.jwt_secret.as_deref().unwrap_or("").is_empty() {
                    bail!("AUTH_MODE=local requires a non-empty JWT_SECRET");
                }
            }
            AuthMode::External => {
                let oidc = self
                    .oidc
                    .as_ref()
                    .ok_or_else(|| anyhow!("AUTH_MODE=external requires OIDC_ISSUER"))?;
                if oidc.issuer.trim().is_empty() {
                    bail!("AUTH_MODE=external requires a non-empty OIDC_ISSUER");
                }
                if oidc.client_id.trim().is_empty() {
                    bail!("AUTH_MODE=external requires a non-empty OIDC_CLIENT_ID");
                }
            }
        }

        if self.disable_auth_ack.is_some() && self.auth_mode != AuthMode::Disabled {
            bail!("DISABLE_AUTH_ACK is only meaningful with AUTH_MODE=disabled");
        }
        Ok(())
    }

    pub fn is_super_admin(&self, email: &str) -> bool {
        !email.is_empty()
            && self
                .super_admin_emails
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(email))
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("Failed to parse {key}='{raw}'"))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("Unsupported boolean value '{other}'")),
    }
}

fn parse_email_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Parses `METHOD /path=bytes` entries separated by commas, e.g.
/// `POST /api/hives/photos=16777216,PUT /api/profile=4096`.
fn parse_body_limit_overrides(value: &str) -> Result<Vec<BodyLimitOverride>> {
    let mut overrides = Vec::new();
    for entry in value.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (route, bytes) = entry
            .rsplit_once('=')
            .ok_or_else(|| anyhow!("Override '{entry}' is missing '=<bytes>'"))?;
        let (method, path) = route
            .trim()
            .split_once(' ')
            .ok_or_else(|| anyhow!("Override '{entry}' is missing a method"))?;
        let max_bytes = bytes
            .trim()
            .parse::<usize>()
            .with_context(|| format!("Override '{entry}' has an invalid byte count"))?;
        overrides.push(BodyLimitOverride {
            method: method.trim().to_ascii_uppercase(),
            path: path.trim().to_string(),
            max_bytes,
        });
    }
    Ok(overrides)
}
