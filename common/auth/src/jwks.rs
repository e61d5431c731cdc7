use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use reqwest::header::HOST;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{AuthError, AuthResult};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct JwksConfig {
    /// Issuer base URL; discovery lives at
    /// `{issuer}/.well-known/openid-configuration`.
    pub issuer: String,
    /// Where to actually reach the issuer when its advertised URL is not
    /// routable from this process (containerized topologies). Applied to the
    /// discovery fetch and to the jwks_uri the document points at.
    pub discovery_base_url: Option<String>,
    /// Host header to send alongside a substituted base URL.
    pub host_header: Option<String>,
    pub cache_ttl: Duration,
    /// Minimum spacing between kid-miss forced refreshes.
    pub forced_refresh_interval: Duration,
}

impl JwksConfig {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            discovery_base_url: None,
            host_header: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            forced_refresh_interval: DEFAULT_FORCED_REFRESH_INTERVAL,
        }
    }

    pub fn with_discovery_base_url(mut self, base: impl Into<String>) -> Self {
        self.discovery_base_url = Some(base.into());
        self
    }

    pub fn with_host_header(mut self, host: impl Into<String>) -> Self {
        self.host_header = Some(host.into());
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_forced_refresh_interval(mut self, interval: Duration) -> Self {
        self.forced_refresh_interval = interval;
        self
    }
}

/// Immutable snapshot of the provider's verification keys, keyed by kid.
pub struct KeySet {
    keys: HashMap<String, DecodingKey>,
}

impl KeySet {
    pub fn get(&self, kid: &str) -> Option<&DecodingKey> {
        self.keys.get(kid)
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

struct CacheState {
    keyset: Option<Arc<KeySet>>,
    fetched_at: Option<Instant>,
    last_forced_refresh: Option<Instant>,
}

/// Verification-key cache for the external token validator. One instance per
/// process; all request tasks share it through the reader-writer lock.
pub struct JwksCache {
    client: Client,
    config: JwksConfig,
    state: RwLock<CacheState>,
}

impl JwksCache {
    pub fn new(config: JwksConfig) -> AuthResult<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| AuthError::JwksUnavailable(err.to_string()))?;
        Ok(Self {
            client,
            config,
            state: RwLock::new(CacheState {
                keyset: None,
                fetched_at: None,
                last_forced_refresh: None,
            }),
        })
    }

    /// Cached keyset, refreshed when the TTL has lapsed. Falls back to the
    /// previous keyset when a refresh fails and one exists.
    pub async fn keyset(&self) -> AuthResult<Arc<KeySet>> {
        {
            let state = self.state.read().await;
            if let Some(keyset) = fresh_keyset(&state, self.config.cache_ttl) {
                return Ok(keyset);
            }
        }

        let mut state = self.state.write().await;
        // Re-check: another task may have refreshed while we waited.
        if let Some(keyset) = fresh_keyset(&state, self.config.cache_ttl) {
            return Ok(keyset);
        }
        self.refresh_locked(&mut state).await
    }

    /// Keyset guaranteed to have been checked for `kid`: a miss triggers a
    /// forced refresh, rate-limited so rotating-key storms cannot hammer the
    /// provider. The caller still resolves the kid on the returned set.
    pub async fn key_for_kid(&self, kid: &str) -> AuthResult<Arc<KeySet>> {
        let keyset = self.keyset().await?;
        if keyset.contains(kid) {
            return Ok(keyset);
        }

        let mut state = self.state.write().await;
        if let Some(current) = &state.keyset {
            if current.contains(kid) {
                return Ok(current.clone());
            }
        }

        let refresh_allowed = state
            .last_forced_refresh
            .map(|at| at.elapsed() >= self.config.forced_refresh_interval)
            .unwrap_or(true);
        if !refresh_allowed {
            debug!(kid, "kid miss inside forced-refresh cooldown; serving cached keyset");
            return state
                .keyset
                .clone()
                .ok_or_else(|| AuthError::JwksUnavailable("no keyset cached".to_string()));
        }

        state.last_forced_refresh = Some(Instant::now());
        self.refresh_locked(&mut state).await
    }

    /// Unconditional refresh, used by the periodic background task. Returns
    /// the number of keys now cached.
    pub async fn refresh(&self) -> AuthResult<usize> {
        let mut state = self.state.write().await;
        let keyset = self.refresh_locked(&mut state).await?;
        Ok(keyset.len())
    }

    async fn refresh_locked(&self, state: &mut CacheState) -> AuthResult<Arc<KeySet>> {
        match self.fetch_keyset().await {
            Ok(keyset) => {
                let keyset = Arc::new(keyset);
                state.keyset = Some(keyset.clone());
                state.fetched_at = Some(Instant::now());
                debug!(keys = keyset.len(), "refreshed JWKS keyset");
                Ok(keyset)
            }
            Err(err) => match &state.keyset {
                Some(cached) => {
                    warn!(error = %err, "JWKS refresh failed; serving cached keyset");
                    Ok(cached.clone())
                }
                None => Err(err),
            },
        }
    }

    async fn fetch_keyset(&self) -> AuthResult<KeySet> {
        let base = self
            .config
            .discovery_base_url
            .as_deref()
            .unwrap_or(&self.config.issuer);
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            base.trim_end_matches('/')
        );

        let document: DiscoveryDocument = self
            .get_json(&discovery_url)
            .await
            .map_err(|err| AuthError::JwksUnavailable(format!("discovery fetch failed: {err}")))?;

        let mut jwks_uri = document.jwks_uri;
        if let Some(base) = &self.config.discovery_base_url {
            // The document advertises URLs under the issuer; rewrite them to
            // the address we can actually reach.
            if base != &self.config.issuer {
                jwks_uri = jwks_uri.replacen(&self.config.issuer, base, 1);
            }
        }

        let response: JwksResponse = self
            .get_json(&jwks_uri)
            .await
            .map_err(|err| AuthError::JwksUnavailable(format!("keyset fetch failed: {err}")))?;

        let mut keys = HashMap::new();
        for entry in response.keys {
            let Some(kid) = entry.kid.clone() else {
                warn!("skipping JWKS entry without kid");
                continue;
            };
            match build_decoding_key(&entry) {
                Ok(Some(key)) => {
                    keys.insert(kid, key);
                }
                Ok(None) => {
                    debug!(kid, kty = entry.kty.as_deref().unwrap_or(""), "skipping unsupported JWKS entry");
                }
                Err(err) => {
                    warn!(kid, error = %err, "failed to parse JWKS entry");
                }
            }
        }

        if keys.is_empty() {
            return Err(AuthError::JwksUnavailable(
                "keyset contained no usable keys".to_string(),
            ));
        }
        Ok(KeySet { keys })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, String> {
        let mut request = self.client.get(url);
        if let Some(host) = &self.config.host_header {
            request = request.header(HOST, host);
        }
        let response = request.send().await.map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {} from {url}", response.status()));
        }
        response.json::<T>().await.map_err(|err| err.to_string())
    }
}

fn fresh_keyset(state: &CacheState, ttl: Duration) -> Option<Arc<KeySet>> {
    match (&state.keyset, state.fetched_at) {
        (Some(keyset), Some(at)) if at.elapsed() < ttl => Some(keyset.clone()),
        _ => None,
    }
}

fn build_decoding_key(entry: &Jwk) -> AuthResult<Option<DecodingKey>> {
    let kid = entry.kid.clone().unwrap_or_default();
    match entry.kty.as_deref() {
        Some("RSA") => {
            let modulus = entry
                .n
                .as_deref()
                .ok_or_else(|| AuthError::KeyParse(kid.clone(), "missing RSA modulus".to_string()))?;
            let exponent = entry
                .e
                .as_deref()
                .ok_or_else(|| AuthError::KeyParse(kid.clone(), "missing RSA exponent".to_string()))?;
            DecodingKey::from_rsa_components(modulus, exponent)
                .map(Some)
                .map_err(|err| AuthError::KeyParse(kid, err.to_string()))
        }
        Some("EC") if entry.crv.as_deref() == Some("P-256") => {
            let x = entry
                .x
                .as_deref()
                .ok_or_else(|| AuthError::KeyParse(kid.clone(), "missing EC x".to_string()))?;
            let y = entry
                .y
                .as_deref()
                .ok_or_else(|| AuthError::KeyParse(kid.clone(), "missing EC y".to_string()))?;
            DecodingKey::from_ec_components(x, y)
                .map(Some)
                .map_err(|err| AuthError::KeyParse(kid, err.to_string()))
        }
        _ => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: Option<String>,
    crv: Option<String>,
    n: Option<String>,
    e: Option<String>,
    x: Option<String>,
    y: Option<String>,
}
