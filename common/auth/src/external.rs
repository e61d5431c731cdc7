use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, Validation};
use tracing::debug;

use crate::claims::ExternalClaims;
use crate::error::{map_jwt_error, AuthError, AuthResult};
use crate::header::decode_raw_header;
use crate::jwks::JwksCache;

/// Signature algorithms accepted from the identity provider.
const ALLOWED_ALGORITHMS: &[&str] = &["RS256", "ES256"];

/// Validates identity-provider tokens against the cached key set.
#[derive(Clone)]
pub struct ExternalTokenValidator {
    jwks: Arc<JwksCache>,
    issuer: String,
    audience: String,
}

impl ExternalTokenValidator {
    pub fn new(jwks: Arc<JwksCache>, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            jwks,
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    pub fn jwks(&self) -> &Arc<JwksCache> {
        &self.jwks
    }

    pub async fn validate(&self, token: &str) -> AuthResult<ExternalClaims> {
        let header = decode_raw_header(token)?;
        if !ALLOWED_ALGORITHMS.contains(&header.alg.as_str()) {
            return Err(AuthError::InvalidAlgorithm(header.alg));
        }
        let algorithm: Algorithm = header
            .alg
            .parse()
            .map_err(|_| AuthError::InvalidAlgorithm(header.alg.clone()))?;
        let kid = header.kid.ok_or(AuthError::MissingKeyId)?;

        let keyset = self.jwks.key_for_kid(&kid).await?;
        let key = keyset
            .get(&kid)
            .ok_or_else(|| AuthError::UnknownKeyId(kid.clone()))?;

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[self.issuer.clone()]);
        validation.set_audience(&[self.audience.clone()]);
        validation.leeway = 0;
        // Time-window checks happen by hand below so the boundaries are exact.
        validation.validate_exp = false;
        validation.validate_nbf = false;

        let data = decode::<ExternalClaims>(token, key, &validation).map_err(map_jwt_error)?;
        let claims = data.claims;

        if claims.sub.is_empty() {
            return Err(AuthError::MissingClaim("sub".to_string()));
        }
        let now = Utc::now().timestamp();
        if let Some(nbf) = claims.nbf {
            if nbf > now {
                return Err(AuthError::ClaimsInvalid("token is not yet valid".to_string()));
            }
        }
        if claims.exp <= now {
            return Err(AuthError::Expired);
        }

        debug!(kid, sub = %claims.sub, "verified external token");
        Ok(claims)
    }
}
