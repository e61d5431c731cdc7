use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::claims::LocalClaims;
use crate::error::{map_jwt_error, AuthError, AuthResult};
use crate::header::decode_raw_header;

const LOCAL_ALGORITHM: Algorithm = Algorithm::HS256;
const LOCAL_ALGORITHM_NAME: &str = "HS256";

/// Symmetric session-token codec. The secret is process-wide and loaded once
/// from configuration.
#[derive(Clone)]
pub struct LocalTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl LocalTokenCodec {
    pub fn new(secret: &str) -> AuthResult<Self> {
        if secret.is_empty() {
            return Err(AuthError::KeyParse(
                "local".to_string(),
                "signing secret must not be empty".to_string(),
            ));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }

    pub fn sign(&self, claims: &LocalClaims) -> AuthResult<String> {
        encode(&Header::new(LOCAL_ALGORITHM), claims, &self.encoding).map_err(map_jwt_error)
    }

    pub fn validate(&self, token: &str) -> AuthResult<LocalClaims> {
        let header = decode_raw_header(token)?;
        if header.alg != LOCAL_ALGORITHM_NAME {
            return Err(AuthError::InvalidAlgorithm(header.alg));
        }

        let mut validation = Validation::new(LOCAL_ALGORITHM);
        validation.leeway = 0;
        // Expiry is checked by hand below so the boundary is exact.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<LocalClaims>(token, &self.decoding, &validation).map_err(map_jwt_error)?;

        let claims = data.claims;
        if claims.jti.is_empty() {
            return Err(AuthError::MissingClaim("jti".to_string()));
        }
        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }
}
