use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::error::{AuthError, AuthResult};

/// Token header decoded without trusting `jsonwebtoken`'s `Algorithm` enum,
/// so unknown values such as `none` surface as algorithm errors instead of
/// parse errors.
#[derive(Debug, Deserialize)]
pub(crate) struct RawHeader {
    pub alg: String,
    #[serde(default)]
    pub kid: Option<String>,
}

pub(crate) fn decode_raw_header(token: &str) -> AuthResult<RawHeader> {
    let segment = token
        .split('.')
        .next()
        .filter(|part| !part.is_empty())
        .ok_or_else(|| AuthError::Malformed("empty token".to_string()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|err| AuthError::Malformed(format!("header is not base64url: {err}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|err| AuthError::Malformed(format!("header is not valid JSON: {err}")))
}
