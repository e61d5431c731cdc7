use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Token and key-management failures. Every variant is returned as a value;
/// the HTTP layer decides how much of it the client gets to see.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token is malformed: {0}")]
    Malformed(String),
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token algorithm '{0}' is not allowed")]
    InvalidAlgorithm(String),
    #[error("token has expired")]
    Expired,
    #[error("token has been revoked")]
    Revoked,
    #[error("token is missing required claim '{0}'")]
    MissingClaim(String),
    #[error("token claims failed validation: {0}")]
    ClaimsInvalid(String),
    #[error("token audience is not accepted")]
    AudienceMismatch,
    #[error("token issuer is not accepted")]
    IssuerMismatch,
    #[error("token missing kid header")]
    MissingKeyId,
    #[error("no verification key registered for kid '{0}'")]
    UnknownKeyId(String),
    #[error("failed to parse verification key for kid '{0}': {1}")]
    KeyParse(String, String),
    #[error("key set unavailable: {0}")]
    JwksUnavailable(String),
}

pub(crate) fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            AuthError::InvalidAlgorithm("unexpected".to_string())
        }
        ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
        ErrorKind::InvalidAudience => AuthError::AudienceMismatch,
        ErrorKind::ImmatureSignature => {
            AuthError::ClaimsInvalid("token is not yet valid".to_string())
        }
        ErrorKind::MissingRequiredClaim(name) => AuthError::MissingClaim(name.clone()),
        _ => AuthError::Malformed(err.to_string()),
    }
}
