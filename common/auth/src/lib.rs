pub mod claims;
pub mod error;
pub mod external;
mod header;
pub mod jwks;
pub mod local;
pub mod principal;
pub mod revocation;
pub mod roles;

pub use claims::{Audience, ExternalClaims, LocalClaims, RealmAccess};
pub use error::{AuthError, AuthResult};
pub use external::ExternalTokenValidator;
pub use jwks::{JwksCache, JwksConfig, KeySet};
pub use local::LocalTokenCodec;
pub use principal::Principal;
pub use revocation::{RevocationConfig, RevocationStore};
pub use roles::{has_role, select_primary_role, ROLE_PRIORITY};
