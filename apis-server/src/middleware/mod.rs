pub mod audit_ctx;
pub mod auth;
pub mod authz;
pub mod body_limit;
pub mod csrf;
pub mod device;
pub mod rate_limit;
pub mod security_headers;
pub mod tenant;
