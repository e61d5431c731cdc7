pub mod model;
pub mod sink;

pub use model::{AuditAction, AuditContext, AuditError, AuditEvent, AuditResult};
pub use sink::{client_ip_from_headers, AuditSink, NoopAuditSink, PgAuditSink};
