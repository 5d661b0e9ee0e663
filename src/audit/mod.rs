pub mod logger;
pub mod redact;
pub mod store;
pub mod verify;

pub use logger::{AuditLogger, AuditOptions};
pub use store::{AuditQuery, Severity};
pub use verify::IntegrityVerifier;
