// Bastion — Audit Module
//
// Append-only NDJSON record of every access-relevant action, with
// query, statistics, export, and retention sweep.

mod entry;
mod error;
mod log;

pub use entry::{AuditEntry, AuditFilter, SEVERITY_CRITICAL, SEVERITY_INFO, SEVERITY_WARNING};
pub use error::AuditError;
pub use log::{AuditLog, AuditStats};
