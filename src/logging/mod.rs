//! Logging infrastructure for sitetrack
//!
//! Operational logs go through `tracing`. Data changes and sign-ins are
//! additionally written as JSONL audit events when `AUDIT_LOG` is set.

pub mod audit;

pub use audit::{AuditAction, AuditEvent, AuditLogger};
