//! Audit logging module.
//!
//! Records accepted and replayed beacons as JSON lines, separate from the
//! operational log, so trigger history can be reviewed without debug noise.

mod entry;
mod logger;

pub use entry::{AuditEntry, AuditResult};
pub use logger::AuditLogger;
