//! Audit entry types.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One security-relevant beacon event.
///
/// Only beacons whose signature matched a credential are audited; ambient
/// traffic and forgeries stay in the debug log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub event_id: Uuid,
    /// Transport address the beacon arrived from. Informational only.
    pub sender_address: String,
    /// Credential whose key signed the beacon.
    pub identifier: String,
    pub nonce: u32,
    pub result: AuditResult,
}

impl AuditEntry {
    /// A beacon that was accepted and fired the trigger.
    pub fn accepted(sender_address: &str, identifier: &str, nonce: u32) -> Self {
        Self::new(sender_address, identifier, nonce, AuditResult::Accepted)
    }

    /// A correctly signed beacon whose nonce was not fresh.
    pub fn replay_rejected(
        sender_address: &str,
        identifier: &str,
        nonce: u32,
        last_nonce: u32,
    ) -> Self {
        Self::new(
            sender_address,
            identifier,
            nonce,
            AuditResult::ReplayRejected { last_nonce },
        )
    }

    fn new(sender_address: &str, identifier: &str, nonce: u32, result: AuditResult) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event_id: Uuid::new_v4(),
            sender_address: sender_address.to_string(),
            identifier: identifier.to_string(),
            nonce,
            result,
        }
    }
}

/// Outcome recorded in the audit log.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditResult {
    Accepted,
    ReplayRejected {
        /// Counter value the nonce failed to exceed.
        last_nonce: u32,
    },
}
