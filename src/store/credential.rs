//! Credential records.

use std::fmt;

use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Pre-shared key length in bytes.
pub const KEY_LEN: usize = 16;

/// A 16-byte pre-shared key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialKey([u8; KEY_LEN]);

impl CredentialKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a key from the system CSPRNG.
    pub fn generate() -> Result<Self, StoreError> {
        let mut bytes = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| StoreError::KeyGeneration)?;
        Ok(Self(bytes))
    }

    /// Parse a key from 32 hex characters.
    pub fn from_hex(text: &str) -> Result<Self, StoreError> {
        let decoded = hex::decode(text.trim()).map_err(|e| StoreError::InvalidKey {
            message: format!("not valid hex: {}", e),
        })?;
        let bytes: [u8; KEY_LEN] = decoded.try_into().map_err(|v: Vec<u8>| StoreError::InvalidKey {
            message: format!("{} bytes, expected {}", v.len(), KEY_LEN),
        })?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialKey([REDACTED])")
    }
}

/// One enrolled credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Unique, stable identifier.
    pub identifier: String,
    /// Human label. Mutable, not unique.
    pub display_name: String,
    /// Pre-shared HMAC key. Immutable; rotate by delete and re-create.
    pub key: CredentialKey,
    /// Highest nonce accepted so far. Only ever increases.
    pub last_nonce: u32,
    /// Unix seconds at enrollment.
    pub created_at: u64,
}

/// On-disk shape of a credential, keyed by identifier in the store file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedCredential {
    pub name: String,
    pub psk: String,
    pub last_nonce: u32,
    pub added_at: u64,
}

impl PersistedCredential {
    pub(crate) fn from_credential(credential: &Credential) -> Self {
        Self {
            name: credential.display_name.clone(),
            psk: credential.key.to_hex(),
            last_nonce: credential.last_nonce,
            added_at: credential.created_at,
        }
    }

    pub(crate) fn into_credential(self, identifier: String) -> Result<Credential, StoreError> {
        Ok(Credential {
            identifier,
            display_name: self.name,
            key: CredentialKey::from_hex(&self.psk)?,
            last_nonce: self.last_nonce,
            created_at: self.added_at,
        })
    }
}
