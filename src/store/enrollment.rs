//! Enrollment of new senders.
//!
//! Each enrollment returns an explicit grant carrying everything the sender
//! needs to be provisioned. Nothing is kept around after the call.

use ring::rand::{SecureRandom, SystemRandom};

use crate::error::StoreError;

use super::credential::{Credential, CredentialKey};
use super::CredentialStore;

/// Random bytes in a generated identifier (12 hex characters).
const IDENTIFIER_BYTES: usize = 6;

/// Attempts before giving up on finding an unused identifier.
const IDENTIFIER_ATTEMPTS: usize = 8;

/// Result of a successful enrollment.
#[derive(Debug, Clone)]
pub struct EnrollmentGrant {
    pub identifier: String,
    pub name: String,
    pub key: CredentialKey,
    pub created_at: u64,
}

impl EnrollmentGrant {
    fn from_credential(credential: Credential) -> Self {
        Self {
            identifier: credential.identifier,
            name: credential.display_name,
            key: credential.key,
            created_at: credential.created_at,
        }
    }

    /// Pairing string handed to the sender out of band: `identifier|key_hex`.
    pub fn pairing_code(&self) -> String {
        format!("{}|{}", self.identifier, self.key.to_hex())
    }
}

/// Generate a fresh random identifier.
pub fn generate_identifier() -> Result<String, StoreError> {
    let mut bytes = [0u8; IDENTIFIER_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| StoreError::KeyGeneration)?;
    Ok(hex::encode(bytes))
}

/// Enroll a sender under a generated identifier.
pub fn enroll(
    store: &CredentialStore,
    name: &str,
    key: Option<CredentialKey>,
) -> Result<EnrollmentGrant, StoreError> {
    let key = match key {
        Some(k) => k,
        None => CredentialKey::generate()?,
    };

    let mut last_err = None;
    for _ in 0..IDENTIFIER_ATTEMPTS {
        let identifier = generate_identifier()?;
        match store.create(&identifier, name, Some(key.clone())) {
            Ok(credential) => return Ok(EnrollmentGrant::from_credential(credential)),
            Err(e @ StoreError::DuplicateIdentifier { .. }) => last_err = Some(e),
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or(StoreError::KeyGeneration))
}
