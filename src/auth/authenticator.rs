//! Beacon verification against the credential store.

use std::sync::Arc;

use tracing::trace;

use crate::error::{AuthError, BeaconError, StoreError};
use crate::protocol::{parse_frame, BeaconFrame};
use crate::store::{Credential, CredentialStore};

use super::hmac::{compute_expected_signature, signatures_equal};

/// A beacon that passed signature and replay checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub identifier: String,
    pub display_name: String,
    pub nonce: u32,
}

/// Verifies beacon frames against enrolled credentials.
///
/// The signature is always checked before the replay counter is touched, so
/// a frame with a bad tag never reveals anything about counter state.
pub struct BeaconAuthenticator {
    store: Arc<CredentialStore>,
}

impl BeaconAuthenticator {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Parse a beacon payload and verify it against every credential.
    ///
    /// Parse failures return before the store is consulted.
    pub fn authenticate(&self, payload: &[u8]) -> Result<Accepted, BeaconError> {
        let frame = parse_frame(payload)?;
        Ok(self.verify_any(&frame)?)
    }

    /// Verify a frame against one named credential.
    ///
    /// This is the lookup-by-identifier path. It applies the same checks as
    /// [`verify_any`](Self::verify_any) and is no more trusted.
    pub fn verify_against(
        &self,
        identifier: &str,
        frame: &BeaconFrame,
    ) -> Result<Accepted, AuthError> {
        let Ok(credential) = self.store.get(identifier) else {
            return Err(AuthError::NoMatch);
        };

        let expected =
            compute_expected_signature(&credential.key, frame.command_type, frame.nonce);
        if !signatures_equal(&expected, &frame.signature) {
            return Err(AuthError::NoMatch);
        }

        self.advance(&credential, frame.nonce)
    }

    /// Verify a frame against all credentials, first match in store order wins.
    ///
    /// Every credential's tag is computed and compared before any counter is
    /// consulted, so the sweep costs the same whether or not, and wherever,
    /// a match sits. Matching credentials are then tried in order; the first
    /// whose counter advances is returned. If all matches are stale the
    /// first replay is reported.
    pub fn verify_any(&self, frame: &BeaconFrame) -> Result<Accepted, AuthError> {
        let candidates = self.store.all();

        let matches: Vec<bool> = candidates
            .iter()
            .map(|c| {
                let expected =
                    compute_expected_signature(&c.key, frame.command_type, frame.nonce);
                signatures_equal(&expected, &frame.signature)
            })
            .collect();

        let mut first_replay = None;
        for (credential, _) in candidates
            .iter()
            .zip(matches.iter())
            .filter(|(_, matched)| **matched)
        {
            match self.advance(credential, frame.nonce) {
                Ok(accepted) => return Ok(accepted),
                Err(e @ AuthError::ReplayRejected { .. }) => {
                    if first_replay.is_none() {
                        first_replay = Some(e);
                    }
                }
                Err(AuthError::NoMatch) => continue,
                Err(e) => return Err(e),
            }
        }

        trace!(
            nonce = frame.nonce,
            candidates = candidates.len(),
            "No credential accepted beacon"
        );
        Err(first_replay.unwrap_or(AuthError::NoMatch))
    }

    fn advance(&self, credential: &Credential, nonce: u32) -> Result<Accepted, AuthError> {
        match self.store.try_advance(&credential.identifier, nonce) {
            Ok(true) => Ok(Accepted {
                identifier: credential.identifier.clone(),
                display_name: credential.display_name.clone(),
                nonce,
            }),
            Ok(false) => {
                let last_nonce = self
                    .store
                    .get(&credential.identifier)
                    .map(|c| c.last_nonce)
                    .unwrap_or(credential.last_nonce);
                Err(AuthError::ReplayRejected {
                    identifier: credential.identifier.clone(),
                    nonce,
                    last_nonce,
                })
            }
            // Deleted between the snapshot and the advance.
            Err(StoreError::NotFound { .. }) => Err(AuthError::NoMatch),
            Err(e) => Err(AuthError::CounterUnavailable {
                identifier: credential.identifier.clone(),
                message: e.to_string(),
            }),
        }
    }
}
