//! Truncated HMAC-SHA256 beacon tags.
//!
//! The tag is the first 8 bytes of HMAC-SHA256(psk, command || nonce_be).
//! A 64-bit tag is what fits in a legacy advertisement next to the command
//! and nonce; forgery odds are 2^-64 per attempt per credential, not 2^-256.

use ring::hmac;
use subtle::ConstantTimeEq;

use crate::protocol::{signed_message, BeaconFrame, COMMAND_TRIGGER, SIGNATURE_LEN};
use crate::store::CredentialKey;

/// Compute the tag a sender holding `key` would put on this command and nonce.
pub fn compute_expected_signature(
    key: &CredentialKey,
    command_type: u8,
    nonce: u32,
) -> [u8; SIGNATURE_LEN] {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key.as_bytes());
    let tag = hmac::sign(&key, &signed_message(command_type, nonce));
    let mut out = [0u8; SIGNATURE_LEN];
    out.copy_from_slice(&tag.as_ref()[..SIGNATURE_LEN]);
    out
}

/// Compare two tags in constant time.
pub fn signatures_equal(expected: &[u8; SIGNATURE_LEN], received: &[u8; SIGNATURE_LEN]) -> bool {
    expected.ct_eq(received).into()
}

/// Build a signed trigger frame, as the sending device does.
pub fn sign_trigger(key: &CredentialKey, nonce: u32) -> BeaconFrame {
    BeaconFrame::trigger(
        nonce,
        compute_expected_signature(key, COMMAND_TRIGGER, nonce),
    )
}
