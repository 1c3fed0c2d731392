//! Beacon frame codec.
//!
//! ```text
//! offset 0  len 1  command_type   0x01 = trigger
//! offset 1  len 4  nonce          u32, big-endian
//! offset 5  len 8  signature      HMAC-SHA256(key, bytes[0..5])[0..8]
//! ```
//!
//! Bytes past offset 13 are ignored so later frame revisions can append
//! fields without breaking older receivers.

use crate::error::ParseError;

/// Command byte for a trigger beacon, the only command defined.
pub const COMMAND_TRIGGER: u8 = 0x01;

/// Length of the truncated authentication tag.
pub const SIGNATURE_LEN: usize = 8;

/// Length of the signed prefix: command byte plus nonce.
pub const SIGNED_LEN: usize = 1 + 4;

/// Minimum frame length.
pub const FRAME_LEN: usize = SIGNED_LEN + SIGNATURE_LEN;

/// A parsed beacon frame. Not yet tied to any credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconFrame {
    pub command_type: u8,
    pub nonce: u32,
    pub signature: [u8; SIGNATURE_LEN],
}

impl BeaconFrame {
    /// Build a trigger frame from a nonce and an already computed tag.
    pub fn trigger(nonce: u32, signature: [u8; SIGNATURE_LEN]) -> Self {
        Self {
            command_type: COMMAND_TRIGGER,
            nonce,
            signature,
        }
    }

    /// The bytes covered by the signature.
    pub fn signed_bytes(&self) -> [u8; SIGNED_LEN] {
        signed_message(self.command_type, self.nonce)
    }

    /// Encode to the 13-byte wire form.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        out[..SIGNED_LEN].copy_from_slice(&self.signed_bytes());
        out[SIGNED_LEN..].copy_from_slice(&self.signature);
        out
    }
}

/// Build the signed message for a command and nonce.
pub fn signed_message(command_type: u8, nonce: u32) -> [u8; SIGNED_LEN] {
    let mut msg = [0u8; SIGNED_LEN];
    msg[0] = command_type;
    msg[1..].copy_from_slice(&nonce.to_be_bytes());
    msg
}

/// Parse a beacon payload with the vendor envelope already removed.
pub fn parse_frame(raw: &[u8]) -> Result<BeaconFrame, ParseError> {
    if raw.len() < FRAME_LEN {
        return Err(ParseError::Malformed {
            reason: format!("{} bytes, expected at least {}", raw.len(), FRAME_LEN),
        });
    }

    let command_type = raw[0];
    if command_type != COMMAND_TRIGGER {
        return Err(ParseError::UnknownCommand { command_type });
    }

    let mut nonce_bytes = [0u8; 4];
    nonce_bytes.copy_from_slice(&raw[1..SIGNED_LEN]);

    let mut signature = [0u8; SIGNATURE_LEN];
    signature.copy_from_slice(&raw[SIGNED_LEN..FRAME_LEN]);

    Ok(BeaconFrame {
        command_type,
        nonce: u32::from_be_bytes(nonce_bytes),
        signature,
    })
}
