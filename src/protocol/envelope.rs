//! Manufacturer-specific advertisement envelope.
//!
//! BLE manufacturer data starts with a 16-bit company identifier in
//! little-endian order. The beacon payload follows it. Stripping happens
//! here so the authenticator only ever sees the beacon frame.

/// Company identifier reserved for testing and internal use.
pub const DEFAULT_COMPANY_ID: u16 = 0xFFFF;

const COMPANY_ID_LEN: usize = 2;

/// A single received advertisement as delivered by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Transport address of the sender. Untrusted and possibly rotating.
    pub sender_address: String,
    /// Raw manufacturer-specific data, company id included.
    pub manufacturer_data: Vec<u8>,
}

/// Return the beacon payload if `data` carries our company identifier.
///
/// `None` means the advertisement belongs to somebody else (or is too
/// short to carry a company id at all).
pub fn strip_company_id(data: &[u8], company_id: u16) -> Option<&[u8]> {
    if data.len() < COMPANY_ID_LEN {
        return None;
    }
    let found = u16::from_le_bytes([data[0], data[1]]);
    if found != company_id {
        return None;
    }
    Some(&data[COMPANY_ID_LEN..])
}

/// Wrap a beacon payload in manufacturer data for `company_id`.
pub fn wrap_payload(payload: &[u8], company_id: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(COMPANY_ID_LEN + payload.len());
    out.extend_from_slice(&company_id.to_le_bytes());
    out.extend_from_slice(payload);
    out
}
