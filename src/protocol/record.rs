//! Advertisement records pushed by the scanner feed.

use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, ProtocolErrorKind};

use super::Advertisement;

/// One scanned advertisement as it travels over the ingest socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertisementRecord {
    /// Sender transport address (e.g. "AA:BB:CC:DD:EE:FF").
    pub address: String,

    /// Manufacturer-specific data, hex-encoded, company id included.
    pub data: String,
}

impl AdvertisementRecord {
    /// Build a record from raw manufacturer data.
    pub fn new(address: impl Into<String>, manufacturer_data: &[u8]) -> Self {
        Self {
            address: address.into(),
            data: hex::encode(manufacturer_data),
        }
    }

    /// Decode a record from a JSON message body.
    pub fn from_json(bytes: &[u8]) -> Result<Self, DaemonError> {
        serde_json::from_slice(bytes).map_err(|e| DaemonError::Protocol {
            kind: ProtocolErrorKind::InvalidRecordFormat {
                message: format!("Invalid JSON: {}", e),
            },
        })
    }

    /// Decode the hex payload into an advertisement.
    pub fn into_advertisement(self) -> Result<Advertisement, DaemonError> {
        let manufacturer_data = hex::decode(self.data.trim()).map_err(|e| DaemonError::Protocol {
            kind: ProtocolErrorKind::InvalidRecordFormat {
                message: format!("Invalid hex data: {}", e),
            },
        })?;

        Ok(Advertisement {
            sender_address: self.address,
            manufacturer_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_decodes_hex() {
        let record =
            AdvertisementRecord::from_json(br#"{"address":"AA:BB","data":"ffff01"}"#).unwrap();
        let adv = record.into_advertisement().unwrap();
        assert_eq!(adv.sender_address, "AA:BB");
        assert_eq!(adv.manufacturer_data, vec![0xff, 0xff, 0x01]);
    }

    #[test]
    fn test_record_rejects_bad_hex() {
        let record = AdvertisementRecord {
            address: "AA:BB".to_string(),
            data: "zz".to_string(),
        };
        assert!(matches!(
            record.into_advertisement(),
            Err(DaemonError::Protocol {
                kind: ProtocolErrorKind::InvalidRecordFormat { .. }
            })
        ));
    }

    #[test]
    fn test_record_rejects_missing_field() {
        assert!(AdvertisementRecord::from_json(br#"{"address":"AA:BB"}"#).is_err());
    }

    #[test]
    fn test_new_encodes_hex() {
        let record = AdvertisementRecord::new("AA", &[0xab, 0xcd]);
        assert_eq!(record.data, "abcd");
    }
}
