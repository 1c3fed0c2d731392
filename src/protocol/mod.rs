//! Wire protocol module.
//!
//! Two layers live here: the beacon frame carried inside a BLE
//! manufacturer-data advertisement, and the ingest framing the local
//! scanner uses to hand advertisements to the daemon.
//!
//! ## Ingest Format
//!
//! Records are length-prefixed JSON:
//! ```text
//! [4 bytes: length (big-endian u32)][{"address": "...", "data": "<hex>"}]
//! ```

mod envelope;
mod frame;
mod record;
mod wire;

pub use envelope::{strip_company_id, wrap_payload, Advertisement, DEFAULT_COMPANY_ID};
pub use frame::{
    parse_frame, signed_message, BeaconFrame, COMMAND_TRIGGER, FRAME_LEN, SIGNATURE_LEN,
    SIGNED_LEN,
};
pub use record::AdvertisementRecord;
pub use wire::{read_message, read_message_with_timeout, write_message, DEFAULT_MAX_RECORD_SIZE};
