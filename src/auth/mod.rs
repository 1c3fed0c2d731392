//! Authentication module.
//!
//! Beacon signature verification and replay checks, per-sender rate
//! limiting, and peer credential checks for the ingest socket.

mod authenticator;
mod hmac;
mod peer_creds;
mod rate_limit;

pub use authenticator::{Accepted, BeaconAuthenticator};
pub use hmac::{compute_expected_signature, sign_trigger, signatures_equal};
pub use peer_creds::{verify_peer, PeerInfo};
pub use rate_limit::RateLimiter;
