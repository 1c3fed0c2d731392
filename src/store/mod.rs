//! Credential store.
//!
//! Holds one record per enrolled sender: pre-shared key, replay counter,
//! and metadata. Backed by a JSON file with atomic replace-on-write.

mod credential;
mod disk;
mod enrollment;
mod registry;

pub use credential::{Credential, CredentialKey, KEY_LEN};
pub use enrollment::{enroll, generate_identifier, EnrollmentGrant};
pub use registry::{CredentialStore, DEFAULT_MAX_CREDENTIALS, MAX_CREDENTIALS_CEILING};
