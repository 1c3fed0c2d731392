//! Error types for the beacon daemon.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the daemon.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Socket-related errors.
    #[error("Socket error: {message}")]
    Socket { message: String },

    /// Ingest peer rejected.
    #[error("Unauthorized peer: UID {uid} not in allowed list")]
    UnauthorizedPeer { uid: u32 },

    /// Credential store errors.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Trigger action errors.
    #[error("Action error: {kind}")]
    Action { kind: ActionErrorKind },

    /// Protocol errors.
    #[error("Protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Beacon frame parse failures.
///
/// Both variants are recoverable: the frame is discarded and nothing is
/// mutated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed beacon frame: {reason}")]
    Malformed { reason: String },

    #[error("Unknown command type 0x{command_type:02x}")]
    UnknownCommand { command_type: u8 },
}

/// Beacon authentication failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No stored credential produced this signature. The expected outcome
    /// for ambient advertisements that are not ours.
    #[error("No credential matched the beacon signature")]
    NoMatch,

    /// Signature matched but the nonce was not newer than the stored counter.
    #[error("Nonce {nonce} replayed for credential {identifier} (last accepted {last_nonce})")]
    ReplayRejected {
        identifier: String,
        nonce: u32,
        last_nonce: u32,
    },

    /// Signature matched but the counter could not be advanced durably.
    #[error("Replay counter for {identifier} unavailable: {message}")]
    CounterUnavailable { identifier: String, message: String },
}

/// Either half of a full beacon check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BeaconError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Credential registry errors. Surfaced to enrollment, never to the beacon
/// pipeline.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Credential already enrolled: {identifier}")]
    DuplicateIdentifier { identifier: String },

    #[error("Credential not found: {identifier}")]
    NotFound { identifier: String },

    #[error("Credential store full: {max} credentials enrolled")]
    CapacityExceeded { max: usize },

    #[error("Invalid key: {message}")]
    InvalidKey { message: String },

    #[error("Key generation failed: system random source unavailable")]
    KeyGeneration,

    #[error("Credential store {path} has insecure permissions {mode:04o}, expected 0600")]
    InsecurePermissions { path: PathBuf, mode: u32 },

    #[error("Failed to persist credential store {path}: {message}")]
    Persistence { path: PathBuf, message: String },

    #[error("Corrupt credential store {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

/// Trigger action error kinds.
#[derive(Error, Debug)]
pub enum ActionErrorKind {
    #[error("Action execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("Action timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },
}

/// Protocol error kinds.
#[derive(Error, Debug)]
pub enum ProtocolErrorKind {
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid record format: {message}")]
    InvalidRecordFormat { message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timed out")]
    ConnectionTimeout,
}

/// Result type alias for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
