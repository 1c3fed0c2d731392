//! Error types for the beacon daemon.
//!
//! Provides a unified error handling system using thiserror. Per-frame
//! failures (`ParseError`, `AuthError`) are plain values the pipeline
//! inspects; `DaemonError` covers everything that can stop a component.

mod types;

pub use types::*;
