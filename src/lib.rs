//! Beacon Gate Library
//!
//! Core of the beacon-gate daemon: verifies authenticated BLE trigger
//! beacons from enrolled senders against a persistent credential store,
//! rejects replays, and fires a configured action on acceptance.

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod pipeline;
pub mod protocol;
pub mod store;
