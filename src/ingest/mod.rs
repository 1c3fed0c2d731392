//! Scanner feed ingestion.
//!
//! A local scanner process (the radio side) connects to a Unix socket and
//! streams the advertisements it sees. This module authenticates that peer,
//! decodes records, and queues them for the beacon pipeline.

mod feed;
mod listener;

pub use feed::handle_feed;
pub use listener::{IngestListener, IngestMetrics};
