//! Beacon pipeline.
//!
//! The scan loop: advertisements in, verdicts out. Each advertisement is
//! handled on its own; nothing about one frame affects the next except the
//! replay counter of an accepted credential.

mod metrics;
mod processor;

pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use processor::{BeaconPipeline, FrameOutcome};
