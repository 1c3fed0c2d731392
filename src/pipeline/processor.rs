//! Per-advertisement processing and the scan loop.

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, trace, warn};

use crate::audit::{AuditEntry, AuditLogger};
use crate::auth::{Accepted, BeaconAuthenticator, RateLimiter};
use crate::error::{AuthError, BeaconError, ParseError};
use crate::executor::TriggerAction;
use crate::protocol::{strip_company_id, Advertisement};

use super::metrics::PipelineMetrics;

/// What happened to one advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Different company id, or too short to carry one.
    NotOurs,
    /// Our company id, but not a valid beacon frame.
    Malformed(ParseError),
    /// No credential signed this frame.
    NoMatch,
    /// Correctly signed, stale nonce.
    Replayed {
        identifier: String,
        nonce: u32,
        last_nonce: u32,
    },
    /// Correctly signed, but the counter could not be committed.
    CounterUnavailable { identifier: String },
    /// Accepted; the trigger action was started.
    Accepted(Accepted),
}

/// Turns advertisements into verdicts and fires the trigger action.
///
/// Every frame carrying our company id is verified; nothing about one frame
/// changes how the next is judged. `replay_reports` only throttles the warn
/// and audit lines for replays of the same credential.
pub struct BeaconPipeline {
    authenticator: Arc<BeaconAuthenticator>,
    replay_reports: Arc<RateLimiter>,
    action: Arc<dyn TriggerAction>,
    audit_logger: Option<Arc<AuditLogger>>,
    metrics: Arc<PipelineMetrics>,
    company_id: u16,
}

impl BeaconPipeline {
    pub fn new(
        authenticator: Arc<BeaconAuthenticator>,
        replay_reports: Arc<RateLimiter>,
        action: Arc<dyn TriggerAction>,
        company_id: u16,
    ) -> Self {
        Self {
            authenticator,
            replay_reports,
            action,
            audit_logger: None,
            metrics: Arc::new(PipelineMetrics::new()),
            company_id,
        }
    }

    pub fn with_audit_logger(mut self, logger: Arc<AuditLogger>) -> Self {
        self.audit_logger = Some(logger);
        self
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Process one advertisement to completion.
    ///
    /// Never fails: every problem with the frame is an outcome, and only
    /// `Accepted` has side effects beyond logging.
    pub fn process(&self, advertisement: &Advertisement) -> FrameOutcome {
        let outcome = self.evaluate(advertisement);
        self.report(advertisement, &outcome);

        if let FrameOutcome::Accepted(accepted) = &outcome {
            self.action.fire(accepted);
        }

        self.metrics.record(&outcome);
        outcome
    }

    fn evaluate(&self, advertisement: &Advertisement) -> FrameOutcome {
        let Some(payload) = strip_company_id(&advertisement.manufacturer_data, self.company_id)
        else {
            return FrameOutcome::NotOurs;
        };

        match self.authenticator.authenticate(payload) {
            Ok(accepted) => FrameOutcome::Accepted(accepted),
            Err(BeaconError::Parse(e)) => FrameOutcome::Malformed(e),
            Err(BeaconError::Auth(AuthError::NoMatch)) => FrameOutcome::NoMatch,
            Err(BeaconError::Auth(AuthError::ReplayRejected {
                identifier,
                nonce,
                last_nonce,
            })) => FrameOutcome::Replayed {
                identifier,
                nonce,
                last_nonce,
            },
            Err(BeaconError::Auth(AuthError::CounterUnavailable {
                identifier,
                message,
            })) => {
                error!(
                    identifier = %identifier,
                    error = %message,
                    "Replay counter could not be persisted, beacon refused"
                );
                FrameOutcome::CounterUnavailable { identifier }
            }
        }
    }

    fn report(&self, advertisement: &Advertisement, outcome: &FrameOutcome) {
        let sender = advertisement.sender_address.as_str();
        match outcome {
            FrameOutcome::NotOurs => trace!(sender, "Ignoring foreign advertisement"),
            FrameOutcome::Malformed(e) => debug!(sender, error = %e, "Discarding malformed beacon"),
            FrameOutcome::NoMatch => debug!(sender, "Beacon matched no credential"),
            FrameOutcome::CounterUnavailable { .. } => {}
            FrameOutcome::Replayed {
                identifier,
                nonce,
                last_nonce,
            } => {
                if !self.replay_reports.check_and_record(identifier) {
                    self.metrics.record_suppressed_report();
                    debug!(sender, identifier = %identifier, nonce, "Replayed beacon rejected");
                    return;
                }
                warn!(
                    sender,
                    identifier = %identifier,
                    nonce,
                    last_nonce,
                    "Replayed beacon rejected"
                );
                self.audit(AuditEntry::replay_rejected(
                    sender,
                    identifier,
                    *nonce,
                    *last_nonce,
                ));
            }
            FrameOutcome::Accepted(accepted) => {
                info!(
                    sender,
                    identifier = %accepted.identifier,
                    name = %accepted.display_name,
                    nonce = accepted.nonce,
                    "Trigger beacon accepted"
                );
                self.audit(AuditEntry::accepted(
                    sender,
                    &accepted.identifier,
                    accepted.nonce,
                ));
            }
        }
    }

    fn audit(&self, entry: AuditEntry) {
        if let Some(logger) = &self.audit_logger {
            if let Err(e) = logger.log(&entry) {
                error!(error = %e, "Failed to write audit entry");
            }
        }
    }

    /// Consume advertisements until the channel closes or `shutdown` fires.
    ///
    /// Frames are handled one at a time on the blocking pool, since accepting
    /// one syncs the store and audit files. Stopping between frames is always
    /// safe; each frame is verified and committed as one unit.
    pub async fn run(
        self: Arc<Self>,
        mut advertisements: mpsc::Receiver<Advertisement>,
        shutdown: Arc<Notify>,
    ) {
        let notified = shutdown.notified();
        tokio::pin!(notified);

        info!(
            company_id = %format!("0x{:04x}", self.company_id),
            "Beacon pipeline running"
        );

        loop {
            tokio::select! {
                next = advertisements.recv() => match next {
                    Some(advertisement) => {
                        let pipeline = Arc::clone(&self);
                        let job = tokio::task::spawn_blocking(move || {
                            pipeline.process(&advertisement);
                        });
                        if let Err(e) = job.await {
                            error!(error = %e, "Beacon processing task failed");
                        }
                    }
                    None => {
                        debug!("Advertisement channel closed");
                        break;
                    }
                },
                _ = &mut notified => {
                    info!("Shutdown signal received, stopping beacon pipeline");
                    break;
                }
            }
        }

        let totals = self.metrics.snapshot();
        info!(
            received = totals.received,
            accepted = totals.accepted,
            replayed = totals.replayed,
            no_match = totals.no_match,
            malformed = totals.malformed,
            replay_reports_suppressed = totals.replay_reports_suppressed,
            "Beacon pipeline stopped"
        );
    }
}
