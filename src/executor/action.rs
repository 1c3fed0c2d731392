//! Trigger actions run after an accepted beacon.
//!
//! Actions are fire-and-forget: `fire` returns immediately, and whatever
//! happens to the action afterwards shows up only in the logs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::auth::Accepted;
use crate::config::ActionConfig;

use super::output::sanitize_output;
use super::subprocess::SubprocessBuilder;

/// Something to do once a trigger is accepted.
pub trait TriggerAction: Send + Sync {
    /// Start the action. Must not block the caller.
    fn fire(&self, accepted: &Accepted);
}

/// Logs the trigger and does nothing else.
#[derive(Debug, Default)]
pub struct LogOnlyAction;

impl TriggerAction for LogOnlyAction {
    fn fire(&self, accepted: &Accepted) {
        info!(
            identifier = %accepted.identifier,
            nonce = accepted.nonce,
            "Trigger accepted, no action program configured"
        );
    }
}

/// One running action. The count is released on drop, including when the
/// job unwinds.
struct InFlightSlot(Arc<AtomicUsize>);

impl InFlightSlot {
    /// Take a slot, or return the number already running if at `max`.
    fn acquire(counter: &Arc<AtomicUsize>, max: usize) -> Result<Self, usize> {
        let previous = counter.fetch_add(1, Ordering::AcqRel);
        if previous >= max {
            counter.fetch_sub(1, Ordering::AcqRel);
            return Err(previous);
        }
        Ok(Self(Arc::clone(counter)))
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs an external program on the blocking pool.
pub struct CommandAction {
    command: SubprocessBuilder,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
}

impl CommandAction {
    /// Default cap on concurrently running action processes.
    pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

    pub fn new(command: SubprocessBuilder) -> Self {
        Self {
            command,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Self::DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Number of action processes currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl TriggerAction for CommandAction {
    fn fire(&self, accepted: &Accepted) {
        let slot = match InFlightSlot::acquire(&self.in_flight, self.max_in_flight) {
            Ok(slot) => slot,
            Err(running) => {
                warn!(
                    identifier = %accepted.identifier,
                    running,
                    "Trigger action already running at capacity, dropping"
                );
                return;
            }
        };

        let command = self.command.clone();
        let identifier = accepted.identifier.clone();

        let job = move || {
            let _slot = slot;
            match command.run() {
                Ok(result) if result.success => info!(
                    identifier = %identifier,
                    program = %command.program().display(),
                    duration_ms = result.duration.as_millis() as u64,
                    stdout = %sanitize_output(&result.stdout, 10),
                    "Trigger action completed"
                ),
                Ok(result) => warn!(
                    identifier = %identifier,
                    program = %command.program().display(),
                    exit_code = ?result.exit_code,
                    stderr = %sanitize_output(&result.stderr, 10),
                    "Trigger action exited with failure"
                ),
                Err(e) => error!(
                    identifier = %identifier,
                    program = %command.program().display(),
                    error = %e,
                    "Trigger action failed"
                ),
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => {
                std::thread::spawn(job);
            }
        }
    }
}

/// Build the action described by the configuration.
pub fn action_from_config(config: &ActionConfig) -> Arc<dyn TriggerAction> {
    match &config.program {
        Some(program) => Arc::new(CommandAction::new(
            SubprocessBuilder::new(program)
                .args(&config.args)
                .timeout(Duration::from_secs(config.timeout_seconds))
                .clear_env(config.clear_env),
        )),
        None => Arc::new(LogOnlyAction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    fn accepted() -> Accepted {
        Accepted {
            identifier: "aa11bb22cc33".to_string(),
            display_name: "phone".to_string(),
            nonce: 1,
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_command_action_runs_without_blocking() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("fired");
        let script = format!("sleep 0.2; touch {}", marker.display());
        let action =
            CommandAction::new(SubprocessBuilder::new("sh").args(["-c", script.as_str()]));

        let start = Instant::now();
        action.fire(&accepted());
        assert!(start.elapsed() < Duration::from_millis(150));

        assert!(wait_for(|| marker.exists()));
        assert!(wait_for(|| action.in_flight() == 0));
    }

    #[test]
    fn test_spawn_failure_is_contained() {
        let action = CommandAction::new(SubprocessBuilder::new("/nonexistent/trigger"));
        action.fire(&accepted());
        assert!(wait_for(|| action.in_flight() == 0));
    }

    #[test]
    fn test_in_flight_cap_drops_extra_triggers() {
        let action = CommandAction::new(SubprocessBuilder::new("sleep").arg("1"))
            .with_max_in_flight(1);
        action.fire(&accepted());
        action.fire(&accepted());
        assert_eq!(action.in_flight(), 1);
        assert!(wait_for(|| action.in_flight() == 0));
    }

    #[test]
    fn test_slot_released_when_job_panics() {
        let counter = Arc::new(AtomicUsize::new(0));
        let slot = InFlightSlot::acquire(&counter, 1).unwrap();
        assert!(InFlightSlot::acquire(&counter, 1).is_err());

        let job = std::thread::spawn(move || {
            let _slot = slot;
            panic!("action job failed");
        });
        assert!(job.join().is_err());

        assert_eq!(counter.load(Ordering::Acquire), 0);
        assert!(InFlightSlot::acquire(&counter, 1).is_ok());
    }

    #[tokio::test]
    async fn test_fire_inside_runtime() {
        let action = CommandAction::new(SubprocessBuilder::new("true"));
        action.fire(&accepted());
        let deadline = Instant::now() + Duration::from_secs(5);
        while action.in_flight() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(action.in_flight(), 0);
    }

    #[test]
    fn test_action_from_config() {
        let mut config = ActionConfig::default();
        // Log-only when no program is set; must not panic outside a runtime.
        action_from_config(&config).fire(&accepted());

        config.program = Some("true".into());
        action_from_config(&config).fire(&accepted());
    }
}
