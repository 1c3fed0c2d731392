//! Trigger action executor.
//!
//! Runs the configured program after an accepted beacon without ever
//! holding up beacon processing.

mod action;
mod output;
mod subprocess;

pub use action::{action_from_config, CommandAction, LogOnlyAction, TriggerAction};
pub use output::sanitize_output;
pub use subprocess::{SubprocessBuilder, SubprocessResult};
