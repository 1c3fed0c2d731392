//! Configuration settings for the beacon daemon.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::DaemonError;
use crate::protocol::{DEFAULT_COMPANY_ID, DEFAULT_MAX_RECORD_SIZE};
use crate::store::{DEFAULT_MAX_CREDENTIALS, MAX_CREDENTIALS_CEILING};

/// Main configuration structure for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub ingest: IngestConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub action: ActionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Scanner feed socket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Path to the Unix socket the scanner writes advertisements to.
    pub socket_path: PathBuf,
    /// Socket file permissions (e.g., "0660").
    #[serde(default = "default_socket_permissions")]
    pub permissions: String,
    /// UIDs allowed to feed advertisements. Empty rejects every peer.
    #[serde(default)]
    pub allowed_peer_uids: Vec<u32>,
    /// Maximum encoded record size in bytes.
    #[serde(default = "default_max_record_size")]
    pub max_record_size: usize,
    /// Idle timeout on a feed connection, in seconds.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_seconds: u64,
    /// Maximum simultaneous scanner connections.
    #[serde(default = "default_max_feeds")]
    pub max_concurrent_feeds: usize,
    /// Advertisements buffered between ingest and verification.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

/// Credential store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the JSON credential file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Maximum enrolled credentials.
    #[serde(default = "default_max_credentials")]
    pub max_credentials: usize,
}

/// Advertisement envelope configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    /// Company identifier carried in manufacturer data.
    #[serde(default = "default_company_id")]
    pub company_id: u16,
}

/// Replay reporting limits. These never affect which frames are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Replays of one credential reported per window; the rest are counted only.
    #[serde(default = "default_replay_reports")]
    pub replay_reports_per_window: usize,
    /// Report window in seconds.
    #[serde(default = "default_replay_report_window")]
    pub replay_report_window_seconds: u64,
}

/// Trigger action configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionConfig {
    /// Program to run on an accepted trigger. Unset means log only.
    pub program: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds before a running action is killed.
    #[serde(default = "default_action_timeout")]
    pub timeout_seconds: u64,
    /// Run the action with an empty environment.
    #[serde(default)]
    pub clear_env: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Audit logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_audit_log_path")]
    pub log_path: PathBuf,
}

fn default_socket_permissions() -> String {
    "0660".to_string()
}

fn default_max_record_size() -> usize {
    DEFAULT_MAX_RECORD_SIZE
}

fn default_socket_timeout() -> u64 {
    300
}

fn default_max_feeds() -> usize {
    4
}

fn default_queue_depth() -> usize {
    256
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/beacon-gate/trusted_devices.json")
}

fn default_max_credentials() -> usize {
    DEFAULT_MAX_CREDENTIALS
}

fn default_company_id() -> u16 {
    DEFAULT_COMPANY_ID
}

fn default_replay_reports() -> usize {
    20
}

fn default_replay_report_window() -> u64 {
    10
}

fn default_action_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_audit_enabled() -> bool {
    true
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("/var/log/beacon-gate/audit.log")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            max_credentials: default_max_credentials(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            company_id: default_company_id(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            replay_reports_per_window: default_replay_reports(),
            replay_report_window_seconds: default_replay_report_window(),
        }
    }
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            timeout_seconds: default_action_timeout(),
            clear_env: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            log_path: default_audit_log_path(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DaemonError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| DaemonError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            DaemonError::Config { message } => DaemonError::Config {
                message: format!("{}: {}", path.display(), message),
            },
            other => other,
        })
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, DaemonError> {
        let settings: Settings = toml::from_str(content).map_err(|e| DaemonError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;

        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<(), DaemonError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(DaemonError::Config {
                message: format!(
                    "Invalid log level '{}'. Valid levels: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(DaemonError::Config {
                message: format!(
                    "Invalid log format '{}'. Valid formats: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        if u32::from_str_radix(&self.ingest.permissions, 8).is_err() {
            return Err(DaemonError::Config {
                message: format!(
                    "Invalid socket permissions '{}'. Must be octal (e.g., '0660')",
                    self.ingest.permissions
                ),
            });
        }

        if self.store.max_credentials == 0 || self.store.max_credentials > MAX_CREDENTIALS_CEILING
        {
            return Err(DaemonError::Config {
                message: format!(
                    "store.max_credentials must be between 1 and {}, got {}",
                    MAX_CREDENTIALS_CEILING, self.store.max_credentials
                ),
            });
        }

        let positive = [
            ("ingest.max_concurrent_feeds", self.ingest.max_concurrent_feeds),
            ("ingest.queue_depth", self.ingest.queue_depth),
            ("ingest.max_record_size", self.ingest.max_record_size),
            (
                "security.replay_reports_per_window",
                self.security.replay_reports_per_window,
            ),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(DaemonError::Config {
                    message: format!("{} must be greater than zero", name),
                });
            }
        }

        Ok(())
    }
}
