//! Beacon Gate - verifies authenticated BLE trigger beacons and fires an action.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use beacon_gate::audit::AuditLogger;
use beacon_gate::auth::{BeaconAuthenticator, RateLimiter};
use beacon_gate::config::Settings;
use beacon_gate::executor::action_from_config;
use beacon_gate::ingest::IngestListener;
use beacon_gate::pipeline::BeaconPipeline;
use beacon_gate::store::{enroll, CredentialKey, CredentialStore};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");
const DEFAULT_CONFIG_PATH: &str = "/etc/beacon-gate/daemon.toml";

type BoxError = Box<dyn std::error::Error>;

/// What the binary was asked to do.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run,
    Enroll { name: String, key: Option<String> },
    List,
    Remove { identifier: String },
    Rename { identifier: String, name: String },
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{} {}", NAME, VERSION);
        return ExitCode::SUCCESS;
    }

    let (config_path, rest) = split_config_arg(&args[1..]);
    let command = match parse_command(&rest) {
        Ok(c) => c,
        Err(message) => {
            eprintln!("{}\nRun '{} --help' for usage.", message, NAME);
            return ExitCode::FAILURE;
        }
    };

    let settings = match Settings::load(&config_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&settings) {
        eprintln!("Error initializing logging: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match command {
        Command::Run => run_daemon(settings, config_path),
        other => manage(&settings, other),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "{} failed", NAME);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_daemon(settings: Settings, config_path: String) -> Result<(), BoxError> {
    info!("Starting {} v{}", NAME, VERSION);
    info!("Configuration loaded from: {}", config_path);
    info!("Ingest socket: {}", settings.ingest.socket_path.display());
    info!("Credential store: {}", settings.store.path.display());
    info!("Log level: {}", settings.logging.level);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main(settings, config_path))
}

/// Async main function.
async fn async_main(settings: Settings, config_path: String) -> Result<(), BoxError> {
    let store = Arc::new(CredentialStore::open(
        &settings.store.path,
        settings.store.max_credentials,
    )?);
    if store.is_empty() {
        warn!("No credentials enrolled; every beacon will be rejected");
    }
    let authenticator = Arc::new(BeaconAuthenticator::new(Arc::clone(&store)));

    // Only verified replays reach the limiter, so it is keyed by identifier.
    let replay_reports = Arc::new(RateLimiter::new(
        settings.security.replay_reports_per_window,
        Duration::from_secs(settings.security.replay_report_window_seconds),
        store.max_credentials(),
    ));
    replay_reports.start_cleanup_task(Duration::from_secs(60));

    let mut pipeline = BeaconPipeline::new(
        authenticator,
        replay_reports,
        action_from_config(&settings.action),
        settings.protocol.company_id,
    );
    if settings.audit.enabled {
        let logger = AuditLogger::new(&settings.audit.log_path)?;
        info!(path = %logger.path().display(), "Audit logging enabled");
        pipeline = pipeline.with_audit_logger(Arc::new(logger));
    }
    let pipeline = Arc::new(pipeline);

    let (tx, rx) = mpsc::channel(settings.ingest.queue_depth);
    let listener = IngestListener::bind(Arc::new(settings.ingest.clone()), tx).await?;

    let shutdown = Arc::new(Notify::new());
    let pipeline_task = {
        let pipeline = Arc::clone(&pipeline);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { pipeline.run(rx, shutdown).await })
    };

    loop {
        tokio::select! {
            result = listener.run(Arc::clone(&shutdown)) => {
                if let Err(e) = result {
                    error!(error = %e, "Ingest listener failed");
                    shutdown.notify_waiters();
                    return Err(e.into());
                }
                break;
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, initiating graceful shutdown...");
                shutdown.notify_waiters();

                let drain_timeout = Duration::from_secs(10);
                match tokio::time::timeout(drain_timeout, listener.wait_for_drain()).await {
                    Ok(()) => info!("Graceful shutdown complete"),
                    Err(_) => warn!(
                        "Shutdown timeout after {}s, some feeds may be terminated",
                        drain_timeout.as_secs()
                    ),
                }
                break;
            }
            _ = reload_signal() => {
                info!("Reload signal received, reloading configuration...");
                reload(&config_path, &settings, &store);
            }
        }
    }

    if let Err(e) = pipeline_task.await {
        error!(error = %e, "Beacon pipeline task failed");
    }

    let ingest = listener.metrics();
    info!(
        forwarded = ingest.records_forwarded.load(std::sync::atomic::Ordering::Relaxed),
        dropped = ingest.records_dropped.load(std::sync::atomic::Ordering::Relaxed),
        invalid = ingest.records_invalid.load(std::sync::atomic::Ordering::Relaxed),
        "Daemon stopped"
    );
    Ok(())
}

/// Handle SIGHUP: pick up new enrollments and report settings that need a restart.
fn reload(config_path: &str, running: &Settings, store: &CredentialStore) {
    match Settings::load(config_path) {
        Ok(new_settings) => {
            if new_settings.ingest.socket_path != running.ingest.socket_path
                || new_settings.store.path != running.store.path
                || new_settings.protocol.company_id != running.protocol.company_id
            {
                warn!("Ingest, store or protocol settings changed; restart to apply them");
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to reload configuration, keeping existing settings");
        }
    }

    match store.reload() {
        Ok(_) => {}
        Err(e) => error!(error = %e, "Failed to reload credential store, keeping loaded credentials"),
    }
}

/// Run one of the enrollment subcommands against the store file.
fn manage(settings: &Settings, command: Command) -> Result<(), BoxError> {
    let store = CredentialStore::open(&settings.store.path, settings.store.max_credentials)?;

    match command {
        Command::Enroll { name, key } => {
            let key = key.as_deref().map(CredentialKey::from_hex).transpose()?;
            let grant = enroll(&store, &name, key)?;
            println!("Enrolled '{}' as {}", grant.name, grant.identifier);
            println!("Pairing code: {}", grant.pairing_code());
            println!("Send SIGHUP to a running daemon to pick up the new credential.");
        }
        Command::List => {
            let credentials = store.all();
            if credentials.is_empty() {
                println!("No credentials enrolled.");
            }
            for c in credentials {
                let added = chrono::DateTime::<chrono::Utc>::from_timestamp(c.created_at as i64, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| c.created_at.to_string());
                println!(
                    "{}\t{}\tlast_nonce={}\tadded={}",
                    c.identifier, c.display_name, c.last_nonce, added
                );
            }
        }
        Command::Remove { identifier } => {
            store.delete(&identifier)?;
            println!("Removed {}", identifier);
        }
        Command::Rename { identifier, name } => {
            store.rename(&identifier, &name)?;
            println!("Renamed {} to '{}'", identifier, name);
        }
        Command::Run => {}
    }

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Wait for a reload signal (SIGHUP).
#[cfg(unix)]
async fn reload_signal() {
    match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(mut s) => {
            s.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGHUP handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn reload_signal() {
    std::future::pending::<()>().await;
}

/// Print help message.
fn print_help() {
    println!(
        r#"{} {}
Verifies authenticated BLE trigger beacons and fires a configured action.

USAGE:
    {} [OPTIONS] [COMMAND]

COMMANDS:
    run                          Start the daemon [default]
    enroll <NAME> [--key <HEX>]  Enroll a sender and print its pairing code
    list                         List enrolled credentials
    remove <ID>                  Remove a credential
    rename <ID> <NAME>           Change a credential's display name

OPTIONS:
    -c, --config <PATH>    Path to configuration file
                           [default: {}]
    -h, --help             Print help information
    -V, --version          Print version information
"#,
        NAME, VERSION, NAME, DEFAULT_CONFIG_PATH
    );
}

/// Pull `--config` out of the argument list, returning the path and the rest.
fn split_config_arg(args: &[String]) -> (String, Vec<String>) {
    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" || arg == "-c" {
            if let Some(path) = iter.next() {
                config_path = path.clone();
            }
        } else if let Some(path) = arg.strip_prefix("--config=") {
            config_path = path.to_string();
        } else {
            rest.push(arg.clone());
        }
    }
    (config_path, rest)
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let Some((name, rest)) = args.split_first() else {
        return Ok(Command::Run);
    };

    match (name.as_str(), rest) {
        ("run", []) => Ok(Command::Run),
        ("enroll", [display_name]) => Ok(Command::Enroll {
            name: display_name.clone(),
            key: None,
        }),
        ("enroll", [display_name, flag, key]) if flag == "--key" => Ok(Command::Enroll {
            name: display_name.clone(),
            key: Some(key.clone()),
        }),
        ("list", []) => Ok(Command::List),
        ("remove", [identifier]) => Ok(Command::Remove {
            identifier: identifier.clone(),
        }),
        ("rename", [identifier, display_name]) => Ok(Command::Rename {
            identifier: identifier.clone(),
            name: display_name.clone(),
        }),
        ("run" | "enroll" | "list" | "remove" | "rename", _) => {
            Err(format!("Wrong arguments for '{}'", name))
        }
        _ => Err(format!("Unknown command '{}'", name)),
    }
}

/// Initialize logging based on settings.
fn init_logging(settings: &Settings) -> Result<(), BoxError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    match settings.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init()?;
        }
    }

    Ok(())
}
