//! Unix socket listener for scanner feeds.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::error::{DaemonError, DaemonResult, ProtocolErrorKind};
use crate::protocol::Advertisement;

use super::handle_feed;

/// Ingest counters.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    /// Records handed to the pipeline.
    pub records_forwarded: AtomicU64,
    /// Records dropped because the pipeline queue was full.
    pub records_dropped: AtomicU64,
    /// Records that failed to decode.
    pub records_invalid: AtomicU64,
    /// Currently connected feeds.
    pub active_feeds: AtomicUsize,
}

impl IngestMetrics {
    pub fn active(&self) -> usize {
        self.active_feeds.load(Ordering::Relaxed)
    }
}

/// Accepts scanner connections and forwards their advertisements.
pub struct IngestListener {
    listener: UnixListener,
    config: Arc<IngestConfig>,
    sink: mpsc::Sender<Advertisement>,
    metrics: Arc<IngestMetrics>,
    feed_semaphore: Arc<Semaphore>,
}

impl IngestListener {
    /// Create and bind the ingest socket.
    pub async fn bind(
        config: Arc<IngestConfig>,
        sink: mpsc::Sender<Advertisement>,
    ) -> DaemonResult<Self> {
        let socket_path = &config.socket_path;

        // A symlink here could point anywhere; never remove through one.
        if let Ok(metadata) = std::fs::symlink_metadata(socket_path) {
            if metadata.file_type().is_symlink() {
                return Err(DaemonError::Socket {
                    message: format!(
                        "Socket path {} is a symlink, refusing to remove",
                        socket_path.display()
                    ),
                });
            }

            std::fs::remove_file(socket_path).map_err(|e| DaemonError::Socket {
                message: format!(
                    "Failed to remove existing socket file {}: {}",
                    socket_path.display(),
                    e
                ),
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DaemonError::Socket {
                message: format!(
                    "Failed to create socket directory {}: {}",
                    parent.display(),
                    e
                ),
            })?;
        }

        let listener = UnixListener::bind(socket_path).map_err(|e| DaemonError::Socket {
            message: format!("Failed to bind to socket {}: {}", socket_path.display(), e),
        })?;

        Self::set_socket_permissions(socket_path, &config.permissions)?;

        let feed_semaphore = Arc::new(Semaphore::new(config.max_concurrent_feeds));

        info!(
            path = %socket_path.display(),
            max_feeds = config.max_concurrent_feeds,
            "Ingest listener bound"
        );

        Ok(Self {
            listener,
            config,
            sink,
            metrics: Arc::new(IngestMetrics::default()),
            feed_semaphore,
        })
    }

    pub fn metrics(&self) -> Arc<IngestMetrics> {
        Arc::clone(&self.metrics)
    }

    fn set_socket_permissions(path: &Path, permissions_str: &str) -> DaemonResult<()> {
        let mode = u32::from_str_radix(permissions_str, 8).map_err(|e| DaemonError::Socket {
            message: format!("Invalid socket permissions '{}': {}", permissions_str, e),
        })?;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            DaemonError::Socket {
                message: format!(
                    "Failed to set socket permissions on {}: {}",
                    path.display(),
                    e
                ),
            }
        })?;

        Ok(())
    }

    /// Accept feeds until `shutdown` is notified.
    pub async fn run(&self, shutdown: Arc<Notify>) -> DaemonResult<()> {
        let notified = shutdown.notified();
        tokio::pin!(notified);

        info!("Ingest listener running, waiting for scanner feeds...");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => self.spawn_feed(stream),
                        Err(e) => warn!(error = %e, "Failed to accept connection"),
                    }
                }
                _ = &mut notified => {
                    info!("Shutdown signal received, stopping ingest listener");
                    break;
                }
            }
        }

        Ok(())
    }

    fn spawn_feed(&self, stream: tokio::net::UnixStream) {
        let permit = match self.feed_semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    max = self.config.max_concurrent_feeds,
                    "Feed limit reached, rejecting connection"
                );
                return;
            }
        };

        let config = Arc::clone(&self.config);
        let sink = self.sink.clone();
        let metrics = Arc::clone(&self.metrics);

        metrics.active_feeds.fetch_add(1, Ordering::Relaxed);
        debug!(active = metrics.active(), "Scanner feed connected");

        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = handle_feed(stream, config, sink, Arc::clone(&metrics)).await {
                if !matches!(
                    &e,
                    DaemonError::Protocol {
                        kind: ProtocolErrorKind::ConnectionClosed
                    }
                ) {
                    error!(error = %e, "Scanner feed error");
                }
            }
            metrics.active_feeds.fetch_sub(1, Ordering::Relaxed);
            debug!(active = metrics.active(), "Scanner feed closed");
        });
    }

    /// Wait for connected feeds to finish.
    pub async fn wait_for_drain(&self) {
        let poll_interval = std::time::Duration::from_millis(100);
        while self.metrics.active() > 0 {
            debug!(active = self.metrics.active(), "Waiting for feeds to drain");
            tokio::time::sleep(poll_interval).await;
        }
        info!("All scanner feeds closed");
    }
}
