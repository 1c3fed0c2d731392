//! Per-feed connection handler.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::auth::verify_peer;
use crate::config::IngestConfig;
use crate::error::{DaemonError, DaemonResult, ProtocolErrorKind};
use crate::protocol::{read_message_with_timeout, Advertisement, AdvertisementRecord};

use super::IngestMetrics;

/// Handle one scanner connection until it closes or idles out.
pub async fn handle_feed(
    stream: UnixStream,
    config: Arc<IngestConfig>,
    sink: mpsc::Sender<Advertisement>,
    metrics: Arc<IngestMetrics>,
) -> DaemonResult<()> {
    let std_stream = stream.into_std().map_err(|e| DaemonError::Socket {
        message: format!("Failed to convert to std stream: {}", e),
    })?;

    let peer = verify_peer(&std_stream, &config.allowed_peer_uids)?;
    debug!(uid = peer.uid, gid = peer.gid, pid = ?peer.pid, "Scanner feed authenticated");

    std_stream.set_nonblocking(true).map_err(|e| DaemonError::Socket {
        message: format!("Failed to set non-blocking: {}", e),
    })?;
    let mut stream = UnixStream::from_std(std_stream).map_err(|e| DaemonError::Socket {
        message: format!("Failed to convert back to tokio stream: {}", e),
    })?;

    let idle = Duration::from_secs(config.socket_timeout_seconds);
    loop {
        match forward_record(&mut stream, &config, idle, &sink, &metrics).await {
            Ok(true) => continue,
            Ok(false) => {
                debug!(uid = peer.uid, "Pipeline closed, ending feed");
                return Ok(());
            }
            Err(DaemonError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed,
            }) => {
                debug!(uid = peer.uid, "Scanner disconnected");
                return Ok(());
            }
            Err(DaemonError::Protocol {
                kind: ProtocolErrorKind::ConnectionTimeout,
            }) => {
                warn!(uid = peer.uid, "Scanner feed idle, closing");
                return Ok(());
            }
            Err(e @ DaemonError::Protocol {
                kind: ProtocolErrorKind::InvalidRecordFormat { .. },
            }) => {
                metrics.records_invalid.fetch_add(1, Ordering::Relaxed);
                warn!(uid = peer.uid, error = %e, "Skipping invalid advertisement record");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Read one record and hand it to the pipeline.
///
/// Returns `Ok(false)` once the pipeline side of the channel is gone.
async fn forward_record<R>(
    reader: &mut R,
    config: &IngestConfig,
    idle: Duration,
    sink: &mpsc::Sender<Advertisement>,
    metrics: &IngestMetrics,
) -> Result<bool, DaemonError>
where
    R: AsyncRead + Unpin,
{
    let msg = read_message_with_timeout(reader, config.max_record_size, idle).await?;
    let advertisement = AdvertisementRecord::from_json(&msg)?.into_advertisement()?;

    match sink.try_send(advertisement) {
        Ok(()) => {
            metrics.records_forwarded.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        }
        Err(TrySendError::Full(_)) => {
            metrics.records_dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Pipeline queue full, dropping advertisement");
            Ok(true)
        }
        Err(TrySendError::Closed(_)) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::write_message;
    use std::io::Cursor;
    use std::path::PathBuf;

    fn config() -> IngestConfig {
        IngestConfig {
            socket_path: PathBuf::from("/unused"),
            permissions: "0600".to_string(),
            allowed_peer_uids: vec![],
            max_record_size: 256,
            socket_timeout_seconds: 5,
            max_concurrent_feeds: 1,
            queue_depth: 1,
        }
    }

    async fn framed(records: &[&[u8]]) -> Cursor<Vec<u8>> {
        let mut buf = Vec::new();
        for r in records {
            write_message(&mut buf, r).await.unwrap();
        }
        Cursor::new(buf)
    }

    #[tokio::test]
    async fn test_forwards_valid_record() {
        let (tx, mut rx) = mpsc::channel(4);
        let metrics = IngestMetrics::default();
        let mut reader = framed(&[br#"{"address":"AA","data":"ffff01"}"#]).await;

        let more = forward_record(&mut reader, &config(), Duration::from_secs(1), &tx, &metrics)
            .await
            .unwrap();
        assert!(more);
        let adv = rx.recv().await.unwrap();
        assert_eq!(adv.manufacturer_data, vec![0xff, 0xff, 0x01]);
        assert_eq!(metrics.records_forwarded.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let metrics = IngestMetrics::default();
        let record: &[u8] = br#"{"address":"AA","data":"ffff"}"#;
        let mut reader = framed(&[record, record]).await;

        for _ in 0..2 {
            forward_record(&mut reader, &config(), Duration::from_secs(1), &tx, &metrics)
                .await
                .unwrap();
        }
        assert_eq!(metrics.records_forwarded.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.records_dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_closed_pipeline_ends_feed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let metrics = IngestMetrics::default();
        let mut reader = framed(&[br#"{"address":"AA","data":"ffff"}"#]).await;

        let more = forward_record(&mut reader, &config(), Duration::from_secs(1), &tx, &metrics)
            .await
            .unwrap();
        assert!(!more);
    }

    #[tokio::test]
    async fn test_invalid_record_is_reported() {
        let (tx, _rx) = mpsc::channel(1);
        let metrics = IngestMetrics::default();
        let mut reader = framed(&[b"not json"]).await;

        let result =
            forward_record(&mut reader, &config(), Duration::from_secs(1), &tx, &metrics).await;
        assert!(matches!(
            result,
            Err(DaemonError::Protocol {
                kind: ProtocolErrorKind::InvalidRecordFormat { .. }
            })
        ));
    }
}
