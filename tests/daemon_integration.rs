//! Integration tests for the beacon daemon.
//!
//! These tests start a real ingest listener and beacon pipeline on a temp
//! socket and push signed advertisements through it end to end.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::unistd::getuid;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

use beacon_gate::auth::{sign_trigger, Accepted, BeaconAuthenticator, RateLimiter};
use beacon_gate::config::IngestConfig;
use beacon_gate::executor::TriggerAction;
use beacon_gate::ingest::IngestListener;
use beacon_gate::pipeline::{BeaconPipeline, PipelineMetrics};
use beacon_gate::protocol::{wrap_payload, AdvertisementRecord, DEFAULT_COMPANY_ID};
use beacon_gate::store::{CredentialKey, CredentialStore, KEY_LEN};

const DEVICE: &str = "aa11bb22cc33";

#[derive(Default)]
struct RecordingAction {
    fired: Mutex<Vec<Accepted>>,
}

impl TriggerAction for RecordingAction {
    fn fire(&self, accepted: &Accepted) {
        self.fired.lock().unwrap().push(accepted.clone());
    }
}

/// Test daemon instance.
struct TestDaemon {
    socket_path: PathBuf,
    store_path: PathBuf,
    store: Arc<CredentialStore>,
    action: Arc<RecordingAction>,
    metrics: Arc<PipelineMetrics>,
    shutdown: Arc<Notify>,
    _temp_dir: TempDir,
}

impl TestDaemon {
    async fn start() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let socket_path = temp_dir.path().join("ingest.sock");
        let store_path = temp_dir.path().join("state").join("trusted_devices.json");

        let store = Arc::new(CredentialStore::open(&store_path, 8).expect("Failed to open store"));
        store
            .create(DEVICE, "phone", Some(zero_key()))
            .expect("Failed to enroll test credential");

        let action = Arc::new(RecordingAction::default());
        let pipeline = Arc::new(BeaconPipeline::new(
            Arc::new(BeaconAuthenticator::new(Arc::clone(&store))),
            Arc::new(RateLimiter::new(100, Duration::from_secs(10), 8)),
            action.clone(),
            DEFAULT_COMPANY_ID,
        ));
        let metrics = pipeline.metrics();

        let config = IngestConfig {
            socket_path: socket_path.clone(),
            permissions: "0600".to_string(),
            allowed_peer_uids: vec![getuid().as_raw()],
            max_record_size: 1024,
            socket_timeout_seconds: 5,
            max_concurrent_feeds: 2,
            queue_depth: 16,
        };

        let (tx, rx) = mpsc::channel(config.queue_depth);
        let listener = IngestListener::bind(Arc::new(config), tx)
            .await
            .expect("Failed to bind ingest listener");

        let shutdown = Arc::new(Notify::new());
        {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                let _ = listener.run(shutdown).await;
            });
        }
        {
            let pipeline = Arc::clone(&pipeline);
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { pipeline.run(rx, shutdown).await });
        }

        Self {
            socket_path,
            store_path,
            store,
            action,
            metrics,
            shutdown,
            _temp_dir: temp_dir,
        }
    }

    fn connect(&self) -> UnixStream {
        UnixStream::connect(&self.socket_path).expect("Failed to connect to ingest socket")
    }

    fn fired(&self) -> usize {
        self.action.fired.lock().unwrap().len()
    }

    /// Wait until the pipeline has seen `count` advertisements.
    async fn wait_for_received(&self, count: u64) {
        for _ in 0..200 {
            if self.metrics.snapshot().received >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "pipeline saw {} advertisements, expected {}",
            self.metrics.snapshot().received,
            count
        );
    }

    fn stop(&self) {
        self.shutdown.notify_waiters();
    }
}

fn zero_key() -> CredentialKey {
    CredentialKey::from_bytes([0; KEY_LEN])
}

fn send_raw(stream: &mut UnixStream, body: &[u8]) {
    stream
        .write_all(&(body.len() as u32).to_be_bytes())
        .expect("Failed to write length");
    stream.write_all(body).expect("Failed to write body");
    stream.flush().expect("Failed to flush");
}

fn send_frame(stream: &mut UnixStream, address: &str, frame: &[u8]) {
    let record = AdvertisementRecord::new(address, &wrap_payload(frame, DEFAULT_COMPANY_ID));
    let body = serde_json::to_vec(&record).expect("Failed to encode record");
    send_raw(stream, &body);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_accept_then_replay() {
    let daemon = TestDaemon::start().await;
    let mut stream = daemon.connect();

    let frame = sign_trigger(&zero_key(), 5).encode();
    send_frame(&mut stream, "AA:BB:CC:DD:EE:FF", &frame);
    send_frame(&mut stream, "AA:BB:CC:DD:EE:FF", &frame);
    daemon.wait_for_received(2).await;

    let totals = daemon.metrics.snapshot();
    assert_eq!(totals.accepted, 1);
    assert_eq!(totals.replayed, 1);
    assert_eq!(daemon.fired(), 1);
    assert_eq!(daemon.store.get(DEVICE).unwrap().last_nonce, 5);

    daemon.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bad_signature_does_not_advance_counter() {
    let daemon = TestDaemon::start().await;
    let mut stream = daemon.connect();

    let mut forged = sign_trigger(&zero_key(), 1000).encode();
    forged[12] ^= 0x01;
    send_frame(&mut stream, "11:22", &forged);

    let genuine = sign_trigger(&zero_key(), 6).encode();
    send_frame(&mut stream, "11:22", &genuine);
    daemon.wait_for_received(2).await;

    let totals = daemon.metrics.snapshot();
    assert_eq!(totals.no_match, 1);
    assert_eq!(totals.accepted, 1);
    assert_eq!(daemon.store.get(DEVICE).unwrap().last_nonce, 6);

    daemon.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_junk_burst_does_not_suppress_genuine_beacon() {
    let daemon = TestDaemon::start().await;
    let mut stream = daemon.connect();

    for _ in 0..10 {
        send_frame(&mut stream, "AA:BB:CC:DD:EE:FF", &[0x01; 13]);
    }
    send_frame(
        &mut stream,
        "AA:BB:CC:DD:EE:FF",
        &sign_trigger(&zero_key(), 1).encode(),
    );
    daemon.wait_for_received(11).await;

    let totals = daemon.metrics.snapshot();
    assert_eq!(totals.no_match, 10);
    assert_eq!(totals.accepted, 1);
    assert_eq!(daemon.fired(), 1);

    daemon.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_record_keeps_feed_open() {
    let daemon = TestDaemon::start().await;
    let mut stream = daemon.connect();

    send_raw(&mut stream, b"{not json");
    send_raw(&mut stream, br#"{"address":"AA","data":"zz"}"#);
    // Truncated beacon inside a well-formed record.
    send_frame(&mut stream, "AA", &[0x01, 0x00]);

    let frame = sign_trigger(&zero_key(), 9).encode();
    send_frame(&mut stream, "AA", &frame);
    daemon.wait_for_received(2).await;

    let totals = daemon.metrics.snapshot();
    assert_eq!(totals.malformed, 1);
    assert_eq!(totals.accepted, 1);
    assert_eq!(daemon.fired(), 1);

    daemon.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_foreign_company_id_ignored() {
    let daemon = TestDaemon::start().await;
    let mut stream = daemon.connect();

    let frame = sign_trigger(&zero_key(), 3).encode();
    let record = AdvertisementRecord::new("AA", &wrap_payload(&frame, 0x004C));
    send_raw(&mut stream, &serde_json::to_vec(&record).unwrap());
    daemon.wait_for_received(1).await;

    let totals = daemon.metrics.snapshot();
    assert_eq!(totals.not_ours, 1);
    assert_eq!(daemon.fired(), 0);
    assert_eq!(daemon.store.get(DEVICE).unwrap().last_nonce, 0);

    daemon.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_accepted_counter_is_persisted() {
    let daemon = TestDaemon::start().await;
    let mut stream = daemon.connect();

    send_frame(&mut stream, "AA", &sign_trigger(&zero_key(), 42).encode());
    daemon.wait_for_received(1).await;
    assert_eq!(daemon.fired(), 1);

    let contents = std::fs::read_to_string(&daemon.store_path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert_eq!(json[DEVICE]["last_nonce"], 42);
    assert_eq!(json[DEVICE]["name"], "phone");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&daemon.store_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    let reopened = CredentialStore::open(&daemon.store_path, 8).unwrap();
    assert!(!reopened.try_advance(DEVICE, 42).unwrap());

    daemon.stop();
}
