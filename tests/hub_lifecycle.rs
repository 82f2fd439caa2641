//! Agent and Hub Lifecycle Integration Tests
//!
//! End-to-end reconciliation: an agent polling a live discovery endpoint,
//! replacing its hub only when the served identity actually changes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use sensorhub::{
    Agent, AgentSettings, ChannelError, ChannelFactory, FixedResolver, KeyAlgorithm, KeyMaterial,
    KeyProvider, MemoryStore, Parameters, PartialParameters, PublishBatch, RandomNumberCollector,
    SecurityError, SensorRegistry, StaticKeyProvider, TelemetryChannel,
};
use tokio::net::TcpListener;

// =============================================================================
// Test Helpers
// =============================================================================

/// Discovery document the test server serves, swappable between requests.
#[derive(Clone)]
struct ServedConfig {
    body: Arc<std::sync::Mutex<String>>,
}

impl ServedConfig {
    fn new(body: &str) -> Self {
        Self {
            body: Arc::new(std::sync::Mutex::new(body.to_string())),
        }
    }

    fn set_body(&self, body: &str) {
        *self.body.lock().unwrap() = body.to_string();
    }
}

async fn serve_config(State(config): State<ServedConfig>) -> String {
    config.body.lock().unwrap().clone()
}

async fn start_discovery_server(config: ServedConfig) -> String {
    let router = Router::new()
        .route("/config.json", get(serve_config))
        .with_state(config);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}/config.json", addr)
}

fn config_json(device_id: &str) -> String {
    format!(
        r#"{{
            "project_id": "test-project",
            "cloud_region": "us-central1",
            "registry_id": "test-registry",
            "device_id": "{device_id}",
            "key_algorithm": "ES256"
        }}"#
    )
}

/// Channel factory that records every open/close and the device each
/// channel was opened for.
#[derive(Default)]
struct RecordingFactory {
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    devices: Arc<std::sync::Mutex<Vec<String>>>,
}

struct RecordingChannel {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl TelemetryChannel for RecordingChannel {
    async fn send(&self, _batch: &PublishBatch) -> Result<(), ChannelError> {
        Ok(())
    }
    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl ChannelFactory for RecordingFactory {
    fn open(
        &self,
        params: &Parameters,
        _key: &KeyMaterial,
    ) -> Result<Box<dyn TelemetryChannel>, ChannelError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.devices.lock().unwrap().push(params.device_id.clone());
        Ok(Box::new(RecordingChannel {
            closes: Arc::clone(&self.closes),
        }))
    }
}

/// Key provider that always fails, as if no material was provisioned.
struct BrokenKeyProvider;

impl KeyProvider for BrokenKeyProvider {
    fn load_or_generate(
        &self,
        device_id: &str,
        algorithm: KeyAlgorithm,
    ) -> Result<KeyMaterial, SecurityError> {
        Err(SecurityError::NotFound {
            device_id: device_id.to_string(),
            algorithm,
            path: std::path::PathBuf::from("/nonexistent"),
        })
    }
}

fn fast_settings() -> AgentSettings {
    AgentSettings {
        poll_interval: Duration::from_millis(50),
        publish_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

fn agent_with(
    discovery_url: &str,
    keys: Arc<dyn KeyProvider>,
    channels: Arc<dyn ChannelFactory>,
    registry_builds: Arc<AtomicUsize>,
) -> Agent {
    Agent::new(
        fast_settings(),
        Arc::new(MemoryStore::new()),
        keys,
        channels,
        Arc::new(FixedResolver::new(discovery_url).expect("valid URL")),
        Arc::new(move || {
            registry_builds.fetch_add(1, Ordering::SeqCst);
            let mut registry = SensorRegistry::new();
            registry.register(Box::new(RandomNumberCollector::new()));
            registry
        }),
    )
}

// =============================================================================
// Reconciliation-Driven Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_poller_starts_hub_once_identity_arrives() {
    let url = start_discovery_server(ServedConfig::new(&config_json("device-1"))).await;
    let factory = Arc::new(RecordingFactory::default());
    let opens = Arc::clone(&factory.opens);
    let mut agent = agent_with(
        &url,
        Arc::new(StaticKeyProvider::new(b"pem".to_vec())),
        factory,
        Arc::new(AtomicUsize::new(0)),
    );

    // No persisted baseline, no overrides: the hub waits for the poller.
    agent.start(PartialParameters::default()).await.unwrap();
    assert!(!agent.hub_running().await);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(agent.hub_running().await);
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    agent.stop().await;
    assert!(!agent.hub_running().await);
}

#[tokio::test]
async fn test_unchanged_identity_never_restarts_hub() {
    let url = start_discovery_server(ServedConfig::new(&config_json("device-1"))).await;
    let factory = Arc::new(RecordingFactory::default());
    let opens = Arc::clone(&factory.opens);
    let mut agent = agent_with(
        &url,
        Arc::new(StaticKeyProvider::new(b"pem".to_vec())),
        factory,
        Arc::new(AtomicUsize::new(0)),
    );

    agent.start(PartialParameters::default()).await.unwrap();

    // Many poll cycles against the same document: one hub generation.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    agent.stop().await;
}

#[tokio::test]
async fn test_changed_identity_replaces_hub_exactly_once() {
    let served = ServedConfig::new(&config_json("device-1"));
    let url = start_discovery_server(served.clone()).await;
    let factory = Arc::new(RecordingFactory::default());
    let opens = Arc::clone(&factory.opens);
    let closes = Arc::clone(&factory.closes);
    let devices = Arc::clone(&factory.devices);
    let builds = Arc::new(AtomicUsize::new(0));
    let mut agent = agent_with(
        &url,
        Arc::new(StaticKeyProvider::new(b"pem".to_vec())),
        factory,
        Arc::clone(&builds),
    );

    agent.start(PartialParameters::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    served.set_body(&config_json("device-2"));
    tokio::time::sleep(Duration::from_millis(300)).await;

    // One replacement: old channel closed, new one opened for the new
    // device, and a fresh registry built for the new generation.
    assert_eq!(opens.load(Ordering::SeqCst), 2);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(*devices.lock().unwrap(), ["device-1", "device-2"]);
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert!(agent.hub_running().await);

    agent.stop().await;
    assert_eq!(closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_launch_overrides_seed_active_identity() {
    let url = start_discovery_server(ServedConfig::new(&config_json("device-1"))).await;
    let factory = Arc::new(RecordingFactory::default());
    let opens = Arc::clone(&factory.opens);
    let mut agent = agent_with(
        &url,
        Arc::new(StaticKeyProvider::new(b"pem".to_vec())),
        factory,
        Arc::new(AtomicUsize::new(0)),
    );

    // Overrides match what the endpoint serves, so the first poll cycle must
    // not restart the hub the startup path already started.
    let overrides = PartialParameters {
        project_id: Some("test-project".to_string()),
        cloud_region: Some("us-central1".to_string()),
        registry_id: Some("test-registry".to_string()),
        device_id: Some("device-1".to_string()),
        key_algorithm: Some("ES256".to_string()),
    };
    agent.start(overrides).await.unwrap();
    assert!(agent.hub_running().await);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    agent.stop().await;
}

// =============================================================================
// Failure Path Tests
// =============================================================================

#[tokio::test]
async fn test_missing_key_material_leaves_hub_stopped() {
    let url = start_discovery_server(ServedConfig::new(&config_json("device-1"))).await;
    let factory = Arc::new(RecordingFactory::default());
    let opens = Arc::clone(&factory.opens);
    let mut agent = agent_with(
        &url,
        Arc::new(BrokenKeyProvider),
        factory,
        Arc::new(AtomicUsize::new(0)),
    );

    // The agent keeps running even though every hub start fails.
    agent.start(PartialParameters::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(agent.is_started());
    assert!(!agent.hub_running().await);
    assert_eq!(opens.load(Ordering::SeqCst), 0);

    agent.stop().await;
}
