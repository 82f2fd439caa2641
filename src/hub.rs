//! Sensor hub: collector registry ownership and the publish cycle.
//!
//! A hub is created for one accepted identity and replaced, never mutated,
//! when the identity changes. Lifecycle is a two-state machine:
//!
//! - **Stopped**: collectors may be registered; no channel, no schedule.
//! - **Running**: the publish task owns an open telemetry channel and polls
//!   the registry on a fixed period; registry membership is frozen and only
//!   per-sensor enabled flags may change.
//!
//! `stop()` blocks until the in-flight publish tick has completed or been
//! cancelled; no detached work survives it.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::collector::{SensorCollector, SensorData, SensorRegistry};
use crate::config::Parameters;
use crate::keys::{KeyProvider, SecurityError};
use crate::telemetry::{ChannelError, ChannelFactory, PublishBatch, TelemetryChannel};

/// Bound on waiting for the publish task to acknowledge `stop()`.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from hub lifecycle operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// Collectors may only be registered while the hub is stopped.
    #[error("hub is running; collectors must be registered before start")]
    Running,

    /// Key material could not be obtained; the hub stays stopped.
    #[error("could not obtain key material: {0}")]
    Security(#[from] SecurityError),

    /// The telemetry channel could not be opened; the hub stays stopped.
    #[error("could not open telemetry channel: {0}")]
    Channel(#[from] ChannelError),
}

struct RunningState {
    shutdown: watch::Sender<bool>,
    publish_task: JoinHandle<()>,
    /// Also held by the publish task; kept here so an aborted task can
    /// still have its channel closed by `stop()`.
    channel: Arc<dyn TelemetryChannel>,
}

/// Runtime owning the collector registry and publish cycle for one identity.
pub struct Hub {
    registry: Arc<RwLock<SensorRegistry>>,
    publish_interval: Duration,
    read_budget: Duration,
    running: Option<RunningState>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("running", &self.running.is_some())
            .field("publish_interval", &self.publish_interval)
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Create a stopped hub with an empty registry.
    pub fn new(publish_interval: Duration, read_budget: Duration) -> Self {
        Self::with_registry(SensorRegistry::new(), publish_interval, read_budget)
    }

    /// Create a stopped hub owning a pre-populated registry.
    pub fn with_registry(
        registry: SensorRegistry,
        publish_interval: Duration,
        read_budget: Duration,
    ) -> Self {
        Self {
            registry: Arc::new(RwLock::new(registry)),
            publish_interval,
            read_budget,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Register a collector. Only valid while stopped.
    ///
    /// # Errors
    /// Returns [`HubError::Running`] if the publish cycle is active.
    pub async fn register_collector(
        &mut self,
        collector: Box<dyn SensorCollector>,
    ) -> Result<(), HubError> {
        if self.is_running() {
            return Err(HubError::Running);
        }
        self.registry.write().await.register(collector);
        Ok(())
    }

    /// Toggle a logical sensor by name. Usable while running; only flags
    /// change, never registry membership.
    pub async fn set_sensor_enabled(&self, sensor: &str, enabled: bool) -> bool {
        self.registry.write().await.set_sensor_enabled(sensor, enabled)
    }

    /// Enabled sensor names across the registry.
    pub async fn enabled_sensors(&self) -> Vec<String> {
        self.registry.read().await.enabled_sensors()
    }

    /// Start the publish cycle for the given identity.
    ///
    /// Performs an implicit [`stop`](Hub::stop) if already running. Obtains
    /// key material and opens the telemetry channel first; failure in either
    /// leaves the hub stopped and is surfaced to the caller.
    pub async fn start(
        &mut self,
        params: &Parameters,
        keys: &dyn KeyProvider,
        channels: &dyn ChannelFactory,
    ) -> Result<(), HubError> {
        if self.is_running() {
            tracing::debug!("Hub already running; restarting");
            self.stop().await;
        }

        let key = keys.load_or_generate(&params.device_id, params.key_algorithm)?;
        let channel: Arc<dyn TelemetryChannel> = Arc::from(channels.open(params, &key)?);

        let activated = self.registry.write().await.activate_all();
        params.log_summary();
        tracing::info!(
            collectors = activated,
            interval_ms = self.publish_interval.as_millis() as u64,
            "Hub started"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let publish_task = tokio::spawn(publish_loop(
            Arc::clone(&self.registry),
            Arc::clone(&channel),
            params.device_id.clone(),
            self.publish_interval,
            self.read_budget,
            shutdown_rx,
        ));

        self.running = Some(RunningState {
            shutdown: shutdown_tx,
            publish_task,
            channel,
        });
        Ok(())
    }

    /// Stop the publish cycle. Idempotent; a no-op while stopped.
    ///
    /// Blocks until the in-flight tick finishes or the stop timeout elapses,
    /// in which case the publish task is aborted.
    pub async fn stop(&mut self) {
        let Some(state) = self.running.take() else {
            tracing::debug!("Hub already stopped");
            return;
        };

        // The publish task closes collectors and the channel on its way out.
        let _ = state.shutdown.send(true);

        let mut publish_task = state.publish_task;
        match tokio::time::timeout(STOP_TIMEOUT, &mut publish_task).await {
            Ok(_) => tracing::info!("Hub stopped"),
            Err(_) => {
                publish_task.abort();
                let _ = publish_task.await;
                // The aborted task never reached its own teardown, so run
                // it here: no generation may leave a dangling open channel.
                self.registry.write().await.close_all();
                state.channel.close().await;
                tracing::warn!(
                    timeout_ms = STOP_TIMEOUT.as_millis() as u64,
                    "Publish task did not stop in time; aborted and closed"
                );
            }
        }
    }
}

/// Publish cycle: poll the registry each tick and forward one batch.
async fn publish_loop(
    registry: Arc<RwLock<SensorRegistry>>,
    channel: Arc<dyn TelemetryChannel>,
    device_id: String,
    period: Duration,
    read_budget: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                publish_tick(&registry, channel.as_ref(), &device_id, read_budget).await;
            }
        }
    }

    registry.write().await.close_all();
    channel.close().await;
    tracing::debug!("Publish cycle exited");
}

async fn publish_tick(
    registry: &RwLock<SensorRegistry>,
    channel: &dyn TelemetryChannel,
    device_id: &str,
    read_budget: Duration,
) {
    let mut readings: Vec<SensorData> = Vec::new();
    registry
        .write()
        .await
        .collect_batch(&mut readings, read_budget)
        .await;

    if readings.is_empty() {
        tracing::debug!("No enabled sensors produced readings; skipping send");
        return;
    }

    let batch = PublishBatch::new(device_id, readings);
    if let Err(e) = channel.send(&batch).await {
        // Batch is dropped; retry policy belongs to the channel collaborator.
        tracing::warn!(batch_id = %batch.id, error = %e, "Batch send failed; dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::RandomNumberCollector;
    use crate::config::PartialParameters;
    use crate::keys::{KeyMaterial, StaticKeyProvider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_params() -> Parameters {
        PartialParameters {
            project_id: Some("p1".to_string()),
            cloud_region: Some("us-central1".to_string()),
            registry_id: Some("r1".to_string()),
            device_id: Some("d1".to_string()),
            key_algorithm: Some("RS256".to_string()),
        }
        .build()
        .unwrap()
    }

    #[derive(Default)]
    struct CountingChannel {
        sends: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TelemetryChannel for CountingChannel {
        async fn send(&self, _batch: &PublishBatch) -> Result<(), ChannelError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingFactory {
        opens: Arc<AtomicUsize>,
        sends: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                opens: Arc::new(AtomicUsize::new(0)),
                sends: Arc::new(AtomicUsize::new(0)),
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ChannelFactory for CountingFactory {
        fn open(
            &self,
            _params: &Parameters,
            _key: &KeyMaterial,
        ) -> Result<Box<dyn TelemetryChannel>, ChannelError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingChannel {
                sends: Arc::clone(&self.sends),
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    /// Channel whose sends never complete, as if the bridge stopped
    /// answering mid-request.
    struct HangingChannel {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TelemetryChannel for HangingChannel {
        async fn send(&self, _batch: &PublishBatch) -> Result<(), ChannelError> {
            std::future::pending().await
        }
        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct HangingFactory {
        closes: Arc<AtomicUsize>,
    }

    impl ChannelFactory for HangingFactory {
        fn open(
            &self,
            _params: &Parameters,
            _key: &KeyMaterial,
        ) -> Result<Box<dyn TelemetryChannel>, ChannelError> {
            Ok(Box::new(HangingChannel {
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    struct FailingFactory;

    impl ChannelFactory for FailingFactory {
        fn open(
            &self,
            _params: &Parameters,
            _key: &KeyMaterial,
        ) -> Result<Box<dyn TelemetryChannel>, ChannelError> {
            Err(ChannelError::Config("unreachable bridge".to_string()))
        }
    }

    fn test_hub() -> Hub {
        Hub::new(Duration::from_millis(20), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_stop_while_stopped_is_noop() {
        let mut hub = test_hub();
        assert!(!hub.is_running());
        hub.stop().await;
        hub.stop().await;
        assert!(!hub.is_running());
    }

    #[tokio::test]
    async fn test_start_publishes_and_stop_closes_channel() {
        let mut hub = test_hub();
        hub.register_collector(Box::new(RandomNumberCollector::new()))
            .await
            .unwrap();

        let keys = StaticKeyProvider::new(b"pem".to_vec());
        let factory = CountingFactory::new();
        hub.start(&sample_params(), &keys, &factory).await.unwrap();
        assert!(hub.is_running());

        tokio::time::sleep(Duration::from_millis(120)).await;
        hub.stop().await;

        assert!(!hub.is_running());
        assert!(factory.sends.load(Ordering::SeqCst) >= 1);
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_register_rejected_while_running() {
        let mut hub = test_hub();
        let keys = StaticKeyProvider::new(b"pem".to_vec());
        let factory = CountingFactory::new();
        hub.start(&sample_params(), &keys, &factory).await.unwrap();

        let result = hub
            .register_collector(Box::new(RandomNumberCollector::new()))
            .await;
        assert!(matches!(result, Err(HubError::Running)));

        hub.stop().await;
    }

    #[tokio::test]
    async fn test_channel_failure_leaves_hub_stopped() {
        let mut hub = test_hub();
        let keys = StaticKeyProvider::new(b"pem".to_vec());

        let result = hub.start(&sample_params(), &keys, &FailingFactory).await;
        assert!(matches!(result, Err(HubError::Channel(_))));
        assert!(!hub.is_running());
    }

    #[tokio::test]
    async fn test_restart_closes_previous_channel_first() {
        let mut hub = test_hub();
        hub.register_collector(Box::new(RandomNumberCollector::new()))
            .await
            .unwrap();

        let keys = StaticKeyProvider::new(b"pem".to_vec());
        let factory = CountingFactory::new();

        hub.start(&sample_params(), &keys, &factory).await.unwrap();
        // Implicit stop on second start
        hub.start(&sample_params(), &keys, &factory).await.unwrap();

        assert_eq!(factory.opens.load(Ordering::SeqCst), 2);
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);

        hub.stop().await;
        assert_eq!(factory.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_send_still_closes_channel_on_stop() {
        let mut hub = test_hub();
        hub.register_collector(Box::new(RandomNumberCollector::new()))
            .await
            .unwrap();

        let keys = StaticKeyProvider::new(b"pem".to_vec());
        let closes = Arc::new(AtomicUsize::new(0));
        let factory = HangingFactory {
            closes: Arc::clone(&closes),
        };
        hub.start(&sample_params(), &keys, &factory).await.unwrap();

        // Let the first tick enter the hung send, then stop. The publish
        // task cannot acknowledge shutdown, so stop must abort it and run
        // the teardown itself.
        tokio::time::sleep(Duration::from_millis(30)).await;
        hub.stop().await;

        assert!(!hub.is_running());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_sensor_excluded_from_ticks() {
        let mut hub = test_hub();
        hub.register_collector(Box::new(RandomNumberCollector::new()))
            .await
            .unwrap();

        let keys = StaticKeyProvider::new(b"pem".to_vec());
        let factory = CountingFactory::new();
        hub.start(&sample_params(), &keys, &factory).await.unwrap();

        // Disable the only sensor; empty batches are skipped entirely.
        hub.set_sensor_enabled("random", false).await;
        // Let any tick that was already in flight drain before sampling.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let baseline = factory.sends.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(factory.sends.load(Ordering::SeqCst), baseline);

        // Re-enabling resumes publication on the next ticks.
        hub.set_sensor_enabled("random", true).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(factory.sends.load(Ordering::SeqCst) > baseline);

        hub.stop().await;
    }
}
