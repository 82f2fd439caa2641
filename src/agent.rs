//! Agent context: explicit start/stop entry points for the embedding host.
//!
//! `start()` applies the startup baseline (persisted identity merged with
//! launch overrides), then runs two independently scheduled activities: the
//! provisioning poller and, per accepted identity, a hub publish cycle.
//! Hub replacement happens only on the reconcile task, which is the single
//! owner of the hub slot; the poller never touches the hub directly.
//!
//! `stop()` tears everything down and blocks until no background work
//! remains.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::collector::SensorRegistry;
use crate::config::{
    AgentSettings, ConfigError, ConfigStore, Parameters, PartialParameters,
    SUPPORTED_KEY_ALGORITHMS,
};
use crate::hub::Hub;
use crate::keys::KeyProvider;
use crate::provision::{EndpointResolver, ProvisionError, ProvisionPoller};
use crate::telemetry::ChannelFactory;

/// Bound on joining agent background tasks during stop.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the collector set for each hub generation.
///
/// Called once per accepted identity so a replaced hub starts from a fresh
/// registry, independent of the previous generation's enabled-state.
pub type RegistryBuilder = dyn Fn() -> SensorRegistry + Send + Sync;

/// Errors from agent lifecycle operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent is already started.
    #[error("agent is already started")]
    AlreadyStarted,

    /// Startup configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The provisioning poller could not be constructed.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

struct RunningAgent {
    shutdown: watch::Sender<bool>,
    poller_task: JoinHandle<()>,
    reconcile_task: JoinHandle<()>,
    hub_slot: Arc<Mutex<Option<Hub>>>,
}

/// One device-side agent instance: at most one running hub, one poller.
pub struct Agent {
    settings: AgentSettings,
    store: Arc<dyn ConfigStore>,
    keys: Arc<dyn KeyProvider>,
    channels: Arc<dyn ChannelFactory>,
    registry_builder: Arc<RegistryBuilder>,
    resolver: Arc<dyn EndpointResolver>,
    running: Option<RunningAgent>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("running", &self.running.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub fn new(
        settings: AgentSettings,
        store: Arc<dyn ConfigStore>,
        keys: Arc<dyn KeyProvider>,
        channels: Arc<dyn ChannelFactory>,
        resolver: Arc<dyn EndpointResolver>,
        registry_builder: Arc<RegistryBuilder>,
    ) -> Self {
        Self {
            settings,
            store,
            keys,
            channels,
            registry_builder,
            resolver,
            running: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.running.is_some()
    }

    /// Start the agent.
    ///
    /// Launch overrides win over the persisted baseline field-by-field. An
    /// incomplete merged configuration postpones hub start until the poller
    /// fetches a complete one; it is not an error.
    ///
    /// # Errors
    /// Returns [`AgentError::AlreadyStarted`] on a second call, or the
    /// underlying error if the store or poller cannot be set up.
    pub async fn start(&mut self, launch_overrides: PartialParameters) -> Result<(), AgentError> {
        if self.is_started() {
            return Err(AgentError::AlreadyStarted);
        }

        let baseline = self.store.load()?.unwrap_or_default();
        let merged = baseline.merge(launch_overrides);

        let (handoff_tx, handoff_rx) = mpsc::channel(4);
        let poller = ProvisionPoller::new(
            Arc::clone(&self.resolver),
            Arc::clone(&self.store),
            handoff_tx,
            self.settings.poll_interval,
            self.settings.request_timeout,
        )?;

        let hub_slot = Arc::new(Mutex::new(None::<Hub>));

        match merged.build() {
            Ok(params) => {
                poller.seed_fingerprint(params.fingerprint());
                let hub = self.build_hub();
                start_hub(
                    hub,
                    &params,
                    &hub_slot,
                    self.keys.as_ref(),
                    self.channels.as_ref(),
                )
                .await;
            }
            Err(ConfigError::Incomplete(missing)) => {
                tracing::warn!(
                    missing = ?missing,
                    valid_algorithms = ?SUPPORTED_KEY_ALGORITHMS,
                    "Postponing hub start until enough parameters are set; \
                     supply project_id, cloud_region, registry_id, device_id and \
                     key_algorithm via launch arguments or the provisioning service"
                );
            }
            Err(e) => return Err(e.into()),
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller_task = {
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move { poller.run(shutdown_rx).await })
        };

        let reconcile_task = tokio::spawn(reconcile_loop(
            handoff_rx,
            shutdown_rx,
            Arc::clone(&hub_slot),
            Arc::clone(&self.keys),
            Arc::clone(&self.channels),
            Arc::clone(&self.registry_builder),
            self.settings.publish_interval,
            self.settings.read_budget,
        ));

        self.running = Some(RunningAgent {
            shutdown: shutdown_tx,
            poller_task,
            reconcile_task,
            hub_slot,
        });
        tracing::info!("Agent started");
        Ok(())
    }

    /// Stop the agent: poller, reconcile task and hub. Idempotent.
    pub async fn stop(&mut self) {
        let Some(state) = self.running.take() else {
            tracing::debug!("Agent already stopped");
            return;
        };

        let _ = state.shutdown.send(true);
        join_or_abort(state.poller_task, "provisioning poller").await;
        join_or_abort(state.reconcile_task, "reconcile task").await;

        if let Some(mut hub) = state.hub_slot.lock().await.take() {
            hub.stop().await;
        }
        tracing::info!("Agent stopped");
    }

    /// Whether a hub is currently running.
    pub async fn hub_running(&self) -> bool {
        match &self.running {
            Some(state) => state
                .hub_slot
                .lock()
                .await
                .as_ref()
                .map(Hub::is_running)
                .unwrap_or(false),
            None => false,
        }
    }

    fn build_hub(&self) -> Hub {
        Hub::with_registry(
            (self.registry_builder)(),
            self.settings.publish_interval,
            self.settings.read_budget,
        )
    }
}

async fn join_or_abort(mut task: JoinHandle<()>, name: &str) {
    if tokio::time::timeout(JOIN_TIMEOUT, &mut task).await.is_err() {
        task.abort();
        tracing::warn!(task = name, "Task did not stop in time; aborted");
    }
}

/// Start `hub` for `params` and park it in the slot on success.
///
/// A start failure (key material, channel) leaves the slot empty and the
/// process running; the next accepted identity gets a fresh attempt.
async fn start_hub(
    mut hub: Hub,
    params: &Parameters,
    hub_slot: &Mutex<Option<Hub>>,
    keys: &dyn KeyProvider,
    channels: &dyn ChannelFactory,
) {
    match hub.start(params, keys, channels).await {
        Ok(()) => {
            *hub_slot.lock().await = Some(hub);
        }
        Err(e) => {
            tracing::error!(
                device_id = %params.device_id,
                error = %e,
                "Hub start failed; leaving hub stopped"
            );
        }
    }
}

/// Single consumer of accepted identities: stop the old hub, start a fresh
/// one. Runs until the handoff channel closes or shutdown fires.
#[allow(clippy::too_many_arguments)]
async fn reconcile_loop(
    mut handoff: mpsc::Receiver<Parameters>,
    mut shutdown: watch::Receiver<bool>,
    hub_slot: Arc<Mutex<Option<Hub>>>,
    keys: Arc<dyn KeyProvider>,
    channels: Arc<dyn ChannelFactory>,
    registry_builder: Arc<RegistryBuilder>,
    publish_interval: Duration,
    read_budget: Duration,
) {
    loop {
        let params = tokio::select! {
            _ = shutdown.changed() => break,
            received = handoff.recv() => match received {
                Some(params) => params,
                None => break,
            },
        };

        tracing::info!(device_id = %params.device_id, "Applying updated provisioning parameters");

        if let Some(mut old) = hub_slot.lock().await.take() {
            old.stop().await;
        }

        let hub = Hub::with_registry(registry_builder(), publish_interval, read_budget);
        start_hub(hub, &params, &hub_slot, keys.as_ref(), channels.as_ref()).await;
    }
    tracing::debug!("Reconcile task exited");
}
