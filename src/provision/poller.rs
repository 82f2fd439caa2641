//! Provisioning reconciliation poller.
//!
//! On a fixed period the poller fetches the provisioning document, parses it
//! into [`Parameters`] and compares fingerprints against the last accepted
//! identity. Only a genuine change persists the new identity and hands it to
//! the agent context for hub replacement; everything else (unchanged config,
//! unreachable endpoint, malformed body) ends the cycle quietly and the loop
//! continues.
//!
//! One cycle runs at a time: a tick that fires while the previous cycle is
//! still in flight is skipped outright, never queued, so concurrent
//! reconciliation attempts cannot race on hub replacement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::config::{ConfigError, ConfigStore, Parameters};
use crate::provision::EndpointResolver;

/// Errors from one provisioning cycle. All are cycle-local.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The discovery endpoint could not be resolved.
    #[error("could not resolve discovery endpoint: {0}")]
    Endpoint(String),

    /// The discovery fetch failed at the transport level.
    #[error("discovery request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The discovery endpoint answered with a non-success status.
    #[error("discovery endpoint returned status {0}")]
    Status(u16),

    /// The discovery document did not parse into valid parameters.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The new identity could not be persisted.
    #[error("failed to persist configuration: {0}")]
    Store(#[source] ConfigError),

    /// The agent context is gone; nothing can apply the new identity.
    #[error("agent context is gone; cannot hand off parameters")]
    Handoff,
}

/// Outcome of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The previous cycle was still in flight; this tick did nothing.
    Skipped,
    /// Fetched configuration matches the active identity.
    Unchanged,
    /// A new identity was accepted, persisted and handed off.
    Changed,
    /// The cycle failed; the active identity is untouched.
    Failed,
}

/// Releases the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Background reconciliation task state.
pub struct ProvisionPoller {
    client: reqwest::Client,
    resolver: Arc<dyn EndpointResolver>,
    store: Arc<dyn ConfigStore>,
    handoff: mpsc::Sender<Parameters>,
    in_flight: AtomicBool,
    last_fingerprint: Mutex<Option<String>>,
    poll_interval: Duration,
}

impl std::fmt::Debug for ProvisionPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionPoller")
            .field("poll_interval", &self.poll_interval)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ProvisionPoller {
    /// Create a poller.
    ///
    /// `fetch_timeout` bounds every discovery request; `handoff` delivers
    /// accepted parameters to the hub-owning context.
    ///
    /// # Errors
    /// Returns [`ProvisionError::Network`] if the HTTP client cannot be
    /// built.
    pub fn new(
        resolver: Arc<dyn EndpointResolver>,
        store: Arc<dyn ConfigStore>,
        handoff: mpsc::Sender<Parameters>,
        poll_interval: Duration,
        fetch_timeout: Duration,
    ) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder().timeout(fetch_timeout).build()?;
        Ok(Self {
            client,
            resolver,
            store,
            handoff,
            in_flight: AtomicBool::new(false),
            last_fingerprint: Mutex::new(None),
            poll_interval,
        })
    }

    /// Record the fingerprint of an identity accepted outside the poll loop
    /// (the startup baseline), so the first fetch of identical configuration
    /// does not restart the hub.
    pub fn seed_fingerprint(&self, fingerprint: String) {
        *self
            .last_fingerprint
            .lock()
            .expect("fingerprint lock poisoned") = Some(fingerprint);
    }

    /// Run one provisioning check.
    ///
    /// Skips immediately if a previous cycle is still in flight. Failures
    /// are logged and reported as [`PollOutcome::Failed`]; they never
    /// propagate.
    pub async fn tick(&self) -> PollOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Previous provisioning check still in flight; skipping tick");
            return PollOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.in_flight);

        tracing::debug!("Starting provisioning check");
        match self.run_cycle().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "Provisioning check failed");
                PollOutcome::Failed
            }
        }
    }

    async fn run_cycle(&self) -> Result<PollOutcome, ProvisionError> {
        let url = self.resolver.discovery_url()?;

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ProvisionError::Status(response.status().as_u16()));
        }
        let body = response.text().await?;

        let params = Parameters::parse(&body)?;
        let fingerprint = params.fingerprint();

        // Swap-then-apply: once the new fingerprint is recorded no later
        // cycle can observe the old one, and hub replacement happens on the
        // single reconcile task the handoff channel feeds.
        let changed = {
            let mut last = self
                .last_fingerprint
                .lock()
                .expect("fingerprint lock poisoned");
            if last.as_deref() == Some(fingerprint.as_str()) {
                false
            } else {
                *last = Some(fingerprint);
                true
            }
        };

        if !changed {
            tracing::debug!("Provisioning information unchanged");
            return Ok(PollOutcome::Unchanged);
        }

        self.store.save(&params).map_err(ProvisionError::Store)?;
        self.handoff
            .send(params)
            .await
            .map_err(|_| ProvisionError::Handoff)?;
        tracing::info!("Provisioning information updated");
        Ok(PollOutcome::Changed)
    }

    /// Drive [`tick`](ProvisionPoller::tick) on the poll period until the
    /// shutdown signal fires. The first check runs one full period after
    /// start, matching the startup path that already applied a baseline.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now() + self.poll_interval;
        let mut interval = tokio::time::interval_at(start, self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        tracing::debug!("Provisioning poller exited");
    }
}
