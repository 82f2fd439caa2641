//! Provisioning Layer
//!
//! Background reconciliation of the device's cloud identity against a local
//! provisioning service. The [`ProvisionPoller`] fetches
//! `http://<gateway>:8000/config.json` on a fixed period, detects change via
//! the parameter [fingerprint], and hands accepted identities to the agent
//! context for hub replacement.
//!
//! [fingerprint]: crate::config::Parameters::fingerprint

mod gateway;
mod poller;

pub use gateway::{
    EndpointResolver, FixedResolver, GatewayResolver, DISCOVERY_PATH, DISCOVERY_PORT,
};
pub use poller::{PollOutcome, ProvisionError, ProvisionPoller};
