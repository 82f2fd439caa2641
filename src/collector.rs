//! Collector Layer
//!
//! Pluggable sensor sources behind one capability contract. The hub owns a
//! [`SensorRegistry`] populated before it starts and polls every registered
//! collector once per publish tick, batching readings into a shared buffer.
//!
//! New hardware sources (I2C, GPIO, ...) are added by implementing
//! [`SensorCollector`], not by touching the hub.

mod random;
mod registry;
mod traits;

pub use random::{RandomNumberCollector, RANDOM_SENSOR};
pub use registry::SensorRegistry;
pub use traits::{SensorCollector, SensorData};
