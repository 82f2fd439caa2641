//! Synthetic random-number collector.
//!
//! Exposes one logical sensor, `"random"`, reporting a uniform value in
//! `[0, 1)`. Useful for exercising the full collect/publish path on hardware
//! that has no real sensors attached yet.

use async_trait::async_trait;

use crate::collector::{SensorCollector, SensorData};

/// Logical sensor name exposed by [`RandomNumberCollector`].
pub const RANDOM_SENSOR: &str = "random";

/// Collector producing uniform random readings.
#[derive(Debug)]
pub struct RandomNumberCollector {
    enabled: bool,
}

impl RandomNumberCollector {
    pub fn new() -> Self {
        Self { enabled: true }
    }
}

impl Default for RandomNumberCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorCollector for RandomNumberCollector {
    fn activate(&mut self) -> bool {
        // No underlying resource to acquire.
        true
    }

    fn set_enabled(&mut self, sensor: &str, enabled: bool) {
        if sensor == RANDOM_SENSOR {
            self.enabled = enabled;
        }
    }

    fn is_enabled(&self, sensor: &str) -> bool {
        sensor == RANDOM_SENSOR && self.enabled
    }

    fn available_sensors(&self) -> Vec<String> {
        vec![RANDOM_SENSOR.to_string()]
    }

    fn enabled_sensors(&self) -> Vec<String> {
        if self.enabled {
            self.available_sensors()
        } else {
            Vec::new()
        }
    }

    async fn collect_recent_readings(&mut self, out: &mut Vec<SensorData>) {
        if self.enabled {
            out.push(SensorData::new(RANDOM_SENSOR, rand::random::<f64>()));
        }
    }

    fn close(&mut self) {}
}
