//! Sensor collector contract and reading types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped reading from a logical sensor.
///
/// The name identifies the sensor, not the collector that produced it; a
/// single collector may expose several logical sensors. Readings live only
/// for the duration of one publish batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorData {
    /// Logical sensor name (e.g. `"temperature"`, `"random"`).
    pub name: String,

    /// Current reading.
    pub value: f64,

    /// Collection time.
    pub timestamp: DateTime<Utc>,
}

impl SensorData {
    /// Create a reading stamped with the current time.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Capability contract every sensor source must satisfy.
///
/// Implementations wrap a concrete data source (hardware bus, OS interface,
/// synthetic generator) behind a uniform pollable surface. The hub drives
/// collectors from a single scheduled task, so `collect_recent_readings`
/// must stay within the hub's per-collector read budget; a slow collector is
/// timed out and its partial output discarded for that tick.
///
/// The registry holding collectors is shared across the hub's spawned
/// tasks, so implementations must be `Send + Sync`; mutation happens only
/// through the registry's exclusive lock.
#[async_trait]
pub trait SensorCollector: Send + Sync {
    /// Attempt to acquire the underlying resource. Called once before first
    /// use; a `false` return marks the collector unusable for this hub
    /// generation.
    fn activate(&mut self) -> bool;

    /// Toggle a logical sensor. Unknown names are ignored.
    fn set_enabled(&mut self, sensor: &str, enabled: bool);

    /// Whether the named sensor is currently enabled.
    fn is_enabled(&self, sensor: &str) -> bool;

    /// All logical sensors this collector can expose, in stable order.
    fn available_sensors(&self) -> Vec<String>;

    /// The currently enabled subset of [`available_sensors`], same order.
    ///
    /// [`available_sensors`]: SensorCollector::available_sensors
    fn enabled_sensors(&self) -> Vec<String>;

    /// Append current readings for all enabled sensors to `out`.
    ///
    /// Append-only contract: the hub batches several collectors into one
    /// buffer per tick, so implementations must never clear or replace
    /// existing contents.
    async fn collect_recent_readings(&mut self, out: &mut Vec<SensorData>);

    /// Release the underlying resource. Must be safe to call more than once.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_data_carries_timestamp() {
        let before = Utc::now();
        let reading = SensorData::new("random", 0.5);
        let after = Utc::now();

        assert_eq!(reading.name, "random");
        assert!(reading.timestamp >= before && reading.timestamp <= after);
    }

    #[test]
    fn test_sensor_data_serializes_name_and_value() {
        let reading = SensorData::new("temperature", 21.5);
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["name"], "temperature");
        assert_eq!(json["value"], 21.5);
        assert!(json["timestamp"].is_string());
    }
}
