//! Sensor registry: the set of collectors owned by one hub generation.
//!
//! Registration happens only before the hub starts; while the hub is running
//! the registry membership is fixed and only per-sensor enabled flags may
//! change. Each reconciled identity gets a fresh registry, so enabled-state
//! never leaks across hub generations.

use std::time::Duration;

use crate::collector::{SensorCollector, SensorData};

struct Entry {
    collector: Box<dyn SensorCollector>,
    /// Cleared when `activate()` fails; inactive entries are skipped by the
    /// publish cycle but still closed on teardown.
    active: bool,
}

/// Owns registered collectors and routes per-sensor operations to them.
#[derive(Default)]
pub struct SensorRegistry {
    entries: Vec<Entry>,
}

impl std::fmt::Debug for SensorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorRegistry")
            .field("collectors", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collector. Callers must only do this before the owning hub
    /// starts; the hub enforces that rule.
    pub fn register(&mut self, collector: Box<dyn SensorCollector>) {
        self.entries.push(Entry {
            collector,
            active: false,
        });
    }

    /// Number of registered collectors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Activate every collector, marking failures inactive.
    ///
    /// Returns the number of collectors that activated successfully.
    pub fn activate_all(&mut self) -> usize {
        let mut activated = 0;
        for entry in &mut self.entries {
            entry.active = entry.collector.activate();
            if entry.active {
                activated += 1;
            } else {
                tracing::warn!(
                    sensors = ?entry.collector.available_sensors(),
                    "Collector failed to activate; its sensors will not report"
                );
            }
        }
        activated
    }

    /// Toggle the named sensor on whichever collector exposes it.
    ///
    /// Returns `true` if some collector recognized the name.
    pub fn set_sensor_enabled(&mut self, sensor: &str, enabled: bool) -> bool {
        let mut matched = false;
        for entry in &mut self.entries {
            if entry
                .collector
                .available_sensors()
                .iter()
                .any(|s| s == sensor)
            {
                entry.collector.set_enabled(sensor, enabled);
                matched = true;
            }
        }
        if matched {
            tracing::debug!(sensor, enabled, "Sensor toggled");
        } else {
            tracing::warn!(sensor, "Sensor toggle ignored; no collector exposes it");
        }
        matched
    }

    /// Whether any collector reports the named sensor as enabled.
    pub fn is_sensor_enabled(&self, sensor: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.collector.is_enabled(sensor))
    }

    /// All enabled sensor names across active collectors, in registration
    /// order.
    pub fn enabled_sensors(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.active)
            .flat_map(|e| e.collector.enabled_sensors())
            .collect()
    }

    /// Append one tick's readings from every active collector with at least
    /// one enabled sensor.
    ///
    /// Each collector reads under `budget`; a collector that exceeds it has
    /// its partial output for this tick discarded so a hung source cannot
    /// poison the shared batch or stall the cycle indefinitely.
    pub async fn collect_batch(&mut self, out: &mut Vec<SensorData>, budget: Duration) {
        for entry in &mut self.entries {
            if !entry.active || entry.collector.enabled_sensors().is_empty() {
                continue;
            }

            let mut scratch = Vec::new();
            match tokio::time::timeout(budget, entry.collector.collect_recent_readings(&mut scratch))
                .await
            {
                Ok(()) => out.append(&mut scratch),
                Err(_) => {
                    tracing::warn!(
                        sensors = ?entry.collector.enabled_sensors(),
                        budget_ms = budget.as_millis() as u64,
                        "Collector exceeded read budget; readings dropped for this tick"
                    );
                }
            }
        }
    }

    /// Close every collector. Idempotent per the collector contract.
    pub fn close_all(&mut self) {
        for entry in &mut self.entries {
            entry.collector.close();
            entry.active = false;
        }
    }
}
