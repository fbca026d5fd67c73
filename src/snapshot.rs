//! Metrics snapshot aggregation
//!
//! The snapshot is the coordinator's aggregated view of every metric observed
//! during a session. Consumers always receive copies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::dispatch::{Aggregation, Capabilities, MetricField, QuantityDispatchTable};
use crate::types::{ActivityType, MetricSample};

/// Aggregated metrics for the current session.
///
/// `None` means no sample has been observed yet, which is distinct from zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(with = "crate::types::duration_secs")]
    pub elapsed_time: Duration,
    /// Beats per minute
    pub heart_rate: Option<f64>,
    /// Kilocalories
    pub active_energy: Option<f64>,
    /// Meters
    pub distance: Option<f64>,
    /// Meters per second
    pub speed: Option<f64>,
    pub supports_distance: bool,
    pub supports_speed: bool,
}

impl MetricsSnapshot {
    /// Empty snapshot carrying the capability flags of a configuration
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            supports_distance: capabilities.supports_distance,
            supports_speed: capabilities.supports_speed,
            ..Self::default()
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_distance: self.supports_distance,
            supports_speed: self.supports_speed,
        }
    }

    /// Apply a batch of samples in delivery order.
    ///
    /// Returns the number of samples that updated a field. Unmapped kinds and
    /// fields the configuration does not support are skipped.
    pub fn apply_samples(
        &mut self,
        table: &QuantityDispatchTable,
        activity: ActivityType,
        samples: &[MetricSample],
    ) -> usize {
        samples
            .iter()
            .filter(|sample| self.apply_sample(table, activity, sample))
            .count()
    }

    /// Apply one sample; returns whether a field was updated
    pub fn apply_sample(
        &mut self,
        table: &QuantityDispatchTable,
        activity: ActivityType,
        sample: &MetricSample,
    ) -> bool {
        if !sample.value.is_finite() {
            return false;
        }

        let Some(field) = table.lookup(activity, sample.kind) else {
            return false;
        };

        let capabilities = self.capabilities();
        let slot = match field {
            MetricField::HeartRate => &mut self.heart_rate,
            MetricField::ActiveEnergy => &mut self.active_energy,
            MetricField::Distance if capabilities.supports_distance => &mut self.distance,
            MetricField::Speed if capabilities.supports_speed => &mut self.speed,
            MetricField::Distance | MetricField::Speed => return false,
        };

        *slot = match field.aggregation() {
            Aggregation::Latest => Some(sample.value),
            Aggregation::CumulativeSum => Some(slot.unwrap_or(0.0) + sample.value),
        };
        true
    }
}

fn fmt_optional(f: &mut fmt::Formatter<'_>, label: &str, value: Option<f64>, unit: &str) -> fmt::Result {
    match value {
        Some(v) => writeln!(f, "  {label:<14}{v:.1} {unit}"),
        None => writeln!(f, "  {label:<14}--"),
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed_time.as_secs();
        writeln!(
            f,
            "  {:<14}{:02}:{:02}:{:02}",
            "elapsed",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )?;
        fmt_optional(f, "heart rate", self.heart_rate, "bpm")?;
        fmt_optional(f, "active energy", self.active_energy, "kcal")?;
        if self.supports_distance {
            fmt_optional(f, "distance", self.distance, "m")?;
        }
        if self.supports_speed {
            fmt_optional(f, "speed", self.speed, "m/s")?;
        }
        Ok(())
    }
}
