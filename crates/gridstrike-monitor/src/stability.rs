//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Stability metrics over snapshot history."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::snapshot::{GridSnapshot, MeasurementKind};

const VOLTAGE_WEIGHT: f64 = 0.6;
const POWER_WEIGHT: f64 = 0.4;

/// Dispersion of voltage and power readings across a window of snapshots, mapped onto
/// 0-100 stability scores (100 = perfectly steady).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilityMetrics {
    pub samples: usize,
    /// Population standard deviation of per-unit voltages.
    pub voltage_std_pu: f64,
    /// Coefficient of variation of power magnitudes.
    pub power_cv: f64,
    pub voltage_stability: f64,
    pub power_stability: f64,
    pub overall: f64,
}

impl StabilityMetrics {
    /// Fewer than two snapshots yield all-zero metrics.
    pub fn over<'a>(snapshots: impl Iterator<Item = &'a GridSnapshot> + Clone) -> Self {
        let samples = snapshots.clone().count();
        if samples < 2 {
            return Self {
                samples,
                ..Self::default()
            };
        }

        let voltages: Vec<f64> = snapshots
            .clone()
            .flat_map(|s| s.of_kind(MeasurementKind::Voltage).map(|(_, m)| m.per_unit))
            .collect();
        let powers: Vec<f64> = snapshots
            .flat_map(|s| s.of_kind(MeasurementKind::Power).map(|(_, m)| m.magnitude))
            .collect();

        let mut metrics = Self {
            samples,
            ..Self::default()
        };
        if !voltages.is_empty() {
            metrics.voltage_std_pu = voltages.iter().population_std_dev();
            metrics.voltage_stability = (100.0 - metrics.voltage_std_pu * 100.0).max(0.0);
        }
        if !powers.is_empty() {
            let mean = powers.iter().mean();
            if mean > 0.0 {
                metrics.power_cv = powers.iter().population_std_dev() / mean;
                metrics.power_stability = (100.0 - metrics.power_cv * 100.0).max(0.0);
            }
        }
        metrics.overall =
            metrics.voltage_stability * VOLTAGE_WEIGHT + metrics.power_stability * POWER_WEIGHT;
        metrics
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use gridstrike_common::MonitorConfig;
    use gridstrike_federation::{ChannelValue, Phasor, SimTime, TelemetrySample};

    use crate::GridStateCache;

    fn sample(channel: &str, value: ChannelValue, t: f64) -> TelemetrySample {
        TelemetrySample {
            channel: channel.to_owned(),
            value,
            simulation_time: SimTime::from_secs(t),
            received_wall_time: Utc::now(),
        }
    }

    #[test]
    fn steady_readings_are_fully_stable() {
        let cache = GridStateCache::new(MonitorConfig::default());
        for t in 1..=4 {
            let t = f64::from(t);
            cache.ingest(
                &[
                    sample("voltage_A", ChannelValue::Double(2401.78), t),
                    sample("power_A", ChannelValue::Complex(Phasor::from_power_factor(1.2e6, 0.95)), t),
                ],
                SimTime::from_secs(t),
            );
        }
        let metrics = cache.stability(10);
        assert_eq!(metrics.samples, 4);
        assert!(metrics.voltage_std_pu < 1e-9);
        assert!((metrics.overall - 100.0).abs() < 1e-6);
    }

    #[test]
    fn a_single_snapshot_yields_zeroes() {
        let cache = GridStateCache::new(MonitorConfig::default());
        cache.ingest(
            &[sample("voltage_A", ChannelValue::Double(2401.78), 1.0)],
            SimTime::from_secs(1.0),
        );
        let metrics = cache.stability(10);
        assert_eq!(metrics.samples, 1);
        assert_eq!(metrics.overall, 0.0);
    }
}
