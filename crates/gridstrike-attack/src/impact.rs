//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Impact scoring between pre- and post-attack snapshots."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use gridstrike_common::ImpactConfig;
use gridstrike_monitor::{GridSnapshot, MeasurementKind};
use serde::{Deserialize, Serialize};

const COMPONENT_MAX: f64 = 100.0;

/// Per-component impact, each on a 0-100 scale, and the weighted score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactBreakdown {
    pub voltage: f64,
    pub power: f64,
    pub imbalance: f64,
    pub stress: f64,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct ImpactScorer {
    config: ImpactConfig,
}

impl ImpactScorer {
    pub fn new(config: ImpactConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImpactConfig {
        &self.config
    }

    pub fn score(&self, pre: &GridSnapshot, post: &GridSnapshot) -> ImpactBreakdown {
        let voltage = max_relative_change(pre, post, MeasurementKind::Voltage);
        let power = max_relative_change(pre, post, MeasurementKind::Power);
        let imbalance = [MeasurementKind::Voltage, MeasurementKind::Power]
            .into_iter()
            .map(|kind| (post.phase_imbalance(kind) - pre.phase_imbalance(kind)).max(0.0))
            .fold(0.0, f64::max)
            * 100.0;
        let stress = stress(pre, post);

        let weighted = self.config.voltage_weight * voltage.min(COMPONENT_MAX)
            + self.config.power_weight * power.min(COMPONENT_MAX)
            + self.config.imbalance_weight * imbalance.min(COMPONENT_MAX)
            + self.config.stress_weight * stress;
        ImpactBreakdown {
            voltage: voltage.min(COMPONENT_MAX),
            power: power.min(COMPONENT_MAX),
            imbalance: imbalance.min(COMPONENT_MAX),
            stress,
            score: weighted.clamp(0.0, self.config.max_score),
        }
    }
}

/// Largest percentage change in magnitude over measurements of one kind present in both.
fn max_relative_change(pre: &GridSnapshot, post: &GridSnapshot, kind: MeasurementKind) -> f64 {
    pre.of_kind(kind)
        .filter_map(|(name, before)| {
            let after = post.get(name)?;
            (before.magnitude > 0.0)
                .then(|| (after.magnitude - before.magnitude).abs() / before.magnitude * 100.0)
        })
        .fold(0.0, f64::max)
}

/// Newly flagged anomalies as a share of tracked measurements, plus the health-score drop.
fn stress(pre: &GridSnapshot, post: &GridSnapshot) -> f64 {
    let tracked = post.measurements.len();
    let new_anomalies = post.anomalies.difference(&pre.anomalies).count();
    let anomaly_share = if tracked > 0 {
        new_anomalies as f64 / tracked as f64 * 100.0
    } else {
        0.0
    };
    let health_drop = f64::from((pre.health.score - post.health.score).max(0));
    (anomaly_share + health_drop).min(COMPONENT_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gridstrike_common::MonitorConfig;
    use gridstrike_federation::{default_channels, ChannelValue, Phasor, SimTime, TelemetrySample};
    use gridstrike_monitor::GridStateCache;

    fn batch(at: f64, voltage_a: f64) -> Vec<TelemetrySample> {
        let sample = |channel: &str, value| TelemetrySample {
            channel: channel.into(),
            value: ChannelValue::Complex(value),
            simulation_time: SimTime::from_secs(at),
            received_wall_time: Utc::now(),
        };
        vec![
            sample("voltage_A", Phasor::from_polar(voltage_a, 0.0)),
            sample("voltage_B", Phasor::from_polar(2401.78, -120.0)),
            sample("voltage_C", Phasor::from_polar(2401.78, 120.0)),
            sample("power_A", Phasor::from_power_factor(1.2e6, 0.95)),
        ]
    }

    fn snapshots(after: f64) -> (std::sync::Arc<GridSnapshot>, std::sync::Arc<GridSnapshot>) {
        let cache = GridStateCache::new(MonitorConfig::default());
        cache.describe_channels(&default_channels());
        let pre = cache.ingest(&batch(1.0, 2401.78), SimTime::from_secs(1.0));
        let post = cache.ingest(&batch(2.0, after), SimTime::from_secs(2.0));
        (pre, post)
    }

    #[test]
    fn unchanged_grid_scores_zero() {
        let (pre, post) = snapshots(2401.78);
        let impact = ImpactScorer::new(ImpactConfig::default()).score(&pre, &post);
        assert_eq!(impact.score, 0.0);
    }

    #[test]
    fn voltage_sag_raises_every_component() {
        let (pre, post) = snapshots(1921.42);
        let impact = ImpactScorer::new(ImpactConfig::default()).score(&pre, &post);
        assert!((impact.voltage - 20.0).abs() < 0.1, "{impact:?}");
        assert_eq!(impact.power, 0.0);
        assert!(impact.imbalance > 19.0);
        assert!(impact.stress > 0.0);
        assert!(impact.score > 0.0 && impact.score <= 100.0);
    }

    #[test]
    fn score_is_capped() {
        let (pre, post) = snapshots(10.0);
        let config = ImpactConfig {
            max_score: 25.0,
            ..ImpactConfig::default()
        };
        let impact = ImpactScorer::new(config).score(&pre, &post);
        assert_eq!(impact.score, 25.0);
        assert!(impact.voltage <= 100.0);
    }
}
