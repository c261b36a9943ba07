//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Grid snapshot model and derived metrics."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use gridstrike_federation::{ChannelValue, Phase, SimTime, TelemetrySample};
use serde::{Deserialize, Serialize};
use strum::Display;

pub const UNDERVOLTAGE_PU: f64 = 0.95;
pub const OVERVOLTAGE_PU: f64 = 1.05;
const UNDERVOLTAGE_PENALTY: i32 = 20;
const OVERVOLTAGE_PENALTY: i32 = 15;

/// Physical quantity a measurement represents, derived from its channel unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MeasurementKind {
    Voltage,
    Power,
    Other,
}

impl MeasurementKind {
    pub fn from_unit(unit: &str) -> Self {
        match unit {
            "V" | "kV" => MeasurementKind::Voltage,
            "VA" | "kVA" | "MVA" => MeasurementKind::Power,
            _ => MeasurementKind::Other,
        }
    }
}

/// Latest sample for one measurement plus its derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub sample: TelemetrySample,
    pub kind: MeasurementKind,
    pub phase: Option<Phase>,
    pub magnitude: f64,
    pub angle_deg: Option<f64>,
    pub power_factor: Option<f64>,
    pub per_unit: f64,
    /// `|per_unit - 1.0|` for voltage and power measurements, zero otherwise.
    pub deviation: f64,
}

impl Measurement {
    pub(crate) fn derive(
        sample: TelemetrySample,
        kind: MeasurementKind,
        nominal: f64,
    ) -> Measurement {
        let (magnitude, angle_deg, power_factor) = match &sample.value {
            ChannelValue::Complex(p) => (p.magnitude(), Some(p.angle_deg()), Some(p.power_factor())),
            ChannelValue::Double(v) => (v.abs(), None, None),
            ChannelValue::Boolean(b) => (if *b { 1.0 } else { 0.0 }, None, None),
            ChannelValue::Text(_) => (0.0, None, None),
        };
        let per_unit = if nominal > 0.0 { magnitude / nominal } else { magnitude };
        let deviation = match kind {
            MeasurementKind::Voltage | MeasurementKind::Power => (per_unit - 1.0).abs(),
            MeasurementKind::Other => 0.0,
        };
        let phase = Phase::from_suffix(&sample.channel);
        Measurement {
            sample,
            kind,
            phase,
            magnitude,
            angle_deg,
            power_factor: power_factor.filter(|_| kind == MeasurementKind::Power),
            per_unit,
            deviation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Compromised,
    Critical,
}

/// Coarse voltage-based health score of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub score: i32,
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub total_power_mva: f64,
}

impl HealthSummary {
    pub fn assess(measurements: &BTreeMap<String, Measurement>) -> HealthSummary {
        let mut score = 100;
        let mut issues = Vec::new();
        for (name, m) in measurements
            .iter()
            .filter(|(_, m)| m.kind == MeasurementKind::Voltage)
        {
            if m.per_unit < UNDERVOLTAGE_PU {
                score -= UNDERVOLTAGE_PENALTY;
                issues.push(format!("undervoltage: {name} = {:.3} pu", m.per_unit));
            } else if m.per_unit > OVERVOLTAGE_PU {
                score -= OVERVOLTAGE_PENALTY;
                issues.push(format!("overvoltage: {name} = {:.3} pu", m.per_unit));
            }
        }
        let score = score.max(0);
        let status = match score {
            s if s >= 90 => HealthStatus::Healthy,
            s if s >= 70 => HealthStatus::Degraded,
            s if s >= 50 => HealthStatus::Compromised,
            _ => HealthStatus::Critical,
        };
        let total_power_mva = measurements
            .values()
            .filter(|m| m.kind == MeasurementKind::Power)
            .map(|m| m.magnitude)
            .sum::<f64>()
            / 1e6;
        HealthSummary {
            score,
            status,
            issues,
            total_power_mva,
        }
    }
}

/// Immutable view of all tracked measurements after one ingestion batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub sequence: u64,
    pub simulation_time: SimTime,
    pub captured_at: DateTime<Utc>,
    pub measurements: BTreeMap<String, Measurement>,
    pub anomalies: BTreeSet<String>,
    pub health: HealthSummary,
}

impl GridSnapshot {
    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        let measurements = BTreeMap::new();
        let health = HealthSummary::assess(&measurements);
        Self {
            sequence: 0,
            simulation_time: SimTime::ZERO,
            captured_at,
            measurements,
            anomalies: BTreeSet::new(),
            health,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Measurement> {
        self.measurements.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn of_kind(&self, kind: MeasurementKind) -> impl Iterator<Item = (&String, &Measurement)> {
        self.measurements.iter().filter(move |(_, m)| m.kind == kind)
    }

    /// Per-unit values of one kind by phase, grouped by measurement stem (the name
    /// without its phase suffix), so feeder `voltage_*` and transmission `gpk_voltage_*`
    /// readings are never mixed.
    pub fn phase_groups(&self, kind: MeasurementKind) -> BTreeMap<&str, [Option<f64>; 3]> {
        let mut groups: BTreeMap<&str, [Option<f64>; 3]> = BTreeMap::new();
        for (name, m) in self.of_kind(kind) {
            let Some(phase) = m.phase else { continue };
            let stem = name.rsplit_once('_').map_or(name.as_str(), |(stem, _)| stem);
            groups.entry(stem).or_default()[phase.index()] = Some(m.per_unit);
        }
        groups
    }

    /// Largest `(max - min) / max` across the phase groups of one kind; groups with
    /// fewer than two phases present count as balanced.
    pub fn phase_imbalance(&self, kind: MeasurementKind) -> f64 {
        self.phase_groups(kind)
            .values()
            .map(|phases| {
                let present: Vec<f64> = phases.iter().flatten().copied().collect();
                if present.len() < 2 {
                    return 0.0;
                }
                let max = present.iter().copied().fold(f64::MIN, f64::max);
                let min = present.iter().copied().fold(f64::MAX, f64::min);
                if max > 0.0 {
                    (max - min) / max
                } else {
                    0.0
                }
            })
            .fold(0.0, f64::max)
    }

    /// Phase carrying the lowest per-unit reading of one kind.
    pub fn weakest_phase(&self, kind: MeasurementKind) -> Option<Phase> {
        self.of_kind(kind)
            .filter_map(|(_, m)| m.phase.map(|phase| (phase, m.per_unit)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(phase, _)| phase)
    }

    pub fn max_voltage_deviation(&self) -> f64 {
        self.of_kind(MeasurementKind::Voltage)
            .map(|(_, m)| m.deviation)
            .fold(0.0, f64::max)
    }

    /// Sum of power-flow magnitudes in VA.
    pub fn total_power(&self) -> f64 {
        self.of_kind(MeasurementKind::Power)
            .map(|(_, m)| m.magnitude)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurements(voltages: &[(Phase, f64)]) -> BTreeMap<String, Measurement> {
        group("voltage", voltages)
    }

    fn group(stem: &str, voltages: &[(Phase, f64)]) -> BTreeMap<String, Measurement> {
        voltages
            .iter()
            .map(|(phase, pu)| {
                let name = format!("{stem}_{phase}");
                let sample = TelemetrySample {
                    channel: name.clone(),
                    value: ChannelValue::Double(pu * 100.0),
                    simulation_time: SimTime::ZERO,
                    received_wall_time: Utc::now(),
                };
                (name, Measurement::derive(sample, MeasurementKind::Voltage, 100.0))
            })
            .collect()
    }

    #[test]
    fn health_bands_follow_voltage_violations() {
        let healthy = HealthSummary::assess(&measurements(&[(Phase::A, 1.0), (Phase::B, 0.99)]));
        assert_eq!(healthy.score, 100);
        assert_eq!(healthy.status, HealthStatus::Healthy);

        let degraded = HealthSummary::assess(&measurements(&[(Phase::A, 0.9), (Phase::B, 1.0)]));
        assert_eq!(degraded.score, 80);
        assert_eq!(degraded.status, HealthStatus::Degraded);
        assert_eq!(degraded.issues.len(), 1);

        let critical = HealthSummary::assess(&measurements(&[
            (Phase::A, 0.8),
            (Phase::B, 0.8),
            (Phase::C, 1.2),
        ]));
        assert_eq!(critical.score, 45);
        assert_eq!(critical.status, HealthStatus::Critical);
    }

    #[test]
    fn imbalance_needs_two_phases() {
        let mut snapshot = GridSnapshot::empty(Utc::now());
        snapshot.measurements = measurements(&[(Phase::A, 1.0)]);
        assert_eq!(snapshot.phase_imbalance(MeasurementKind::Voltage), 0.0);

        snapshot.measurements = measurements(&[(Phase::A, 1.0), (Phase::C, 0.8)]);
        assert!((snapshot.phase_imbalance(MeasurementKind::Voltage) - 0.2).abs() < 1e-9);
        assert!((snapshot.max_voltage_deviation() - 0.2).abs() < 1e-9);
        assert_eq!(snapshot.total_power(), 0.0);
    }

    #[test]
    fn transmission_readings_do_not_mask_a_feeder_sag() {
        let mut snapshot = GridSnapshot::empty(Utc::now());
        snapshot.measurements = group("voltage", &[(Phase::A, 0.8), (Phase::B, 1.0), (Phase::C, 1.0)]);
        snapshot.measurements.extend(group(
            "gpk_voltage",
            &[(Phase::A, 0.9), (Phase::B, 1.0), (Phase::C, 1.0)],
        ));

        assert!((snapshot.phase_imbalance(MeasurementKind::Voltage) - 0.2).abs() < 1e-9);
        assert_eq!(snapshot.phase_groups(MeasurementKind::Voltage).len(), 2);
        assert_eq!(snapshot.weakest_phase(MeasurementKind::Voltage), Some(Phase::A));
        assert_eq!(snapshot.weakest_phase(MeasurementKind::Power), None);
    }
}
