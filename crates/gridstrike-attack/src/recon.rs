//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Reconnaissance analysis of a grid snapshot."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use gridstrike_federation::{ChannelDirection, ChannelSpec, SimTime, ValueKind};
use gridstrike_monitor::{
    GridSnapshot, HealthStatus, HealthSummary, MeasurementKind, OVERVOLTAGE_PU, UNDERVOLTAGE_PU,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::Display;

use crate::intent::Technique;

const SEVERE_UNDERVOLTAGE_PU: f64 = 0.9;
const SEVERE_OVERVOLTAGE_PU: f64 = 1.1;
const UNBALANCE_RATIO: f64 = 0.2;
const UNDERVOLTAGE_SPOOF_FACTOR: f64 = 0.9;
const DEGRADATION_INJECTION_VA: f64 = 2.0e6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VulnerabilityKind {
    Undervoltage,
    Overvoltage,
    UnbalancedLoading,
    SystemDegradation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusObservation {
    pub name: String,
    pub magnitude: f64,
    pub per_unit: f64,
    pub angle_deg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowObservation {
    pub name: String,
    pub mva: f64,
    pub power_factor: Option<f64>,
    /// `export` for non-negative real power, `import` otherwise.
    pub direction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalNode {
    pub name: String,
    pub per_unit: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub kind: VulnerabilityKind,
    pub location: Option<String>,
    pub severity: Severity,
    /// Per-unit voltage, imbalance ratio or health score depending on `kind`.
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub technique: Technique,
    pub objective: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub name: String,
    pub key: String,
    pub direction: ChannelDirection,
    pub kind: ValueKind,
    pub unit: String,
}

/// Read-only picture of the grid built for the reconnaissance technique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconReport {
    pub simulation_time: SimTime,
    pub snapshot_sequence: u64,
    pub buses: Vec<BusObservation>,
    pub flows: Vec<FlowObservation>,
    pub critical_nodes: Vec<CriticalNode>,
    pub vulnerabilities: Vec<Vulnerability>,
    pub recommendations: Vec<Recommendation>,
    pub channels: Vec<ChannelSummary>,
    pub health: HealthSummary,
}

impl ReconReport {
    pub fn analyze<'a>(
        snapshot: &GridSnapshot,
        channels: impl IntoIterator<Item = &'a ChannelSpec>,
    ) -> ReconReport {
        let buses: Vec<BusObservation> = snapshot
            .of_kind(MeasurementKind::Voltage)
            .map(|(name, m)| BusObservation {
                name: name.clone(),
                magnitude: m.magnitude,
                per_unit: m.per_unit,
                angle_deg: m.angle_deg,
            })
            .collect();

        let flows = snapshot
            .of_kind(MeasurementKind::Power)
            .map(|(name, m)| {
                let real = m.sample.value.as_phasor().map_or(m.magnitude, |p| p.re);
                FlowObservation {
                    name: name.clone(),
                    mva: m.magnitude / 1.0e6,
                    power_factor: m.power_factor,
                    direction: if real >= 0.0 { "export" } else { "import" }.to_owned(),
                }
            })
            .collect();

        let critical_nodes = buses
            .iter()
            .filter_map(|bus| {
                let severity = if bus.per_unit < SEVERE_UNDERVOLTAGE_PU
                    || bus.per_unit > SEVERE_OVERVOLTAGE_PU
                {
                    Severity::High
                } else if bus.per_unit < UNDERVOLTAGE_PU || bus.per_unit > OVERVOLTAGE_PU {
                    Severity::Medium
                } else {
                    return None;
                };
                Some(CriticalNode {
                    name: bus.name.clone(),
                    per_unit: bus.per_unit,
                    severity,
                })
            })
            .collect();

        let vulnerabilities = vulnerabilities(snapshot, &buses);
        let recommendations = recommendations(&vulnerabilities, &buses);
        let channels = channels
            .into_iter()
            .map(|spec| ChannelSummary {
                name: spec.name.clone(),
                key: spec.key.clone(),
                direction: spec.direction,
                kind: spec.kind,
                unit: spec.unit.clone(),
            })
            .collect();

        ReconReport {
            simulation_time: snapshot.simulation_time,
            snapshot_sequence: snapshot.sequence,
            buses,
            flows,
            critical_nodes,
            vulnerabilities,
            recommendations,
            channels,
            health: snapshot.health.clone(),
        }
    }
}

fn vulnerabilities(snapshot: &GridSnapshot, buses: &[BusObservation]) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for bus in buses {
        if bus.per_unit < UNDERVOLTAGE_PU {
            found.push(Vulnerability {
                kind: VulnerabilityKind::Undervoltage,
                location: Some(bus.name.clone()),
                severity: if bus.per_unit < SEVERE_UNDERVOLTAGE_PU {
                    Severity::High
                } else {
                    Severity::Medium
                },
                value: bus.per_unit,
            });
        }
        if bus.per_unit > OVERVOLTAGE_PU {
            found.push(Vulnerability {
                kind: VulnerabilityKind::Overvoltage,
                location: Some(bus.name.clone()),
                severity: if bus.per_unit > SEVERE_OVERVOLTAGE_PU {
                    Severity::High
                } else {
                    Severity::Medium
                },
                value: bus.per_unit,
            });
        }
    }

    let imbalance = snapshot.phase_imbalance(MeasurementKind::Power);
    if imbalance > UNBALANCE_RATIO {
        found.push(Vulnerability {
            kind: VulnerabilityKind::UnbalancedLoading,
            location: None,
            severity: Severity::Medium,
            value: imbalance,
        });
    }

    if !snapshot.is_empty() && snapshot.health.status != HealthStatus::Healthy {
        found.push(Vulnerability {
            kind: VulnerabilityKind::SystemDegradation,
            location: None,
            severity: Severity::High,
            value: f64::from(snapshot.health.score),
        });
    }
    found
}

fn recommendations(found: &[Vulnerability], buses: &[BusObservation]) -> Vec<Recommendation> {
    let mut recommended = vec![Recommendation {
        technique: Technique::Reconnaissance,
        objective: "refresh the grid picture".into(),
        parameters: json!({}),
    }];
    for vulnerability in found {
        match vulnerability.kind {
            VulnerabilityKind::Undervoltage => {
                let Some(location) = &vulnerability.location else {
                    continue;
                };
                let Some(bus) = buses.iter().find(|bus| &bus.name == location) else {
                    continue;
                };
                recommended.push(Recommendation {
                    technique: Technique::SpoofData,
                    objective: format!("deepen undervoltage on {location}"),
                    parameters: json!({
                        "target": location,
                        "value": bus.magnitude * UNDERVOLTAGE_SPOOF_FACTOR,
                    }),
                });
            }
            VulnerabilityKind::SystemDegradation => recommended.push(Recommendation {
                technique: Technique::InjectLoad,
                objective: "exploit existing system stress".into(),
                parameters: json!({"phase": "A", "magnitude": DEGRADATION_INJECTION_VA}),
            }),
            VulnerabilityKind::Overvoltage | VulnerabilityKind::UnbalancedLoading => {}
        }
    }
    recommended
}
