//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Built-in decision functions: scripted, random and heuristic."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::collections::VecDeque;

use gridstrike_attack::recon::VulnerabilityKind;
use gridstrike_attack::{
    normalize_parameters, AttackIntent, AttackResult, Parameters, ReconReport, SpoofTarget, Technique,
};
use gridstrike_federation::Phase;
use gridstrike_monitor::{GridSnapshot, MeasurementKind};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tracing::debug;

use crate::decision::{Decision, DecisionError, DecisionFunction};

/// Replays a fixed list of intents, then stops.
#[derive(Debug, Clone)]
pub struct ScriptedStrategy {
    script: VecDeque<(String, Parameters)>,
}

impl ScriptedStrategy {
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = (S, Parameters)>,
        S: Into<String>,
    {
        Self {
            script: steps
                .into_iter()
                .map(|(technique, parameters)| (technique.into(), parameters))
                .collect(),
        }
    }

    /// Build a script from `[{"technique": ..., "parameters": {...}}, ...]`.
    pub fn from_json(steps: &Value) -> Result<Self, DecisionError> {
        let items = steps
            .as_array()
            .ok_or_else(|| DecisionError::Malformed("script must be an array".into()))?;
        let mut script = VecDeque::with_capacity(items.len());
        for item in items {
            let technique = item
                .get("technique")
                .and_then(Value::as_str)
                .ok_or_else(|| DecisionError::Malformed(format!("script step without technique: {item}")))?;
            let parameters = match item.get("parameters") {
                Some(Value::Object(map)) => map.clone().into_iter().collect(),
                None | Some(Value::Null) => Parameters::new(),
                Some(other) => {
                    return Err(DecisionError::Malformed(format!(
                        "script parameters must be an object, got {other}"
                    )))
                }
            };
            script.push_back((technique.to_owned(), parameters));
        }
        Ok(Self { script })
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl DecisionFunction for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn decide(&mut self, _snapshot: &GridSnapshot, _history: &[AttackResult]) -> Result<Decision, DecisionError> {
        Ok(match self.script.pop_front() {
            Some((technique, parameters)) => Decision::Attack(AttackIntent::new(technique, parameters)),
            None => Decision::Stop,
        })
    }
}

/// Baseline strategy: uniformly random active techniques with random parameters.
#[derive(Debug, Clone)]
pub struct RandomStrategy {
    rng: StdRng,
}

impl RandomStrategy {
    const TECHNIQUES: [Technique; 3] = [
        Technique::SpoofData,
        Technique::InjectLoad,
        Technique::BlockCommand,
    ];

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    fn random_phase(&mut self) -> Phase {
        Phase::ALL[self.rng.gen_range(0..Phase::ALL.len())]
    }

    fn parameters(&mut self, technique: Technique) -> Value {
        match technique {
            Technique::SpoofData => {
                let quantity = if self.rng.gen_bool(0.5) { "voltage" } else { "power" };
                let phase = self.random_phase();
                json!({
                    "target": format!("{quantity}_{phase}"),
                    "value": self.rng.gen_range(1000.0..3000.0),
                    "angle": self.rng.gen_range(0.0..360.0),
                })
            }
            Technique::InjectLoad => json!({
                "phase": self.random_phase().to_string(),
                "magnitude": self.rng.gen_range(0.5e6..3.0e6),
                "power_factor": self.rng.gen_range(0.7..0.95),
            }),
            Technique::BlockCommand => json!({
                "enable": self.rng.gen_bool(0.5),
                "duration": self.rng.gen_range(5.0..30.0),
            }),
            Technique::Reconnaissance => json!({}),
        }
    }
}

impl DecisionFunction for RandomStrategy {
    fn name(&self) -> &str {
        "random"
    }

    fn decide(&mut self, _snapshot: &GridSnapshot, _history: &[AttackResult]) -> Result<Decision, DecisionError> {
        let technique = *Self::TECHNIQUES
            .choose(&mut self.rng)
            .ok_or_else(|| DecisionError::Failed("no techniques to choose from".into()))?;
        let parameters = to_parameters(self.parameters(technique))?;
        Ok(Decision::Attack(AttackIntent::new(technique.to_string(), parameters)))
    }
}

/// Where the heuristic stands within one attack round.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Stage {
    /// Spoofing observed voltage excursions; holds the targets already spoofed this round.
    Spoof(Vec<String>),
    Inject,
    Block,
}

/// Reconnaissance first, then rounds of attacks aimed at what the picture shows: voltage
/// excursions are pushed further, the weakest phase is loaded, and commands are blocked.
/// The round order is fixed; each step's parameters are taken from the snapshot current
/// at the time it is chosen, so every spoof or injection result feeds the next step.
#[derive(Debug, Clone)]
pub struct HeuristicStrategy {
    nominal_voltage: f64,
    stage: Stage,
    rounds: u64,
}

impl HeuristicStrategy {
    const MAX_SPOOFS: usize = 2;
    const INJECTION_VA: f64 = 2.0e6;
    const INJECTION_PF: f64 = 0.9;
    const BLOCK_SECS: f64 = 30.0;

    pub fn new(nominal_voltage: f64) -> Self {
        Self {
            nominal_voltage,
            stage: Stage::Spoof(Vec::new()),
            rounds: 0,
        }
    }

    /// Completed spoof/inject/block rounds.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    fn intent(&self, technique: Technique, raw: Value) -> Result<AttackIntent, DecisionError> {
        let name = technique.to_string();
        let parameters = normalize_parameters(&name, &to_parameters(raw)?, self.nominal_voltage);
        Ok(AttackIntent::new(name, parameters))
    }

    /// Next spoofable voltage excursion not yet spoofed this round, with the value that
    /// pushes it further from nominal.
    fn spoof_target(snapshot: &GridSnapshot, spoofed: &[String]) -> Option<(String, f64)> {
        let report = ReconReport::analyze(snapshot, std::iter::empty());
        report.vulnerabilities.iter().find_map(|vulnerability| {
            let factor = match vulnerability.kind {
                VulnerabilityKind::Undervoltage => 0.85,
                VulnerabilityKind::Overvoltage => 1.15,
                _ => return None,
            };
            let location = vulnerability.location.as_deref()?;
            if SpoofTarget::parse(location).is_none() || spoofed.iter().any(|done| done == location) {
                return None;
            }
            let magnitude = snapshot.get(location)?.magnitude;
            Some((location.to_owned(), magnitude * factor))
        })
    }

    fn next_step(&mut self, snapshot: &GridSnapshot) -> Result<AttackIntent, DecisionError> {
        loop {
            match &mut self.stage {
                Stage::Spoof(spoofed) => {
                    let target = (spoofed.len() < Self::MAX_SPOOFS)
                        .then(|| Self::spoof_target(snapshot, spoofed))
                        .flatten();
                    match target {
                        Some((target, value)) => {
                            spoofed.push(target.clone());
                            return self.intent(
                                Technique::SpoofData,
                                json!({"target": target, "value": value}),
                            );
                        }
                        None => self.stage = Stage::Inject,
                    }
                }
                Stage::Inject => {
                    self.stage = Stage::Block;
                    let weakest = snapshot
                        .weakest_phase(MeasurementKind::Voltage)
                        .unwrap_or(Phase::A);
                    return self.intent(
                        Technique::InjectLoad,
                        json!({
                            "phase": weakest.to_string(),
                            "magnitude": Self::INJECTION_VA,
                            "power_factor": Self::INJECTION_PF,
                        }),
                    );
                }
                Stage::Block => {
                    self.stage = Stage::Spoof(Vec::new());
                    self.rounds += 1;
                    debug!(rounds = self.rounds, "heuristic round complete");
                    return self.intent(
                        Technique::BlockCommand,
                        json!({"enable": true, "duration": Self::BLOCK_SECS}),
                    );
                }
            }
        }
    }
}

impl DecisionFunction for HeuristicStrategy {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn decide(&mut self, snapshot: &GridSnapshot, history: &[AttackResult]) -> Result<Decision, DecisionError> {
        let reconnoitred = history
            .iter()
            .any(|result| result.success && result.technique == Technique::Reconnaissance.as_ref());
        if !reconnoitred {
            return Ok(Decision::Attack(self.intent(Technique::Reconnaissance, json!({}))?));
        }
        self.next_step(snapshot).map(Decision::Attack)
    }
}

fn to_parameters(raw: Value) -> Result<Parameters, DecisionError> {
    serde_json::from_value(raw).map_err(|err| DecisionError::Malformed(err.to_string()))
}
