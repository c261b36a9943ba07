//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Threat model validator: bounds, deny-list and rate limiting for attack intents."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use gridstrike_common::time::seconds_between;
use gridstrike_common::{BoundsPolicy, ThreatModelConfig};
use gridstrike_federation::Phase;
use serde_json::Value;
use tracing::{debug, warn};

use crate::intent::{
    AttackIntent, ParameterAdjustment, Parameters, Rejection, RejectionReason, Technique,
    ValidatedIntent,
};

pub const DEFAULT_POWER_FACTOR: f64 = 0.9;
pub const DEFAULT_INJECTION: f64 = 1.0e6;
pub const DEFAULT_BLOCK_DURATION: f64 = 10.0;
const ANGLE_LIMIT_DEG: f64 = 360.0;

/// Measurement family a spoofed value is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoofTarget {
    Voltage(Phase),
    Power(Phase),
}

impl SpoofTarget {
    /// Parses `voltage_A` / `power_c` style names.
    pub fn parse(name: &str) -> Option<SpoofTarget> {
        let (family, suffix) = name.rsplit_once('_')?;
        let phase = Phase::from_str(suffix).ok()?;
        match family.to_ascii_lowercase().as_str() {
            "voltage" => Some(SpoofTarget::Voltage(phase)),
            "power" => Some(SpoofTarget::Power(phase)),
            _ => None,
        }
    }

    pub fn phase(self) -> Phase {
        match self {
            SpoofTarget::Voltage(phase) | SpoofTarget::Power(phase) => phase,
        }
    }

    /// Canonical measurement name, e.g. `voltage_A`.
    pub fn measurement(self) -> String {
        match self {
            SpoofTarget::Voltage(phase) => format!("voltage_{phase}"),
            SpoofTarget::Power(phase) => format!("power_{phase}"),
        }
    }

    /// Publication channel that carries the spoofed value.
    pub fn attack_channel(self) -> String {
        format!("{}_attack_{}", self.family(), self.phase())
    }

    fn family(self) -> &'static str {
        match self {
            SpoofTarget::Voltage(_) => "voltage",
            SpoofTarget::Power(_) => "power",
        }
    }
}

/// Gate every intent passes before it may reach the bus.
///
/// Parameter checks are pure; the only state is the per-technique time of the last accepted
/// intent, used for rate limiting and cleared by [`reset`](Self::reset).
#[derive(Debug)]
pub struct ThreatModelValidator {
    config: ThreatModelConfig,
    allowed: BTreeSet<Technique>,
    denied: Vec<String>,
    last_accepted: HashMap<Technique, DateTime<Utc>>,
}

impl ThreatModelValidator {
    pub fn new(config: ThreatModelConfig) -> Self {
        let mut allowed = BTreeSet::new();
        for name in &config.allowed_techniques {
            match Technique::from_str(name) {
                Ok(technique) => {
                    allowed.insert(technique);
                }
                Err(_) => warn!(technique = %name, "ignoring unknown technique in allow-list"),
            }
        }
        let denied = config
            .restricted_targets
            .iter()
            .map(|target| target.to_ascii_lowercase())
            .filter(|target| !target.is_empty())
            .collect();
        Self {
            config,
            allowed,
            denied,
            last_accepted: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ThreatModelConfig {
        &self.config
    }

    pub fn is_allowed(&self, technique: Technique) -> bool {
        self.allowed.contains(&technique)
    }

    /// Validate and record the intent for rate limiting when accepted.
    pub fn validate(&mut self, intent: &AttackIntent) -> Result<ValidatedIntent, Rejection> {
        let validated = self.check(intent)?;
        let technique = validated.technique;
        let min_interval = self.config.min_interval.as_secs_f64();
        if let Some(last) = self.last_accepted.get(&technique) {
            let elapsed = seconds_between(*last, intent.requested_at);
            if elapsed < min_interval {
                let rejection = Rejection::new(
                    technique.to_string(),
                    RejectionReason::RateLimited {
                        technique,
                        elapsed_secs: elapsed,
                        min_interval_secs: min_interval,
                    },
                );
                warn!(technique = %technique, reason = %rejection.reason, "intent rejected");
                return Err(rejection);
            }
        }
        self.last_accepted.insert(technique, intent.requested_at);
        Ok(validated)
    }

    /// Parameter, allow-list and deny-list checks without touching rate-limit state.
    pub fn check(&self, intent: &AttackIntent) -> Result<ValidatedIntent, Rejection> {
        let outcome = self.check_inner(intent);
        match outcome {
            Ok((technique, parameters, adjustments)) => {
                if !adjustments.is_empty() {
                    debug!(
                        technique = %technique,
                        adjusted = adjustments.len(),
                        "intent parameters clamped to threat model bounds"
                    );
                }
                Ok(ValidatedIntent {
                    original: intent.clone(),
                    technique,
                    parameters,
                    adjustments,
                })
            }
            Err(reason) => {
                warn!(technique = %intent.technique, reason = %reason, "intent rejected");
                Err(Rejection::new(intent.technique.clone(), reason))
            }
        }
    }

    /// Forget rate-limit history; called at campaign start.
    pub fn reset(&mut self) {
        self.last_accepted.clear();
    }

    fn check_inner(
        &self,
        intent: &AttackIntent,
    ) -> Result<(Technique, Parameters, Vec<ParameterAdjustment>), RejectionReason> {
        let technique = Technique::from_str(intent.technique.trim()).map_err(|_| {
            RejectionReason::UnknownTechnique {
                name: intent.technique.clone(),
            }
        })?;
        if !self.allowed.contains(&technique) {
            return Err(RejectionReason::TechniqueNotAllowed { technique });
        }
        self.check_deny_list(&intent.parameters)?;

        let mut checker = Checker {
            config: &self.config,
            input: &intent.parameters,
            output: Parameters::new(),
            adjustments: Vec::new(),
        };
        match technique {
            Technique::SpoofData => checker.spoof_data()?,
            Technique::InjectLoad => checker.inject_load()?,
            Technique::BlockCommand => checker.block_command()?,
            Technique::Reconnaissance => {}
        }
        Ok((technique, checker.output, checker.adjustments))
    }

    fn check_deny_list(&self, parameters: &Parameters) -> Result<(), RejectionReason> {
        for (name, value) in parameters {
            let mut texts = Vec::new();
            collect_strings(value, &mut texts);
            for text in texts {
                let lowered = text.to_ascii_lowercase();
                if let Some(denied) = self.denied.iter().find(|d| lowered.contains(d.as_str())) {
                    return Err(RejectionReason::DeniedTarget {
                        parameter: name.clone(),
                        target: denied.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(text) => out.push(text),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

struct Checker<'a> {
    config: &'a ThreatModelConfig,
    input: &'a Parameters,
    output: Parameters,
    adjustments: Vec<ParameterAdjustment>,
}

impl<'a> Checker<'a> {
    fn spoof_data(&mut self) -> Result<(), RejectionReason> {
        let target_name = self.text("target")?.unwrap_or("voltage_A");
        let target = SpoofTarget::parse(target_name).ok_or_else(|| RejectionReason::Malformed {
            parameter: "target".into(),
            detail: format!("'{target_name}' is not a voltage_X or power_X measurement"),
        })?;
        self.output
            .insert("target".into(), Value::from(target.measurement()));

        let value = self
            .number("value")?
            .ok_or_else(|| RejectionReason::MissingParameter {
                parameter: "value".into(),
            })?;
        let (min, max) = match target {
            SpoofTarget::Voltage(_) => (self.config.min_voltage(), self.config.max_voltage()),
            SpoofTarget::Power(_) => (0.0, self.config.max_injection),
        };
        self.bounded("value", value, min, max)?;

        let angle = self
            .number("angle")?
            .unwrap_or_else(|| target.phase().nominal_angle_deg());
        self.bounded("angle", angle, -ANGLE_LIMIT_DEG, ANGLE_LIMIT_DEG)?;

        if let SpoofTarget::Power(_) = target {
            let pf = self.number("power_factor")?.unwrap_or(DEFAULT_POWER_FACTOR);
            self.bounded("power_factor", pf, self.config.min_power_factor, 1.0)?;
        }

        let duration = self.number("duration")?.unwrap_or(0.0);
        self.bounded("duration", duration, 0.0, self.config.max_duration)?;
        Ok(())
    }

    fn inject_load(&mut self) -> Result<(), RejectionReason> {
        let phase = self.phase("phase")?.unwrap_or(Phase::A);
        self.output.insert("phase".into(), Value::from(phase.to_string()));

        let magnitude = self.number("magnitude")?.unwrap_or(DEFAULT_INJECTION);
        self.bounded("magnitude", magnitude, 0.0, self.config.max_injection)?;

        let pf = self.number("power_factor")?.unwrap_or(DEFAULT_POWER_FACTOR);
        self.bounded("power_factor", pf, self.config.min_power_factor, 1.0)?;
        Ok(())
    }

    fn block_command(&mut self) -> Result<(), RejectionReason> {
        let enable = match self.input.get("enable") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(RejectionReason::Malformed {
                    parameter: "enable".into(),
                    detail: format!("expected a boolean, got {other}"),
                })
            }
        };
        self.output.insert("enable".into(), Value::from(enable));

        let duration = self.number("duration")?.unwrap_or(DEFAULT_BLOCK_DURATION);
        self.bounded("duration", duration, 0.0, self.config.max_duration)?;
        Ok(())
    }

    fn number(&self, name: &str) -> Result<Option<f64>, RejectionReason> {
        match self.input.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => match value.as_f64() {
                Some(number) if number.is_finite() => Ok(Some(number)),
                _ => Err(RejectionReason::Malformed {
                    parameter: name.into(),
                    detail: format!("expected a finite number, got {value}"),
                }),
            },
        }
    }

    fn text(&self, name: &str) -> Result<Option<&'a str>, RejectionReason> {
        let input: &'a Parameters = self.input;
        match input.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.as_str())),
            Some(other) => Err(RejectionReason::Malformed {
                parameter: name.into(),
                detail: format!("expected a string, got {other}"),
            }),
        }
    }

    fn phase(&self, name: &str) -> Result<Option<Phase>, RejectionReason> {
        let Some(text) = self.text(name)? else {
            return Ok(None);
        };
        Phase::from_str(text.trim())
            .map(Some)
            .map_err(|_| RejectionReason::Malformed {
                parameter: name.into(),
                detail: format!("'{text}' is not one of A, B, C"),
            })
    }

    /// Record `value` under `name`, clamping or rejecting per the bounds policy.
    fn bounded(&mut self, name: &str, value: f64, min: f64, max: f64) -> Result<(), RejectionReason> {
        let adjusted = value.clamp(min, max);
        if adjusted != value {
            match self.config.bounds_policy {
                BoundsPolicy::Reject => {
                    return Err(RejectionReason::OutOfBounds {
                        parameter: name.into(),
                        value,
                        min,
                        max,
                    })
                }
                BoundsPolicy::Clamp => self.adjustments.push(ParameterAdjustment {
                    parameter: name.into(),
                    original: value,
                    adjusted,
                    min,
                    max,
                }),
            }
        }
        self.output.insert(name.into(), Value::from(adjusted));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn intent(technique: &str, params: Value) -> AttackIntent {
        let parameters = serde_json::from_value(params).unwrap();
        AttackIntent::new(technique, parameters)
    }

    #[test]
    fn injection_above_limit_is_clamped() {
        let validator = ThreatModelValidator::new(ThreatModelConfig::default());
        let validated = validator
            .check(&intent("inject_load", json!({"magnitude": 10_000_000.0})))
            .unwrap();
        assert_eq!(validated.number("magnitude"), Some(5_000_000.0));
        assert_eq!(validated.adjustments.len(), 1);
        assert_eq!(validated.adjustments[0].original, 10_000_000.0);
        assert_eq!(validated.text("phase"), Some("A"));
    }

    #[test]
    fn reject_policy_refuses_out_of_bounds() {
        let config = ThreatModelConfig {
            bounds_policy: BoundsPolicy::Reject,
            ..ThreatModelConfig::default()
        };
        let validator = ThreatModelValidator::new(config);
        let err = validator
            .check(&intent("inject_load", json!({"magnitude": 10_000_000.0})))
            .unwrap_err();
        assert!(matches!(err.reason, RejectionReason::OutOfBounds { ref parameter, .. } if parameter == "magnitude"));
    }

    #[test]
    fn denied_targets_reject_even_when_embedded() {
        let validator = ThreatModelValidator::new(ThreatModelConfig::default());
        let err = validator
            .check(&intent(
                "spoof_data",
                json!({"target": "Emergency_Controls", "value": 2400.0}),
            ))
            .unwrap_err();
        assert!(matches!(err.reason, RejectionReason::DeniedTarget { .. }));

        let err = validator
            .check(&intent("block_command", json!({"notes": ["ok", "hit safety_systems"]})))
            .unwrap_err();
        assert!(matches!(err.reason, RejectionReason::DeniedTarget { ref parameter, .. } if parameter == "notes"));
    }

    #[test]
    fn categorical_errors_reject() {
        let validator = ThreatModelValidator::new(ThreatModelConfig::default());
        let err = validator.check(&intent("melt_transformer", json!({}))).unwrap_err();
        assert!(matches!(err.reason, RejectionReason::UnknownTechnique { .. }));

        let err = validator
            .check(&intent("spoof_data", json!({"target": "frequency", "value": 60.0})))
            .unwrap_err();
        assert!(matches!(err.reason, RejectionReason::Malformed { .. }));

        let err = validator
            .check(&intent("spoof_data", json!({"target": "voltage_B"})))
            .unwrap_err();
        assert!(matches!(err.reason, RejectionReason::MissingParameter { .. }));

        let err = validator
            .check(&intent("inject_load", json!({"magnitude": "lots"})))
            .unwrap_err();
        assert!(matches!(err.reason, RejectionReason::Malformed { .. }));
    }

    #[test]
    fn techniques_outside_allow_list_are_refused() {
        let config = ThreatModelConfig {
            allowed_techniques: vec!["reconnaissance".into()],
            ..ThreatModelConfig::default()
        };
        let validator = ThreatModelValidator::new(config);
        assert!(validator.check(&intent("reconnaissance", json!({}))).is_ok());
        let err = validator.check(&intent("inject_load", json!({}))).unwrap_err();
        assert_eq!(
            err.reason,
            RejectionReason::TechniqueNotAllowed {
                technique: Technique::InjectLoad
            }
        );
    }

    #[test]
    fn spoof_defaults_follow_target_phase() {
        let validator = ThreatModelValidator::new(ThreatModelConfig::default());
        let validated = validator
            .check(&intent("spoof_data", json!({"target": "voltage_c", "value": 2000.0})))
            .unwrap();
        assert_eq!(validated.text("target"), Some("voltage_C"));
        assert_eq!(validated.number("angle"), Some(120.0));
        assert_eq!(validated.number("duration"), Some(0.0));
        assert!(validated.number("power_factor").is_none());

        let validated = validator
            .check(&intent("spoof_data", json!({"target": "power_B", "value": 9.0e6})))
            .unwrap();
        assert_eq!(validated.number("value"), Some(5.0e6));
        assert_eq!(validated.number("power_factor"), Some(DEFAULT_POWER_FACTOR));
    }

    #[test]
    fn rate_limit_applies_per_technique_and_resets() {
        let mut validator = ThreatModelValidator::new(ThreatModelConfig::default());
        let start = Utc::now();
        let recon = |at| AttackIntent::at("reconnaissance", Parameters::new(), at);
        let block = |at| AttackIntent::at("block_command", Parameters::new(), at);

        assert!(validator.validate(&recon(start)).is_ok());
        assert!(validator.validate(&block(start)).is_ok());
        let err = validator
            .validate(&recon(start + Duration::milliseconds(500)))
            .unwrap_err();
        assert!(err.is_rate_limited());
        // rejected intents do not move the window
        assert!(validator
            .validate(&recon(start + Duration::milliseconds(1000)))
            .is_ok());

        validator.reset();
        assert!(validator
            .validate(&recon(start + Duration::milliseconds(1100)))
            .is_ok());
    }

    #[test]
    fn spoof_target_parsing() {
        assert_eq!(SpoofTarget::parse("voltage_A"), Some(SpoofTarget::Voltage(Phase::A)));
        assert_eq!(SpoofTarget::parse("Power_b"), Some(SpoofTarget::Power(Phase::B)));
        assert_eq!(SpoofTarget::parse("voltage_D"), None);
        assert_eq!(
            SpoofTarget::Power(Phase::C).attack_channel(),
            "power_attack_C"
        );
    }
}
