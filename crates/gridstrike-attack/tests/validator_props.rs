//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "tests"
//! gs_type: "source"
//! gs_scope: "test"
//! gs_description: "Property tests for threat-model bounds and idempotence."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use gridstrike_attack::{AttackIntent, Parameters, RejectionReason, ThreatModelValidator};
use gridstrike_common::{BoundsPolicy, ThreatModelConfig};
use proptest::prelude::*;
use serde_json::{json, Value};

fn params(value: Value) -> Parameters {
    serde_json::from_value(value).unwrap()
}

fn arb_intent() -> impl Strategy<Value = AttackIntent> {
    let inject = (
        prop::sample::select(vec!["A", "b", "C"]),
        -1.0e7..2.0e7f64,
        -0.5..1.5f64,
    )
        .prop_map(|(phase, magnitude, pf)| {
            AttackIntent::new(
                "inject_load",
                params(json!({"phase": phase, "magnitude": magnitude, "power_factor": pf})),
            )
        });
    let spoof = (
        prop::sample::select(vec!["voltage_A", "voltage_B", "power_C"]),
        -5.0e3..1.0e7f64,
        -720.0..720.0f64,
        -10.0..1000.0f64,
    )
        .prop_map(|(target, value, angle, duration)| {
            AttackIntent::new(
                "spoof_data",
                params(json!({"target": target, "value": value, "angle": angle, "duration": duration})),
            )
        });
    let block = (any::<bool>(), -50.0..900.0f64).prop_map(|(enable, duration)| {
        AttackIntent::new(
            "block_command",
            params(json!({"enable": enable, "duration": duration})),
        )
    });
    prop_oneof![inject, spoof, block]
}

fn within(config: &ThreatModelConfig, target: Option<&str>, name: &str, value: f64) -> bool {
    let (min, max) = match name {
        "magnitude" => (0.0, config.max_injection),
        "power_factor" => (config.min_power_factor, 1.0),
        "angle" => (-360.0, 360.0),
        "duration" => (0.0, config.max_duration),
        "value" if target.is_some_and(|t| t.starts_with("voltage")) => {
            (config.min_voltage(), config.max_voltage())
        }
        "value" => (0.0, config.max_injection),
        _ => return true,
    };
    (min..=max).contains(&value)
}

proptest! {
    #[test]
    fn accepted_parameters_lie_within_bounds(intent in arb_intent()) {
        let config = ThreatModelConfig::default();
        let validator = ThreatModelValidator::new(config.clone());
        let validated = validator.check(&intent).expect("clamp mode accepts numeric excursions");
        let target = validated.text("target");
        for (name, value) in &validated.parameters {
            if let Some(number) = value.as_f64() {
                prop_assert!(within(&config, target, name, number), "{name} = {number}");
            }
        }
    }

    #[test]
    fn validation_is_idempotent(intent in arb_intent()) {
        let validator = ThreatModelValidator::new(ThreatModelConfig::default());
        let once = validator.check(&intent).unwrap();
        let twice = validator.check(&once.as_intent()).unwrap();
        prop_assert_eq!(&once.parameters, &twice.parameters);
        prop_assert!(twice.adjustments.is_empty());
    }

    #[test]
    fn reject_mode_refuses_only_real_violations(intent in arb_intent()) {
        let config = ThreatModelConfig {
            bounds_policy: BoundsPolicy::Reject,
            ..ThreatModelConfig::default()
        };
        let clamping = ThreatModelValidator::new(ThreatModelConfig::default());
        let rejecting = ThreatModelValidator::new(config);
        let clamped = clamping.check(&intent).unwrap();
        match rejecting.check(&intent) {
            Ok(validated) => prop_assert!(clamped.adjustments.is_empty() && validated.adjustments.is_empty()),
            Err(rejection) => {
                let is_bounds = matches!(rejection.reason, RejectionReason::OutOfBounds { .. });
                prop_assert!(is_bounds);
                prop_assert!(!clamped.adjustments.is_empty());
            }
        }
    }
}
