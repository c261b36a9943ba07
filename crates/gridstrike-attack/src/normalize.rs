//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Canonicalisation of loosely formed strategist parameters."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
//! Strategists (remote reasoning services in particular) emit parameters under a range of
//! names and formats. [`normalize_parameters`] maps them onto the names the validator
//! understands. It performs no safety checks of its own.

use serde_json::Value;

use crate::intent::{Parameters, Technique};

pub const DEFAULT_NORMALIZED_INJECTION: f64 = 1.5e6;
pub const DEFAULT_NORMALIZED_SPOOF: f64 = 2041.51;
pub const DEFAULT_NORMALIZED_BLOCK: f64 = 30.0;
/// Watts per percentage point when a load is given as `"200%"`.
const LOAD_PERCENT_SCALE: f64 = 10_000.0;

/// Rewrite `params` for `technique` into canonical form. Unknown technique names pass
/// through untouched so the validator can reject them.
pub fn normalize_parameters(technique: &str, params: &Parameters, nominal_voltage: f64) -> Parameters {
    let Ok(technique) = technique.trim().parse::<Technique>() else {
        return params.clone();
    };
    let mut out = Parameters::new();
    match technique {
        Technique::InjectLoad => {
            let magnitude = match (params.get("magnitude"), params.get("load_magnitude")) {
                (Some(value), _) => numeric(value),
                (None, Some(load)) => Value::from(
                    percent(load).map_or(DEFAULT_NORMALIZED_INJECTION, |pct| {
                        (pct * LOAD_PERCENT_SCALE).trunc()
                    }),
                ),
                (None, None) => Value::from(DEFAULT_NORMALIZED_INJECTION),
            };
            out.insert("magnitude".into(), magnitude);
            let phase = params
                .get("phase")
                .or_else(|| params.get("target_phase"))
                .cloned()
                .unwrap_or_else(|| Value::from("A"));
            out.insert("phase".into(), phase);
            carry(params, &mut out, &["power_factor"]);
        }
        Technique::SpoofData => {
            let target = match (params.get("target"), params.get("target_phase")) {
                (Some(target), _) => target.clone(),
                (None, Some(Value::String(phase))) => Value::from(format!("voltage_{phase}")),
                _ => Value::from("voltage_A"),
            };
            out.insert("target".into(), target);
            let value = match (params.get("value"), params.get("magnitude")) {
                (Some(value), _) => numeric(value),
                (None, Some(magnitude)) => Value::from(
                    percent(magnitude)
                        .map_or(DEFAULT_NORMALIZED_SPOOF, |pct| nominal_voltage * (1.0 + pct / 100.0)),
                ),
                (None, None) => Value::from(DEFAULT_NORMALIZED_SPOOF),
            };
            out.insert("value".into(), value);
            carry(params, &mut out, &["angle", "power_factor"]);
            if let Some(duration) = params.get("duration") {
                out.insert("duration".into(), seconds(duration));
            }
        }
        Technique::BlockCommand => {
            let enable = params
                .get("enable")
                .or_else(|| params.get("blocking_enabled"))
                .map(flag)
                .unwrap_or(Value::Bool(true));
            out.insert("enable".into(), enable);
            let duration = params
                .get("duration")
                .map(seconds)
                .unwrap_or_else(|| Value::from(DEFAULT_NORMALIZED_BLOCK));
            out.insert("duration".into(), duration);
        }
        Technique::Reconnaissance => {}
    }
    out
}

fn carry(from: &Parameters, to: &mut Parameters, keys: &[&str]) {
    for key in keys {
        if let Some(value) = from.get(*key) {
            to.insert((*key).to_owned(), numeric(value));
        }
    }
}

/// Numeric strings become numbers; anything else is kept for the validator to judge.
fn numeric(value: &Value) -> Value {
    match value {
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| value.clone()),
        _ => value.clone(),
    }
}

fn percent(value: &Value) -> Option<f64> {
    let text = value.as_str()?;
    let stripped = text.trim().strip_suffix('%')?;
    stripped.trim().parse().ok()
}

/// Accepts `15`, `"15"`, `"15s"`, `"15 sec"`, `"15 seconds"`.
fn seconds(value: &Value) -> Value {
    let Value::String(text) = value else {
        return value.clone();
    };
    let trimmed = text.trim();
    let digits = ["seconds", "second", "secs", "sec", "s"]
        .iter()
        .find_map(|suffix| trimmed.strip_suffix(suffix))
        .unwrap_or(trimmed);
    digits
        .trim()
        .parse::<f64>()
        .map(Value::from)
        .unwrap_or_else(|_| value.clone())
}

fn flag(value: &Value) -> Value {
    match value {
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Value::Bool(true),
            "false" | "no" | "off" | "0" => Value::Bool(false),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridstrike_common::config::DEFAULT_NOMINAL_VOLTAGE;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn load_percentages_and_phase_aliases() {
        let out = normalize_parameters(
            "inject_load",
            &params(json!({"load_magnitude": "200%", "target_phase": "B"})),
            DEFAULT_NOMINAL_VOLTAGE,
        );
        assert_eq!(out["magnitude"], json!(2_000_000.0));
        assert_eq!(out["phase"], json!("B"));

        let out = normalize_parameters("inject_load", &Parameters::new(), DEFAULT_NOMINAL_VOLTAGE);
        assert_eq!(out["magnitude"], json!(DEFAULT_NORMALIZED_INJECTION));
        assert_eq!(out["phase"], json!("A"));
    }

    #[test]
    fn spoof_percentages_are_relative_to_nominal() {
        let out = normalize_parameters(
            "spoof_data",
            &params(json!({"target_phase": "C", "magnitude": "-15%", "duration": "20s"})),
            2400.0,
        );
        assert_eq!(out["target"], json!("voltage_C"));
        assert!((out["value"].as_f64().unwrap() - 2040.0).abs() < 1e-9);
        assert_eq!(out["duration"], json!(20.0));
    }

    #[test]
    fn block_aliases_and_duration_strings() {
        let out = normalize_parameters(
            "block_command",
            &params(json!({"blocking_enabled": "false", "duration": "15 sec"})),
            DEFAULT_NOMINAL_VOLTAGE,
        );
        assert_eq!(out["enable"], json!(false));
        assert_eq!(out["duration"], json!(15.0));

        let out = normalize_parameters("block_command", &Parameters::new(), DEFAULT_NOMINAL_VOLTAGE);
        assert_eq!(out["enable"], json!(true));
        assert_eq!(out["duration"], json!(DEFAULT_NORMALIZED_BLOCK));
    }

    #[test]
    fn reconnaissance_drops_everything_and_unknown_passes_through() {
        let input = params(json!({"depth": 3}));
        assert!(normalize_parameters("reconnaissance", &input, DEFAULT_NOMINAL_VOLTAGE).is_empty());
        assert_eq!(
            normalize_parameters("exfiltrate", &input, DEFAULT_NOMINAL_VOLTAGE),
            input
        );
    }
}
