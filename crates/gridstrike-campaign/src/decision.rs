//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Pluggable decision functions driving a campaign."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use gridstrike_attack::{normalize_parameters, AttackIntent, AttackResult, Parameters};
use gridstrike_monitor::GridSnapshot;
use serde_json::Value;
use thiserror::Error;

/// What the controller should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Attack(AttackIntent),
    Stop,
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("decision function failed: {0}")]
    Failed(String),
    #[error("malformed decision: {0}")]
    Malformed(String),
    #[error("decision function panicked: {0}")]
    Panicked(String),
}

/// Chooses the next intent from the current snapshot and the campaign history so far.
///
/// The controller does not know whether the implementation is scripted, random or backed
/// by a remote reasoning service; it only sees decisions and errors.
pub trait DecisionFunction: Send {
    fn name(&self) -> &str {
        "custom"
    }

    fn decide(
        &mut self,
        snapshot: &GridSnapshot,
        history: &[AttackResult],
    ) -> Result<Decision, DecisionError>;
}

impl<F> DecisionFunction for F
where
    F: FnMut(&GridSnapshot, &[AttackResult]) -> Result<Decision, DecisionError> + Send,
{
    fn decide(
        &mut self,
        snapshot: &GridSnapshot,
        history: &[AttackResult],
    ) -> Result<Decision, DecisionError> {
        self(snapshot, history)
    }
}

impl Decision {
    /// Interpret a strategist's JSON reply.
    ///
    /// Accepts `{"stop": true}` or `{"technique": "...", "parameters": {...}}`; parameters
    /// are normalised before they are wrapped in an intent.
    pub fn from_strategist_json(reply: &Value, nominal_voltage: f64) -> Result<Decision, DecisionError> {
        let object = reply
            .as_object()
            .ok_or_else(|| DecisionError::Malformed(format!("expected an object, got {reply}")))?;
        if object.get("stop").and_then(Value::as_bool) == Some(true) {
            return Ok(Decision::Stop);
        }
        let technique = object
            .get("technique")
            .and_then(Value::as_str)
            .ok_or_else(|| DecisionError::Malformed("missing 'technique'".into()))?;
        let raw: Parameters = match object.get("parameters") {
            None | Some(Value::Null) => Parameters::new(),
            Some(Value::Object(map)) => map.clone().into_iter().collect(),
            Some(other) => {
                return Err(DecisionError::Malformed(format!(
                    "'parameters' must be an object, got {other}"
                )))
            }
        };
        let parameters = normalize_parameters(technique, &raw, nominal_voltage);
        Ok(Decision::Attack(AttackIntent::new(technique, parameters)))
    }
}
