//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Attack intents, techniques and validation outcomes."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

/// Loosely typed parameter mapping as submitted by callers.
pub type Parameters = BTreeMap<String, Value>;

/// Closed set of attack primitives.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Technique {
    SpoofData,
    InjectLoad,
    Reconnaissance,
    BlockCommand,
}

impl Technique {
    /// Informational techniques never publish and score zero impact.
    pub fn is_informational(self) -> bool {
        matches!(self, Technique::Reconnaissance)
    }
}

/// A caller's request to run a technique. Consumed once by validation and execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackIntent {
    pub technique: String,
    #[serde(default)]
    pub parameters: Parameters,
    pub requested_at: DateTime<Utc>,
}

impl AttackIntent {
    pub fn new(technique: impl Into<String>, parameters: Parameters) -> Self {
        Self::at(technique, parameters, Utc::now())
    }

    pub fn at(
        technique: impl Into<String>,
        parameters: Parameters,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            technique: technique.into(),
            parameters,
            requested_at,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// A numeric parameter moved onto its bound during validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterAdjustment {
    pub parameter: String,
    pub original: f64,
    pub adjusted: f64,
    pub min: f64,
    pub max: f64,
}

/// Intent that passed the threat model, with defaults filled in and bounds enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedIntent {
    pub original: AttackIntent,
    pub technique: Technique,
    pub parameters: Parameters,
    pub adjustments: Vec<ParameterAdjustment>,
}

impl ValidatedIntent {
    pub fn number(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(Value::as_f64)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.parameters.get(key).and_then(Value::as_bool)
    }

    pub fn was_clamped(&self) -> bool {
        !self.adjustments.is_empty()
    }

    /// The validated intent re-expressed as a plain intent carrying the final parameters.
    pub fn as_intent(&self) -> AttackIntent {
        AttackIntent::at(
            self.technique.to_string(),
            self.parameters.clone(),
            self.original.requested_at,
        )
    }
}

/// Why the threat model refused an intent.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("unknown technique '{name}'")]
    UnknownTechnique { name: String },
    #[error("technique '{technique}' is not allowed by the threat model")]
    TechniqueNotAllowed { technique: Technique },
    #[error("parameter '{parameter}' names denied target '{target}'")]
    DeniedTarget { parameter: String, target: String },
    #[error("parameter '{parameter}' = {value} outside [{min}, {max}]")]
    OutOfBounds {
        parameter: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("rate limited: {elapsed_secs:.3}s since last {technique}, minimum {min_interval_secs:.3}s")]
    RateLimited {
        technique: Technique,
        elapsed_secs: f64,
        min_interval_secs: f64,
    },
    #[error("missing required parameter '{parameter}'")]
    MissingParameter { parameter: String },
    #[error("malformed parameter '{parameter}': {detail}")]
    Malformed { parameter: String, detail: String },
}

/// Threat-model refusal of one intent.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{technique} rejected: {reason}")]
pub struct Rejection {
    pub technique: String,
    pub reason: RejectionReason,
}

impl Rejection {
    pub(crate) fn new(technique: impl Into<String>, reason: RejectionReason) -> Self {
        Self {
            technique: technique.into(),
            reason,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.reason, RejectionReason::RateLimited { .. })
    }
}
