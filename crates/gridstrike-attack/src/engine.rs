//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Attack engine: validate, execute, assess and record attack intents."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gridstrike_common::{ImpactConfig, ThreatModelConfig};
use gridstrike_federation::{ChannelValue, FederationClient, FederationError, SimTime};
use gridstrike_metrics::AttackMetrics;
use gridstrike_monitor::{GridSnapshot, GridStateCache};
use gridstrike_persistence::{PersistenceError, RecordLogWriter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::IntoEnumIterator;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::handlers::{
    builtin, BlockRelease, HandlerContext, HandlerError, HandlerOutcome, TechniqueHandler,
    BLOCK_CHANNEL,
};
use crate::impact::{ImpactBreakdown, ImpactScorer};
use crate::intent::{
    AttackIntent, ParameterAdjustment, Parameters, RejectionReason, Technique, ValidatedIntent,
};
use crate::validator::ThreatModelValidator;

/// Identifies the cache snapshot an attack was measured against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub sequence: u64,
    pub simulation_time: SimTime,
}

impl From<&GridSnapshot> for SnapshotRef {
    fn from(snapshot: &GridSnapshot) -> Self {
        Self {
            sequence: snapshot.sequence,
            simulation_time: snapshot.simulation_time,
        }
    }
}

/// Why an attempted attack did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttackFailure {
    Rejected { reason: RejectionReason },
    UnknownTechnique { name: String },
    Handler { message: String },
    Federation { message: String },
}

impl AttackFailure {
    /// Metric and CSV label for the failure class.
    pub fn label(&self) -> &'static str {
        match self {
            AttackFailure::Rejected { .. } => "rejected",
            AttackFailure::UnknownTechnique { .. } => "unknown_technique",
            AttackFailure::Handler { .. } => "handler_error",
            AttackFailure::Federation { .. } => "federation_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            AttackFailure::Rejected { reason } => reason.to_string(),
            AttackFailure::UnknownTechnique { name } => format!("unknown technique '{name}'"),
            AttackFailure::Handler { message } | AttackFailure::Federation { message } => {
                message.clone()
            }
        }
    }
}

/// Immutable record of one attempted attack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
    pub id: Uuid,
    pub technique: String,
    /// Parameters actually used; the submitted ones when the intent never passed validation.
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adjustments: Vec<ParameterAdjustment>,
    pub pre_state: SnapshotRef,
    pub post_state: SnapshotRef,
    pub impact_score: f64,
    pub impact: ImpactBreakdown,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<AttackFailure>,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub simulation_time: SimTime,
}

impl AttackResult {
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self.failure,
            Some(AttackFailure::Rejected {
                reason: RejectionReason::RateLimited { .. }
            })
        )
    }

    pub fn is_rejected(&self) -> bool {
        matches!(
            self.failure,
            Some(AttackFailure::Rejected { .. } | AttackFailure::UnknownTechnique { .. })
        )
    }

    pub fn outcome_label(&self) -> &'static str {
        self.failure.as_ref().map_or("success", AttackFailure::label)
    }
}

/// Flat row used for CSV export of a history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackSummaryRow {
    pub id: Uuid,
    pub technique: String,
    pub success: bool,
    pub impact_score: f64,
    pub simulation_time: f64,
    pub timestamp: String,
    pub failure: Option<String>,
}

impl From<&AttackResult> for AttackSummaryRow {
    fn from(result: &AttackResult) -> Self {
        Self {
            id: result.id,
            technique: result.technique.clone(),
            success: result.success,
            impact_score: result.impact_score,
            simulation_time: result.simulation_time.as_secs(),
            timestamp: result.timestamp.to_rfc3339(),
            failure: result.failure.as_ref().map(AttackFailure::message),
        }
    }
}

/// Destination for every produced [`AttackResult`], in order.
pub trait HistorySink: Send {
    fn record(&mut self, result: &AttackResult) -> Result<(), PersistenceError>;
}

impl HistorySink for RecordLogWriter<AttackResult> {
    fn record(&mut self, result: &AttackResult) -> Result<(), PersistenceError> {
        self.append(result).map(|_| ())
    }
}

/// Fatal outcome of [`AttackEngine::execute`]. The failed result has already been
/// appended to the history when this is returned.
#[derive(Debug, Error)]
pub enum AttackError {
    #[error("federation failure while executing {}: {source}", .result.technique)]
    Federation {
        source: FederationError,
        result: Box<AttackResult>,
    },
}

impl AttackError {
    pub fn result(&self) -> &AttackResult {
        match self {
            AttackError::Federation { result, .. } => result,
        }
    }

    pub fn federation_error(&self) -> &FederationError {
        match self {
            AttackError::Federation { source, .. } => source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.federation_error().is_timeout()
    }
}

/// Results kept in memory by default. Older ones remain in the history sink.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Sequential validate → pre-state → handler → post-state → impact → history pipeline.
///
/// The engine owns the federation session for its lifetime; the cache is shared so that
/// readers can take snapshots while a campaign runs.
pub struct AttackEngine {
    validator: ThreatModelValidator,
    handlers: HashMap<Technique, Box<dyn TechniqueHandler>>,
    session: FederationClient,
    cache: Arc<GridStateCache>,
    scorer: ImpactScorer,
    history: Vec<AttackResult>,
    history_limit: usize,
    sink: Option<Box<dyn HistorySink>>,
    metrics: Option<AttackMetrics>,
    outstanding_block: Option<BlockRelease>,
}

impl std::fmt::Debug for AttackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttackEngine")
            .field("session", &self.session)
            .field("history", &self.history.len())
            .field("outstanding_block", &self.outstanding_block)
            .finish()
    }
}

impl AttackEngine {
    /// Build an engine around a joined session. Values the session already holds are
    /// ingested so the first pre-state is not empty.
    pub fn new(
        session: FederationClient,
        cache: Arc<GridStateCache>,
        threat_model: ThreatModelConfig,
        impact: ImpactConfig,
    ) -> Self {
        cache.describe_channels(session.channels());
        if !session.fresh_samples().is_empty() {
            cache.ingest(session.fresh_samples(), session.granted_time());
        }
        let handlers = Technique::iter()
            .map(|technique| (technique, builtin(technique)))
            .collect();
        Self {
            validator: ThreatModelValidator::new(threat_model),
            handlers,
            session,
            cache,
            scorer: ImpactScorer::new(impact),
            history: Vec::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            sink: None,
            metrics: None,
            outstanding_block: None,
        }
    }

    pub fn with_history_sink(mut self, sink: Box<dyn HistorySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Keep at most `limit` results in memory, dropping the oldest first.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self.trim_history();
        self
    }

    pub fn with_metrics(mut self, metrics: AttackMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replace the handler for a technique.
    pub fn register<H>(&mut self, technique: Technique, handler: H)
    where
        H: TechniqueHandler + 'static,
    {
        info!(technique = %technique, "technique handler registered");
        self.handlers.insert(technique, Box::new(handler));
    }

    /// Run one intent through the pipeline.
    ///
    /// Rejections, unknown techniques and handler faults all come back as `Ok` with a
    /// failed result. Only federation failures that leave the session unusable are
    /// returned as `Err`, and their failed result is recorded first.
    pub fn execute(&mut self, intent: AttackIntent) -> Result<AttackResult, AttackError> {
        let validated = match self.validator.validate(&intent) {
            Ok(validated) => validated,
            Err(rejection) => {
                let failure = match rejection.reason {
                    RejectionReason::UnknownTechnique { name } => {
                        AttackFailure::UnknownTechnique { name }
                    }
                    reason => AttackFailure::Rejected { reason },
                };
                let state = self.cache.snapshot();
                let result = self.failed(
                    intent.technique,
                    intent.parameters,
                    Vec::new(),
                    &state,
                    &state,
                    failure,
                );
                return Ok(self.record(result));
            }
        };

        let pre = self.cache.snapshot();
        let outcome = self.run_handler(&validated);
        let post = self.cache.snapshot();
        let technique = validated.technique.to_string();

        match outcome {
            Ok(outcome) => {
                let impact = if outcome.informational {
                    ImpactBreakdown::default()
                } else {
                    self.scorer.score(&pre, &post)
                };
                match outcome.block_release {
                    Some(release) => self.outstanding_block = Some(release),
                    // A block intent that lowered the flag leaves nothing to release.
                    None if validated.technique == Technique::BlockCommand => {
                        self.outstanding_block = None;
                    }
                    None => {}
                }
                let result = AttackResult {
                    id: Uuid::new_v4(),
                    technique,
                    parameters: validated.parameters,
                    adjustments: validated.adjustments,
                    pre_state: SnapshotRef::from(pre.as_ref()),
                    post_state: SnapshotRef::from(post.as_ref()),
                    impact_score: impact.score,
                    impact,
                    success: true,
                    failure: None,
                    payload: outcome.payload,
                    timestamp: self.session.now(),
                    simulation_time: self.session.granted_time(),
                };
                Ok(self.record(result))
            }
            Err(HandlerError::Federation(err)) if err.is_fatal() => {
                let failure = AttackFailure::Federation {
                    message: err.to_string(),
                };
                let result = self.failed(
                    technique,
                    validated.parameters,
                    validated.adjustments,
                    &pre,
                    &post,
                    failure,
                );
                let result = self.record(result);
                Err(AttackError::Federation {
                    source: err,
                    result: Box::new(result),
                })
            }
            Err(err) => {
                let failure = AttackFailure::Handler {
                    message: err.to_string(),
                };
                let result = self.failed(
                    technique,
                    validated.parameters,
                    validated.adjustments,
                    &pre,
                    &post,
                    failure,
                );
                Ok(self.record(result))
            }
        }
    }

    fn run_handler(&mut self, intent: &ValidatedIntent) -> Result<HandlerOutcome, HandlerError> {
        let Some(handler) = self.handlers.get(&intent.technique) else {
            return Err(HandlerError::Fault(format!(
                "no handler registered for {}",
                intent.technique
            )));
        };
        let mut ctx = HandlerContext::new(&mut self.session, &self.cache);
        match catch_unwind(AssertUnwindSafe(|| handler.execute(intent, &mut ctx))) {
            Ok(outcome) => outcome,
            Err(panic) => Err(HandlerError::Fault(panic_message(panic.as_ref()))),
        }
    }

    fn failed(
        &self,
        technique: String,
        parameters: Parameters,
        adjustments: Vec<ParameterAdjustment>,
        pre: &GridSnapshot,
        post: &GridSnapshot,
        failure: AttackFailure,
    ) -> AttackResult {
        AttackResult {
            id: Uuid::new_v4(),
            technique,
            parameters,
            adjustments,
            pre_state: SnapshotRef::from(pre),
            post_state: SnapshotRef::from(post),
            impact_score: 0.0,
            impact: ImpactBreakdown::default(),
            success: false,
            failure: Some(failure),
            payload: Value::Null,
            timestamp: self.session.now(),
            simulation_time: self.session.granted_time(),
        }
    }

    fn record(&mut self, result: AttackResult) -> AttackResult {
        match &result.failure {
            None => info!(
                technique = %result.technique,
                impact_score = result.impact_score,
                granted = result.simulation_time.as_secs(),
                "attack executed"
            ),
            Some(failure @ (AttackFailure::Handler { .. } | AttackFailure::Federation { .. })) => {
                error!(technique = %result.technique, reason = %failure.message(), "attack faulted")
            }
            Some(failure) => {
                warn!(technique = %result.technique, reason = %failure.message(), "attack refused")
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_attack(&result.technique, result.outcome_label());
            if result.success {
                metrics.observe_impact(result.impact_score);
            }
        }
        if let Some(sink) = self.sink.as_mut() {
            if let Err(err) = sink.record(&result) {
                warn!(error = %err, id = %result.id, "failed to persist attack result");
            }
        }
        self.history.push(result.clone());
        self.trim_history();
        result
    }

    fn trim_history(&mut self) {
        let excess = self.history.len().saturating_sub(self.history_limit);
        if excess > 0 {
            self.history.drain(..excess);
        }
    }

    /// Advance simulated time by at least `secs` and ingest what arrives.
    pub fn settle(&mut self, secs: f64) -> Result<Arc<GridSnapshot>, FederationError> {
        let target = self.session.granted_time().plus(secs.max(0.0));
        let granted = self.session.advance(target)?;
        Ok(self.cache.ingest(self.session.fresh_samples(), granted))
    }

    /// Advance one time delta and ingest what arrives.
    pub fn step(&mut self) -> Result<Arc<GridSnapshot>, FederationError> {
        let granted = self.session.step()?;
        Ok(self.cache.ingest(self.session.fresh_samples(), granted))
    }

    pub fn outstanding_block(&self) -> Option<BlockRelease> {
        self.outstanding_block
    }

    /// Clear the block flag if one is raised. Takes effect at the next advance.
    pub fn release_block(&mut self) -> Result<bool, FederationError> {
        if self.outstanding_block.is_none() {
            return Ok(false);
        }
        self.session
            .publish(BLOCK_CHANNEL, ChannelValue::Boolean(false))?;
        self.outstanding_block = None;
        info!("command block released");
        Ok(true)
    }

    /// Clear the block flag once its wall-clock deadline has passed.
    pub fn release_expired_blocks(&mut self, now: DateTime<Utc>) -> Result<bool, FederationError> {
        match self.outstanding_block {
            Some(release) if release.deadline <= now => self.release_block(),
            _ => Ok(false),
        }
    }

    pub fn reset_rate_limits(&mut self) {
        self.validator.reset();
    }

    pub fn validator(&self) -> &ThreatModelValidator {
        &self.validator
    }

    /// The most recent results, oldest first, up to the history limit.
    pub fn history(&self) -> &[AttackResult] {
        &self.history
    }

    pub fn session(&self) -> &FederationClient {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut FederationClient {
        &mut self.session
    }

    pub fn cache(&self) -> &Arc<GridStateCache> {
        &self.cache
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.session.now()
    }

    /// Start a fresh session on the same channel set after the previous one closed.
    /// Simulated time restarts at zero, so the cached grid state is dropped.
    pub fn rejoin(&mut self) -> Result<Uuid, FederationError> {
        let channels: Vec<_> = self.session.channels().cloned().collect();
        let session_id = self.session.join(channels)?;
        self.outstanding_block = None;
        self.cache.reset();
        self.cache
            .ingest(self.session.fresh_samples(), self.session.granted_time());
        info!(session = %session_id, "federation session rejoined");
        Ok(session_id)
    }

    /// Leave the federation; idempotent.
    pub fn finalize(&mut self) -> Result<(), FederationError> {
        self.outstanding_block = None;
        self.session.finalize()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {text}")
    } else if let Some(text) = panic.downcast_ref::<String>() {
        format!("handler panicked: {text}")
    } else {
        "handler panicked".to_owned()
    }
}
