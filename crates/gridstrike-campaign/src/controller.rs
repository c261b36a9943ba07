//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Campaign state machine: plan, execute, assess, seal."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use gridstrike_attack::{AttackEngine, AttackError, AttackResult};
use gridstrike_common::CampaignConfig;
use gridstrike_federation::{FederationError, SimTime};
use gridstrike_metrics::CampaignMetrics;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::decision::{Decision, DecisionError, DecisionFunction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Planning,
    Executing,
    Assessing,
    Sealed,
}

/// Why a campaign was sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminationReason {
    ControllerStop,
    DurationElapsed,
    WallClockCap,
    AttackLimit,
    Cancelled,
    FederationTimeout { message: String },
    FederationFailure { message: String },
    DecisionFunctionError { message: String },
}

impl TerminationReason {
    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            TerminationReason::ControllerStop => "controller_stop",
            TerminationReason::DurationElapsed => "duration_elapsed",
            TerminationReason::WallClockCap => "wall_clock_cap",
            TerminationReason::AttackLimit => "attack_limit",
            TerminationReason::Cancelled => "cancelled",
            TerminationReason::FederationTimeout { .. } => "federation_timeout",
            TerminationReason::FederationFailure { .. } => "federation_failure",
            TerminationReason::DecisionFunctionError { .. } => "decision_function_error",
        }
    }

    fn from_federation(err: &FederationError) -> Self {
        let message = err.to_string();
        if err.is_timeout() {
            TerminationReason::FederationTimeout { message }
        } else {
            TerminationReason::FederationFailure { message }
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::ControllerStop => f.write_str("controller stop"),
            TerminationReason::DurationElapsed => f.write_str("duration elapsed"),
            TerminationReason::WallClockCap => f.write_str("wall-clock cap reached"),
            TerminationReason::AttackLimit => f.write_str("attack limit reached"),
            TerminationReason::Cancelled => f.write_str("cancelled"),
            TerminationReason::FederationTimeout { .. } => f.write_str("federation timeout"),
            TerminationReason::FederationFailure { message } => {
                write!(f, "federation failure: {message}")
            }
            TerminationReason::DecisionFunctionError { message } => {
                write!(f, "decision function error: {message}")
            }
        }
    }
}

/// One run of the closed loop. Results are append-only and the record is frozen once
/// `termination` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub strategy: String,
    pub start_time: DateTime<Utc>,
    pub start_sim_time: SimTime,
    /// Requested length in simulation seconds.
    pub duration: f64,
    pub results: Vec<AttackResult>,
    pub termination: Option<TerminationReason>,
    pub end_time: Option<DateTime<Utc>>,
    pub end_sim_time: Option<SimTime>,
}

impl Campaign {
    fn open(strategy: &str, duration: f64, start_time: DateTime<Utc>, start_sim_time: SimTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy: strategy.to_owned(),
            start_time,
            start_sim_time,
            duration,
            results: Vec::new(),
            termination: None,
            end_time: None,
            end_sim_time: None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.termination.is_some()
    }

    /// Simulation seconds covered so far, or in total once sealed.
    pub fn sim_elapsed(&self) -> f64 {
        self.end_sim_time
            .map_or(0.0, |end| end.since(self.start_sim_time))
    }
}

/// Cooperative cancellation shared between a running campaign and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum CampaignError {
    /// The federation became unusable. The campaign was sealed with every result up to
    /// and including the failed attempt, and the session was finalized.
    #[error("campaign {} aborted: {source}", .campaign.id)]
    Federation {
        source: FederationError,
        campaign: Box<Campaign>,
    },
    #[error("campaign duration must be positive, got {0}")]
    InvalidDuration(f64),
}

impl CampaignError {
    /// The sealed campaign, when one exists.
    pub fn campaign(&self) -> Option<&Campaign> {
        match self {
            CampaignError::Federation { campaign, .. } => Some(campaign),
            CampaignError::InvalidDuration(_) => None,
        }
    }
}

/// Drives the decide → execute → assess loop over an [`AttackEngine`].
#[derive(Debug)]
pub struct CampaignController {
    config: CampaignConfig,
    state: ControllerState,
    cancel: CancelToken,
    metrics: Option<CampaignMetrics>,
}

enum Step {
    Continue,
    Seal(TerminationReason),
    Abort(FederationError),
}

impl CampaignController {
    pub fn new(config: CampaignConfig) -> Self {
        Self {
            config,
            state: ControllerState::Idle,
            cancel: CancelToken::new(),
            metrics: None,
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_metrics(mut self, metrics: CampaignMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    /// Run one campaign to completion.
    ///
    /// Every attempted intent lands in the returned campaign. Rejected and failed attacks
    /// do not stop the loop; only the configured limits, a stop decision, a decision
    /// function fault, cancellation or a dead federation do.
    pub fn run(
        &mut self,
        engine: &mut AttackEngine,
        decide: &mut dyn DecisionFunction,
    ) -> Result<Campaign, CampaignError> {
        let duration = self.config.duration;
        if !(duration.is_finite() && duration > 0.0) {
            return Err(CampaignError::InvalidDuration(duration));
        }

        engine.reset_rate_limits();
        let started = Instant::now();
        let mut campaign = Campaign::open(decide.name(), duration, engine.now(), engine.session().granted_time());
        info!(
            campaign = %campaign.id,
            strategy = %campaign.strategy,
            duration,
            start_sim = campaign.start_sim_time.as_secs(),
            "campaign started"
        );

        let outcome = loop {
            match self.iteration(engine, decide, &mut campaign, started) {
                Step::Continue => continue,
                Step::Seal(reason) => break Ok(reason),
                Step::Abort(err) => break Err(err),
            }
        };

        match outcome {
            Ok(reason) => {
                if reason == TerminationReason::Cancelled {
                    self.close_session(engine);
                } else if let Err(err) = engine.release_block() {
                    warn!(error = %err, "failed to release command block at campaign end");
                }
                self.seal(&mut campaign, engine, reason);
                Ok(campaign)
            }
            Err(err) => {
                self.seal(&mut campaign, engine, TerminationReason::from_federation(&err));
                self.close_session(engine);
                Err(CampaignError::Federation {
                    source: err,
                    campaign: Box::new(campaign),
                })
            }
        }
    }

    fn iteration(
        &mut self,
        engine: &mut AttackEngine,
        decide: &mut dyn DecisionFunction,
        campaign: &mut Campaign,
        started: Instant,
    ) -> Step {
        if self.cancel.is_cancelled() {
            return Step::Seal(TerminationReason::Cancelled);
        }

        self.state = ControllerState::Planning;
        let snapshot = engine.cache().snapshot();
        let decision = catch_unwind(AssertUnwindSafe(|| decide.decide(&snapshot, &campaign.results)))
            .unwrap_or_else(|panic| Err(DecisionError::Panicked(panic_text(panic.as_ref()))));
        let intent = match decision {
            Ok(Decision::Attack(intent)) => intent,
            Ok(Decision::Stop) => return Step::Seal(TerminationReason::ControllerStop),
            Err(err) => {
                error!(campaign = %campaign.id, error = %err, "decision function failed");
                return Step::Seal(TerminationReason::DecisionFunctionError {
                    message: err.to_string(),
                });
            }
        };

        self.state = ControllerState::Executing;
        match engine.execute(intent) {
            Ok(result) => campaign.results.push(result),
            Err(err) => {
                campaign.results.push(err.result().clone());
                return match err {
                    AttackError::Federation { source, .. } => Step::Abort(source),
                };
            }
        }

        self.state = ControllerState::Assessing;
        if let Err(err) = engine.release_expired_blocks(engine.now()) {
            return Step::Abort(err);
        }
        if let Some(reason) = self.limit_reached(engine, campaign, started) {
            return Step::Seal(reason);
        }

        let before = engine.session().granted_time();
        if let Err(err) = engine.settle(self.config.pacing) {
            return Step::Abort(err);
        }
        if engine.session().granted_time() <= before {
            let nudge = self.config.pacing.max(engine.session().time_delta());
            if let Err(err) = engine.settle(nudge) {
                return Step::Abort(err);
            }
        }
        match self.limit_reached(engine, campaign, started) {
            Some(reason) => Step::Seal(reason),
            None => Step::Continue,
        }
    }

    fn limit_reached(
        &self,
        engine: &AttackEngine,
        campaign: &Campaign,
        started: Instant,
    ) -> Option<TerminationReason> {
        let elapsed = engine.session().granted_time().since(campaign.start_sim_time);
        if elapsed >= campaign.duration {
            return Some(TerminationReason::DurationElapsed);
        }
        if self
            .config
            .max_attacks
            .is_some_and(|limit| campaign.results.len() >= limit)
        {
            return Some(TerminationReason::AttackLimit);
        }
        if self.config.max_wall.is_some_and(|cap| started.elapsed() >= cap) {
            return Some(TerminationReason::WallClockCap);
        }
        if self.cancel.is_cancelled() {
            return Some(TerminationReason::Cancelled);
        }
        None
    }

    fn seal(&mut self, campaign: &mut Campaign, engine: &AttackEngine, reason: TerminationReason) {
        campaign.end_time = Some(engine.now());
        campaign.end_sim_time = Some(engine.session().granted_time());
        if let Some(metrics) = &self.metrics {
            metrics.record_sealed(reason.label(), campaign.results.len());
        }
        info!(
            campaign = %campaign.id,
            termination = %reason,
            attacks = campaign.results.len(),
            sim_elapsed = campaign.sim_elapsed(),
            "campaign sealed"
        );
        campaign.termination = Some(reason);
        self.state = ControllerState::Sealed;
    }

    fn close_session(&self, engine: &mut AttackEngine) {
        if let Err(err) = engine.finalize() {
            warn!(error = %err, "failed to finalize federation session");
        }
    }
}

fn panic_text(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|text| (*text).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic without message".to_owned())
}
