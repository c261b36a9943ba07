//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Technique handlers translating validated intents into bus traffic."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gridstrike_federation::{
    ChannelSpec, ChannelValue, FederationClient, FederationError, Phase, Phasor, SimTime,
};
use gridstrike_monitor::{GridSnapshot, GridStateCache};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::intent::{Technique, ValidatedIntent};
use crate::recon::ReconReport;
use crate::validator::SpoofTarget;

/// Publication carrying the command-block flag.
pub const BLOCK_CHANNEL: &str = "block_commands";

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Federation(#[from] FederationError),
    #[error("parameter '{parameter}': {detail}")]
    Parameter { parameter: String, detail: String },
    #[error("handler fault: {0}")]
    Fault(String),
}

impl HandlerError {
    pub(crate) fn missing(parameter: &str) -> Self {
        HandlerError::Parameter {
            parameter: parameter.to_owned(),
            detail: "missing after validation".into(),
        }
    }
}

/// Wall-clock point at which a block-command flag should be cleared by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockRelease {
    pub deadline: DateTime<Utc>,
    pub duration_secs: f64,
}

/// What a handler reports back to the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HandlerOutcome {
    pub payload: Value,
    /// Informational techniques score zero impact.
    pub informational: bool,
    pub block_release: Option<BlockRelease>,
}

impl HandlerOutcome {
    pub fn with_payload(payload: Value) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }
}

/// Access a handler gets to the session and the state cache while it runs.
pub struct HandlerContext<'a> {
    session: &'a mut FederationClient,
    cache: &'a GridStateCache,
}

impl<'a> HandlerContext<'a> {
    pub fn new(session: &'a mut FederationClient, cache: &'a GridStateCache) -> Self {
        Self { session, cache }
    }

    pub fn publish(&mut self, channel: &str, value: ChannelValue) -> Result<(), HandlerError> {
        self.session.publish(channel, value)?;
        Ok(())
    }

    /// Advance one time delta and feed the fresh samples into the cache.
    pub fn advance_step(&mut self) -> Result<Arc<GridSnapshot>, HandlerError> {
        let granted = self.session.step()?;
        Ok(self.cache.ingest(self.session.fresh_samples(), granted))
    }

    pub fn snapshot(&self) -> Arc<GridSnapshot> {
        self.cache.snapshot()
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.session.channels()
    }

    pub fn granted_time(&self) -> SimTime {
        self.session.granted_time()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.session.now()
    }
}

/// One attack primitive. Handlers receive parameters that already passed the threat model.
pub trait TechniqueHandler: Send {
    fn execute(
        &self,
        intent: &ValidatedIntent,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError>;
}

impl<F> TechniqueHandler for F
where
    F: Fn(&ValidatedIntent, &mut HandlerContext<'_>) -> Result<HandlerOutcome, HandlerError>
        + Send,
{
    fn execute(
        &self,
        intent: &ValidatedIntent,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        self(intent, ctx)
    }
}

/// Built-in handler for a technique. The match is exhaustive so a new variant
/// cannot be added without a handler.
pub fn builtin(technique: Technique) -> Box<dyn TechniqueHandler> {
    match technique {
        Technique::SpoofData => Box::new(SpoofDataHandler),
        Technique::InjectLoad => Box::new(InjectLoadHandler),
        Technique::Reconnaissance => Box::new(ReconnaissanceHandler),
        Technique::BlockCommand => Box::new(BlockCommandHandler),
    }
}

fn number(intent: &ValidatedIntent, key: &str) -> Result<f64, HandlerError> {
    intent.number(key).ok_or_else(|| HandlerError::missing(key))
}

/// One-shot publish of a spoofed phasor, followed by one time advance.
#[derive(Debug, Default)]
pub struct SpoofDataHandler;

impl TechniqueHandler for SpoofDataHandler {
    fn execute(
        &self,
        intent: &ValidatedIntent,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let name = intent.text("target").ok_or_else(|| HandlerError::missing("target"))?;
        let target = SpoofTarget::parse(name).ok_or_else(|| HandlerError::Parameter {
            parameter: "target".into(),
            detail: format!("'{name}' is not spoofable"),
        })?;
        let value = number(intent, "value")?;
        let duration = intent.number("duration").unwrap_or(0.0);
        let phasor = match target {
            SpoofTarget::Voltage(_) => Phasor::from_polar(value, number(intent, "angle")?),
            SpoofTarget::Power(_) => Phasor::from_power_factor(value, number(intent, "power_factor")?),
        };
        let channel = target.attack_channel();
        ctx.publish(&channel, ChannelValue::Complex(phasor))?;
        let published_at = ctx.granted_time();
        let post = ctx.advance_step()?;
        debug!(channel = %channel, magnitude = value, granted = post.simulation_time.as_secs(), "spoofed value published");

        Ok(HandlerOutcome::with_payload(json!({
            "channel": channel,
            "measurement": target.measurement(),
            "magnitude": phasor.magnitude(),
            "angle_deg": phasor.angle_deg(),
            "published_at": published_at,
            "active_until": published_at.plus(duration),
        })))
    }
}

/// Adds apparent power to one phase's load through the power attack channel.
#[derive(Debug, Default)]
pub struct InjectLoadHandler;

impl TechniqueHandler for InjectLoadHandler {
    fn execute(
        &self,
        intent: &ValidatedIntent,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let phase_name = intent.text("phase").ok_or_else(|| HandlerError::missing("phase"))?;
        let phase = Phase::from_str(phase_name).map_err(|_| HandlerError::Parameter {
            parameter: "phase".into(),
            detail: format!("unknown phase '{phase_name}'"),
        })?;
        let magnitude = number(intent, "magnitude")?;
        let power_factor = number(intent, "power_factor")?;
        let phasor = Phasor::from_power_factor(magnitude, power_factor);
        let channel = SpoofTarget::Power(phase).attack_channel();
        ctx.publish(&channel, ChannelValue::Complex(phasor))?;
        ctx.advance_step()?;

        Ok(HandlerOutcome::with_payload(json!({
            "channel": channel,
            "phase": phase.to_string(),
            "real_power_w": phasor.re,
            "reactive_power_var": phasor.im,
            "apparent_power_va": magnitude,
        })))
    }
}

/// Reads the snapshot and topology metadata; never publishes or advances.
#[derive(Debug, Default)]
pub struct ReconnaissanceHandler;

impl TechniqueHandler for ReconnaissanceHandler {
    fn execute(
        &self,
        _intent: &ValidatedIntent,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let snapshot = ctx.snapshot();
        let report = ReconReport::analyze(&snapshot, ctx.channels());
        let payload = serde_json::to_value(&report)
            .map_err(|err| HandlerError::Fault(format!("unable to encode report: {err}")))?;
        Ok(HandlerOutcome {
            payload,
            informational: true,
            block_release: None,
        })
    }
}

/// Raises or clears the command-block flag. Raising records a release deadline; the
/// handler never clears the flag on its own.
#[derive(Debug, Default)]
pub struct BlockCommandHandler;

impl TechniqueHandler for BlockCommandHandler {
    fn execute(
        &self,
        intent: &ValidatedIntent,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let enable = intent.flag("enable").unwrap_or(true);
        let duration = number(intent, "duration")?;
        ctx.publish(BLOCK_CHANNEL, ChannelValue::Boolean(enable))?;
        ctx.advance_step()?;

        let block_release = enable.then(|| BlockRelease {
            deadline: ctx.now() + chrono::Duration::milliseconds((duration * 1000.0).round() as i64),
            duration_secs: duration,
        });
        Ok(HandlerOutcome {
            payload: json!({
                "channel": BLOCK_CHANNEL,
                "blocked": enable,
                "release_deadline": block_release.map(|release| release.deadline),
            }),
            informational: false,
            block_release,
        })
    }
}
