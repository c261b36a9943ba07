//! ---
//! gs_section: "02-messaging-ipc-data-model"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Federation session, channel schema, and bus adapters."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::time::Duration;

use gridstrike_common::{system_clock, ChannelDirection, FederationConfig, SharedClock};
use gridstrike_metrics::FederationMetrics;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::FederationBus;
use crate::channel::{default_channels, ChannelSpec, ChannelValue, SimTime, TelemetrySample};
use crate::{FederationError, Result};

/// Lifecycle of a federation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Created,
    Joined,
    Executing,
    Finalizing,
    Closed,
}

/// Client side of one federation session.
///
/// The client is the single writer of the session's logical clock and the exclusive
/// owner of its channel set.
pub struct FederationClient {
    federate: String,
    bus: Box<dyn FederationBus>,
    state: SessionState,
    session_id: Option<Uuid>,
    channels: IndexMap<String, ChannelSpec>,
    granted: SimTime,
    time_delta: f64,
    max_wait: Duration,
    latest: HashMap<String, TelemetrySample>,
    fresh: Vec<TelemetrySample>,
    clock: SharedClock,
    metrics: Option<FederationMetrics>,
}

impl std::fmt::Debug for FederationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationClient")
            .field("federate", &self.federate)
            .field("bus", &self.bus.name())
            .field("state", &self.state)
            .field("session_id", &self.session_id)
            .field("granted", &self.granted)
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl FederationClient {
    pub fn new(config: &FederationConfig, bus: Box<dyn FederationBus>) -> Self {
        Self {
            federate: config.federate_name.clone(),
            bus,
            state: SessionState::Created,
            session_id: None,
            channels: IndexMap::new(),
            granted: SimTime::ZERO,
            time_delta: config.time_delta,
            max_wait: config.max_advance_wait,
            latest: HashMap::new(),
            fresh: Vec::new(),
            clock: system_clock(),
            metrics: None,
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: FederationMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Channels declared in configuration, or the standard set when none are listed.
    pub fn configured_channels(config: &FederationConfig) -> Vec<ChannelSpec> {
        if config.channels.is_empty() {
            default_channels()
        } else {
            config.channels.iter().map(ChannelSpec::from).collect()
        }
    }

    /// Join the federation with the given channel set and enter executing mode.
    ///
    /// Valid from `Created`, or from `Closed` to rejoin; a rejoin starts a new session
    /// with its own clock. Values already available at time zero are collected.
    pub fn join(&mut self, channels: Vec<ChannelSpec>) -> Result<Uuid> {
        if !matches!(self.state, SessionState::Created | SessionState::Closed) {
            return Err(self.invalid("join"));
        }

        let mut declared = IndexMap::with_capacity(channels.len());
        for spec in channels {
            if declared.contains_key(&spec.name) {
                return Err(FederationError::DuplicateChannel(spec.name));
            }
            declared.insert(spec.name.clone(), spec);
        }

        self.bus.connect(&self.federate)?;
        for spec in declared.values() {
            self.bus.register(spec)?;
        }
        let session_id = Uuid::new_v4();
        self.session_id = Some(session_id);
        self.channels = declared;
        self.granted = SimTime::ZERO;
        self.latest.clear();
        self.fresh.clear();
        self.state = SessionState::Joined;

        self.bus.enter_executing()?;
        self.state = SessionState::Executing;
        self.collect(self.granted);

        info!(
            session = %session_id,
            federate = %self.federate,
            bus = self.bus.name(),
            channels = self.channels.len(),
            "federation session executing"
        );
        Ok(session_id)
    }

    /// Request simulated time to move to at least `requested`.
    ///
    /// Requests behind the current grant are raised to it, so granted time never moves
    /// backwards. On success the subscriptions are refreshed and the newly received
    /// samples are available through [`fresh_samples`](Self::fresh_samples).
    pub fn advance(&mut self, requested: SimTime) -> Result<SimTime> {
        self.ensure_executing("advance")?;
        let requested = requested.max(self.granted);

        let granted = match self.bus.request_time(requested, self.max_wait)? {
            Some(granted) => granted,
            None => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_timeout();
                }
                warn!(
                    session = ?self.session_id,
                    requested = requested.as_secs(),
                    waited_ms = self.max_wait.as_millis() as u64,
                    "time advance not granted"
                );
                return Err(FederationError::Timeout {
                    requested,
                    waited: self.max_wait,
                });
            }
        };
        if granted < requested {
            return Err(FederationError::Bus(format!(
                "bus granted {granted} for a request of {requested}"
            )));
        }

        self.granted = granted;
        self.collect(granted);
        if let Some(metrics) = &self.metrics {
            metrics.record_grant(granted.as_secs());
        }
        debug!(
            session = ?self.session_id,
            granted = granted.as_secs(),
            fresh = self.fresh.len(),
            "time advance granted"
        );
        Ok(granted)
    }

    /// Advance by one configured time delta.
    pub fn step(&mut self) -> Result<SimTime> {
        self.advance(self.granted.plus(self.time_delta))
    }

    /// Publish a typed value. It becomes visible to peers at the next granted advance.
    pub fn publish(&mut self, channel: &str, value: ChannelValue) -> Result<()> {
        self.ensure_executing("publish")?;
        let spec = self
            .channels
            .get(channel)
            .ok_or_else(|| FederationError::UnknownChannel(channel.to_owned()))?;
        if spec.direction != ChannelDirection::Publication {
            return Err(FederationError::WrongDirection {
                channel: channel.to_owned(),
                direction: spec.direction,
                op: "publish",
            });
        }
        if spec.kind != value.kind() {
            return Err(FederationError::TypeMismatch {
                channel: channel.to_owned(),
                expected: spec.kind,
                actual: value.kind(),
            });
        }
        debug!(session = ?self.session_id, channel, key = %spec.key, "publishing value");
        self.bus.publish(&spec.key, &value)
    }

    /// Most recent sample received on a subscription as of the last grant.
    /// Never blocks; absence is an expected outcome.
    pub fn latest(&self, channel: &str) -> Option<&TelemetrySample> {
        self.latest.get(channel)
    }

    /// Samples received at the last grant (or at join).
    pub fn fresh_samples(&self) -> &[TelemetrySample] {
        &self.fresh
    }

    /// Leave the federation. Idempotent; the session can be rejoined afterwards.
    pub fn finalize(&mut self) -> Result<()> {
        match self.state {
            SessionState::Created | SessionState::Closed => return Ok(()),
            _ => {}
        }
        self.state = SessionState::Finalizing;
        let outcome = self.bus.finalize();
        self.state = SessionState::Closed;
        info!(session = ?self.session_id, granted = self.granted.as_secs(), "federation session closed");
        outcome
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn granted_time(&self) -> SimTime {
        self.granted
    }

    pub fn time_delta(&self) -> f64 {
        self.time_delta
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.channels.values()
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelSpec> {
        self.channels.get(name)
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    fn collect(&mut self, granted: SimTime) {
        self.fresh.clear();
        let received_at = self.clock.now();
        for spec in self.channels.values().filter(|spec| spec.is_subscription()) {
            let Some(reading) = self.bus.read(&spec.key) else {
                continue;
            };
            if !reading.updated {
                continue;
            }
            let sample = TelemetrySample {
                channel: spec.name.clone(),
                value: reading.value,
                simulation_time: granted,
                received_wall_time: received_at,
            };
            self.latest.insert(spec.name.clone(), sample.clone());
            self.fresh.push(sample);
        }
    }

    fn ensure_executing(&self, op: &'static str) -> Result<()> {
        if self.state == SessionState::Executing {
            Ok(())
        } else {
            Err(self.invalid(op))
        }
    }

    fn invalid(&self, op: &'static str) -> FederationError {
        FederationError::InvalidState {
            op,
            state: self.state,
        }
    }
}

impl Drop for FederationClient {
    fn drop(&mut self) {
        if let Err(err) = self.finalize() {
            warn!(error = %err, "failed to finalize federation session on drop");
        }
    }
}
