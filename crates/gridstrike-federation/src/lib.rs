//! ---
//! gs_section: "02-messaging-ipc-data-model"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Federation session, channel schema, and bus adapters."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
//! Time-stepped federation client for the attack harness.
//!
//! A [`FederationClient`] owns one session against a [`FederationBus`]: it registers the
//! typed channels, is the single writer of the logical clock, and exposes the latest value
//! received per subscription. [`LoopbackBus`] is an in-process peer used for tests, demos
//! and comparison trials.

pub mod bus;
pub mod channel;
pub mod loopback;
pub mod session;

use std::time::Duration;

use thiserror::Error;

pub use bus::{BusReading, FederationBus};
pub use channel::{
    default_channels, ChannelSpec, ChannelValue, Phase, Phasor, SimTime, TelemetrySample,
};
pub use gridstrike_common::{ChannelDirection, ValueKind};
pub use loopback::{BusStats, LoopbackBus};
pub use session::{FederationClient, SessionState};

/// Errors raised by the federation layer.
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("time advance to {requested} was not granted within {waited:?}")]
    Timeout { requested: SimTime, waited: Duration },
    #[error("operation '{op}' is not valid while the session is {state}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
    #[error("channel '{channel}' is a {direction:?} endpoint and cannot be used to {op}")]
    WrongDirection {
        channel: String,
        direction: ChannelDirection,
        op: &'static str,
    },
    #[error("channel '{channel}' carries {expected:?} values, got {actual:?}")]
    TypeMismatch {
        channel: String,
        expected: ValueKind,
        actual: ValueKind,
    },
    #[error("channel '{0}' declared more than once")]
    DuplicateChannel(String),
    #[error("federation bus error: {0}")]
    Bus(String),
}

impl FederationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FederationError::Timeout { .. })
    }

    /// Errors meaning the session itself is unusable, as opposed to a caller misusing
    /// a channel.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FederationError::Timeout { .. }
                | FederationError::InvalidState { .. }
                | FederationError::Bus(_)
        )
    }
}

/// Convenience alias for federation results.
pub type Result<T> = std::result::Result<T, FederationError>;
