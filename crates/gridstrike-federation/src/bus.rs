//! ---
//! gs_section: "02-messaging-ipc-data-model"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Federation session, channel schema, and bus adapters."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::time::Duration;

use crate::channel::{ChannelSpec, ChannelValue, SimTime};
use crate::Result;

/// Last value held by a subscription together with its freshness flag.
#[derive(Debug, Clone, PartialEq)]
pub struct BusReading {
    pub value: ChannelValue,
    /// True when the peer published a new value since the previous read.
    pub updated: bool,
}

/// Time-stepped publish/subscribe service the federation client drives.
///
/// Implementations address channels by their bus key. A session is opened with
/// [`connect`](FederationBus::connect); reconnecting after
/// [`finalize`](FederationBus::finalize) starts a fresh federation instance.
pub trait FederationBus: Send {
    /// Human-readable backend name for logging.
    fn name(&self) -> &'static str;
    /// Open a new session for the named federate.
    fn connect(&mut self, federate: &str) -> Result<()>;
    /// Register a publication or subscription.
    fn register(&mut self, spec: &ChannelSpec) -> Result<()>;
    /// Leave initialisation and start exchanging values.
    fn enter_executing(&mut self) -> Result<()>;
    /// Queue a value on a registered publication. Peers see it after the next grant.
    fn publish(&mut self, key: &str, value: &ChannelValue) -> Result<()>;
    /// Block for at most `max_wait` until the federation grants a time `>= requested`.
    /// `Ok(None)` means the grant did not arrive in time.
    fn request_time(&mut self, requested: SimTime, max_wait: Duration)
        -> Result<Option<SimTime>>;
    /// Last received value of a subscription, if any value was ever received.
    fn read(&mut self, key: &str) -> Option<BusReading>;
    /// Flush and leave the federation. Safe to call more than once.
    fn finalize(&mut self) -> Result<()>;
}
