//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Shared primitives and utilities for the attack harness."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
//! Core shared primitives for the gridstrike workspace.
//! This crate exposes configuration loading, tracing setup, and the wall-clock
//! abstraction consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, BoundsPolicy, CampaignConfig, ChannelConfig, ChannelDirection, FederationConfig,
    HistoryConfig, ImpactConfig, LoggingConfig, LoopbackConfig, MetricsConfig, MonitorConfig,
    ThreatModelConfig, ValueKind,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
