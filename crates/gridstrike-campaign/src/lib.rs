//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Campaign crate root."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
//! Closed-loop campaigns over an attack engine.
//!
//! A [`CampaignController`] repeatedly asks a [`DecisionFunction`] for the next intent,
//! hands it to the engine, and lets the grid settle until a termination condition seals
//! the [`Campaign`]. [`AttackService`] wraps this for outer surfaces.

pub mod controller;
pub mod decision;
pub mod report;
pub mod service;
pub mod strategies;

pub use controller::{
    Campaign, CampaignController, CampaignError, CancelToken, ControllerState, TerminationReason,
};
pub use decision::{Decision, DecisionError, DecisionFunction};
pub use report::{CampaignSummary, ComparisonReport, StrategyStats, EFFECTIVE_IMPACT};
pub use service::{AttackService, CampaignHandle, ServiceError};
pub use strategies::{HeuristicStrategy, RandomStrategy, ScriptedStrategy};
