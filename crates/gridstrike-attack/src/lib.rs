//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Attack engine crate root."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
//! Attack primitives, the threat-model gate in front of them, and the engine that
//! executes them against a federation session.
//!
//! Every intent passes the [`ThreatModelValidator`] before any bus traffic. The
//! [`AttackEngine`] then runs the technique handler, measures the change between the
//! pre- and post-attack snapshots, and appends exactly one [`AttackResult`] per attempt.

pub mod engine;
pub mod handlers;
pub mod impact;
pub mod intent;
pub mod normalize;
pub mod recon;
pub mod validator;

pub use engine::{
    AttackEngine, AttackError, AttackFailure, AttackResult, AttackSummaryRow, HistorySink,
    SnapshotRef, DEFAULT_HISTORY_LIMIT,
};
pub use handlers::{
    BlockRelease, HandlerContext, HandlerError, HandlerOutcome, TechniqueHandler, BLOCK_CHANNEL,
};
pub use impact::{ImpactBreakdown, ImpactScorer};
pub use intent::{
    AttackIntent, ParameterAdjustment, Parameters, Rejection, RejectionReason, Technique,
    ValidatedIntent,
};
pub use normalize::normalize_parameters;
pub use recon::ReconReport;
pub use validator::{SpoofTarget, ThreatModelValidator};
