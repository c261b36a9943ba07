//! ---
//! gs_section: "01-core-functionality"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Grid state cache: snapshots, history and anomaly detection."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
//! Grid state cache fed by the federation client.
//!
//! The cache turns batches of telemetry samples into immutable [`GridSnapshot`]s, keeps a
//! bounded history ring, flags anomalous measurements and derives health and stability
//! figures used by impact scoring and decision functions.

pub mod cache;
pub mod snapshot;
pub mod stability;

pub use cache::{GridStateCache, HistoryWindow};
pub use snapshot::{
    GridSnapshot, HealthStatus, HealthSummary, Measurement, MeasurementKind, OVERVOLTAGE_PU,
    UNDERVOLTAGE_PU,
};
pub use stability::StabilityMetrics;
