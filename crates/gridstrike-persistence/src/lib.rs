//! ---
//! gs_section: "03-persistence-logging"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Persistence abstractions and storage bindings."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Append-only, line-delimited record logs and CSV export for campaign history.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing persistence files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for CSV export issues.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// The first line of a record log is not a valid header.
    #[error("record log {0} has no valid header")]
    MissingHeader(String),
    /// Header was written by an incompatible format revision.
    #[error("unsupported record log version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version read from the file.
        found: u16,
        /// Version this build writes.
        expected: u16,
    },
}

pub mod export;
pub mod record_log;

pub use export::export_csv;
pub use record_log::{replay, LoggedRecord, RecordLogReader, RecordLogWriter, RECORD_LOG_VERSION};
