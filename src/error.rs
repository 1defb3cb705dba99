//! Custom error types for the toolkit.
//!
//! This module defines the primary error type, `ScanError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the different kinds of failures a measurement run can hit, from property
//! validation and channel I/O to storage problems.
//!
//! ## Error categories
//!
//! - **Property access**: `InvalidValue`, `OutOfRange`, `ReadOnly`, `WriteOnly`,
//!   `UnknownProperty` cover the validated get/set paths of instrument properties.
//! - **Descriptor installation**: `Descriptor` is raised when a property
//!   descriptor is added to an instrument and turns out to be malformed (zero or
//!   several validation modes, missing command templates).
//! - **Channel traffic**: `Transport` wraps channel-level I/O failures;
//!   `BadReply` marks reply text that does not decode under the descriptor;
//!   `DeviceFault` marks replies matching a driver's error patterns.
//! - **Run configuration**: `RunInfo` is the pre-flight invariant check failing
//!   before any hardware or file side effect happens.
//! - **Measurement**: a user measure function or function-scan closure failed;
//!   the opaque cause is carried as an `anyhow::Error`.
//! - **Persistence plumbing**: `Storage`, `Io`, `Json`, `Encode` and
//!   `FeatureNotEnabled` cover the container backends.
//!
//! An externally requested stop is deliberately *not* an error: a stopped run
//! returns `Ok` and records `Completion::Stopped` in its metadata.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Errors produced by instruments, scans, the traversal engine and storage.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid value '{value}' for property '{property}'")]
    InvalidValue { property: String, value: String },

    #[error("value {value} for property '{property}' is outside [{lo}, {hi}]")]
    OutOfRange {
        property: String,
        value: f64,
        lo: f64,
        hi: f64,
    },

    #[error("property '{0}' is read-only")]
    ReadOnly(String),

    #[error("property '{0}' is write-only")]
    WriteOnly(String),

    #[error("malformed descriptor for property '{property}': {reason}")]
    Descriptor { property: String, reason: String },

    #[error("unknown property '{0}'")]
    UnknownProperty(String),

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("run configuration error: {0}")]
    RunInfo(String),

    #[error("transport error during {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not decode reply '{reply}' for property '{property}'")]
    BadReply { property: String, reply: String },

    #[error("device '{device}' reported an error: {reply}")]
    DeviceFault { device: String, reply: String },

    #[error("measurement failed: {0}")]
    Measurement(#[from] anyhow::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("data encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("command formatting error: {0}")]
    Format(#[from] strfmt::FmtError),

    #[error("invalid device error pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl ScanError {
    /// Transport error with a short context string ("query", "write", ...).
    pub fn transport(context: impl Into<String>, source: std::io::Error) -> Self {
        ScanError::Transport {
            context: context.into(),
            source,
        }
    }

    /// True for failures raised before any side effect (safe to retry after
    /// fixing the run description).
    pub fn is_preflight(&self) -> bool {
        matches!(self, ScanError::RunInfo(_) | ScanError::Descriptor { .. })
    }
}
