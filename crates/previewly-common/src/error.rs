//! Unified error type for previewly.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`].

use std::fmt;

/// Unified error type covering every failure mode of a preview session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller supplied a malformed source locator or request.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The transcoder could not be spawned.
    #[error("Launch failure [{tool}]: {message}")]
    LaunchFailure {
        /// Name of the program that failed to start.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// No usable output appeared within the readiness bound.
    #[error("Readiness timeout: {reason}")]
    ReadinessTimeout {
        /// Why readiness was not reached.
        reason: String,
        /// Tail of the transcoder's stderr/stdout, if any was captured.
        diagnostics: Option<String>,
    },

    /// The configured number of concurrent sessions is in use.
    #[error("Capacity exceeded: {active} of {limit} sessions in use")]
    CapacityExceeded {
        /// Sessions alive when the request was rejected.
        active: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "session").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The origin was reachable but erroring, or not reachable at all.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The session exists but is not in a state that allows the operation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Configuration could not be parsed or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidInput(_) => 400,
            Error::LaunchFailure { .. } => 502,
            Error::ReadinessTimeout { .. } => 504,
            Error::CapacityExceeded { .. } => 503,
            Error::NotFound { .. } => 404,
            Error::SourceUnavailable(_) => 502,
            Error::Conflict(_) => 409,
            Error::Io { .. } => 500,
            Error::Config(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::InvalidInput`].
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::LaunchFailure`].
    pub fn launch(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::LaunchFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::ReadinessTimeout`].
    pub fn readiness(reason: impl Into<String>, diagnostics: Option<String>) -> Self {
        Error::ReadinessTimeout {
            reason: reason.into(),
            diagnostics,
        }
    }

    /// Convenience constructor for [`Error::SourceUnavailable`].
    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Error::SourceUnavailable(msg.into())
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
