//! Unified error type for AnyStream.
//!
//! Every crate funnels its failures into [`Error`]. The variants follow the
//! service taxonomy (not found, unauthorized, conflict, external tool, store,
//! validation) and [`Error::http_status`] gives the boundary mapping.

use std::fmt;

/// Unified error type covering all failure modes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A reference, session, segment or catalog record is absent.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "media_ref", "playback_state").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A token or credential is missing or was rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The catalog already holds conflicting records.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A client payload could not be accepted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The relational store failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying driver or pool error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe) failed to run or exited badly.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Probe output could not be interpreted.
    #[error("Probe error: {0}")]
    Probe(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Unauthorized(_) => 401,
            Error::Conflict(_) => 409,
            Error::Validation(_) => 422,
            Error::Database { .. } => 500,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Probe(_) => 502,
            Error::Internal(_) => 500,
        }
    }

    /// Whether this error came from an external tool (probe or transcode).
    pub fn is_external_tool(&self) -> bool {
        matches!(self, Error::Tool { .. } | Error::Probe(_))
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
