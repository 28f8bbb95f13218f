//! Unified error type for the tubecode pipeline.
//!
//! All crates funnel their failures into [`Error`]. The variants separate the
//! failure classes the worker pool must tell apart: a bad input rejected by
//! the encoder ([`Error::Encode`]), an encode killed by shutdown
//! ([`Error::Cancelled`]), a store failure ([`Error::Database`]) and
//! submission backpressure ([`Error::QueueFull`]).

use std::fmt;
use std::time::Duration;

/// Unified error type covering all failure modes in tubecode.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "quality preset", "job").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Input or configuration failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A database operation failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool could not be located, spawned or waited on.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The encoder ran but exited unsuccessfully.
    ///
    /// `output` carries the captured stdout followed by the captured stderr,
    /// each verbatim. The two streams are not interleaved.
    #[error("encoder exited with {status}")]
    Encode {
        /// Exit status as reported by the OS.
        status: String,
        /// Combined process output.
        output: String,
    },

    /// The operation was cancelled before it finished.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// An external tool exceeded its deadline and was killed.
    #[error("Tool error [{tool}]: timed out after {after:?}")]
    TimedOut {
        /// Name of the tool that was killed.
        tool: String,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The transcode queue has no free slot.
    #[error("transcode queue is full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
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

    /// Whether this error represents a cancellation rather than a failure of
    /// the work itself.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// The text recorded on a failed job for this error.
    ///
    /// Encoder failures record the captured process output verbatim; every
    /// other error records its display form.
    pub fn diagnostic(&self) -> String {
        match self {
            Error::Encode { output, .. } if !output.trim().is_empty() => output.clone(),
            other => other.to_string(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
