//! Error types for compliance runs.
//!
//! Errors fall into two groups. Pre-flight errors (bad document, bad scope,
//! management plane down) abort the whole call. Everything scoped to a single
//! host is captured into that host's part of the report instead of being
//! returned to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while checking or remediating a scope.
#[derive(Debug, Error)]
pub enum Error {
    /// The desired-state document failed validation against the registry
    #[error("invalid desired-state document: {}", .problems.join("; "))]
    InvalidDesiredStateDocument {
        /// Every problem found, in document order
        problems: Vec<String>,
    },

    /// The scope is empty, malformed, or names an unknown cluster path
    #[error("invalid scope: {message}")]
    InvalidScope { message: String },

    /// The management plane cannot be reached at all
    #[error("management plane unreachable: {message}")]
    ManagementPlaneUnreachable { message: String },

    /// A single host cannot be queried
    #[error("host {host} unreachable: {message}")]
    UnreachableHost { host: String, message: String },

    /// The host's platform does not expose this category
    #[error("category '{category}' is not supported by host {host}")]
    UnsupportedCategory { host: String, category: String },

    /// A deviation whose category has no remediation operation
    #[error("no remediation registered for category '{category}' (field '{field}' on {host})")]
    UnplannableDeviation {
        host: String,
        category: String,
        field: String,
    },

    /// A precondition does not hold and could not be satisfied
    #[error("precondition '{precondition}' unmet on {host}")]
    PreconditionUnmet { host: String, precondition: String },

    /// A mutating call was rejected by the management plane
    #[error("operation '{operation}' failed on {host}: {message}")]
    OperationFailed {
        host: String,
        operation: String,
        message: String,
    },

    /// A management-plane call exceeded its timeout
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// A fault the management plane reports as temporary
    #[error("transient management-plane error: {message}")]
    Transient { message: String },

    /// The session provider lacks a capability (e.g. resolving a precondition)
    #[error("not supported: {message}")]
    Unsupported { message: String },

    /// The category registry is inconsistent (unknown dependency, cycle)
    #[error("invalid category registry: {message}")]
    InvalidRegistry { message: String },

    /// Worker pool could not be created
    #[error("failed to create worker pool: {message}")]
    WorkerPool { message: String },

    /// Reading a document from disk failed
    #[error("could not read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A document could not be parsed in its declared format
    #[error("could not parse {format} document: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
}

impl Error {
    /// Whether the failed call is worth retrying.
    ///
    /// Only read-only calls are ever retried; mutating calls are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transient { .. })
    }

    /// Whether this error aborts the whole call rather than a single host.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidDesiredStateDocument { .. }
                | Self::InvalidScope { .. }
                | Self::ManagementPlaneUnreachable { .. }
                | Self::InvalidRegistry { .. }
                | Self::WorkerPool { .. }
        )
    }
}

/// Result type for compliance operations
pub type Result<T> = std::result::Result<T, Error>;
