//! Error types for session manager operations.
//!
//! Backing-store failures are deliberately absent: they are logged and turned
//! into lifecycle outcomes inside the manager and never reach callers.

/// Error type for session manager operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The manager has been shut down.
    #[error("Session manager is shut down")]
    Closed,

    /// The cache's internal bookkeeping is inconsistent. This is a bug.
    #[error("Session cache invariant violated: {0}")]
    InvariantViolation(String),

    /// Id generation produced an empty token.
    #[error("Generated an empty session identifier")]
    EmptyIdentifier,
}

/// Result type for session manager operations.
pub type Result<T> = std::result::Result<T, Error>;
