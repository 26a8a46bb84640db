use std::time::Duration;

use thiserror::Error;

/// Caller-visible shutdown failures.
///
/// Failures of individual services never show up here: they are logged and
/// swallowed by the closure pass. The only ways a caller sees an error are a
/// missed deadline, a registration that arrived too late, bad configuration,
/// or a defect in the pass itself.
///
/// The type is `Clone` so that a single pass outcome can be handed to every
/// caller awaiting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    /// The caller's deadline elapsed before the closure pass settled.
    ///
    /// The pass is not aborted; it keeps running in the background.
    #[error("Shutdown timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    /// The closure pass itself failed (not a service, the aggregation).
    #[error("Closure pass failed: {0}")]
    PassFailed(String),

    /// A service was registered after closure had begun.
    #[error("Shutdown already in progress; service not registered")]
    AlreadyClosing,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ShutdownError {
    /// Check whether this error is a missed deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ShutdownError::Timeout { .. })
    }
}

/// Convenience type alias for Results with ShutdownError.
pub type ShutdownResult<T> = Result<T, ShutdownError>;
