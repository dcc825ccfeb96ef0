//! Error types.
//!
//! Most scheduler operations cannot fail: unknown tokens, descriptors and
//! triggers are no-ops reported through `bool` or `Option`, and trigger
//! exhaustion is [`EventTriggerId::NONE`](crate::scheduler::EventTriggerId::NONE).
//! What remains is poller failure and bad configuration.

use std::io;

/// Errors returned by the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The readiness poll failed with something other than `Interrupted`.
    #[error("readiness poll failed: {0}")]
    Poll(#[from] io::Error),
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from loading [`SchedulerConfig`](crate::config::SchedulerConfig).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable held a value of the wrong shape.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// Variable or key name.
        var: String,
        /// The rejected value.
        value: String,
        /// What was expected instead.
        expected: &'static str,
    },
    /// A config file could not be read.
    #[error("failed to read config file {path}: {message}")]
    ReadFile {
        /// File path.
        path: String,
        /// Underlying I/O error.
        message: String,
    },
    /// A config file was not valid TOML for this schema.
    #[error("failed to parse TOML config: {0}")]
    Parse(String),
    /// No poller was supplied and the platform has no default one.
    #[error("no poller configured and no OS poller on this platform")]
    MissingPoller,
}

/// Result alias for scheduler operations.
pub type Result<T> = std::result::Result<T, Error>;
