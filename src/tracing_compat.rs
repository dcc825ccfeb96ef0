//! Logging shim over the `tracing` crate.
//!
//! With the `tracing-integration` feature (on by default) this re-exports the
//! `tracing` event macros. Without it the same macro names expand to nothing,
//! so call sites never need their own `cfg` guards.
//!
//! ```rust,ignore
//! use crate::tracing_compat::{debug, trace};
//!
//! trace!(token = %token, delay_us = delay.as_micros(), "delayed task scheduled");
//! debug!(descriptor = %fd, "handler cleared");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    /// No-op trace-level event.
    #[macro_export]
    macro_rules! __tasksched_trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level event.
    #[macro_export]
    macro_rules! __tasksched_debug {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level event.
    #[macro_export]
    macro_rules! __tasksched_warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level event.
    #[macro_export]
    macro_rules! __tasksched_error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{
        __tasksched_debug as debug, __tasksched_error as error, __tasksched_trace as trace,
        __tasksched_warn as warn,
    };
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;
