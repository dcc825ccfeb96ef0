//! tasksched: a single-threaded cooperative event scheduler.
//!
//! # Overview
//!
//! One [`TaskScheduler`] multiplexes three kinds of work on the calling
//! thread:
//!
//! - **Delayed tasks**: one-shot callbacks due after a relative delay, kept in
//!   a delta-encoded [`DelayQueue`](scheduler::DelayQueue).
//! - **Descriptor handlers**: callbacks run when a watched socket or file
//!   descriptor is readable, writable or exceptional.
//! - **Event triggers**: up to [`MAX_EVENT_TRIGGERS`](scheduler::MAX_EVENT_TRIGGERS)
//!   registered callbacks that any thread can fire through a
//!   [`TriggerHandle`].
//!
//! Callbacks never run concurrently with each other and they receive the
//! scheduler by `&mut`, so they can schedule and cancel further work freely.
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use tasksched::TaskScheduler;
//!
//! # fn main() -> tasksched::Result<()> {
//! let mut scheduler = TaskScheduler::builder().from_env().build()?;
//! scheduler.schedule_delayed_task(250_000, |s| {
//!     s.schedule_delayed_task(250_000, |_| println!("half a second"));
//! });
//! let stop = AtomicBool::new(false);
//! scheduler.do_event_loop(&stop)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Structure
//!
//! - [`time`]: intervals, absolute times and clock sources
//! - [`scheduler`]: the delay queue, handler registry, trigger bank and loop
//! - [`poller`]: readiness backends (lab and OS)
//! - [`config`]: configuration and environment overrides
//! - [`error`]: error types
//! - [`util`]: generational arena backing the intrusive rings

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod error;
pub mod poller;
pub mod scheduler;
pub mod time;
pub mod tracing_compat;
pub mod util;

pub use config::{AlarmPolicy, SchedulerConfig};
pub use error::{ConfigError, Error, Result};
pub use poller::{Condition, DescriptorId, Poller};
pub use scheduler::{
    EventTriggerId, SchedulerBuilder, TaskScheduler, TaskToken, TriggerData, TriggerHandle,
};
pub use time::{DelayInterval, EventTime};
