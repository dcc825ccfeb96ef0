//! Time arithmetic and clock sources.
//!
//! - [`DelayInterval`]: non-negative duration with saturating subtraction
//! - [`EventTime`]: a wall-clock sample, only ever compared or subtracted
//! - [`Clock`]: where the scheduler gets its samples from
//!   ([`SystemClock`] in production, [`VirtualClock`] under test)

mod clock;
mod interval;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use interval::{DelayInterval, EventTime, THE_END_OF_TIME};
