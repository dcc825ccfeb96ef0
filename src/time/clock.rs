//! Clock sources for the delay queue.

use super::{DelayInterval, EventTime};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of [`EventTime`] samples.
///
/// Samples are expected to move forward, but implementations are allowed to
/// jump backward (the system clock being reset); the delay queue treats such
/// a jump as zero elapsed time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> EventTime;
}

/// The process wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> EventTime {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since_epoch) => EventTime::new(
                i64::try_from(since_epoch.as_secs()).unwrap_or(i64::MAX),
                since_epoch.subsec_micros(),
            ),
            // Clock set before 1970: report the epoch; synchronization treats
            // the step as a backward jump.
            Err(_) => EventTime::default(),
        }
    }
}

/// A manually driven clock.
///
/// Clones share the same underlying time, so a test can keep one handle and
/// give another to the scheduler.
///
/// ```ignore
/// let clock = VirtualClock::new();
/// let scheduler = SchedulerBuilder::new().clock(clock.clone()).build();
/// clock.advance(DelayInterval::from_millis(7));
/// ```
#[derive(Clone, Default)]
pub struct VirtualClock {
    now: Arc<Mutex<EventTime>>,
}

impl VirtualClock {
    /// Creates a clock reading the zero time.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock reading `start`.
    #[must_use]
    pub fn starting_at(start: EventTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: DelayInterval) {
        *self.now.lock() += by;
    }

    /// Moves the clock backward, simulating a wall-clock reset.
    pub fn rewind(&self, by: DelayInterval) {
        *self.now.lock() -= by;
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, to: EventTime) {
        *self.now.lock() = to;
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> EventTime {
        *self.now.lock()
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VirtualClock").field(&self.now()).finish()
    }
}
