//! Deterministic poller for tests.
//!
//! [`LabPoller`] never touches the OS. Test code injects readiness and the
//! poller reports it for whichever descriptors are watched at the next poll.
//! Handles are cheap clones sharing one state, so a test can keep injecting
//! after handing a clone to the scheduler.
//!
//! ```ignore
//! use tasksched::poller::{Condition, DescriptorId, LabPoller};
//!
//! let lab = LabPoller::new();
//! let mut scheduler = SchedulerBuilder::new().poller(lab.clone()).build();
//! lab.inject(DescriptorId(7), Condition::READABLE);
//! scheduler.single_step(None)?;
//! ```
//!
//! With [`LabPoller::with_clock`], a poll that finds nothing ready advances
//! the virtual clock by its timeout, so time only moves through polling.

use super::{Condition, DescriptorId, Event, Events, Notifier, Poller, Watch};
use crate::time::{DelayInterval, VirtualClock};
use crate::tracing_compat::trace;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct LabState {
    /// Edge readiness, consumed when delivered.
    one_shot: Vec<Event>,
    /// Level readiness, reported on every poll until cleared.
    level: HashMap<DescriptorId, Condition>,
    /// Injected failure for the next poll.
    pending_error: Option<io::ErrorKind>,
    timeouts: Vec<Option<Duration>>,
    notifications: usize,
}

/// Virtual readiness source.
#[derive(Debug, Clone, Default)]
pub struct LabPoller {
    state: Arc<Mutex<LabState>>,
    clock: Option<VirtualClock>,
}

impl LabPoller {
    /// Creates a poller that never moves time.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a poller that advances `clock` by the timeout whenever a
    /// bounded poll finds nothing ready.
    #[must_use]
    pub fn with_clock(clock: VirtualClock) -> Self {
        Self {
            state: Arc::default(),
            clock: Some(clock),
        }
    }

    /// Reports `ready` for `descriptor` once, at the first poll that watches
    /// it for any of those conditions.
    pub fn inject(&self, descriptor: DescriptorId, ready: Condition) {
        self.state.lock().one_shot.push(Event::new(descriptor, ready));
    }

    /// Reports `ready` for `descriptor` on every poll until
    /// [`clear_ready`](Self::clear_ready).
    pub fn set_ready(&self, descriptor: DescriptorId, ready: Condition) {
        self.state.lock().level.insert(descriptor, ready);
    }

    /// Stops level readiness for `descriptor`.
    pub fn clear_ready(&self, descriptor: DescriptorId) {
        self.state.lock().level.remove(&descriptor);
    }

    /// Makes the next poll fail with `kind`.
    pub fn fail_next(&self, kind: io::ErrorKind) {
        self.state.lock().pending_error = Some(kind);
    }

    /// Timeouts passed to every poll so far.
    #[must_use]
    pub fn timeouts(&self) -> Vec<Option<Duration>> {
        self.state.lock().timeouts.clone()
    }

    /// Number of polls so far.
    #[must_use]
    pub fn poll_count(&self) -> usize {
        self.state.lock().timeouts.len()
    }

    /// Number of times the notifier was rung.
    #[must_use]
    pub fn notifications(&self) -> usize {
        self.state.lock().notifications
    }
}

impl Poller for LabPoller {
    fn poll(
        &mut self,
        watches: &[Watch],
        timeout: Option<Duration>,
        events: &mut Events,
    ) -> io::Result<usize> {
        events.clear();
        let mut state = self.state.lock();
        state.timeouts.push(timeout);
        if let Some(kind) = state.pending_error.take() {
            return Err(io::Error::new(kind, "injected lab poll failure"));
        }

        let interest = |descriptor: DescriptorId| {
            watches
                .iter()
                .find(|w| w.descriptor == descriptor)
                .map_or(Condition::NONE, |w| w.conditions)
        };

        let mut undelivered = Vec::new();
        for event in std::mem::take(&mut state.one_shot) {
            let ready = event.ready & interest(event.descriptor);
            if ready.is_empty() || !events.push(Event::new(event.descriptor, ready)) {
                undelivered.push(event);
            }
        }
        state.one_shot = undelivered;

        for (&descriptor, &level) in &state.level {
            let ready = level & interest(descriptor);
            if !ready.is_empty() {
                events.push(Event::new(descriptor, ready));
            }
        }

        if events.is_empty() {
            if let (Some(clock), Some(timeout)) = (&self.clock, timeout) {
                clock.advance(DelayInterval::from_duration(timeout));
            }
        }
        trace!(
            watches = watches.len(),
            ready = events.len(),
            timeout = ?timeout,
            "lab poll"
        );
        Ok(events.len())
    }

    fn notifier(&self) -> Option<Notifier> {
        let state = Arc::clone(&self.state);
        Some(Arc::new(move || state.lock().notifications += 1))
    }
}
