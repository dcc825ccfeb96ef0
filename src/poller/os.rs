//! OS readiness polling through the `polling` crate (epoll, kqueue).
//!
//! `polling` registrations are oneshot: after an event fires, the descriptor
//! stays quiet until re-armed. The scheduler hands over the whole watch set
//! every step, so [`OsPoller`] simply re-arms each watched descriptor before
//! waiting and drops descriptors that left the set. This matches the
//! level-triggered, select-style contract the scheduler expects.
//!
//! Exceptional conditions have no `polling` equivalent; a watch asking only
//! for [`Condition::EXCEPTION`] stays registered but never reports.

use super::{Condition, DescriptorId, Event, Events, Notifier, Poller, Watch};
use crate::tracing_compat::{debug, warn};
use polling::{Event as PollEvent, Poller as RawPoller};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Poller backed by the platform's readiness API.
pub struct OsPoller {
    poller: Arc<RawPoller>,
    registered: HashMap<RawFd, Condition>,
    buffer: Vec<PollEvent>,
}

impl OsPoller {
    /// Creates the underlying epoll/kqueue instance.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Arc::new(RawPoller::new()?),
            registered: HashMap::new(),
            buffer: Vec::new(),
        })
    }

    /// Number of descriptors currently registered with the OS.
    #[must_use]
    pub fn registration_count(&self) -> usize {
        self.registered.len()
    }

    fn interest(key: usize, conditions: Condition) -> PollEvent {
        match (conditions.is_readable(), conditions.is_writable()) {
            (true, true) => PollEvent::all(key),
            (true, false) => PollEvent::readable(key),
            (false, true) => PollEvent::writable(key),
            (false, false) => PollEvent::none(key),
        }
    }

    fn readiness(event: &PollEvent) -> Condition {
        let mut ready = Condition::NONE;
        if event.readable {
            ready |= Condition::READABLE;
        }
        if event.writable {
            ready |= Condition::WRITABLE;
        }
        ready
    }

    fn arm(&mut self, watch: &Watch) -> io::Result<()> {
        let fd: RawFd = watch.descriptor.0;
        let Ok(key) = usize::try_from(fd) else {
            warn!(descriptor = %watch.descriptor, "ignoring watch on negative descriptor");
            return Ok(());
        };
        let interest = Self::interest(key, watch.conditions);
        if self.registered.contains_key(&fd) {
            match self.poller.modify(fd, interest) {
                Ok(()) => {}
                // Closed and reopened under the same number: the kernel
                // already forgot the old registration.
                Err(e) if e.kind() == io::ErrorKind::NotFound => self.poller.add(fd, interest)?,
                Err(e) => return Err(e),
            }
        } else {
            self.poller.add(fd, interest)?;
        }
        self.registered.insert(fd, watch.conditions);
        Ok(())
    }

    fn forget_unwatched(&mut self, watches: &[Watch]) {
        let stale: Vec<RawFd> = self
            .registered
            .keys()
            .copied()
            .filter(|fd| !watches.iter().any(|w| w.descriptor.0 == *fd))
            .collect();
        for fd in stale {
            self.registered.remove(&fd);
            if let Err(e) = self.poller.delete(fd) {
                // Usually the descriptor was closed before its watch was
                // cleared, which already removed it from the kernel set.
                debug!(descriptor = fd, error = %e, "deregistering descriptor failed");
            }
        }
    }
}

impl Poller for OsPoller {
    fn poll(
        &mut self,
        watches: &[Watch],
        timeout: Option<Duration>,
        events: &mut Events,
    ) -> io::Result<usize> {
        events.clear();
        self.forget_unwatched(watches);
        for watch in watches {
            self.arm(watch)?;
        }

        self.buffer.clear();
        self.poller.wait(&mut self.buffer, timeout)?;

        for raw in &self.buffer {
            let Ok(fd) = RawFd::try_from(raw.key) else {
                continue;
            };
            let ready = Self::readiness(raw);
            if !ready.is_empty() {
                events.push(Event::new(DescriptorId(fd), ready));
            }
        }
        Ok(events.len())
    }

    fn notifier(&self) -> Option<Notifier> {
        let poller = Arc::clone(&self.poller);
        Some(Arc::new(move || {
            if let Err(e) = poller.notify() {
                warn!(error = %e, "failed to wake poller");
            }
        }))
    }
}

impl Drop for OsPoller {
    fn drop(&mut self) {
        for fd in self.registered.keys() {
            let _ = self.poller.delete(*fd);
        }
    }
}

impl std::fmt::Debug for OsPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsPoller")
            .field("registration_count", &self.registered.len())
            .finish_non_exhaustive()
    }
}
