//! Readiness polling behind the scheduler.
//!
//! The scheduler does not block on descriptors itself. Each step it hands the
//! current watch set and a timeout to a [`Poller`] and gets back the
//! descriptors that became ready.
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | [`LabPoller`] | `lab.rs` | deterministic tests, injected readiness |
//! | [`OsPoller`] | `os.rs` | epoll/kqueue through the `polling` crate (unix) |
//!
//! # Contract
//!
//! - `timeout == Some(Duration::ZERO)` polls without blocking.
//! - `timeout == None` blocks until something is ready or the poller's
//!   [`Notifier`] is rung.
//! - Reported readiness may be wider than the watched interest; the scheduler
//!   intersects it with the registered conditions before dispatch.

pub mod lab;
#[cfg(unix)]
pub mod os;

pub use lab::LabPoller;
#[cfg(unix)]
pub use os::OsPoller;

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of a watched descriptor (a socket or file descriptor number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorId(pub i32);

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

/// Readiness conditions a watch can ask for.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Condition(u8);

impl Condition {
    /// No conditions.
    pub const NONE: Self = Self(0);
    /// Data can be read.
    pub const READABLE: Self = Self(0b001);
    /// Data can be written.
    pub const WRITABLE: Self = Self(0b010);
    /// Exceptional condition (out-of-band data, error).
    pub const EXCEPTION: Self = Self(0b100);

    /// Every condition.
    #[must_use]
    pub const fn all() -> Self {
        Self(0b111)
    }

    /// Returns true if no condition is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every condition in `other` is set here.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if readable is set.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.contains(Self::READABLE)
    }

    /// Returns true if writable is set.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// Returns true if exception is set.
    #[must_use]
    pub const fn is_exception(self) -> bool {
        self.contains(Self::EXCEPTION)
    }

    /// Conditions set in both.
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut sep = "";
        for (flag, name) in [
            (Self::READABLE, "READABLE"),
            (Self::WRITABLE, "WRITABLE"),
            (Self::EXCEPTION, "EXCEPTION"),
        ] {
            if self.contains(flag) {
                write!(f, "{sep}{name}")?;
                sep = " | ";
            }
        }
        Ok(())
    }
}

impl BitOr for Condition {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Condition {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Condition {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

/// A descriptor and the conditions it is watched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watch {
    /// The watched descriptor.
    pub descriptor: DescriptorId,
    /// Conditions of interest.
    pub conditions: Condition,
}

/// One readiness report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// The descriptor that became ready.
    pub descriptor: DescriptorId,
    /// Conditions observed.
    pub ready: Condition,
}

impl Event {
    /// Creates an event.
    #[must_use]
    pub const fn new(descriptor: DescriptorId, ready: Condition) -> Self {
        Self { descriptor, ready }
    }
}

/// Bounded buffer of readiness reports, reused across polls.
#[derive(Debug)]
pub struct Events {
    inner: Vec<Event>,
    capacity: usize,
}

impl Events {
    /// Creates a buffer holding at most `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Removes all events.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Adds an event, merging with an earlier report for the same
    /// descriptor. Returns false if the buffer is full.
    pub fn push(&mut self, event: Event) -> bool {
        if let Some(existing) = self
            .inner
            .iter_mut()
            .find(|e| e.descriptor == event.descriptor)
        {
            existing.ready |= event.ready;
            return true;
        }
        if self.inner.len() >= self.capacity {
            return false;
        }
        self.inner.push(event);
        true
    }

    /// Readiness reported for `descriptor`, if any.
    #[must_use]
    pub fn readiness(&self, descriptor: DescriptorId) -> Option<Condition> {
        self.inner
            .iter()
            .find(|e| e.descriptor == descriptor)
            .map(|e| e.ready)
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if there are no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Maximum number of events.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates over events.
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.inner.iter()
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Interrupts a blocked [`Poller::poll`] from any thread.
pub type Notifier = Arc<dyn Fn() + Send + Sync>;

/// Waits for descriptor readiness.
///
/// Called only from the scheduler thread.
pub trait Poller {
    /// Blocks up to `timeout` for any of `watches` to become ready, filling
    /// `events`. Returns the number of events.
    ///
    /// `events` is cleared first. An [`io::ErrorKind::Interrupted`] error is
    /// treated by the scheduler as "nothing ready".
    fn poll(
        &mut self,
        watches: &[Watch],
        timeout: Option<Duration>,
        events: &mut Events,
    ) -> io::Result<usize>;

    /// A callback that wakes a blocked `poll`, if the backend has one.
    fn notifier(&self) -> Option<Notifier> {
        None
    }
}

impl<P: Poller + ?Sized> Poller for Box<P> {
    fn poll(
        &mut self,
        watches: &[Watch],
        timeout: Option<Duration>,
        events: &mut Events,
    ) -> io::Result<usize> {
        (**self).poll(watches, timeout, events)
    }

    fn notifier(&self) -> Option<Notifier> {
        (**self).notifier()
    }
}
