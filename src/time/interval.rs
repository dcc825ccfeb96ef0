//! Second/microsecond interval arithmetic.
//!
//! Both types keep the microsecond component normalized to `< 1_000_000`, so
//! the derived lexicographic ordering on `(secs, usecs)` is the time ordering.

use core::fmt;
use core::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use std::time::Duration;

const MILLION: u32 = 1_000_000;

/// A non-negative span of time.
///
/// Subtraction saturates at [`DelayInterval::ZERO`] and addition saturates at
/// [`DelayInterval::ETERNITY`]; neither ever wraps.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DelayInterval {
    secs: u64,
    usecs: u32,
}

impl DelayInterval {
    /// The empty interval.
    pub const ZERO: Self = Self::from_parts(0, 0);
    /// One second.
    pub const SECOND: Self = Self::from_parts(1, 0);
    /// One minute.
    pub const MINUTE: Self = Self::SECOND.times(60);
    /// One hour.
    pub const HOUR: Self = Self::MINUTE.times(60);
    /// One day.
    pub const DAY: Self = Self::HOUR.times(24);
    /// "No timeout". Also the delta held by the delay queue sentinel.
    pub const ETERNITY: Self = Self::from_parts(i32::MAX as u64, MILLION - 1);

    const fn from_parts(secs: u64, usecs: u32) -> Self {
        Self { secs, usecs }
    }

    /// Creates an interval, carrying excess microseconds into seconds.
    #[must_use]
    pub const fn new(secs: u64, usecs: u64) -> Self {
        let carry = usecs / MILLION as u64;
        Self {
            secs: secs.saturating_add(carry),
            usecs: (usecs % MILLION as u64) as u32,
        }
        .clamp_eternity()
    }

    /// Creates an interval from a signed microsecond count. Negative values
    /// become zero.
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        if micros <= 0 {
            return Self::ZERO;
        }
        let micros = micros as u64;
        Self::new(micros / MILLION as u64, micros % MILLION as u64)
    }

    /// Creates an interval from a millisecond count.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self::new(millis / 1_000, (millis % 1_000) * 1_000)
    }

    /// Converts a [`Duration`], truncating to microseconds.
    #[must_use]
    pub const fn from_duration(duration: Duration) -> Self {
        Self::new(duration.as_secs(), duration.subsec_micros() as u64)
    }

    /// Whole seconds.
    #[must_use]
    pub const fn seconds(self) -> u64 {
        self.secs
    }

    /// Sub-second microseconds, always `< 1_000_000`.
    #[must_use]
    pub const fn useconds(self) -> u32 {
        self.usecs
    }

    /// Total length in microseconds, saturating.
    #[must_use]
    pub const fn as_micros(self) -> u64 {
        self.secs
            .saturating_mul(MILLION as u64)
            .saturating_add(self.usecs as u64)
    }

    /// Returns true for the empty interval.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.secs == 0 && self.usecs == 0
    }

    /// Returns true for [`DelayInterval::ETERNITY`].
    #[must_use]
    pub const fn is_eternity(self) -> bool {
        self.secs == Self::ETERNITY.secs && self.usecs == Self::ETERNITY.usecs
    }

    /// Converts to a [`Duration`].
    #[must_use]
    pub const fn to_duration(self) -> Duration {
        Duration::new(self.secs, self.usecs * 1_000)
    }

    /// Poll timeout for this interval: `None` for eternity.
    #[must_use]
    pub const fn to_timeout(self) -> Option<Duration> {
        if self.is_eternity() {
            None
        } else {
            Some(self.to_duration())
        }
    }

    /// Multiplies by a scalar. Used to build the derived constants.
    #[must_use]
    pub const fn times(self, factor: u32) -> Self {
        let usecs = self.usecs as u64 * factor as u64;
        let secs = self.secs.saturating_mul(factor as u64);
        Self::new(secs, usecs)
    }

    /// Subtraction that floors at zero.
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if self.secs < rhs.secs || (self.secs == rhs.secs && self.usecs <= rhs.usecs) {
            return Self::ZERO;
        }
        if self.usecs >= rhs.usecs {
            Self::from_parts(self.secs - rhs.secs, self.usecs - rhs.usecs)
        } else {
            Self::from_parts(self.secs - rhs.secs - 1, self.usecs + MILLION - rhs.usecs)
        }
    }

    /// Addition that caps at eternity.
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self::new(
            self.secs.saturating_add(rhs.secs),
            self.usecs as u64 + rhs.usecs as u64,
        )
    }

    const fn clamp_eternity(self) -> Self {
        if self.secs > Self::ETERNITY.secs
            || (self.secs == Self::ETERNITY.secs && self.usecs > Self::ETERNITY.usecs)
        {
            Self::ETERNITY
        } else {
            self
        }
    }
}

impl fmt::Debug for DelayInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_eternity() {
            f.write_str("DelayInterval(ETERNITY)")
        } else {
            write!(f, "DelayInterval({}.{:06}s)", self.secs, self.usecs)
        }
    }
}

impl fmt::Display for DelayInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}s", self.secs, self.usecs)
    }
}

impl Add for DelayInterval {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl AddAssign for DelayInterval {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl Sub for DelayInterval {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl SubAssign for DelayInterval {
    fn sub_assign(&mut self, rhs: Self) {
        *self = self.saturating_sub(rhs);
    }
}

impl Mul<DelayInterval> for u32 {
    type Output = DelayInterval;

    fn mul(self, rhs: DelayInterval) -> DelayInterval {
        rhs.times(self)
    }
}

impl Mul<u32> for DelayInterval {
    type Output = Self;

    fn mul(self, rhs: u32) -> Self {
        self.times(rhs)
    }
}

impl From<Duration> for DelayInterval {
    fn from(duration: Duration) -> Self {
        Self::from_duration(duration)
    }
}

/// A wall-clock sample in seconds and microseconds.
///
/// Only differences between samples are meaningful to the scheduler; the
/// absolute value is never handed to callbacks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EventTime {
    secs: i64,
    usecs: u32,
}

/// The latest representable event time.
pub const THE_END_OF_TIME: EventTime = EventTime::new(i32::MAX as i64, 0);

impl EventTime {
    /// Creates a sample, carrying excess microseconds into seconds.
    #[must_use]
    pub const fn new(secs: i64, usecs: u32) -> Self {
        Self {
            secs: secs + (usecs / MILLION) as i64,
            usecs: usecs % MILLION,
        }
    }

    /// Whole seconds.
    #[must_use]
    pub const fn seconds(self) -> i64 {
        self.secs
    }

    /// Sub-second microseconds.
    #[must_use]
    pub const fn useconds(self) -> u32 {
        self.usecs
    }
}

impl fmt::Debug for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventTime({}.{:06})", self.secs, self.usecs)
    }
}

impl Sub for EventTime {
    type Output = DelayInterval;

    /// Elapsed time from `rhs` to `self`; zero if `rhs` is later.
    fn sub(self, rhs: Self) -> DelayInterval {
        if self <= rhs {
            return DelayInterval::ZERO;
        }
        let (secs, usecs) = if self.usecs >= rhs.usecs {
            (self.secs.saturating_sub(rhs.secs), self.usecs - rhs.usecs)
        } else {
            (
                self.secs.saturating_sub(rhs.secs).saturating_sub(1),
                self.usecs + MILLION - rhs.usecs,
            )
        };
        DelayInterval::new(secs.unsigned_abs(), u64::from(usecs))
    }
}

impl AddAssign<DelayInterval> for EventTime {
    fn add_assign(&mut self, rhs: DelayInterval) {
        let secs = i64::try_from(rhs.seconds()).unwrap_or(i64::MAX);
        let mut usecs = self.usecs + rhs.useconds();
        let mut carry = 0;
        if usecs >= MILLION {
            usecs -= MILLION;
            carry = 1;
        }
        self.secs = self.secs.saturating_add(secs).saturating_add(carry);
        self.usecs = usecs;
    }
}

impl Add<DelayInterval> for EventTime {
    type Output = Self;

    fn add(mut self, rhs: DelayInterval) -> Self {
        self += rhs;
        self
    }
}

impl SubAssign<DelayInterval> for EventTime {
    /// Moves the sample back; never earlier than the zero time.
    fn sub_assign(&mut self, rhs: DelayInterval) {
        let secs = i64::try_from(rhs.seconds()).unwrap_or(i64::MAX);
        let mut new_secs = self.secs.saturating_sub(secs);
        let new_usecs = if self.usecs >= rhs.useconds() {
            self.usecs - rhs.useconds()
        } else {
            new_secs = new_secs.saturating_sub(1);
            self.usecs + MILLION - rhs.useconds()
        };
        if new_secs < 0 {
            *self = Self::default();
        } else {
            self.secs = new_secs;
            self.usecs = new_usecs;
        }
    }
}

impl Sub<DelayInterval> for EventTime {
    type Output = Self;

    fn sub(mut self, rhs: DelayInterval) -> Self {
        self -= rhs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_constants() {
        assert_eq!(DelayInterval::MINUTE, DelayInterval::new(60, 0));
        assert_eq!(DelayInterval::HOUR, DelayInterval::new(3_600, 0));
        assert_eq!(DelayInterval::DAY, 24 * DelayInterval::HOUR);
        assert_eq!(DelayInterval::DAY.seconds(), 86_400);
    }

    #[test]
    fn normalizes_microseconds() {
        let d = DelayInterval::new(1, 2_500_000);
        assert_eq!(d.seconds(), 3);
        assert_eq!(d.useconds(), 500_000);

        let d = DelayInterval::new(0, 700_000) * 3;
        assert_eq!(d, DelayInterval::new(2, 100_000));
    }

    #[test]
    fn subtraction_saturates_at_zero() {
        let small = DelayInterval::from_millis(5);
        let large = DelayInterval::from_millis(7);
        assert_eq!(small - large, DelayInterval::ZERO);
        assert_eq!(large - small, DelayInterval::from_millis(2));
        assert_eq!(small - small, DelayInterval::ZERO);

        let mut d = DelayInterval::new(1, 0);
        d -= DelayInterval::new(0, 1);
        assert_eq!(d, DelayInterval::new(0, 999_999));
    }

    #[test]
    fn addition_caps_at_eternity() {
        let sum = DelayInterval::ETERNITY + DelayInterval::SECOND;
        assert!(sum.is_eternity());
        assert_eq!(DelayInterval::ETERNITY.to_timeout(), None);
        assert_eq!(
            DelayInterval::from_millis(3).to_timeout(),
            Some(Duration::from_millis(3))
        );
    }

    #[test]
    fn negative_micros_clamp() {
        assert_eq!(DelayInterval::from_micros(-10), DelayInterval::ZERO);
        assert_eq!(
            DelayInterval::from_micros(1_000_001),
            DelayInterval::new(1, 1)
        );
    }

    #[test]
    fn ordering_matches_time() {
        assert!(DelayInterval::new(1, 0) >= DelayInterval::new(0, 999_999));
        assert!(DelayInterval::new(2, 1) > DelayInterval::new(2, 0));
        assert!(DelayInterval::ETERNITY > DelayInterval::DAY);
    }

    #[test]
    fn event_time_difference() {
        let a = EventTime::new(10, 900_000);
        let b = EventTime::new(12, 100_000);
        assert_eq!(b - a, DelayInterval::new(1, 200_000));
        assert_eq!(a - b, DelayInterval::ZERO);
    }

    #[test]
    fn event_time_difference_saturates_at_the_extremes() {
        let early = EventTime::new(i64::MIN, 500_000);
        let late = EventTime::new(i64::MAX, 0);
        assert_eq!(late - early, DelayInterval::ETERNITY);
        assert_eq!(early - late, DelayInterval::ZERO);
    }

    #[test]
    fn event_time_shift() {
        let mut t = EventTime::new(1, 600_000);
        t += DelayInterval::new(0, 500_000);
        assert_eq!(t, EventTime::new(2, 100_000));
        t -= DelayInterval::new(0, 200_000);
        assert_eq!(t, EventTime::new(1, 900_000));
        t -= DelayInterval::MINUTE;
        assert_eq!(t, EventTime::default());
    }
}
