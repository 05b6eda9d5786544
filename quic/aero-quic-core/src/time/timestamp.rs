// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{
    fmt,
    ops::{Add, AddAssign, Sub, SubAssign},
    time::Duration,
};

/// An instant, measured as the duration since the owning clock's epoch
///
/// Timestamps from different clocks must never be mixed; there is no
/// wall-clock anchoring.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// Creates a `Timestamp` at the given offset from the clock epoch
    ///
    /// # Safety
    ///
    /// The caller is responsible for only comparing timestamps derived from
    /// the same clock.
    #[inline]
    pub const unsafe fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    /// Returns the duration since `earlier`, or `None` if `earlier` is later
    #[inline]
    pub fn checked_duration_since(self, earlier: Self) -> Option<Duration> {
        self.0.checked_sub(earlier.0)
    }

    /// Returns the duration since `earlier`, or zero if `earlier` is later
    #[inline]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        self.checked_duration_since(earlier).unwrap_or_default()
    }

    /// Moves the timestamp backwards, returning `None` on underflow
    #[inline]
    pub fn checked_sub(self, duration: Duration) -> Option<Self> {
        Some(Self(self.0.checked_sub(duration)?))
    }

    /// Returns `true` when the deadline is no later than `current_time`
    ///
    /// Timers fire on `now >= deadline`; sub-millisecond early firing is
    /// tolerated so platform timers that round up do not stall the loop.
    #[inline]
    pub fn has_elapsed(self, current_time: Self) -> bool {
        self <= current_time + Duration::from_millis(1)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    #[inline]
    fn add(self, duration: Duration) -> Self {
        Self(self.0 + duration)
    }
}

impl AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, duration: Duration) {
        self.0 += duration;
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Self;

    #[inline]
    fn sub(self, duration: Duration) -> Self {
        Self(self.0 - duration)
    }
}

impl SubAssign<Duration> for Timestamp {
    #[inline]
    fn sub_assign(&mut self, duration: Duration) {
        self.0 -= duration;
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, other: Self) -> Duration {
        self.0 - other.0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Timestamp({:?})", self.0)
    }
}
