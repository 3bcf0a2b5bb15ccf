// mse-ingest-core
// Copyright (c) 2019-2026 The Project MSE Ingest Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `units` module provides the tick-based timestamp and duration types
//! used throughout the ingest core, plus the `TimeBase` conversion helper
//! used at the edges (demo/QA tooling) to render them in seconds.
//!
//! Timestamps and durations are always expressed in ticks of a track's time
//! base; the core itself never needs to know what that time base is. A
//! "no timestamp" value is represented as `Option<Timestamp>` rather than an
//! in-band sentinel, so arithmetic on a `Timestamp` can never silently
//! operate on a sentinel value.

use std::fmt;

/// An instant in time, in ticks of a track's time base, relative to the
/// start of the stream. May be negative prior to `timestampOffset`
/// application (§4.1 step 3 of the coded frame processing algorithm).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);
    pub const MIN: Timestamp = Timestamp(i64::MIN);
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    #[inline]
    pub const fn new(ticks: i64) -> Self {
        Timestamp(ticks)
    }

    #[inline]
    pub const fn ticks(self) -> i64 {
        self.0
    }

    /// Add a duration, saturating at `Timestamp::MAX` on overflow.
    #[inline]
    pub fn saturating_add(self, dur: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(dur.0 as i64))
    }

    /// Subtract a duration, saturating at `Timestamp::MIN` on overflow.
    #[inline]
    pub fn saturating_sub(self, dur: Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(dur.0 as i64))
    }

    #[inline]
    pub fn checked_add(self, dur: Duration) -> Option<Timestamp> {
        self.0.checked_add(dur.0 as i64).map(Timestamp)
    }

    #[inline]
    pub fn checked_sub(self, dur: Duration) -> Option<Timestamp> {
        self.0.checked_sub(dur.0 as i64).map(Timestamp)
    }

    /// Add a signed number of ticks, e.g. a `timestampOffset`.
    #[inline]
    pub fn offset(self, ticks: i64) -> Timestamp {
        Timestamp(self.0.saturating_add(ticks))
    }

    /// The (possibly negative) signed tick delta `self - earlier`.
    #[inline]
    pub fn delta(self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// The duration elapsed from `earlier` to `self`, or `None` if `self`
    /// precedes `earlier`.
    #[inline]
    pub fn duration_since(self, earlier: Timestamp) -> Option<Duration> {
        if self.0 >= earlier.0 {
            Some(Duration((self.0 - earlier.0) as u64))
        }
        else {
            None
        }
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-negative span of time, in ticks of a track's time base.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Duration = Duration(0);
    pub const MAX: Duration = Duration(u64::MAX);

    #[inline]
    pub const fn new(ticks: u64) -> Self {
        Duration(ticks)
    }

    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn saturating_add(self, other: Duration) -> Duration {
        Duration(self.0.saturating_add(other.0))
    }

    #[inline]
    pub fn saturating_sub(self, other: Duration) -> Duration {
        Duration(self.0.saturating_sub(other.0))
    }

    #[inline]
    pub fn checked_sub(self, other: Duration) -> Option<Duration> {
        self.0.checked_sub(other.0).map(Duration)
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Doubles the duration, saturating on overflow. Used to compute
    /// `fudge_room = 2 * max_interbuffer_distance`.
    #[inline]
    pub fn doubled(self) -> Duration {
        Duration(self.0.saturating_mul(2))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The presentation duration of a whole `SourceBufferStream`, as set by
/// `on_set_duration`. Represents MSE's `Infinity` duration explicitly rather
/// than through an in-band sentinel `Timestamp` value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PresentationDuration {
    Finite(Timestamp),
    Infinite,
}

impl PresentationDuration {
    /// Returns `true` if `ts` lies at or past this duration.
    pub fn is_at_or_past(self, ts: Timestamp) -> bool {
        match self {
            PresentationDuration::Finite(end) => ts >= end,
            PresentationDuration::Infinite => false,
        }
    }
}

/// A `TimeBase` is the conversion factor between a `Timestamp`/`Duration` in
/// ticks and real time in seconds. The ingest core never consults this; it
/// exists for demo/QA tooling that prints human-readable buffered ranges.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimeBase {
    /// The numerator.
    pub numer: u32,
    /// The denominator.
    pub denom: u32,
}

impl TimeBase {
    /// Creates a new `TimeBase`. Panics if either the numerator or
    /// denominator is 0.
    pub const fn new(numer: u32, denom: u32) -> Self {
        assert!(numer != 0 && denom != 0, "TimeBase cannot have 0 numerator or denominator");
        TimeBase { numer, denom }
    }

    /// Convert a tick count into seconds.
    pub fn ticks_to_seconds(&self, ticks: i64) -> f64 {
        (ticks as f64) * (self.numer as f64) / (self.denom as f64)
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numer, self.denom)
    }
}

#[cfg(test)]
mod tests {
    use super::{Duration, PresentationDuration, TimeBase, Timestamp};

    #[test]
    fn timestamp_arithmetic() {
        let t = Timestamp::new(10);
        assert_eq!(t.saturating_add(Duration::new(5)), Timestamp::new(15));
        assert_eq!(t.saturating_sub(Duration::new(20)), Timestamp::new(-10));
        assert_eq!(t.offset(-100), Timestamp::new(-90));
        assert_eq!(Timestamp::new(15).duration_since(t), Some(Duration::new(5)));
        assert_eq!(t.duration_since(Timestamp::new(15)), None);
    }

    #[test]
    fn timestamp_delta_is_signed() {
        assert_eq!(Timestamp::new(5).delta(Timestamp::new(10)), -5);
        assert_eq!(Timestamp::new(10).delta(Timestamp::new(5)), 5);
    }

    #[test]
    fn duration_doubled_is_fudge_room_helper() {
        assert_eq!(Duration::new(125).doubled(), Duration::new(250));
    }

    #[test]
    fn presentation_duration_at_or_past() {
        let d = PresentationDuration::Finite(Timestamp::new(100));
        assert!(d.is_at_or_past(Timestamp::new(100)));
        assert!(d.is_at_or_past(Timestamp::new(150)));
        assert!(!d.is_at_or_past(Timestamp::new(99)));
        assert!(!PresentationDuration::Infinite.is_at_or_past(Timestamp::new(i64::MAX)));
    }

    #[test]
    fn timebase_converts_ticks_to_seconds() {
        let tb = TimeBase::new(1, 1000);
        assert_eq!(tb.ticks_to_seconds(2500), 2.5);
    }
}
