//
// Copyright 2025 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Monotonic time for the send side.
//!
//! The ledger and the adapter report times as whole milliseconds since an epoch
//! [`Instant`] picked by their owner, so only differences between instants matter.

use std::{fmt, ops::Add};

/// A [`std::time::Instant`] that can't panic when compared against a later instant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(std::time::Instant);

impl Instant {
    pub fn now() -> Self {
        Self(std::time::Instant::now())
    }

    /// Zero if `earlier` is in fact later.
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration(self.0.saturating_duration_since(earlier.0))
    }

    /// Whole milliseconds since `epoch`, or 0 if this instant is before it.
    pub fn millis_since(self, epoch: Self) -> i64 {
        i64::try_from(self.saturating_duration_since(epoch).as_millis()).unwrap_or(i64::MAX)
    }
}

impl Add<Duration> for Instant {
    type Output = Self;

    fn add(self, duration: Duration) -> Self {
        Self(self.0 + duration.0)
    }
}

impl fmt::Debug for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(std::time::Duration);

impl Duration {
    pub const ZERO: Self = Self(std::time::Duration::ZERO);
    pub const SECOND: Self = Self::from_secs(1);

    pub const fn from_secs(secs: u64) -> Self {
        Self(std::time::Duration::from_secs(secs))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(std::time::Duration::from_millis(millis))
    }

    pub const fn as_millis(self) -> u128 {
        self.0.as_millis()
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
