//! Virtual time representation.
//!
//! The core carries virtual time as integer microseconds. Adapters that talk
//! to external timebases (emulator monitors counting in seconds, containers
//! counting in microseconds) convert at the boundary only; the core itself
//! never sees floating-point time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// A point on the simulation's virtual timeline, in microseconds.
///
/// Virtual time advances only under coordinator control and is independent
/// of wall-clock time. The timeline starts at [`SimTime::ZERO`] and is
/// monotonically non-decreasing for every component that observes it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTime(u64);

impl SimTime {
    /// The origin of the virtual timeline.
    pub const ZERO: SimTime = SimTime(0);

    /// Create a time from a microsecond count.
    pub const fn from_micros(us: u64) -> Self {
        SimTime(us)
    }

    /// Create a time from a millisecond count.
    pub const fn from_millis(ms: u64) -> Self {
        SimTime(ms * 1_000)
    }

    /// Create a time from a whole second count.
    pub const fn from_secs(secs: u64) -> Self {
        SimTime(secs * 1_000_000)
    }

    /// The microsecond count of this time.
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// Boundary conversion for external timebases that count in seconds.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Saturating addition; stays on the timeline instead of wrapping.
    pub const fn saturating_add(self, other: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(other.0))
    }

    /// Saturating subtraction; clamps at [`SimTime::ZERO`].
    pub const fn saturating_sub(self, other: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(other.0))
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 + rhs.0)
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: SimTime) {
        self.0 += rhs.0;
    }
}

impl Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 - rhs.0)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 1_000 {
            write!(f, "{}us", self.0)
        } else if self.0 < 1_000_000 {
            write!(f, "{:.3}ms", self.0 as f64 / 1_000.0)
        } else {
            write!(f, "{:.6}s", self.as_secs_f64())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(SimTime::from_millis(5).as_micros(), 5_000);
        assert_eq!(SimTime::from_secs(2).as_micros(), 2_000_000);
        assert_eq!(SimTime::from_micros(1_500_000).as_secs_f64(), 1.5);
    }

    #[test]
    fn test_arithmetic() {
        let a = SimTime::from_micros(1_000);
        let b = SimTime::from_micros(250);
        assert_eq!(a + b, SimTime::from_micros(1_250));
        assert_eq!(a - b, SimTime::from_micros(750));
        assert_eq!(b.saturating_sub(a), SimTime::ZERO);
    }

    #[test]
    fn test_serde_transparent() {
        let t = SimTime::from_micros(42);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "42");
        let back: SimTime = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_display() {
        assert_eq!(SimTime::from_micros(500).to_string(), "500us");
        assert_eq!(SimTime::from_micros(1_500).to_string(), "1.500ms");
        assert_eq!(SimTime::from_secs(3).to_string(), "3.000000s");
    }
}
