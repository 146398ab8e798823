//! Stream-relative time values.

use std::fmt;
use std::time::Duration;

/// A rational number, used as a stream time base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Value as a float. A zero denominator yields zero.
    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            f64::from(self.num) / f64::from(self.den)
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// A presentation timestamp: `value × time_base` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    pub value: i64,
    pub time_base: Rational,
}

impl Timestamp {
    pub const fn new(value: i64, time_base: Rational) -> Self {
        Self { value, time_base }
    }

    /// Timestamp in seconds.
    pub fn seconds(self) -> f64 {
        self.value as f64 * self.time_base.as_f64()
    }

    /// Timestamp as a duration from the stream origin. Negative values clamp to zero.
    pub fn as_duration(self) -> Duration {
        Duration::from_secs_f64(self.seconds().max(0.0))
    }

    /// Express a duration in a given time base, rounding down.
    pub fn from_duration(position: Duration, time_base: Rational) -> Self {
        let tb = time_base.as_f64();
        let value = if tb > 0.0 {
            (position.as_secs_f64() / tb).floor() as i64
        } else {
            0
        };
        Self { value, time_base }
    }
}
