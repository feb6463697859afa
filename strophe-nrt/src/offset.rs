//! Timeline positions in seconds.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::SchedulingError;

/// A non-negative position on the session timeline, possibly unbounded.
#[derive(Debug, Clone, Copy)]
pub struct Offset(f64);

impl Offset {
    pub const ZERO: Offset = Offset(0.0);
    pub const INFINITY: Offset = Offset(f64::INFINITY);

    pub fn new(seconds: f64) -> Result<Self, SchedulingError> {
        if seconds.is_nan() || seconds < 0.0 {
            return Err(SchedulingError::InvalidOffset(seconds));
        }
        // Folds -0.0 into 0.0 so equal offsets hash alike.
        Ok(Offset(seconds + 0.0))
    }

    pub fn seconds(self) -> f64 {
        self.0
    }

    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }

    /// Shift by `delta` seconds, clamping at zero. Unbounded offsets stay unbounded.
    pub fn shifted(self, delta: f64) -> Offset {
        Offset((self.0 + delta).max(0.0) + 0.0)
    }
}

impl PartialEq for Offset {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Offset {}

impl PartialOrd for Offset {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Offset {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for Offset {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<f64> for Offset {
    type Error = SchedulingError;

    fn try_from(seconds: f64) -> Result<Self, Self::Error> {
        Offset::new(seconds)
    }
}

/// A half-open window `[start, stop)` of the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OffsetRange {
    pub start: Offset,
    pub stop: Offset,
}

impl OffsetRange {
    pub fn new(start: f64, stop: f64) -> Result<Self, SchedulingError> {
        let range = OffsetRange {
            start: Offset::new(start)?,
            stop: Offset::new(stop)?,
        };
        if range.stop <= range.start {
            return Err(SchedulingError::InvalidInterval { start, stop });
        }
        Ok(range)
    }

    /// Everything from `start` on.
    pub fn starting_at(start: f64) -> Result<Self, SchedulingError> {
        Self::new(start, f64::INFINITY)
    }

    pub fn contains(&self, offset: Offset) -> bool {
        self.start <= offset && offset < self.stop
    }

    /// Whether `[start, stop)` shares any instant with this range.
    pub fn intersects(&self, start: Offset, stop: Offset) -> bool {
        start < self.stop && self.start < stop
    }

    pub fn duration(&self) -> f64 {
        self.stop.seconds() - self.start.seconds()
    }
}
