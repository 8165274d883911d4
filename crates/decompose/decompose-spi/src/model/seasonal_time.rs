//! Seasonal time descriptor.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::time::TimePoint;

/// Describes when a seasonal component repeats and when it is active.
///
/// A plain periodic component has `window == (0, period)` and
/// `window_repeat == period`. A windowed component is active only during
/// `[window.0, window.1)` offsets within a longer `window_repeat`, for
/// example a weekday pattern with daily period, window `(0, 5 * DAY)` and
/// repeat `WEEK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeasonalTime {
    period: TimePoint,
    window: (TimePoint, TimePoint),
    window_repeat: TimePoint,
}

impl SeasonalTime {
    /// A component repeating everywhere with the given period.
    pub fn periodic(period: TimePoint) -> Self {
        Self { period, window: (0, period), window_repeat: period }
    }

    /// A component active only in `[start, end)` offsets of a longer repeat.
    /// `end` may exceed `repeat`, in which case the window wraps.
    pub fn windowed(period: TimePoint, start: TimePoint, end: TimePoint, repeat: TimePoint) -> Self {
        Self { period, window: (start, end), window_repeat: repeat }
    }

    pub fn period(&self) -> TimePoint {
        self.period
    }

    pub fn window(&self) -> (TimePoint, TimePoint) {
        self.window
    }

    pub fn window_repeat(&self) -> TimePoint {
        self.window_repeat
    }

    pub fn window_length(&self) -> TimePoint {
        self.window.1 - self.window.0
    }

    /// Whether the component is restricted to a sub-window of its repeat.
    pub fn is_windowed(&self) -> bool {
        self.window_length() != self.window_repeat
    }

    /// Whether the component is active at `time`.
    pub fn in_window(&self, time: TimePoint) -> bool {
        let offset = time.rem_euclid(self.window_repeat);
        if self.window.1 <= self.window_repeat {
            offset >= self.window.0 && offset < self.window.1
        } else {
            offset >= self.window.0 || offset < self.window.1 - self.window_repeat
        }
    }

    /// Offset of `time` into the current period.
    pub fn offset(&self, time: TimePoint) -> TimePoint {
        if self.is_windowed() {
            (time.rem_euclid(self.window_repeat) - self.window.0).rem_euclid(self.window_repeat)
                % self.period
        } else {
            time.rem_euclid(self.period)
        }
    }

    /// Sane descriptors have a positive, finite period no longer than the
    /// repeat containing their window.
    pub fn is_valid(&self) -> bool {
        self.period > 0
            && self.window_repeat >= self.period
            && self.window_length() > 0
            && self.window_length() <= self.window_repeat
    }
}

impl PartialOrd for SeasonalTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SeasonalTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.period
            .cmp(&other.period)
            .then(self.window.cmp(&other.window))
            .then(self.window_repeat.cmp(&other.window_repeat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::time::{DAY, WEEK};

    #[test]
    fn test_periodic() {
        let time = SeasonalTime::periodic(DAY);
        assert!(!time.is_windowed());
        assert!(time.in_window(12345));
        assert_eq!(time.offset(DAY + 7), 7);
        assert!(time.is_valid());
    }

    #[test]
    fn test_windowed_weekdays() {
        // Thursday 1970-01-01 is epoch; weekday window starting at offset 0.
        let time = SeasonalTime::windowed(DAY, 0, 5 * DAY, WEEK);
        assert!(time.is_windowed());
        assert!(time.in_window(0));
        assert!(time.in_window(4 * DAY + 100));
        assert!(!time.in_window(5 * DAY));
        assert!(!time.in_window(6 * DAY + WEEK));
        assert!(time.in_window(WEEK));
    }

    #[test]
    fn test_ordering_by_period() {
        let day = SeasonalTime::periodic(DAY);
        let week = SeasonalTime::periodic(WEEK);
        assert!(day < week);
    }
}
