//! Time primitives.
//!
//! All engine time is signed 64-bit seconds since the epoch; durations are
//! signed seconds. Civil-time arithmetic only appears at the calendar
//! feature boundary.

/// Seconds since the epoch.
pub type TimePoint = i64;

pub const MINUTE: TimePoint = 60;
pub const HOUR: TimePoint = 3600;
pub const DAY: TimePoint = 86_400;
pub const WEEK: TimePoint = 604_800;
/// Four weeks; the ageing reference for calendar components.
pub const MONTH: TimePoint = 4 * WEEK;

/// Round `time` down to a multiple of `step`.
pub fn floor_to(time: TimePoint, step: TimePoint) -> TimePoint {
    time.div_euclid(step) * step
}

/// Round `time` up to a multiple of `step`.
pub fn ceil_to(time: TimePoint, step: TimePoint) -> TimePoint {
    floor_to(time + step - 1, step)
}
