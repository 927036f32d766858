//! Constants shared by the analytics core
//!
//! Single source of truth for the magic numbers `Px`/`Qty`/`Ts` build on.

/// Fixed-point scale factor (4 decimal places)
pub const FIXED_POINT_SCALE: i64 = 10000;
pub const FIXED_POINT_SCALE_F64: f64 = 10000.0;

// Time constants
pub const NANOS_PER_SEC: u64 = 1_000_000_000;
pub const NANOS_PER_MILLI: u64 = 1_000_000;
pub const NANOS_PER_MICRO: u64 = 1_000;
pub const SECS_PER_MIN: u64 = 60;
pub const MINS_PER_HOUR: u64 = 60;
pub const HOURS_PER_DAY: u64 = 24;
pub const SECS_PER_HOUR: u64 = SECS_PER_MIN * MINS_PER_HOUR;
pub const SECS_PER_DAY: u64 = SECS_PER_HOUR * HOURS_PER_DAY;
