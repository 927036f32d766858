//! Fixed-point price/quantity/timestamp types
//!
//! Order-book levels and liquidation events are stored as ticks, not `f64`,
//! so that two threads reading the same rolling history never observe a
//! value that depends on float rounding order. Strikes, spot, Greeks and IV
//! stay plain `f64` throughout the rest of the crate — those are already
//! pre-computed upstream and only ever read, never accumulated into.

use crate::constants::{FIXED_POINT_SCALE, FIXED_POINT_SCALE_F64, NANOS_PER_MICRO, NANOS_PER_MILLI};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Price stored as i64 ticks (1 tick = 0.0001 units)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Px(i64);

impl Px {
    /// Zero price
    pub const ZERO: Self = Self(0);

    /// Build from a floating-point value (external API boundary only)
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self((value * FIXED_POINT_SCALE_F64).round() as i64)
    }

    /// Price as `f64` (external API boundary only; prefer `as_i64` internally)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / FIXED_POINT_SCALE_F64
    }

    /// Raw tick value
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    /// Build from a raw tick value
    #[must_use]
    pub const fn from_i64(ticks: i64) -> Self {
        Self(ticks)
    }

    /// Add two prices
    #[must_use]
    pub const fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }

    /// Subtract two prices
    #[must_use]
    pub const fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }
}

impl fmt::Display for Px {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / FIXED_POINT_SCALE;
        let frac = (self.0 % FIXED_POINT_SCALE).abs();
        write!(f, "{whole}.{frac:04}")
    }
}

/// Quantity stored as i64 units (1 unit = 0.0001)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Qty(i64);

impl Qty {
    /// Zero quantity
    pub const ZERO: Self = Self(0);

    /// Build from a floating-point value (external API boundary only)
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self((value * FIXED_POINT_SCALE_F64).round() as i64)
    }

    /// Quantity as `f64` (external API boundary only; prefer `as_i64` internally)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / FIXED_POINT_SCALE_F64
    }

    /// Raw unit value
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    /// Build from a raw unit value
    #[must_use]
    pub const fn from_i64(units: i64) -> Self {
        Self(units)
    }

    /// True when this quantity is exactly zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Add two quantities
    #[must_use]
    pub const fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }

    /// Subtract two quantities
    #[must_use]
    pub const fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / FIXED_POINT_SCALE;
        let frac = (self.0 % FIXED_POINT_SCALE).abs();
        write!(f, "{whole}.{frac:04}")
    }
}

/// Timestamp in nanoseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ts(pub u64);

impl Ts {
    /// Current wall-clock time
    #[must_use]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0));
        Self(duration.as_secs() * 1_000_000_000 + u64::from(duration.subsec_nanos()))
    }

    /// Build from a raw nanosecond value
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Build from a millisecond value
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * NANOS_PER_MILLI)
    }

    /// Build from a chrono UTC timestamp
    #[must_use]
    pub fn from_chrono(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self(u64::try_from(dt.timestamp_nanos_opt().unwrap_or(0)).unwrap_or(0))
    }

    /// Convert to a chrono UTC timestamp
    #[must_use]
    pub fn to_chrono(self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp(
            (self.0 / 1_000_000_000) as i64,
            (self.0 % 1_000_000_000) as u32,
        )
        .unwrap_or_default()
    }

    /// Raw nanosecond value
    #[must_use]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Microsecond value
    #[must_use]
    pub const fn as_micros(&self) -> u64 {
        self.0 / NANOS_PER_MICRO
    }

    /// Millisecond value
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0 / NANOS_PER_MILLI
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn px_roundtrips_through_json() {
        let px = Px::from_i64(12_345_600);
        let encoded = serde_json::to_string(&px).unwrap();
        let decoded: Px = serde_json::from_str(&encoded).unwrap();
        assert_eq!(px, decoded);
    }

    #[test]
    fn qty_roundtrips_through_json() {
        let qty = Qty::new(100.0);
        let encoded = serde_json::to_string(&qty).unwrap();
        let decoded: Qty = serde_json::from_str(&encoded).unwrap();
        assert_eq!(qty, decoded);
    }

    #[test]
    fn ts_conversions_agree() {
        let ts = Ts::from_nanos(1_234_567_890);
        assert_eq!(ts.as_nanos(), 1_234_567_890);
        assert_eq!(ts.as_micros(), 1_234_567);
        assert_eq!(ts.as_millis(), 1_234);
    }

    #[test]
    fn ts_chrono_roundtrip_is_second_accurate() {
        let now = chrono::Utc::now();
        let ts = Ts::from_chrono(now);
        let back = ts.to_chrono();
        assert_eq!(now.timestamp(), back.timestamp());
    }
}
