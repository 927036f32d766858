//! Bounded, time-ordered liquidation log with cascade/energy/growth analytics
//!
//! Ring buffer with explicit capacity, pruned on insert; range queries use
//! binary search over the monotonically-inserted timestamp axis, per
//! spec.md 9's "do not use unbounded append-then-filter" guidance.

use crate::types::{Direction, LiquidationEvent, LiquidationSide};
use parking_lot::RwLock;
use serde::Serialize;
use services_common::Ts;
use std::collections::VecDeque;

const RETENTION_SECS: u64 = 24 * 3600;
const CASCADE_WINDOW_SECS: u64 = 60;

/// Bucketed injected-energy level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyLevel {
    /// score < 0.2
    VeryLow,
    /// 0.2 <= score < 0.4
    Low,
    /// 0.4 <= score < 0.6
    Medium,
    /// 0.6 <= score < 0.8
    High,
    /// score >= 0.8
    Extreme,
}

/// Aggregate stats over a window
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WindowTotals {
    /// Total notional value
    pub value: f64,
    /// Event count
    pub count: u64,
}

/// Rolled-up liquidation statistics
#[derive(Debug, Clone, Serialize)]
pub struct LiquidationStats {
    /// Totals over the last hour
    pub last_1h: WindowTotals,
    /// Totals over the last 4 hours
    pub last_4h: WindowTotals,
    /// Totals over the last 24 hours
    pub last_24h: WindowTotals,
    /// 1-hour long/short ratio (sell value / buy value, None if buy value is 0)
    pub imbalance_ratio: Option<f64>,
    /// Direction implied by the 1-hour imbalance
    pub imbalance_direction: Direction,
    /// Largest single event by notional value in the retained log
    pub largest_event: Option<LiquidationEvent>,
    /// True when events in the last 60s reached the cascade threshold
    pub cascade: bool,
}

/// Early-spike risk bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlySpikeRisk {
    /// share <= 0.5
    Low,
    /// 0.5 < share <= 0.7
    Medium,
    /// share > 0.7
    High,
}

/// Trend bucket for liquidation growth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthTrend {
    /// Recent 5-minute buckets are increasing
    Increasing,
    /// Roughly flat
    Stable,
    /// Recent 5-minute buckets are decreasing
    Decreasing,
}

/// Bounded time-ordered liquidation log
pub struct LiquidationTracker {
    cascade_threshold: u32,
    events: RwLock<VecDeque<LiquidationEvent>>,
}

impl LiquidationTracker {
    /// Create a new tracker with the given cascade threshold (events/minute)
    #[must_use]
    pub fn new(cascade_threshold: u32) -> Self {
        Self {
            cascade_threshold,
            events: RwLock::new(VecDeque::new()),
        }
    }

    /// Record a new liquidation event, pruning anything older than 24h
    pub fn record(&self, event: LiquidationEvent) {
        let mut events = self.events.write();
        events.push_back(event);
        let cutoff = events
            .back()
            .map(|e| e.ts.as_nanos().saturating_sub(RETENTION_SECS * 1_000_000_000))
            .unwrap_or(0);
        while events.front().is_some_and(|e| e.ts.as_nanos() < cutoff) {
            events.pop_front();
        }
    }

    /// Events in `[t_from, t_to)`, using binary search over the ordered log
    #[must_use]
    pub fn get_liquidations(&self, t_from: Ts, t_to: Ts) -> Vec<LiquidationEvent> {
        let events = self.events.read();
        let start = events.partition_point(|e| e.ts < t_from);
        let end = events.partition_point(|e| e.ts < t_to);
        events.range(start..end).cloned().collect()
    }

    fn window_totals(events: &VecDeque<LiquidationEvent>, now: Ts, window_secs: u64) -> WindowTotals {
        let cutoff = now.as_nanos().saturating_sub(window_secs * 1_000_000_000);
        let start = events.partition_point(|e| e.ts.as_nanos() < cutoff);
        events.range(start..).fold(WindowTotals::default(), |mut acc, e| {
            acc.value += e.value;
            acc.count += 1;
            acc
        })
    }

    /// Aggregate statistics as of `now`
    #[must_use]
    pub fn stats(&self, now: Ts) -> LiquidationStats {
        let events = self.events.read();
        let last_1h = Self::window_totals(&events, now, 3600);
        let last_4h = Self::window_totals(&events, now, 4 * 3600);
        let last_24h = Self::window_totals(&events, now, 24 * 3600);

        let cutoff_1h = now.as_nanos().saturating_sub(3600 * 1_000_000_000);
        let start_1h = events.partition_point(|e| e.ts.as_nanos() < cutoff_1h);
        let (buy_value, sell_value) = events.range(start_1h..).fold((0.0, 0.0), |(b, s), e| match e.side {
            LiquidationSide::Buy => (b + e.value, s),
            LiquidationSide::Sell => (b, s + e.value),
        });
        let imbalance_ratio = if buy_value > 0.0 { Some(sell_value / buy_value) } else { None };
        let imbalance_direction = if sell_value > buy_value {
            Direction::Down
        } else if buy_value > sell_value {
            Direction::Up
        } else {
            Direction::Neutral
        };

        let largest_event = events.iter().max_by(|a, b| a.value.partial_cmp(&b.value).unwrap()).cloned();
        let cascade = Self::events_in_window(&events, now, CASCADE_WINDOW_SECS) >= u64::from(self.cascade_threshold);

        LiquidationStats {
            last_1h,
            last_4h,
            last_24h,
            imbalance_ratio,
            imbalance_direction,
            largest_event,
            cascade,
        }
    }

    fn events_in_window(events: &VecDeque<LiquidationEvent>, now: Ts, window_secs: u64) -> u64 {
        let cutoff = now.as_nanos().saturating_sub(window_secs * 1_000_000_000);
        let start = events.partition_point(|e| e.ts.as_nanos() < cutoff);
        (events.len() - start) as u64
    }

    /// Composite injected-energy score: value 40% + frequency 30% + imbalance
    /// 30%, plus a cascade bonus, clamped to [0, 1]
    #[must_use]
    pub fn energy_score(&self, now: Ts) -> (f64, EnergyLevel, Direction) {
        let stats = self.stats(now);
        let value_component = (stats.last_1h.value / 10_000_000.0).min(1.0);
        let frequency_component = (stats.last_1h.count as f64 / 100.0).min(1.0);
        let imbalance_component = stats.imbalance_ratio.map_or(0.0, |r| (r - 1.0).abs().min(1.0));

        let mut score = 0.4 * value_component + 0.3 * frequency_component + 0.3 * imbalance_component;
        if stats.cascade {
            score += 0.5;
        }
        score = score.clamp(0.0, 1.0);

        let level = if score >= 0.8 {
            EnergyLevel::Extreme
        } else if score >= 0.6 {
            EnergyLevel::High
        } else if score >= 0.4 {
            EnergyLevel::Medium
        } else if score >= 0.2 {
            EnergyLevel::Low
        } else {
            EnergyLevel::VeryLow
        };

        (score, level, stats.imbalance_direction)
    }

    /// Share of total liquidations (in the active window) whose timestamp
    /// lies in the first `minutes` minutes, and the resulting risk bucket
    #[must_use]
    pub fn early_spike(&self, now: Ts, minutes: u64, window_minutes: u64) -> (f64, EarlySpikeRisk) {
        let events = self.events.read();
        let window_start = now.as_nanos().saturating_sub(window_minutes * 60 * 1_000_000_000);
        let early_cutoff = window_start + minutes * 60 * 1_000_000_000;

        let start_idx = events.partition_point(|e| e.ts.as_nanos() < window_start);
        let total = events.len() - start_idx;
        if total == 0 {
            return (0.0, EarlySpikeRisk::Low);
        }
        let early = events.range(start_idx..).filter(|e| e.ts.as_nanos() < early_cutoff).count();
        let share = early as f64 / total as f64;
        let risk = if share > 0.7 {
            EarlySpikeRisk::High
        } else if share > 0.5 {
            EarlySpikeRisk::Medium
        } else {
            EarlySpikeRisk::Low
        };
        (share, risk)
    }

    /// Growth trend across 5-minute buckets of recent liquidations
    #[must_use]
    pub fn growth(&self, now: Ts, lookback_minutes: u64) -> (GrowthTrend, f64) {
        let events = self.events.read();
        let window_start = now.as_nanos().saturating_sub(lookback_minutes * 60 * 1_000_000_000);
        let start_idx = events.partition_point(|e| e.ts.as_nanos() < window_start);

        let bucket_ns = 5 * 60 * 1_000_000_000;
        let num_buckets = (lookback_minutes / 5).max(1) as usize;
        let mut buckets = vec![0u64; num_buckets];
        for event in events.range(start_idx..) {
            let offset = event.ts.as_nanos().saturating_sub(window_start);
            let bucket = (offset / bucket_ns).min(num_buckets as u64 - 1) as usize;
            buckets[bucket] += 1;
        }

        if buckets.len() < 2 {
            return (GrowthTrend::Stable, 0.0);
        }
        let first_half: u64 = buckets[..buckets.len() / 2].iter().sum();
        let second_half: u64 = buckets[buckets.len() / 2..].iter().sum();
        let growth_rate = if first_half > 0 {
            (second_half as f64 - first_half as f64) / first_half as f64
        } else if second_half > 0 {
            1.0
        } else {
            0.0
        };

        let trend = if growth_rate > 0.1 {
            GrowthTrend::Increasing
        } else if growth_rate < -0.1 {
            GrowthTrend::Decreasing
        } else {
            GrowthTrend::Stable
        };
        (trend, growth_rate)
    }

    /// Number of events currently retained
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// True when the tracker holds no events
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services_common::{Px, Qty};

    fn event(ts_secs: u64, side: LiquidationSide, value: f64) -> LiquidationEvent {
        LiquidationEvent::new(Ts::from_nanos(ts_secs * 1_000_000_000), side, Px::new(1.0), Qty::new(value))
    }

    #[test]
    fn scenario_4_cascade_flips_true_with_bearish_direction() {
        let tracker = LiquidationTracker::new(10);
        for i in 0..11 {
            tracker.record(event(i, LiquidationSide::Sell, 10_000.0));
        }
        let now = Ts::from_nanos(10 * 1_000_000_000);
        let stats = tracker.stats(now);
        assert!(stats.cascade);
        let (score, _, direction) = tracker.energy_score(now);
        assert!(score >= 0.5);
        assert_eq!(direction, Direction::Down);
    }

    #[test]
    fn range_query_is_inclusive_exclusive() {
        let tracker = LiquidationTracker::new(10);
        for i in 0..5 {
            tracker.record(event(i, LiquidationSide::Buy, 1.0));
        }
        let slice = tracker.get_liquidations(Ts::from_nanos(1_000_000_000), Ts::from_nanos(3_000_000_000));
        assert_eq!(slice.len(), 2);
        assert_eq!(slice[0].ts, Ts::from_nanos(1_000_000_000));
    }

    #[test]
    fn cascade_flips_back_as_events_age_out() {
        let tracker = LiquidationTracker::new(10);
        for i in 0..11 {
            tracker.record(event(i, LiquidationSide::Sell, 1.0));
        }
        let later = Ts::from_nanos(200 * 1_000_000_000);
        assert!(!tracker.stats(later).cascade);
    }

    #[test]
    fn pruning_respects_24h_retention() {
        let tracker = LiquidationTracker::new(10);
        tracker.record(event(0, LiquidationSide::Buy, 1.0));
        tracker.record(event(25 * 3600, LiquidationSide::Buy, 1.0));
        assert_eq!(tracker.len(), 1);
    }
}
