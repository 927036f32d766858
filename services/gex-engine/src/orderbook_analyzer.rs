//! Order-book microstructure analytics: imbalance, persistence, depth, spread,
//! walls, and a composite sustained-energy score
//!
//! Grounded on `orderbook/src/analytics.rs`'s `MicrostructureAnalytics`: hot
//! scalar outputs live in `AtomicI64` fixed-point gauges for lock-free reads;
//! rolling history lives behind a `parking_lot::RwLock<VecDeque<_>>`.

use crate::types::{BookLevel, Direction, OrderBookSnapshot, Wall};
use parking_lot::RwLock;
use serde::Serialize;
use services_common::Ts;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

const WINDOW_SECS: u64 = 60;
const SCALE: f64 = 10000.0;
const NEUTRAL_EPSILON: f64 = 0.05;

fn to_fixed(value: f64) -> i64 {
    (value * SCALE).round() as i64
}

fn from_fixed(value: i64) -> f64 {
    value as f64 / SCALE
}

#[derive(Debug, Clone)]
struct HistoryPoint {
    ts: Ts,
    bi: f64,
    total_depth: f64,
    spread_pct: f64,
}

/// Bucketed strength of the book imbalance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImbalanceStrength {
    /// |BI| <= 0.3
    Weak,
    /// 0.3 < |BI| <= 0.6
    Moderate,
    /// |BI| > 0.6
    Strong,
}

/// Bucketed sustained-energy level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnergyLevel {
    /// score < 0.33
    Low,
    /// 0.33 <= score < 0.66
    Medium,
    /// score >= 0.66
    High,
}

/// Point-in-time snapshot of all derived order-book metrics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OrderBookMetrics {
    /// Book imbalance in [-1, 1]
    pub bi: f64,
    /// Direction implied by BI
    pub bi_direction: Direction,
    /// Strength bucket of |BI|
    pub bi_strength: ImbalanceStrength,
    /// Fraction of the rolling window with same-sign BI
    pub persistence: f64,
    /// Total bid depth over top-N
    pub bid_depth: f64,
    /// Total ask depth over top-N
    pub ask_depth: f64,
    /// (current total depth - window mean) / window mean
    pub depth_change: f64,
    /// Spread as a fraction of mid, expressed in basis points
    pub spread_bps: f64,
    /// Monotone-decreasing spread quality score in [0, 1]
    pub spread_quality: f64,
    /// Variance of recent spread samples
    pub spread_pulse: f64,
    /// Composite sustained-energy score in [0, 1]
    pub sustained_energy: f64,
    /// Bucketed sustained-energy level
    pub energy_level: EnergyLevel,
}

/// Rolling order-book analytics engine: single writer, many readers
pub struct OrderBookAnalyzer {
    top_n: usize,
    wall_multiplier: f64,
    history: RwLock<VecDeque<HistoryPoint>>,
    bi_fixed: AtomicI64,
    persistence_fixed: AtomicI64,
    depth_change_fixed: AtomicI64,
    spread_quality_fixed: AtomicI64,
    sustained_energy_fixed: AtomicI64,
    bid_depth_fixed: AtomicI64,
    ask_depth_fixed: AtomicI64,
}

impl OrderBookAnalyzer {
    /// Create a new analyzer over the top `top_n` levels of the book
    #[must_use]
    pub fn new(top_n: usize, wall_multiplier: f64) -> Self {
        Self {
            top_n,
            wall_multiplier,
            history: RwLock::new(VecDeque::new()),
            bi_fixed: AtomicI64::new(0),
            persistence_fixed: AtomicI64::new(0),
            depth_change_fixed: AtomicI64::new(0),
            spread_quality_fixed: AtomicI64::new(0),
            sustained_energy_fixed: AtomicI64::new(0),
            bid_depth_fixed: AtomicI64::new(0),
            ask_depth_fixed: AtomicI64::new(0),
        }
    }

    fn depth(levels: &[BookLevel], top_n: usize) -> f64 {
        levels.iter().take(top_n).map(|(_, qty)| qty.as_f64()).sum()
    }

    /// Ingest a new book snapshot and recompute every derived metric
    pub fn update(&self, book: &OrderBookSnapshot) {
        let bid_depth = Self::depth(&book.bids, self.top_n);
        let ask_depth = Self::depth(&book.asks, self.top_n);
        let total = bid_depth + ask_depth;
        let bi = if total > 0.0 { (bid_depth - ask_depth) / total } else { 0.0 };
        let spread_pct = book.spread_pct().unwrap_or(0.0);

        {
            let mut history = self.history.write();
            let cutoff = book.ts.as_nanos().saturating_sub(WINDOW_SECS * 1_000_000_000);
            while history.front().is_some_and(|h| h.ts.as_nanos() < cutoff) {
                history.pop_front();
            }
            history.push_back(HistoryPoint {
                ts: book.ts,
                bi,
                total_depth: total,
                spread_pct,
            });
        }

        self.bi_fixed.store(to_fixed(bi), Ordering::Release);
        self.bid_depth_fixed.store(to_fixed(bid_depth), Ordering::Release);
        self.ask_depth_fixed.store(to_fixed(ask_depth), Ordering::Release);

        let persistence = self.compute_persistence(bi);
        self.persistence_fixed.store(to_fixed(persistence), Ordering::Release);

        let depth_change = self.compute_depth_change(total);
        self.depth_change_fixed.store(to_fixed(depth_change), Ordering::Release);

        let spread_quality = (1.0 - spread_pct.min(1.0)).max(0.0);
        self.spread_quality_fixed.store(to_fixed(spread_quality), Ordering::Release);

        let depth_component = (bid_depth.min(ask_depth) / total.max(1.0)).min(1.0);
        let sustained_energy = (0.4 * bi.abs() + 0.3 * persistence + 0.2 * spread_quality + 0.1 * depth_component).clamp(0.0, 1.0);
        self.sustained_energy_fixed.store(to_fixed(sustained_energy), Ordering::Release);
    }

    fn compute_persistence(&self, current_bi: f64) -> f64 {
        let history = self.history.read();
        if history.is_empty() {
            return 0.0;
        }
        let current_sign = current_bi.signum();
        let same_sign = history.iter().filter(|h| h.bi.signum() == current_sign).count();
        same_sign as f64 / history.len() as f64
    }

    fn compute_depth_change(&self, current_total: f64) -> f64 {
        let history = self.history.read();
        if history.is_empty() {
            return 0.0;
        }
        let mean: f64 = history.iter().map(|h| h.total_depth).sum::<f64>() / history.len() as f64;
        if mean > 0.0 {
            (current_total - mean) / mean
        } else {
            0.0
        }
    }

    /// Variance of recent spread samples
    #[must_use]
    pub fn spread_pulse(&self) -> f64 {
        let history = self.history.read();
        if history.len() < 2 {
            return 0.0;
        }
        let samples: Vec<f64> = history.iter().map(|h| h.spread_pct).collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64
    }

    /// Detect a bid or ask wall: a level whose size is >= `wall_multiplier`
    /// times the average level size on that side
    #[must_use]
    pub fn detect_wall(&self, levels: &[BookLevel], mid: f64) -> Option<Wall> {
        if levels.is_empty() {
            return None;
        }
        let avg = levels.iter().map(|(_, q)| q.as_f64()).sum::<f64>() / levels.len() as f64;
        if avg <= 0.0 {
            return None;
        }
        levels.iter().find(|(_, q)| q.as_f64() >= self.wall_multiplier * avg).map(|(px, qty)| {
            let strike = px.as_f64();
            let distance = (strike - mid).abs();
            Wall {
                strike,
                gex: qty.as_f64(),
                open_interest: 0.0,
                gamma: 0.0,
                distance,
                distance_pct: if mid > 0.0 { distance / mid } else { 0.0 },
            }
        })
    }

    /// Current derived metrics, read lock-free except for the persistence,
    /// depth-change and spread-pulse recomputations
    #[must_use]
    pub fn metrics(&self) -> OrderBookMetrics {
        let bi = from_fixed(self.bi_fixed.load(Ordering::Acquire));
        let bi_direction = if bi > NEUTRAL_EPSILON {
            Direction::Up
        } else if bi < -NEUTRAL_EPSILON {
            Direction::Down
        } else {
            Direction::Neutral
        };
        let bi_strength = if bi.abs() > 0.6 {
            ImbalanceStrength::Strong
        } else if bi.abs() > 0.3 {
            ImbalanceStrength::Moderate
        } else {
            ImbalanceStrength::Weak
        };
        let sustained_energy = from_fixed(self.sustained_energy_fixed.load(Ordering::Acquire));
        let energy_level = if sustained_energy >= 0.66 {
            EnergyLevel::High
        } else if sustained_energy >= 0.33 {
            EnergyLevel::Medium
        } else {
            EnergyLevel::Low
        };

        OrderBookMetrics {
            bi,
            bi_direction,
            bi_strength,
            persistence: from_fixed(self.persistence_fixed.load(Ordering::Acquire)),
            bid_depth: from_fixed(self.bid_depth_fixed.load(Ordering::Acquire)),
            ask_depth: from_fixed(self.ask_depth_fixed.load(Ordering::Acquire)),
            depth_change: from_fixed(self.depth_change_fixed.load(Ordering::Acquire)),
            spread_bps: self.history.read().back().map(|h| h.spread_pct * 10_000.0).unwrap_or(0.0),
            spread_quality: from_fixed(self.spread_quality_fixed.load(Ordering::Acquire)),
            spread_pulse: self.spread_pulse(),
            sustained_energy,
            energy_level,
        }
    }

    /// Rolling history depth currently retained
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services_common::{Px, Qty};

    fn book(ts_secs: u64, bid_qty: f64, ask_qty: f64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            ts: Ts::from_nanos(ts_secs * 1_000_000_000),
            bids: vec![(Px::new(100.0), Qty::new(bid_qty))],
            asks: vec![(Px::new(101.0), Qty::new(ask_qty))],
        }
    }

    #[test]
    fn bullish_imbalance_when_bids_dominate() {
        let analyzer = OrderBookAnalyzer::new(10, 10.0);
        analyzer.update(&book(0, 80.0, 20.0));
        let metrics = analyzer.metrics();
        assert!(metrics.bi > 0.0);
        assert_eq!(metrics.bi_direction, Direction::Up);
    }

    #[test]
    fn sustained_energy_is_clamped_to_unit_interval() {
        let analyzer = OrderBookAnalyzer::new(10, 10.0);
        for i in 0..5 {
            analyzer.update(&book(i, 1000.0, 1.0));
        }
        let metrics = analyzer.metrics();
        assert!((0.0..=1.0).contains(&metrics.sustained_energy));
    }

    #[test]
    fn history_prunes_outside_60s_window() {
        let analyzer = OrderBookAnalyzer::new(10, 10.0);
        analyzer.update(&book(0, 50.0, 50.0));
        analyzer.update(&book(120, 50.0, 50.0));
        assert_eq!(analyzer.history_len(), 1);
    }

    #[test]
    fn wall_detected_when_level_dominates() {
        let analyzer = OrderBookAnalyzer::new(10, 5.0);
        let levels = vec![(Px::new(100.0), Qty::new(1.0)), (Px::new(99.0), Qty::new(10.0))];
        let wall = analyzer.detect_wall(&levels, 100.0);
        assert!(wall.is_some());
    }
}
