//! Hidden-liquidity (iceberg order) detection
//!
//! Four bounded rolling histories behind `parking_lot::RwLock`, five
//! independent signal functions, weighted composite. Grounded on the same
//! rolling-buffer + atomic-score idiom as the order-book analyzer.

use crate::config::IcebergThresholds;
use crate::types::{BookLevel, OrderBookSnapshot};
use parking_lot::RwLock;
use services_common::Ts;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

const SCALE: f64 = 10000.0;
const SNAPSHOT_HISTORY_CAP: usize = 300;
const TRADE_HISTORY_SECS: u64 = 300;
const DEPTH_HISTORY_CAP: usize = 120;

const REFILL_MIN_LEVELS: usize = 3;
const REFILL_SIZE_CAP_BTC: f64 = 5.0;

const REJECTION_BUCKET: f64 = 100.0;
const REJECTION_MIN_OCCURRENCES: u32 = 2;

const REGEN_MIN_SEQUENCES: usize = 2;

const CONSISTENT_SIZE_BIN: f64 = 0.1;

const WEIGHTS: [f64; 5] = [0.30, 0.25, 0.20, 0.15, 0.10];

fn to_fixed(value: f64) -> i64 {
    (value * SCALE).round() as i64
}

fn from_fixed(value: i64) -> f64 {
    value as f64 / SCALE
}

fn round_to_bin(value: f64, bin: f64) -> i64 {
    (value / bin).round() as i64
}

#[derive(Debug, Clone)]
struct TradeRecord {
    ts: Ts,
    volume: f64,
}

/// Bucketed detection confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcebergConfidence {
    /// score < 0.15
    VeryLow,
    /// 0.15 <= score < 0.3
    Low,
    /// 0.3 <= score < 0.5
    Medium,
    /// 0.5 <= score < 0.7
    High,
    /// score >= 0.7
    VeryHigh,
}

/// Per-signal detection result
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalResult {
    /// Whether the signal's condition fired
    pub detected: bool,
    /// Normalized strength of the signal in [0, 1]
    pub sub_score: f64,
}

/// Iceberg-detection output for one `detect` call
#[derive(Debug, Clone, Copy)]
pub struct IcebergResult {
    /// Refilling-pattern signal
    pub refilling: SignalResult,
    /// Volume-anomaly signal
    pub volume_anomaly: SignalResult,
    /// Price-rejection signal
    pub price_rejection: SignalResult,
    /// Depth-regeneration signal
    pub depth_regeneration: SignalResult,
    /// Consistent-size signal
    pub consistent_size: SignalResult,
    /// Weighted composite score, clamped to [0, 1]
    pub score: f64,
    /// Bucketed confidence
    pub confidence: IcebergConfidence,
    /// Estimated hidden size behind the visible top-5
    pub estimated_hidden_size: f64,
}

/// Rolling iceberg detector over one book's asks/bids
pub struct IcebergDetector {
    thresholds: IcebergThresholds,
    snapshots: RwLock<VecDeque<OrderBookSnapshot>>,
    trades: RwLock<VecDeque<TradeRecord>>,
    mid_prices: RwLock<VecDeque<(Ts, f64)>>,
    depth_history: RwLock<VecDeque<(Ts, f64)>>,
    score_fixed: AtomicI64,
}

impl Default for IcebergDetector {
    fn default() -> Self {
        Self::new(IcebergThresholds::default())
    }
}

impl IcebergDetector {
    /// Create an empty detector with the given thresholds
    #[must_use]
    pub fn new(thresholds: IcebergThresholds) -> Self {
        Self {
            thresholds,
            snapshots: RwLock::new(VecDeque::new()),
            trades: RwLock::new(VecDeque::new()),
            mid_prices: RwLock::new(VecDeque::new()),
            depth_history: RwLock::new(VecDeque::new()),
            score_fixed: AtomicI64::new(0),
        }
    }

    /// Record an executed trade (for the volume-anomaly signal)
    pub fn record_trade(&self, ts: Ts, volume: f64) {
        let mut trades = self.trades.write();
        trades.push_back(TradeRecord { ts, volume });
        let cutoff = ts.as_nanos().saturating_sub(TRADE_HISTORY_SECS * 1_000_000_000);
        while trades.front().is_some_and(|t| t.ts.as_nanos() < cutoff) {
            trades.pop_front();
        }
    }

    fn update_histories(&self, book: &OrderBookSnapshot) {
        {
            let mut snapshots = self.snapshots.write();
            snapshots.push_back(book.clone());
            while snapshots.len() > SNAPSHOT_HISTORY_CAP {
                snapshots.pop_front();
            }
        }
        if let Some(mid) = book.mid() {
            let mut mids = self.mid_prices.write();
            mids.push_back((book.ts, mid));
            while mids.len() > SNAPSHOT_HISTORY_CAP {
                mids.pop_front();
            }
        }
        let depth: f64 = book.bids.iter().chain(book.asks.iter()).map(|(_, q)| q.as_f64()).sum();
        let mut depths = self.depth_history.write();
        depths.push_back((book.ts, depth));
        while depths.len() > DEPTH_HISTORY_CAP {
            depths.pop_front();
        }
    }

    fn refilling_pattern(&self) -> SignalResult {
        use std::collections::HashMap;
        let snapshots = self.snapshots.read();
        let mut counts: HashMap<(i64, i64), u32> = HashMap::new();
        for snap in snapshots.iter() {
            for (px, qty) in snap.asks.iter().chain(snap.bids.iter()) {
                let size = qty.as_f64();
                if size >= REFILL_SIZE_CAP_BTC {
                    continue;
                }
                let key = (round_to_bin(px.as_f64(), 1.0), round_to_bin(size, 0.01));
                *counts.entry(key).or_insert(0) += 1;
            }
        }
        let qualifying = counts.values().filter(|&&c| c >= self.thresholds.refilling_min_occurrences).count();
        let detected = qualifying >= REFILL_MIN_LEVELS;
        let sub_score = (qualifying as f64 / REFILL_MIN_LEVELS as f64).min(1.0);
        SignalResult { detected, sub_score }
    }

    fn volume_anomaly(&self, book: &OrderBookSnapshot) -> SignalResult {
        let executed: f64 = self.trades.read().iter().map(|t| t.volume).sum();
        let visible: f64 = book.asks.iter().take(10).map(|(_, q)| q.as_f64()).sum();
        if visible <= 0.0 {
            return SignalResult::default();
        }
        let ratio = executed / visible;
        let detected = ratio >= self.thresholds.volume_anomaly_ratio;
        let sub_score = (ratio / self.thresholds.volume_anomaly_ratio).min(1.0);
        SignalResult { detected, sub_score }
    }

    fn price_rejection(&self) -> SignalResult {
        use std::collections::HashMap;
        let mids = self.mid_prices.read();
        if mids.len() < 3 {
            return SignalResult::default();
        }
        let values: Vec<f64> = mids.iter().map(|(_, m)| *m).collect();
        let mut extrema_buckets: HashMap<i64, u32> = HashMap::new();
        for i in 1..values.len() - 1 {
            let (prev, cur, next) = (values[i - 1], values[i], values[i + 1]);
            if (cur > prev && cur > next) || (cur < prev && cur < next) {
                let bucket = round_to_bin(cur, REJECTION_BUCKET);
                *extrema_buckets.entry(bucket).or_insert(0) += 1;
            }
        }
        let recurring = extrema_buckets.values().filter(|&&c| c >= REJECTION_MIN_OCCURRENCES).count();
        let min_levels = self.thresholds.rejection_min_count as usize;
        let detected = recurring >= min_levels;
        let sub_score = (recurring as f64 / min_levels.max(1) as f64).min(1.0);
        SignalResult { detected, sub_score }
    }

    fn depth_regeneration(&self) -> SignalResult {
        let depths = self.depth_history.read();
        if depths.len() < 3 {
            return SignalResult::default();
        }
        let values: Vec<f64> = depths.iter().map(|(_, d)| *d).collect();
        let mut sequences = 0usize;
        let mut i = 0;
        while i + 1 < values.len() {
            let base = values[i];
            if base <= 0.0 {
                i += 1;
                continue;
            }
            let mut dropped_to = None;
            let mut j = i + 1;
            while j < values.len() {
                let drop = (base - values[j]) / base;
                if drop >= self.thresholds.regen_min_drop {
                    dropped_to = Some((j, values[j]));
                    break;
                }
                j += 1;
            }
            let Some((drop_idx, trough)) = dropped_to else {
                i += 1;
                continue;
            };
            let recovered = values[drop_idx + 1..]
                .iter()
                .any(|&v| trough > 0.0 && (v - trough) / trough >= self.thresholds.regen_min_recovery);
            if recovered {
                sequences += 1;
            }
            i = drop_idx + 1;
        }
        let detected = sequences >= REGEN_MIN_SEQUENCES;
        let sub_score = (sequences as f64 / REGEN_MIN_SEQUENCES as f64).min(1.0);
        SignalResult { detected, sub_score }
    }

    fn consistent_size(&self, asks: &[BookLevel]) -> SignalResult {
        use std::collections::HashMap;
        let mut counts: HashMap<i64, u32> = HashMap::new();
        for (_, qty) in asks {
            let bucket = round_to_bin(qty.as_f64(), CONSISTENT_SIZE_BIN);
            *counts.entry(bucket).or_insert(0) += 1;
        }
        let max_count = counts.values().copied().max().unwrap_or(0);
        let detected = max_count >= self.thresholds.consistent_size_min_occurrences;
        let sub_score = (f64::from(max_count) / f64::from(self.thresholds.consistent_size_min_occurrences)).min(1.0);
        SignalResult { detected, sub_score }
    }

    /// Update rolling state from a new book snapshot and evaluate all five
    /// signals, returning the composite result
    pub fn detect(&self, book: &OrderBookSnapshot) -> IcebergResult {
        self.update_histories(book);

        let refilling = self.refilling_pattern();
        let volume_anomaly = self.volume_anomaly(book);
        let price_rejection = self.price_rejection();
        let depth_regeneration = self.depth_regeneration();
        let consistent_size = self.consistent_size(&book.asks);

        let signals = [refilling, volume_anomaly, price_rejection, depth_regeneration, consistent_size];
        let score: f64 = signals
            .iter()
            .zip(WEIGHTS)
            .filter(|(signal, _)| signal.detected)
            .map(|(signal, w)| signal.sub_score * w)
            .sum::<f64>()
            .clamp(0.0, 1.0);
        self.score_fixed.store(to_fixed(score), Ordering::Release);

        let confidence = if score >= 0.7 {
            IcebergConfidence::VeryHigh
        } else if score >= 0.5 {
            IcebergConfidence::High
        } else if score >= 0.3 {
            IcebergConfidence::Medium
        } else if score >= 0.15 {
            IcebergConfidence::Low
        } else {
            IcebergConfidence::VeryLow
        };

        let visible_top5: f64 = book.asks.iter().take(5).map(|(_, q)| q.as_f64()).sum();
        let estimated_hidden_size = visible_top5 * (1.0 + 10.0 * score) - visible_top5;

        IcebergResult {
            refilling,
            volume_anomaly,
            price_rejection,
            depth_regeneration,
            consistent_size,
            score,
            confidence,
            estimated_hidden_size,
        }
    }

    /// Current composite score, read lock-free
    #[must_use]
    pub fn current_score(&self) -> f64 {
        from_fixed(self.score_fixed.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services_common::{Px, Qty};

    fn book(ts_secs: u64, ask_size: f64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            ts: Ts::from_nanos(ts_secs * 1_000_000_000),
            bids: vec![(Px::new(100.0), Qty::new(10.0))],
            asks: vec![
                (Px::new(101.0), Qty::new(ask_size)),
                (Px::new(101.1), Qty::new(ask_size)),
                (Px::new(101.2), Qty::new(ask_size)),
                (Px::new(101.3), Qty::new(ask_size)),
                (Px::new(101.4), Qty::new(ask_size)),
            ],
        }
    }

    #[test]
    fn refilling_pattern_fires_on_recurring_small_size() {
        let detector = IcebergDetector::new(IcebergThresholds::default());
        let mut result = IcebergResult {
            refilling: SignalResult::default(),
            volume_anomaly: SignalResult::default(),
            price_rejection: SignalResult::default(),
            depth_regeneration: SignalResult::default(),
            consistent_size: SignalResult::default(),
            score: 0.0,
            confidence: IcebergConfidence::VeryLow,
            estimated_hidden_size: 0.0,
        };
        for i in 0..6 {
            result = detector.detect(&book(i, 1.0));
        }
        assert!(result.refilling.detected);
        assert!(result.consistent_size.detected);
    }

    #[test]
    fn score_is_clamped_and_confidence_bucketed() {
        let detector = IcebergDetector::new(IcebergThresholds::default());
        let result = detector.detect(&book(0, 1.0));
        assert!((0.0..=1.0).contains(&result.score));
        assert!((detector.current_score() - result.score).abs() < 1e-9);
    }

    #[test]
    fn volume_anomaly_requires_executed_vs_visible_ratio() {
        let detector = IcebergDetector::new(IcebergThresholds::default());
        detector.record_trade(Ts::from_nanos(0), 100.0);
        let result = detector.detect(&book(0, 1.0));
        assert!(result.volume_anomaly.detected);
    }

    #[test]
    fn estimated_hidden_size_scales_with_score() {
        let detector = IcebergDetector::new(IcebergThresholds::default());
        let result = detector.detect(&book(0, 2.0));
        let visible_top5 = 10.0;
        assert!((result.estimated_hidden_size - (visible_top5 * (1.0 + 10.0 * result.score) - visible_top5)).abs() < 1e-9);
    }
}
