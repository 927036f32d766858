//! TTL-bounded metrics cache and the snapshot persistence sink
//!
//! The cache guards the expensive GEX/surface recomputation behind a single
//! `RwLock<Option<(Instant, _)>>` slot, the same shape `risk-manager` uses
//! for its position-limits cache. `SnapshotSink` is the persistence seam a
//! periodic `tokio::time::interval` task (driven from `main`, since composing
//! a snapshot is async) hands completed `MarketSnapshot`s to.

use crate::types::{Anomaly, MarketSnapshot, RegimeLabel, Sentiment};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::time::{Duration, Instant};

/// Full metrics bundle attached by a cache refresh
#[derive(Debug, Clone)]
pub struct MetricsBundle {
    /// Net total GEX
    pub total_gex: f64,
    /// Strike with the largest-magnitude GEX
    pub max_gex_strike: f64,
    /// Current regime label
    pub regime: RegimeLabel,
    /// Max-pain strike
    pub max_pain_strike: f64,
    /// Max-pain total OI
    pub max_pain_total_oi: f64,
    /// Sentiment bucket
    pub sentiment: Sentiment,
    /// Put/call OI ratio
    pub pc_oi_ratio: f64,
    /// Put/call volume ratio
    pub pc_volume_ratio: f64,
    /// Anomalies observed at computation time
    pub anomalies: Vec<Anomaly>,
}

/// TTL-bounded single-slot cache for the metrics bundle
pub struct MetricCache {
    ttl: Duration,
    slot: RwLock<Option<(Instant, MetricsBundle)>>,
}

impl MetricCache {
    /// Create a cache with the given TTL
    #[must_use]
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            slot: RwLock::new(None),
        }
    }

    /// Return the cached bundle if still within TTL
    #[must_use]
    pub fn get(&self) -> Option<MetricsBundle> {
        let slot = self.slot.read();
        slot.as_ref().and_then(|(at, bundle)| if at.elapsed() < self.ttl { Some(bundle.clone()) } else { None })
    }

    /// Recompute via `compute` if the cache is stale, otherwise return the
    /// cached value
    pub fn get_or_compute(&self, compute: impl FnOnce() -> MetricsBundle) -> MetricsBundle {
        if let Some(bundle) = self.get() {
            return bundle;
        }
        let bundle = compute();
        *self.slot.write() = Some((Instant::now(), bundle.clone()));
        bundle
    }

    /// Force-invalidate the cached value
    pub fn invalidate(&self) {
        *self.slot.write() = None;
    }
}

/// External persistence target for periodic `MarketSnapshot`s
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Persist one snapshot; errors are logged and swallowed by the dispatcher
    async fn write(&self, snapshot: MarketSnapshot) -> anyhow::Result<()>;
}

/// In-memory sink retaining the last `capacity` snapshots; used in tests and
/// as a safe default when no external sink is wired
pub struct InMemorySink {
    capacity: usize,
    snapshots: RwLock<Vec<MarketSnapshot>>,
}

impl InMemorySink {
    /// Create a sink retaining at most `capacity` snapshots
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            snapshots: RwLock::new(Vec::new()),
        }
    }

    /// Currently retained snapshots, oldest first
    #[must_use]
    pub fn snapshots(&self) -> Vec<MarketSnapshot> {
        self.snapshots.read().clone()
    }
}

#[async_trait]
impl SnapshotSink for InMemorySink {
    async fn write(&self, snapshot: MarketSnapshot) -> anyhow::Result<()> {
        let mut snapshots = self.snapshots.write();
        snapshots.push(snapshot);
        if snapshots.len() > self.capacity {
            let drop_count = snapshots.len() - self.capacity;
            snapshots.drain(0..drop_count);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services_common::Ts;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn bundle() -> MetricsBundle {
        MetricsBundle {
            total_gex: 1.0,
            max_gex_strike: 100.0,
            regime: RegimeLabel::PositiveGammaAboveFlip,
            max_pain_strike: 100.0,
            max_pain_total_oi: 1.0,
            sentiment: Sentiment::Neutral,
            pc_oi_ratio: 1.0,
            pc_volume_ratio: 1.0,
            anomalies: Vec::new(),
        }
    }

    #[test]
    fn recomputes_only_once_within_ttl() {
        let cache = MetricCache::new(5);
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            cache.get_or_compute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                bundle()
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidate_forces_recompute() {
        let cache = MetricCache::new(5);
        cache.get_or_compute(bundle);
        cache.invalidate();
        assert!(cache.get().is_none());
    }

    #[tokio::test]
    async fn in_memory_sink_bounds_retained_snapshots() {
        let sink = InMemorySink::new(2);
        for i in 0..5u64 {
            sink.write(MarketSnapshot {
                ts: Ts::from_nanos(i),
                spot: 0.0,
                total_gex: 0.0,
                max_gex_strike: 0.0,
                regime: RegimeLabel::PositiveGammaAboveFlip,
                max_pain_strike: 0.0,
                max_pain_total_oi: 0.0,
                sentiment: Sentiment::Neutral,
                pc_oi_ratio: 0.0,
                pc_volume_ratio: 0.0,
                anomalies: Vec::new(),
            })
            .await
            .unwrap();
        }
        assert_eq!(sink.snapshots().len(), 2);
    }
}
