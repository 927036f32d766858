//! Engine facade: the crate's single entry point, one method per query class
//!
//! Owns every component and composes their outputs. No component lock is
//! ever held across an `.await` point (escape/liquidation/orderbook/iceberg
//! reads are synchronous snapshots taken before any suspension).

use crate::cache::{MetricCache, MetricsBundle};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::escape::{EscapeDetector, LiquidationInputs, OrderBookInputs, TickInputs};
use crate::gex;
use crate::iceberg::IcebergDetector;
use crate::liquidation::LiquidationTracker;
use crate::option_store::OptionStore;
use crate::orderbook_analyzer::OrderBookAnalyzer;
use crate::regime;
use crate::strategy::{self, MarketConditions};
use crate::types::{
    Alert, Anomaly, Detection, DetectionHistoryEntry, GammaFlip, GammaProfilePoint, MarketSnapshot, MaxPain, OptionContract,
    OrderBookSnapshot, RegimeLabel, Sentiment, Side, TotalGex, VolSurface, Wall, WallZone,
};
use crate::vol_anomaly;
use crate::vol_surface;
use services_common::Ts;
use std::sync::atomic::{AtomicU64, Ordering};

fn spot_to_bits(spot: f64) -> u64 {
    spot.to_bits()
}

fn spot_from_bits(bits: u64) -> f64 {
    f64::from_bits(bits)
}

/// Snapshot of every GEX-derived quantity for one query
#[derive(Debug, Clone)]
pub struct GexView {
    /// Per-strike gamma profile, sorted ascending by strike
    pub profile: Vec<GammaProfilePoint>,
    /// Net total GEX breakdown
    pub total: TotalGex,
    /// Gamma-flip estimate
    pub flip: Option<GammaFlip>,
    /// Put wall
    pub put_wall: Option<Wall>,
    /// Call wall
    pub call_wall: Option<Wall>,
    /// Put-side wall zone
    pub put_zone: Option<WallZone>,
    /// Call-side wall zone
    pub call_zone: Option<WallZone>,
}

/// Ingestion/readiness snapshot for the status endpoint
#[derive(Debug, Clone)]
pub struct EngineStatus {
    /// Underlying symbol this engine instance tracks
    pub underlying: String,
    /// Whether a spot price has ever been set
    pub spot_primed: bool,
    /// Whether an order-book snapshot has ever been ingested
    pub order_book_primed: bool,
    /// Number of option contracts currently stored
    pub option_count: usize,
    /// Number of unique strikes
    pub unique_strikes: usize,
    /// Number of unique expiries
    pub unique_expiries: usize,
    /// Number of liquidation events currently retained
    pub liquidation_count: usize,
}

/// The analytics core: owns every component, exposes semantic query methods
pub struct Engine {
    config: EngineConfig,
    spot_bits: AtomicU64,
    options: OptionStore,
    order_book: OrderBookAnalyzer,
    liquidations: LiquidationTracker,
    iceberg: IcebergDetector,
    escape: EscapeDetector,
    cache: MetricCache,
    latest_book: parking_lot::RwLock<Option<OrderBookSnapshot>>,
    latest_detection: parking_lot::RwLock<Option<Detection>>,
}

impl Engine {
    /// Build a new engine from configuration
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let cache = MetricCache::new(config.metric_cache_ttl_secs);
        let order_book = OrderBookAnalyzer::new(config.orderbook_top_n, config.orderbook_wall_multiplier);
        let liquidations = LiquidationTracker::new(config.cascade_threshold);
        let iceberg = IcebergDetector::new(config.iceberg.clone());
        Self {
            config,
            spot_bits: AtomicU64::new(spot_to_bits(0.0)),
            options: OptionStore::new(),
            order_book,
            liquidations,
            iceberg,
            escape: EscapeDetector::new(),
            cache,
            latest_book: parking_lot::RwLock::new(None),
            latest_detection: parking_lot::RwLock::new(None),
        }
    }

    /// Read-only access to the option store, for ingestion adapters
    #[must_use]
    pub fn options(&self) -> &OptionStore {
        &self.options
    }

    /// Read-only access to the liquidation tracker, for ingestion adapters
    #[must_use]
    pub fn liquidations(&self) -> &LiquidationTracker {
        &self.liquidations
    }

    /// Update the current spot price
    pub fn set_spot(&self, spot: f64) {
        self.spot_bits.store(spot_to_bits(spot), Ordering::Release);
    }

    /// Current spot price, 0.0 if never set
    #[must_use]
    pub fn spot(&self) -> f64 {
        spot_from_bits(self.spot_bits.load(Ordering::Acquire))
    }

    /// Ingest a new order-book snapshot, updating both the analyzer and the
    /// iceberg detector's rolling history
    pub fn ingest_order_book(&self, book: OrderBookSnapshot) {
        self.order_book.update(&book);
        self.iceberg.detect(&book);
        *self.latest_book.write() = Some(book);
    }

    fn compute_gex(&self) -> GexView {
        let options = self.options.snapshot();
        let spot = self.spot();
        let profile = gex::gamma_profile(&options, spot);
        let total = gex::total_gex(&profile);
        let flip = gex::gamma_flip(&profile);
        let put_wall = gex::put_wall(&profile, spot);
        let call_wall = gex::call_wall(&profile, spot);
        let put_zone = gex::wall_zone(&profile, Side::Put, self.config.wall_zone_threshold);
        let call_zone = gex::wall_zone(&profile, Side::Call, self.config.wall_zone_threshold);
        GexView {
            profile,
            total,
            flip,
            put_wall,
            call_wall,
            put_zone,
            call_zone,
        }
    }

    /// Current GEX view, recomputed fresh each call (pure function over the
    /// option store's snapshot; cached at the metrics-bundle level via
    /// `metrics_bundle`)
    pub async fn gex_view(&self) -> GexView {
        self.compute_gex()
    }

    /// Strikes kept by the smart-range filter, plus range/compression info
    pub async fn smart_range(&self) -> (Vec<GammaProfilePoint>, gex::RangeInfo) {
        let view = self.compute_gex();
        let spot = self.spot();
        let zones: Vec<WallZone> = [view.put_zone, view.call_zone].into_iter().flatten().collect();
        gex::smart_range(&view.profile, spot, &zones, self.config.smart_range_pct, self.config.smart_range_gex_threshold_pct)
    }

    /// Build the current volatility surface, if any eligible option exists
    pub async fn volatility_surface(&self, now: Ts) -> Option<VolSurface> {
        let options = self.options.snapshot();
        vol_surface::build_surface(&options, self.spot(), now)
    }

    /// Detect IV and skew anomalies against the current surface
    pub async fn volatility_anomalies(&self, now: Ts) -> Vec<Anomaly> {
        let options = self.options.snapshot();
        let points = vol_surface::surface_points(&options, self.spot(), now);
        vol_anomaly::detect_anomalies(&points, self.config.anomaly_z_threshold)
    }

    /// Options filtered by side
    pub async fn options_by_side(&self, side: Side) -> Vec<OptionContract> {
        self.options.by_side(side)
    }

    /// Options at a given strike
    pub async fn options_by_strike(&self, strike: f64) -> Vec<OptionContract> {
        self.options.by_strike(strike)
    }

    /// Options expiring at a given timestamp
    pub async fn options_by_expiry(&self, expiry: Ts) -> Vec<OptionContract> {
        self.options.by_expiry(expiry)
    }

    /// Strike with maximum aggregated open interest, and the top-10 breakdown
    ///
    /// Non-classic labeled semantics: maximum total OI, not the dealer-PnL
    /// minimum-payout strike a "max pain" name usually implies.
    pub async fn max_pain(&self) -> Option<MaxPain> {
        let options = self.options.snapshot();
        if options.is_empty() {
            return None;
        }
        use std::collections::BTreeMap;
        let mut by_strike: BTreeMap<u64, f64> = BTreeMap::new();
        for option in &options {
            *by_strike.entry(option.strike.to_bits()).or_insert(0.0) += option.open_interest;
        }
        let mut strikes: Vec<(f64, f64)> = by_strike.into_iter().map(|(bits, oi)| (f64::from_bits(bits), oi)).collect();
        strikes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let (strike, total_oi) = strikes.first().copied()?;
        let top_strikes = strikes.into_iter().take(10).collect();
        Some(MaxPain {
            strike,
            total_oi,
            top_strikes,
        })
    }

    /// Put/call sentiment derived from OI and volume ratios
    pub async fn sentiment(&self) -> (Sentiment, f64, f64) {
        let options = self.options.snapshot();
        let (put_oi, call_oi) = options.iter().fold((0.0, 0.0), |(p, c), o| match o.side {
            Side::Put => (p + o.open_interest, c),
            Side::Call => (p, c + o.open_interest),
        });
        let (put_vol, call_vol) = options.iter().fold((0.0, 0.0), |(p, c), o| match o.side {
            Side::Put => (p + o.volume, c),
            Side::Call => (p, c + o.volume),
        });
        let pc_oi_ratio = if call_oi > 0.0 { put_oi / call_oi } else { 0.0 };
        let pc_volume_ratio = if call_vol > 0.0 { put_vol / call_vol } else { 0.0 };

        let sentiment = if pc_oi_ratio < 0.7 {
            Sentiment::VeryBullish
        } else if pc_oi_ratio < 0.9 {
            Sentiment::Bullish
        } else if pc_oi_ratio < 1.1 {
            Sentiment::Neutral
        } else if pc_oi_ratio < 1.3 {
            Sentiment::Bearish
        } else {
            Sentiment::VeryBearish
        };

        (sentiment, pc_oi_ratio, pc_volume_ratio)
    }

    /// Liquidation events in `[t_from, t_to)`
    pub async fn liquidations_in_range(&self, t_from: Ts, t_to: Ts) -> Vec<crate::types::LiquidationEvent> {
        self.liquidations.get_liquidations(t_from, t_to)
    }

    /// Liquidation stats, energy score, early-spike and growth readings
    pub async fn liquidation_summary(&self, now: Ts) -> crate::liquidation::LiquidationStats {
        self.liquidations.stats(now)
    }

    /// Current order-book metrics, or a precondition error if no book has
    /// been ingested yet
    pub async fn order_book_metrics(&self) -> EngineResult<crate::orderbook_analyzer::OrderBookMetrics> {
        if self.latest_book.read().is_none() {
            return Err(EngineError::QueryPrecondition("no order book ingested yet".to_string()));
        }
        Ok(self.order_book.metrics())
    }

    /// Run one escape-detector tick, sampling every dependency's current
    /// output through its own lock/snapshot method
    pub async fn run_escape_tick(&self, now: Ts) -> Detection {
        let book = self.latest_book.read().clone();
        let spot = self.spot();
        let spot = if spot > 0.0 { Some(spot) } else { None };

        let order_book = book.as_ref().map(|b| {
            let metrics = self.order_book.metrics();
            OrderBookInputs {
                bi: metrics.bi,
                bi_direction: metrics.bi_direction,
                persistence: metrics.persistence,
                depth_change: metrics.depth_change,
                spread_quality: metrics.spread_quality,
                spread_pulse: metrics.spread_pulse,
                sustained_energy: metrics.sustained_energy,
                total_depth: metrics.bid_depth + metrics.ask_depth,
                spread_pct: b.spread_pct().unwrap_or(0.0),
            }
        });

        let liq_stats = self.liquidations.stats(now);
        let (liq_energy, _, liq_direction) = self.liquidations.energy_score(now);
        let liquidation = if self.liquidations.is_empty() {
            None
        } else {
            Some(LiquidationInputs {
                energy: liq_energy,
                direction: liq_direction,
                cascade: liq_stats.cascade,
            })
        };

        let view = self.compute_gex();

        let inputs = TickInputs {
            ts: now,
            spot,
            order_book,
            liquidation,
            iceberg_score: self.iceberg.current_score(),
            total_gex: view.total.total,
            put_wall: view.put_wall,
            call_wall: view.call_wall,
        };

        let detection = self.escape.tick(inputs);
        *self.latest_detection.write() = Some(detection.clone());
        detection
    }

    /// Most recent escape-detector tick, if one has run yet
    #[must_use]
    pub fn latest_detection(&self) -> Option<Detection> {
        self.latest_detection.read().clone()
    }

    /// Bounded escape-detection history (last hour at 1 Hz)
    #[must_use]
    pub fn escape_history(&self) -> Vec<DetectionHistoryEntry> {
        self.escape.history()
    }

    /// Bounded alert ring
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.escape.alerts()
    }

    /// Ingestion/readiness flags and basic counts for the status endpoint
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            underlying: self.config.underlying.clone(),
            spot_primed: self.spot() > 0.0,
            order_book_primed: self.latest_book.read().is_some(),
            option_count: self.options.len(),
            unique_strikes: self.options.unique_strikes().len(),
            unique_expiries: self.options.unique_expiries().len(),
            liquidation_count: self.liquidations.len(),
        }
    }

    /// Score the static strategy catalog against the engine's current market
    /// state and return the top `n`
    pub async fn recommend_strategies(&self, now: Ts, top_n: usize) -> Vec<strategy::Recommendation> {
        let view = self.compute_gex();
        let surface = self.volatility_surface(now).await;
        let anomalies = self.volatility_anomalies(now).await;
        let (sentiment, _, _) = self.sentiment().await;
        let max_pain = self.max_pain().await;
        let spot = self.spot();

        let flip_level = view.flip.map_or(spot, |f| f.level);
        let regime_info = regime::classify(spot, view.total.total, flip_level);

        let atm_iv = surface.as_ref().map_or(0.0, |s| s.atm_iv);
        let total_skew = surface.as_ref().and_then(|s| s.total_skew);
        let max_pain_distance_pct = max_pain.as_ref().map_or(1.0, |mp| if spot > 0.0 { (mp.strike - spot).abs() / spot } else { 0.0 });

        let anomaly_kinds: Vec<_> = anomalies.iter().map(|a| a.kind).collect();
        let conditions = MarketConditions {
            regime: regime_info.label,
            volatility: strategy::VolatilityBucket::from_atm_iv(atm_iv),
            skew: strategy::SkewBucket::from_total_skew(total_skew),
            gex_sign: strategy::GexSign::from_total(view.total.total),
            max_pain_distance_pct,
            sentiment,
            anomaly_kinds: &anomaly_kinds,
        };
        strategy::recommend(&conditions, top_n)
    }

    /// Current regime classification
    pub async fn regime(&self) -> (RegimeLabel, String) {
        let view = self.compute_gex();
        let spot = self.spot();
        let flip_level = view.flip.map_or(spot, |f| f.level);
        let info = regime::classify(spot, view.total.total, flip_level);
        (info.label, info.description.to_string())
    }

    /// Compose the full metrics bundle, honoring the TTL cache
    pub async fn metrics_bundle(&self, now: Ts) -> MetricsBundle {
        let view = self.compute_gex();
        let anomalies = self.volatility_anomalies(now).await;
        let (sentiment, pc_oi_ratio, pc_volume_ratio) = self.sentiment().await;
        let max_pain = self.max_pain().await;
        let spot = self.spot();
        let flip_level = view.flip.map_or(spot, |f| f.level);
        let regime_info = regime::classify(spot, view.total.total, flip_level);

        let max_gex_strike = view
            .profile
            .iter()
            .max_by(|a, b| a.total_gex.abs().partial_cmp(&b.total_gex.abs()).unwrap_or(std::cmp::Ordering::Equal))
            .map_or(0.0, |p| p.strike);

        self.cache.get_or_compute(|| MetricsBundle {
            total_gex: view.total.total,
            max_gex_strike,
            regime: regime_info.label,
            max_pain_strike: max_pain.as_ref().map_or(0.0, |mp| mp.strike),
            max_pain_total_oi: max_pain.as_ref().map_or(0.0, |mp| mp.total_oi),
            sentiment,
            pc_oi_ratio,
            pc_volume_ratio,
            anomalies,
        })
    }

    /// Compose a `MarketSnapshot` for the periodic persistence dispatcher
    pub async fn compose_snapshot(&self, now: Ts) -> MarketSnapshot {
        let bundle = self.metrics_bundle(now).await;
        MarketSnapshot {
            ts: now,
            spot: self.spot(),
            total_gex: bundle.total_gex,
            max_gex_strike: bundle.max_gex_strike,
            regime: bundle.regime,
            max_pain_strike: bundle.max_pain_strike,
            max_pain_total_oi: bundle.max_pain_total_oi,
            sentiment: bundle.sentiment,
            pc_oi_ratio: bundle.pc_oi_ratio,
            pc_volume_ratio: bundle.pc_volume_ratio,
            anomalies: bundle.anomalies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option_store::ContractMeta;
    use services_common::{Px, Qty};

    fn engine() -> Engine {
        Engine::new(EngineConfig::default())
    }

    #[tokio::test]
    async fn max_pain_is_none_when_store_is_empty() {
        let engine = engine();
        assert!(engine.max_pain().await.is_none());
    }

    #[tokio::test]
    async fn sentiment_is_very_bullish_with_no_options() {
        let engine = engine();
        let (sentiment, ratio, _) = engine.sentiment().await;
        assert_eq!(sentiment, Sentiment::VeryBullish);
        assert!((ratio - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn order_book_metrics_requires_a_prior_ingest() {
        let engine = engine();
        assert!(engine.order_book_metrics().await.is_err());
        engine.ingest_order_book(OrderBookSnapshot {
            ts: Ts::from_nanos(0),
            bids: vec![(Px::new(100.0), Qty::new(1.0))],
            asks: vec![(Px::new(101.0), Qty::new(1.0))],
        });
        assert!(engine.order_book_metrics().await.is_ok());
    }

    #[tokio::test]
    async fn escape_tick_is_none_without_spot_or_book() {
        let engine = engine();
        let detection = engine.run_escape_tick(Ts::from_nanos(0)).await;
        assert_eq!(detection.hypothesis, crate::types::EscapeHypothesis::None);
    }

    #[tokio::test]
    async fn max_pain_picks_strike_with_largest_total_oi() {
        let engine = engine();
        engine
            .options()
            .upsert_contract(
                ContractMeta {
                    symbol: "A".into(),
                    underlying: "BTC".into(),
                    strike: 100_000.0,
                    expiry: Ts::from_nanos(1),
                    side: Side::Call,
                    contract_size: 1.0,
                },
                Ts::from_nanos(0),
            )
            .unwrap();
        engine.options().apply_oi("A", 500.0, Ts::from_nanos(0));
        let max_pain = engine.max_pain().await.unwrap();
        assert!((max_pain.strike - 100_000.0).abs() < f64::EPSILON);
        assert!((max_pain.total_oi - 500.0).abs() < f64::EPSILON);
    }
}
