//! Domain records shared across the analytics core
//!
//! Strike, spot, Greeks, IV and GEX stay plain `f64` (pre-computed upstream,
//! read-only from here). Order-book and liquidation price/size fields use the
//! workspace's fixed-point `Px`/`Qty`/`Ts` so rolling histories stay
//! deterministic across threads.

use serde::{Deserialize, Serialize};
use services_common::{Px, Qty, Ts};

/// Option side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    /// Call contract
    Call,
    /// Put contract
    Put,
}

impl Side {
    /// GEX sign convention: dealers assumed long calls, short puts (spec.md 9)
    #[must_use]
    pub const fn gex_sign(self) -> f64 {
        match self {
            Self::Call => 1.0,
            Self::Put => -1.0,
        }
    }
}

/// Direction of a detected move or imbalance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Upward / bullish
    Up,
    /// Downward / bearish
    Down,
    /// No clear direction
    Neutral,
}

/// Severity bucket used by anomalies and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Informational
    Low,
    /// Notable
    Medium,
    /// Should be looked at soon
    High,
    /// Requires immediate attention
    Critical,
}

/// Gamma regime relative to the gamma-flip level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimeLabel {
    /// Net positive gamma, spot above the flip level
    PositiveGammaAboveFlip,
    /// Net positive gamma, spot below the flip level
    PositiveGammaBelowFlip,
    /// Net negative gamma, spot below the flip level
    NegativeGammaBelowFlip,
    /// Net negative gamma, spot above the flip level
    NegativeGammaAboveFlip,
}

/// Escape detector regime gate (spec.md 4.8.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketActivityRegime {
    /// Options desks actively hedging
    OptionsActive,
    /// Ambiguous
    Transition,
    /// Options flow thin or out of hours
    OptionsInactive,
}

/// Escape-type hypothesis tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscapeHypothesis {
    /// No pattern detected
    None,
    /// Good (sustained) escape
    H1,
    /// False escape, likely to reverse
    H2,
    /// Liquidity collapse
    H3,
}

/// Anomaly kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyKind {
    /// A single IV point deviates from its DTE's distribution
    IvOutlier,
    /// A put/call IV spread deviates from its DTE's distribution
    SkewAnomaly,
}

/// Overpriced/underpriced label for IV outliers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceType {
    /// IV implies a richer-than-expected option
    Overpriced,
    /// IV implies a cheaper-than-expected option
    Underpriced,
}

/// Put/call premium label for skew anomalies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkewType {
    /// Puts trade rich relative to calls
    PutPremium,
    /// Calls trade rich relative to puts
    CallPremium,
}

/// A single option contract, keyed by `symbol`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    /// Exchange symbol, encodes (underlying, expiry, strike, side)
    pub symbol: String,
    /// Underlying asset, e.g. "BTC"
    pub underlying: String,
    /// Strike price
    pub strike: f64,
    /// Expiry timestamp
    pub expiry: Ts,
    /// Call or put
    pub side: Side,
    /// Contract multiplier, default 1.0
    pub contract_size: f64,
    /// Latest mark price
    pub mark_price: f64,
    /// Best bid price
    pub bid: f64,
    /// Best ask price
    pub ask: f64,
    /// Last traded price
    pub last_price: f64,
    /// IV implied by the bid
    pub bid_iv: f64,
    /// IV implied by the ask
    pub ask_iv: f64,
    /// IV implied by the mark price
    pub mark_iv: f64,
    /// Delta
    pub delta: f64,
    /// Gamma
    pub gamma: f64,
    /// Theta
    pub theta: f64,
    /// Vega
    pub vega: f64,
    /// Open interest (contracts)
    pub open_interest: f64,
    /// 24h traded volume (contracts)
    pub volume: f64,
    /// Wall-clock time of the last mutation
    pub last_update: Ts,
}

impl OptionContract {
    /// True when the contract has not been refreshed within `ttl_secs`
    #[must_use]
    pub fn is_stale(&self, now: Ts, ttl_secs: u64) -> bool {
        now.as_nanos().saturating_sub(self.last_update.as_nanos()) > ttl_secs * 1_000_000_000
    }
}

/// A single price level (price, size)
pub type BookLevel = (Px, Qty);

/// Snapshot of a futures order book at one instant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Snapshot timestamp
    pub ts: Ts,
    /// Top-N bid levels, best first
    pub bids: Vec<BookLevel>,
    /// Top-N ask levels, best first
    pub asks: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    /// Mid price, or `None` if either side is empty
    #[must_use]
    pub fn mid(&self) -> Option<f64> {
        let bid = self.bids.first()?.0.as_f64();
        let ask = self.asks.first()?.0.as_f64();
        Some((bid + ask) / 2.0)
    }

    /// Absolute spread, or `None` if either side is empty
    #[must_use]
    pub fn spread(&self) -> Option<f64> {
        let bid = self.bids.first()?.0.as_f64();
        let ask = self.asks.first()?.0.as_f64();
        Some(ask - bid)
    }

    /// Spread as a fraction of mid price, or `None` if unavailable
    #[must_use]
    pub fn spread_pct(&self) -> Option<f64> {
        let mid = self.mid()?;
        let spread = self.spread()?;
        if mid > 0.0 {
            Some(spread / mid)
        } else {
            None
        }
    }
}

/// Liquidation side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationSide {
    /// Forced buy (short liquidation)
    Buy,
    /// Forced sell (long liquidation)
    Sell,
}

/// Liquidation size classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeClass {
    /// < $100k notional
    Small,
    /// $100k - $1M notional
    Medium,
    /// $1M - $10M notional
    Large,
    /// >= $10M notional
    Massive,
}

impl SizeClass {
    /// Classify a notional value into a size bucket
    #[must_use]
    pub fn from_value(value: f64) -> Self {
        if value >= 10_000_000.0 {
            Self::Massive
        } else if value >= 1_000_000.0 {
            Self::Large
        } else if value >= 100_000.0 {
            Self::Medium
        } else {
            Self::Small
        }
    }
}

/// A single forced-liquidation event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEvent {
    /// Event timestamp
    pub ts: Ts,
    /// Forced buy or sell
    pub side: LiquidationSide,
    /// Execution price
    pub price: Px,
    /// Executed quantity
    pub quantity: Qty,
    /// Notional value (price * quantity)
    pub value: f64,
    /// Size bucket derived from `value`
    pub size_class: SizeClass,
}

impl LiquidationEvent {
    /// Build a liquidation event, deriving `value` and `size_class`
    #[must_use]
    pub fn new(ts: Ts, side: LiquidationSide, price: Px, quantity: Qty) -> Self {
        let value = price.as_f64() * quantity.as_f64();
        Self {
            ts,
            side,
            price,
            quantity,
            value,
            size_class: SizeClass::from_value(value),
        }
    }
}

/// Per-strike gamma-exposure breakdown, derived on demand
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GammaProfilePoint {
    /// Strike price
    pub strike: f64,
    /// Net GEX at this strike (calls + puts)
    pub total_gex: f64,
    /// Call-side GEX
    pub call_gex: f64,
    /// Put-side GEX
    pub put_gex: f64,
    /// Call-side open interest
    pub call_oi: f64,
    /// Put-side open interest
    pub put_oi: f64,
    /// Summed call gamma
    pub call_gamma: f64,
    /// Summed put gamma
    pub put_gamma: f64,
}

/// A contiguous band of strikes around a GEX peak
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WallZone {
    /// Strike with the largest-magnitude GEX on this side
    pub peak_strike: f64,
    /// GEX at the peak strike
    pub peak_gex: f64,
    /// Lowest strike in the zone
    pub zone_low: f64,
    /// Highest strike in the zone
    pub zone_high: f64,
    /// Strikes contributing to the zone, with their % of the peak
    pub zone_strikes: Vec<(f64, f64)>,
    /// Sum of GEX across the zone's strikes
    pub total_zone_gex: f64,
    /// Contribution threshold used to build this zone
    pub threshold: f64,
}

/// A single wall (support or resistance) identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Wall {
    /// Strike of the wall
    pub strike: f64,
    /// GEX at the wall strike
    pub gex: f64,
    /// Open interest at the wall strike
    pub open_interest: f64,
    /// Gamma at the wall strike
    pub gamma: f64,
    /// Absolute distance from spot
    pub distance: f64,
    /// Distance from spot as a percentage of spot
    pub distance_pct: f64,
}

/// Confidence of a gamma-flip estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlipConfidence {
    /// An exact sign crossing was interpolated
    High,
    /// No crossing; nearest-to-zero strike used instead
    Medium,
}

/// The gamma-flip level: strike at which net GEX changes sign
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GammaFlip {
    /// Interpolated (or nearest) flip level
    pub level: f64,
    /// Estimation confidence
    pub confidence: FlipConfidence,
}

/// Total GEX broken down by side
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TotalGex {
    /// Net total (calls + puts)
    pub total: f64,
    /// Call-side total
    pub calls: f64,
    /// Put-side total
    pub puts: f64,
}

/// Sorted-unique (DTE, strike) implied-volatility surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolSurface {
    /// Sorted unique strikes
    pub strikes: Vec<f64>,
    /// Sorted unique days-to-expiry values
    pub dtes: Vec<i64>,
    /// OI-weighted average IV over both sides, row = dte index, col = strike index
    pub iv_matrix: Vec<Vec<Option<f64>>>,
    /// OI-weighted average IV over calls only
    pub call_iv_matrix: Vec<Vec<Option<f64>>>,
    /// OI-weighted average IV over puts only
    pub put_iv_matrix: Vec<Vec<Option<f64>>>,
    /// Strike nearest spot
    pub atm_strike: f64,
    /// OI-weighted IV at (atm_strike, smallest DTE)
    pub atm_iv: f64,
    /// put_iv - atm_iv at the smallest DTE, if both exist
    pub put_skew: Option<f64>,
    /// call_iv - atm_iv at the smallest DTE, if both exist
    pub call_skew: Option<f64>,
    /// put_iv - call_iv at the smallest DTE, if both exist
    pub total_skew: Option<f64>,
}

/// One (dte, strike) surface cell before matrix assembly
#[derive(Debug, Clone, Copy)]
pub struct SurfacePoint {
    /// Days to expiry
    pub dte: i64,
    /// Strike price
    pub strike: f64,
    /// Moneyness = strike / spot
    pub moneyness: f64,
    /// OI-weighted average IV across both sides, if any OI-bearing option exists
    pub avg_iv: Option<f64>,
    /// OI-weighted average IV across calls only
    pub call_iv: Option<f64>,
    /// OI-weighted average IV across puts only
    pub put_iv: Option<f64>,
    /// Summed volume across contracts at this cell
    pub volume: f64,
    /// Summed open interest across contracts at this cell
    pub open_interest: f64,
}

/// A detected statistical anomaly in the volatility surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    /// Outlier or skew anomaly
    pub kind: AnomalyKind,
    /// Strike involved
    pub strike: f64,
    /// Days to expiry
    pub dte: i64,
    /// Moneyness at the strike
    pub moneyness: f64,
    /// Observed IV (outliers) or observed spread (skew anomalies)
    pub observed: f64,
    /// A second observed IV, only populated for skew anomalies (call IV)
    pub observed_secondary: Option<f64>,
    /// Expected IV/spread from the fitted distribution
    pub expected: f64,
    /// observed - expected
    pub deviation: f64,
    /// Standard score of the observation
    pub z_score: f64,
    /// Severity bucket
    pub severity: Severity,
    /// Overpriced/underpriced, IV outliers only
    pub price_type: Option<PriceType>,
    /// Put/call premium, skew anomalies only
    pub skew_type: Option<SkewType>,
    /// Liquidity-weighted relevance score, capped at 100
    pub relevance: f64,
    /// True when the point sits in the outermost two DTE-curve positions
    pub is_wing: bool,
}

/// Composite gamma/iceberg/liquidity potential used by the escape detector
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Potential {
    /// Gamma-derived component
    pub gex: f64,
    /// Iceberg-score component
    pub iceberg: f64,
    /// Liquidity component
    pub liquidity: f64,
    /// Weighted sum of the three components
    pub total: f64,
}

/// Nearest wall in the direction of a detection, with escape-relevant framing
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WallInfo {
    /// Wall strike
    pub strike: f64,
    /// Wall strength, min(1, |wall_gex| / 1e9)
    pub strength: f64,
    /// Normalized distance from spot to the wall
    pub distance_pct: f64,
}

/// Per-hypothesis condition check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionCheck {
    /// Condition name
    pub name: String,
    /// Whether the condition was met
    pub met: bool,
    /// Weight this condition contributes toward the hypothesis's confidence
    pub weight: f64,
}

/// One escape-type detection tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Tick timestamp
    pub ts: Ts,
    /// Detected hypothesis
    pub hypothesis: EscapeHypothesis,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Direction of the implied move
    pub direction: Direction,
    /// Order-book sustained-energy component
    pub sustained_energy: f64,
    /// Liquidation-injected-energy component
    pub injected_energy: f64,
    /// Mean of sustained and injected energy
    pub total_energy: f64,
    /// Adaptive potential composition
    pub potential: Potential,
    /// Market-activity regime used to weight `potential`
    pub regime: MarketActivityRegime,
    /// total_energy / potential.total, 0 if potential.total is 0
    pub p_escape: f64,
    /// Nearest wall in the detection's direction, if any
    pub wall_info: Option<WallInfo>,
    /// Condition checks for the selected hypothesis (empty for NONE)
    pub conditions: Vec<ConditionCheck>,
    /// Reason text, set only for NONE detections
    pub reason: Option<String>,
}

/// A compact history record, retained per tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionHistoryEntry {
    /// Tick timestamp
    pub ts: Ts,
    /// Detected hypothesis
    pub hypothesis: EscapeHypothesis,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// total_energy / potential.total
    pub p_escape: f64,
    /// Direction of the implied move
    pub direction: Direction,
}

/// An alert record produced by the escape detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Monotonically increasing id
    pub id: u64,
    /// Alert type tag, e.g. "H1_DETECTED", "HIGH_P_ESCAPE"
    pub alert_type: String,
    /// Severity bucket
    pub severity: Severity,
    /// Creation timestamp
    pub ts: Ts,
    /// Human-readable message
    pub message: String,
    /// Snapshot of the detection that triggered this alert
    pub detection: DetectionHistoryEntry,
}

/// Sentiment bucket derived from put/call ratios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    /// put/call ratio < 0.7
    VeryBullish,
    /// put/call ratio < 0.9
    Bullish,
    /// put/call ratio < 1.1
    Neutral,
    /// put/call ratio < 1.3
    Bearish,
    /// put/call ratio >= 1.3
    VeryBearish,
}

/// Max-pain result: strike with maximum aggregated open interest (spec.md 9's
/// explicitly non-classic labeled semantics, not the dealer-PnL minimum)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxPain {
    /// Strike with the maximum total OI
    pub strike: f64,
    /// Total OI at that strike
    pub total_oi: f64,
    /// Top 10 strikes by total OI, descending
    pub top_strikes: Vec<(f64, f64)>,
}

/// Periodic consolidated record handed to the persistence sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Snapshot timestamp
    pub ts: Ts,
    /// Spot price at snapshot time
    pub spot: f64,
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
    /// Put/call open-interest ratio
    pub pc_oi_ratio: f64,
    /// Put/call volume ratio
    pub pc_volume_ratio: f64,
    /// Anomalies observed at snapshot time
    pub anomalies: Vec<Anomaly>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gex_sign_matches_dealer_convention() {
        assert!((Side::Call.gex_sign() - 1.0).abs() < f64::EPSILON);
        assert!((Side::Put.gex_sign() - (-1.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn size_class_buckets_are_ordered() {
        assert_eq!(SizeClass::from_value(50_000.0), SizeClass::Small);
        assert_eq!(SizeClass::from_value(500_000.0), SizeClass::Medium);
        assert_eq!(SizeClass::from_value(5_000_000.0), SizeClass::Large);
        assert_eq!(SizeClass::from_value(50_000_000.0), SizeClass::Massive);
    }

    #[test]
    fn liquidation_event_derives_value_and_class() {
        let event = LiquidationEvent::new(
            Ts::from_nanos(0),
            LiquidationSide::Sell,
            Px::new(100_000.0),
            Qty::new(0.5),
        );
        assert!((event.value - 50_000.0).abs() < 1e-6);
        assert_eq!(event.size_class, SizeClass::Small);
    }

    #[test]
    fn book_snapshot_mid_and_spread() {
        let book = OrderBookSnapshot {
            ts: Ts::from_nanos(0),
            bids: vec![(Px::new(100.0), Qty::new(1.0))],
            asks: vec![(Px::new(101.0), Qty::new(1.0))],
        };
        assert!((book.mid().unwrap() - 100.5).abs() < 1e-9);
        assert!((book.spread().unwrap() - 1.0).abs() < 1e-9);
    }
}
