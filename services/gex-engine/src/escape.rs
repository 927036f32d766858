//! Escape-type fusion detector (H1/H2/H3) — the core analytical output
//!
//! Single-writer component: one `tick()` call per second samples the
//! *current* outputs of the order-book analyzer, liquidation tracker and
//! iceberg detector (never partial updates), computes the adaptive energy
//! potential, checks each hypothesis's condition map, and appends a bounded
//! history + alert ring. Grounded on the same single-writer-state idiom as
//! `orderbook_analyzer.rs`, scaled up to fuse five upstream components.

use crate::types::{
    Alert, ConditionCheck, Detection, DetectionHistoryEntry, Direction, EscapeHypothesis, MarketActivityRegime, Potential,
    Severity, Wall, WallInfo,
};
use chrono::{Datelike, Timelike};
use parking_lot::RwLock;
use services_common::Ts;
use std::collections::VecDeque;

const HISTORY_CAP: usize = 3600;
const ALERT_CAP: usize = 50;

/// Order-book-derived inputs sampled for one tick
#[derive(Debug, Clone, Copy)]
pub struct OrderBookInputs {
    /// Book imbalance in [-1, 1]
    pub bi: f64,
    /// Direction implied by BI
    pub bi_direction: Direction,
    /// Fraction of the rolling window with same-sign BI
    pub persistence: f64,
    /// (current depth - window mean) / window mean
    pub depth_change: f64,
    /// Monotone-decreasing spread-quality score
    pub spread_quality: f64,
    /// Variance of recent spread samples
    pub spread_pulse: f64,
    /// Composite sustained-energy score computed by the order-book analyzer
    pub sustained_energy: f64,
    /// Total depth across both sides over the configured top-N
    pub total_depth: f64,
    /// Spread as a fraction of mid
    pub spread_pct: f64,
}

/// Liquidation-derived inputs sampled for one tick
#[derive(Debug, Clone, Copy)]
pub struct LiquidationInputs {
    /// Injected-energy score in [0, 1]
    pub energy: f64,
    /// Direction implied by the 1h imbalance
    pub direction: Direction,
    /// Whether the cascade rule fired
    pub cascade: bool,
}

/// Every input a single `tick()` call needs
#[derive(Debug, Clone, Copy)]
pub struct TickInputs {
    /// Tick timestamp
    pub ts: Ts,
    /// Current spot price
    pub spot: Option<f64>,
    /// Order-book metrics, if the book has been primed
    pub order_book: Option<OrderBookInputs>,
    /// Liquidation metrics, if the tracker has data
    pub liquidation: Option<LiquidationInputs>,
    /// Current iceberg composite score
    pub iceberg_score: f64,
    /// Net total GEX
    pub total_gex: f64,
    /// Put wall, if any
    pub put_wall: Option<Wall>,
    /// Call wall, if any
    pub call_wall: Option<Wall>,
}

fn regime(total_gex: f64, iceberg_score: f64, ts: Ts) -> MarketActivityRegime {
    let utc = ts.to_chrono();
    let weekday = utc.weekday().num_days_from_sunday();
    let hour = utc.hour();

    let mut indicators = 0u32;
    if total_gex.abs() < 50_000_000.0 {
        indicators += 1;
    }
    if iceberg_score > 0.5 {
        indicators += 1;
    }
    if weekday == 0 || weekday == 6 {
        indicators += 1;
    }
    if hour < 13 || hour > 21 {
        indicators += 1;
    }

    if indicators >= 3 {
        MarketActivityRegime::OptionsInactive
    } else if indicators == 2 {
        MarketActivityRegime::Transition
    } else {
        MarketActivityRegime::OptionsActive
    }
}

fn adaptive_potential(
    total_gex: f64,
    put_wall: Option<Wall>,
    call_wall: Option<Wall>,
    iceberg_score: f64,
    total_depth: f64,
    spread_pct: f64,
    bi: f64,
    regime: MarketActivityRegime,
) -> Potential {
    let max_wall_gex = [put_wall.map(|w| w.gex.abs()), call_wall.map(|w| w.gex.abs())]
        .into_iter()
        .flatten()
        .fold(0.0_f64, f64::max);
    let min_wall_dist_pct = [put_wall.map(|w| w.distance_pct), call_wall.map(|w| w.distance_pct)]
        .into_iter()
        .flatten()
        .fold(f64::INFINITY, f64::min);
    let min_wall_dist_pct = if min_wall_dist_pct.is_finite() { min_wall_dist_pct } else { 1.0 };

    let gex_component =
        (total_gex.abs() / 5.0e8).min(1.0) * 0.6 + (max_wall_gex / 1.0e9).min(1.0) * 0.3 + (1.0 - min_wall_dist_pct).max(0.0) * 0.1;
    let liquidity_component = 0.5 * (total_depth / 50.0e6).min(1.0) + 0.3 * (spread_pct * 1000.0).min(1.0) + 0.2 * (1.0 - bi.abs());

    let (w_gex, w_iceberg, w_liquidity, floor) = match regime {
        MarketActivityRegime::OptionsActive => (0.60, 0.20, 0.20, 0.3),
        MarketActivityRegime::OptionsInactive => (0.10, 0.60, 0.30, 0.4),
        MarketActivityRegime::Transition => (0.40, 0.40, 0.20, 0.3),
    };

    let total = (w_gex * gex_component + w_iceberg * iceberg_score + w_liquidity * liquidity_component).max(floor);

    Potential {
        gex: gex_component,
        iceberg: iceberg_score,
        liquidity: liquidity_component,
        total,
    }
}

fn combine_direction(bi: f64, bi_direction: Direction, injected_energy: f64, liquidation_direction: Direction) -> Direction {
    if bi_direction == liquidation_direction && bi_direction != Direction::Neutral {
        return bi_direction;
    }
    if bi.abs() > 0.6 {
        return bi_direction;
    }
    if injected_energy > 0.6 {
        return liquidation_direction;
    }
    Direction::Neutral
}

fn wall_info_for(direction: Direction, spot: f64, put_wall: Option<Wall>, call_wall: Option<Wall>) -> Option<WallInfo> {
    let wall = match direction {
        Direction::Up => call_wall,
        Direction::Down => put_wall,
        Direction::Neutral => [put_wall, call_wall]
            .into_iter()
            .flatten()
            .min_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal)),
    }?;
    let distance_pct = if spot > 0.0 { (wall.strike - spot).abs() / spot } else { 0.0 };
    Some(WallInfo {
        strike: wall.strike,
        strength: (wall.gex.abs() / 1.0e9).min(1.0),
        distance_pct,
    })
}

struct HypothesisCheck {
    name: &'static str,
    weight: f64,
    met: bool,
}

fn h1_checks(persistence: f64, sustained: f64, injected: f64, cascade: bool, depth_change: f64, spread_quality: f64, wall_distance: f64, p_escape: f64) -> Vec<HypothesisCheck> {
    vec![
        HypothesisCheck { name: "persistence > 0.7", weight: 0.20, met: persistence > 0.7 },
        HypothesisCheck { name: "sustained > 0.6", weight: 0.20, met: sustained > 0.6 },
        HypothesisCheck { name: "injected in [0.4, 0.7]", weight: 0.15, met: (0.4..=0.7).contains(&injected) },
        HypothesisCheck { name: "no cascade", weight: 0.10, met: !cascade },
        HypothesisCheck { name: "depth_change > -0.2", weight: 0.10, met: depth_change > -0.2 },
        HypothesisCheck { name: "spread_quality > 0.7", weight: 0.10, met: spread_quality > 0.7 },
        HypothesisCheck { name: "wall_distance < 0.05", weight: 0.05, met: wall_distance < 0.05 },
        HypothesisCheck { name: "p_escape > 0.6", weight: 0.10, met: p_escape > 0.6 },
    ]
}

fn h2_checks(persistence: f64, sustained: f64, injected: f64, cascade: bool, wall_distance: f64, wall_strength: f64, p_escape: f64) -> Vec<HypothesisCheck> {
    vec![
        HypothesisCheck { name: "persistence < 0.4", weight: 0.25, met: persistence < 0.4 },
        HypothesisCheck { name: "sustained in (0.3, 0.7)", weight: 0.15, met: sustained > 0.3 && sustained < 0.7 },
        HypothesisCheck { name: "injected < 0.4", weight: 0.15, met: injected < 0.4 },
        HypothesisCheck { name: "no cascade", weight: 0.10, met: !cascade },
        HypothesisCheck { name: "wall_distance < 0.03", weight: 0.10, met: wall_distance < 0.03 },
        HypothesisCheck { name: "wall_strength > 0.7", weight: 0.15, met: wall_strength > 0.7 },
        HypothesisCheck { name: "p_escape < 0.4", weight: 0.10, met: p_escape < 0.4 },
    ]
}

fn h3_checks(injected: f64, cascade: bool, depth_change: f64, spread_quality: f64, spread_pulse: f64, p_escape: f64) -> Vec<HypothesisCheck> {
    vec![
        HypothesisCheck { name: "injected > 0.7", weight: 0.25, met: injected > 0.7 },
        HypothesisCheck { name: "cascade detected", weight: 0.30, met: cascade },
        HypothesisCheck { name: "depth_change < -0.3", weight: 0.15, met: depth_change < -0.3 },
        HypothesisCheck { name: "spread_quality < 0.5", weight: 0.10, met: spread_quality < 0.5 },
        HypothesisCheck { name: "spread_pulse > 2.0", weight: 0.10, met: spread_pulse > 2.0 },
        HypothesisCheck { name: "p_escape > 0.8", weight: 0.10, met: p_escape > 0.8 },
    ]
}

struct HypothesisResult {
    hypothesis: EscapeHypothesis,
    confidence: f64,
    conditions: Vec<ConditionCheck>,
}

fn evaluate(hypothesis: EscapeHypothesis, checks: Vec<HypothesisCheck>, floor: f64) -> HypothesisResult {
    let met_ratio = checks.iter().filter(|c| c.met).count() as f64 / checks.len() as f64;
    let confidence: f64 = checks.iter().filter(|c| c.met).map(|c| c.weight).sum();
    let conditions = checks
        .into_iter()
        .map(|c| ConditionCheck {
            name: c.name.to_string(),
            met: c.met,
            weight: c.weight,
        })
        .collect();
    HypothesisResult {
        hypothesis,
        confidence: if met_ratio > floor { confidence } else { 0.0 },
        conditions,
    }
}

/// Single-writer escape-type detector: bounded history + alert ring
pub struct EscapeDetector {
    history: RwLock<VecDeque<DetectionHistoryEntry>>,
    alerts: RwLock<VecDeque<Alert>>,
    next_alert_id: std::sync::atomic::AtomicU64,
}

impl Default for EscapeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl EscapeDetector {
    /// Create an empty detector
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: RwLock::new(VecDeque::new()),
            alerts: RwLock::new(VecDeque::new()),
            next_alert_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn push_history(&self, entry: DetectionHistoryEntry) {
        let mut history = self.history.write();
        history.push_back(entry);
        while history.len() > HISTORY_CAP {
            history.pop_front();
        }
    }

    fn push_alert(&self, alert_type: &str, severity: Severity, ts: Ts, message: String, detection: DetectionHistoryEntry) {
        let id = self.next_alert_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut alerts = self.alerts.write();
        alerts.push_back(Alert {
            id,
            alert_type: alert_type.to_string(),
            severity,
            ts,
            message,
            detection,
        });
        while alerts.len() > ALERT_CAP {
            alerts.pop_front();
        }
    }

    /// Run one detection tick against freshly sampled inputs
    pub fn tick(&self, inputs: TickInputs) -> Detection {
        let (order_book, liquidation, spot) = match (inputs.order_book, inputs.liquidation, inputs.spot) {
            (Some(ob), Some(liq), Some(spot)) => (ob, liq, spot),
            _ => {
                return Detection {
                    ts: inputs.ts,
                    hypothesis: EscapeHypothesis::None,
                    confidence: 0.0,
                    direction: Direction::Neutral,
                    sustained_energy: 0.0,
                    injected_energy: 0.0,
                    total_energy: 0.0,
                    potential: Potential::default(),
                    regime: MarketActivityRegime::OptionsActive,
                    p_escape: 0.0,
                    wall_info: None,
                    conditions: Vec::new(),
                    reason: Some("Insufficient data".to_string()),
                };
            }
        };

        let sustained_energy = order_book.sustained_energy;
        let injected_energy = liquidation.energy;
        let total_energy = (sustained_energy + injected_energy) / 2.0;

        let mkt_regime = regime(inputs.total_gex, inputs.iceberg_score, inputs.ts);
        let potential = adaptive_potential(
            inputs.total_gex,
            inputs.put_wall,
            inputs.call_wall,
            inputs.iceberg_score,
            order_book.total_depth,
            order_book.spread_pct,
            order_book.bi,
            mkt_regime,
        );

        let p_escape = if potential.total > 0.0 { total_energy / potential.total } else { 0.0 };
        let direction = combine_direction(order_book.bi, order_book.bi_direction, injected_energy, liquidation.direction);
        let wall_info = wall_info_for(direction, spot, inputs.put_wall, inputs.call_wall);
        let wall_distance = wall_info.map_or(1.0, |w| w.distance_pct);
        let wall_strength = wall_info.map_or(0.0, |w| w.strength);

        let h1 = evaluate(
            EscapeHypothesis::H1,
            h1_checks(order_book.persistence, sustained_energy, injected_energy, liquidation.cascade, order_book.depth_change, order_book.spread_quality, wall_distance, p_escape),
            0.6,
        );
        let h2 = evaluate(
            EscapeHypothesis::H2,
            h2_checks(order_book.persistence, sustained_energy, injected_energy, liquidation.cascade, wall_distance, wall_strength, p_escape),
            0.6,
        );
        let h3 = evaluate(
            EscapeHypothesis::H3,
            h3_checks(injected_energy, liquidation.cascade, order_book.depth_change, order_book.spread_quality, order_book.spread_pulse, p_escape),
            0.5,
        );

        let candidates: Vec<&HypothesisResult> = [&h1, &h2, &h3].into_iter().filter(|r| r.confidence > 0.0).collect();
        let selected = candidates.into_iter().max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal));

        let (hypothesis, confidence, conditions) = match selected {
            Some(r) => (r.hypothesis, r.confidence, r.conditions.clone()),
            None => (EscapeHypothesis::None, 0.0, Vec::new()),
        };
        let reason = if hypothesis == EscapeHypothesis::None { Some("No clear pattern".to_string()) } else { None };

        let detection = Detection {
            ts: inputs.ts,
            hypothesis,
            confidence,
            direction,
            sustained_energy,
            injected_energy,
            total_energy,
            potential,
            regime: mkt_regime,
            p_escape,
            wall_info,
            conditions,
            reason,
        };

        let history_entry = DetectionHistoryEntry {
            ts: inputs.ts,
            hypothesis,
            confidence,
            p_escape,
            direction,
        };
        self.push_history(history_entry.clone());

        match hypothesis {
            EscapeHypothesis::H1 if confidence > 0.7 => {
                self.push_alert("H1_DETECTED", Severity::High, inputs.ts, "Sustained escape pattern detected".to_string(), history_entry.clone());
            }
            EscapeHypothesis::H2 if confidence > 0.7 => {
                let effective_p = 1.0 - p_escape;
                self.push_alert(
                    "H2_DETECTED",
                    Severity::Medium,
                    inputs.ts,
                    format!("False-escape pattern detected, reversal probability {effective_p:.2}"),
                    history_entry.clone(),
                );
            }
            EscapeHypothesis::H3 => {
                self.push_alert("H3_DETECTED", Severity::Critical, inputs.ts, "Liquidity collapse detected".to_string(), history_entry.clone());
            }
            _ => {}
        }
        if p_escape > 0.8 && hypothesis != EscapeHypothesis::H2 {
            self.push_alert("HIGH_P_ESCAPE", Severity::Medium, inputs.ts, format!("P_escape {p_escape:.2} exceeds 0.8"), history_entry);
        }

        detection
    }

    /// Compact detection history, oldest first, bounded to the last hour at 1 Hz
    #[must_use]
    pub fn history(&self) -> Vec<DetectionHistoryEntry> {
        self.history.read().iter().cloned().collect()
    }

    /// Alert ring, oldest first, bounded to 50
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts_weekday_afternoon() -> Ts {
        // 2024-01-03 (Wednesday) 15:00 UTC
        Ts::from_nanos(1_704_294_000 * 1_000_000_000)
    }

    fn base_inputs() -> TickInputs {
        TickInputs {
            ts: ts_weekday_afternoon(),
            spot: Some(100_000.0),
            order_book: Some(OrderBookInputs {
                bi: 0.1,
                bi_direction: Direction::Up,
                persistence: 0.5,
                depth_change: 0.0,
                spread_quality: 0.8,
                spread_pulse: 0.1,
                sustained_energy: 0.35,
                total_depth: 10_000_000.0,
                spread_pct: 0.0005,
            }),
            liquidation: Some(LiquidationInputs {
                energy: 0.1,
                direction: Direction::Neutral,
                cascade: false,
            }),
            iceberg_score: 0.1,
            total_gex: 2.0e8,
            put_wall: None,
            call_wall: None,
        }
    }

    #[test]
    fn missing_inputs_yields_none_with_reason() {
        let detector = EscapeDetector::new();
        let mut inputs = base_inputs();
        inputs.spot = None;
        let detection = detector.tick(inputs);
        assert_eq!(detection.hypothesis, EscapeHypothesis::None);
        assert_eq!(detection.reason.as_deref(), Some("Insufficient data"));
    }

    #[test]
    fn scenario_6_h2_false_escape_detected() {
        let detector = EscapeDetector::new();
        let put_wall = Wall { strike: 99_700.0, gex: -2.0e9, open_interest: 1000.0, gamma: 0.01, distance: 300.0, distance_pct: 0.003 };
        let inputs = TickInputs {
            ts: ts_weekday_afternoon(),
            spot: Some(100_000.0),
            order_book: Some(OrderBookInputs {
                bi: -0.65,
                bi_direction: Direction::Down,
                persistence: 0.2,
                depth_change: 0.0,
                spread_quality: 0.8,
                spread_pulse: 0.1,
                sustained_energy: 0.5,
                total_depth: 10_000_000.0,
                spread_pct: 0.0005,
            }),
            liquidation: Some(LiquidationInputs {
                energy: 0.2,
                direction: Direction::Down,
                cascade: false,
            }),
            iceberg_score: 0.1,
            total_gex: 2.0e8,
            put_wall: Some(put_wall),
            call_wall: None,
        };
        let detection = detector.tick(inputs);
        assert_eq!(detection.hypothesis, EscapeHypothesis::H2);
        assert!(detection.confidence > 0.6);
    }

    #[test]
    fn history_is_bounded_to_3600_entries() {
        let detector = EscapeDetector::new();
        for _ in 0..10 {
            detector.tick(base_inputs());
        }
        assert!(detector.history().len() <= HISTORY_CAP);
    }

    #[test]
    fn h3_fires_on_any_confidence_regardless_of_threshold() {
        let detector = EscapeDetector::new();
        let inputs = TickInputs {
            ts: ts_weekday_afternoon(),
            spot: Some(100_000.0),
            order_book: Some(OrderBookInputs {
                bi: 0.0,
                bi_direction: Direction::Neutral,
                persistence: 0.1,
                depth_change: -0.5,
                spread_quality: 0.1,
                spread_pulse: 5.0,
                sustained_energy: 0.05,
                total_depth: 1_000_000.0,
                spread_pct: 0.01,
            }),
            liquidation: Some(LiquidationInputs {
                energy: 0.9,
                direction: Direction::Down,
                cascade: true,
            }),
            iceberg_score: 0.2,
            total_gex: 1.0e7,
            put_wall: None,
            call_wall: None,
        };
        let detection = detector.tick(inputs);
        assert_eq!(detection.hypothesis, EscapeHypothesis::H3);
        let alerts = detector.alerts();
        assert!(alerts.iter().any(|a| a.alert_type == "H3_DETECTED" && a.severity == Severity::Critical));
    }
}
