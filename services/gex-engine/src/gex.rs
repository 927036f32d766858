//! Gamma-exposure aggregation: per-strike profile, gamma flip, walls, zones
//!
//! Pure functions over a snapshot of `OptionContract`s — no internal state,
//! so two calls against the same snapshot are byte-equal, which is what the
//! metric cache (`cache.rs`) relies on.

use crate::types::{FlipConfidence, GammaFlip, GammaProfilePoint, OptionContract, Side, TotalGex, Wall, WallZone};
use std::collections::BTreeMap;

/// Per-option GEX contribution: `gamma * contract_size * OI * spot^2 * 0.01 * sign(side)`
///
/// Zero when gamma or OI is zero, per spec.md 4.2.
#[must_use]
pub fn contract_gex(contract: &OptionContract, spot: f64) -> f64 {
    if contract.gamma == 0.0 || contract.open_interest == 0.0 {
        return 0.0;
    }
    contract.gamma * contract.contract_size * contract.open_interest * spot * spot * 0.01 * contract.side.gex_sign()
}

/// By-strike aggregate, sorted ascending by strike
#[must_use]
pub fn gamma_profile(options: &[OptionContract], spot: f64) -> Vec<GammaProfilePoint> {
    let mut by_strike: BTreeMap<u64, GammaProfilePoint> = BTreeMap::new();

    for option in options {
        let gex = contract_gex(option, spot);
        // Skipped contracts (gamma or OI zero) still register zero GEX but no
        // OI/gamma accumulation, matching "skipped if gamma or OI is zero".
        let key = option.strike.to_bits();
        let entry = by_strike.entry(key).or_insert(GammaProfilePoint {
            strike: option.strike,
            total_gex: 0.0,
            call_gex: 0.0,
            put_gex: 0.0,
            call_oi: 0.0,
            put_oi: 0.0,
            call_gamma: 0.0,
            put_gamma: 0.0,
        });

        if option.gamma == 0.0 || option.open_interest == 0.0 {
            continue;
        }

        entry.total_gex += gex;
        match option.side {
            Side::Call => {
                entry.call_gex += gex;
                entry.call_oi += option.open_interest;
                entry.call_gamma += option.gamma;
            }
            Side::Put => {
                entry.put_gex += gex;
                entry.put_oi += option.open_interest;
                entry.put_gamma += option.gamma;
            }
        }
    }

    by_strike.into_values().collect()
}

/// Net total GEX plus call/put breakdown
#[must_use]
pub fn total_gex(profile: &[GammaProfilePoint]) -> TotalGex {
    profile.iter().fold(TotalGex::default(), |mut acc, p| {
        acc.total += p.total_gex;
        acc.calls += p.call_gex;
        acc.puts += p.put_gex;
        acc
    })
}

/// Gamma-flip level: interpolated sign crossing, or nearest-to-zero strike
#[must_use]
pub fn gamma_flip(profile: &[GammaProfilePoint]) -> Option<GammaFlip> {
    if profile.is_empty() {
        return None;
    }

    for window in profile.windows(2) {
        let (a, b) = (&window[0], &window[1]);
        if a.total_gex.signum() != b.total_gex.signum() && a.total_gex != 0.0 && b.total_gex != 0.0 {
            let denom = a.total_gex.abs() + b.total_gex.abs();
            if denom > 0.0 {
                let level = a.strike + (b.strike - a.strike) * (a.total_gex.abs() / denom);
                return Some(GammaFlip {
                    level,
                    confidence: FlipConfidence::High,
                });
            }
        }
    }

    profile
        .iter()
        .min_by(|a, b| a.total_gex.abs().partial_cmp(&b.total_gex.abs()).unwrap_or(std::cmp::Ordering::Equal))
        .map(|p| GammaFlip {
            level: p.strike,
            confidence: FlipConfidence::Medium,
        })
}

fn wall(profile: &[GammaProfilePoint], spot: f64, side: Side) -> Option<Wall> {
    let pick = match side {
        Side::Put => profile.iter().min_by(|a, b| a.put_gex.partial_cmp(&b.put_gex).unwrap_or(std::cmp::Ordering::Equal)),
        Side::Call => profile.iter().max_by(|a, b| a.call_gex.partial_cmp(&b.call_gex).unwrap_or(std::cmp::Ordering::Equal)),
    }?;

    let (gex, open_interest, gamma) = match side {
        Side::Put => (pick.put_gex, pick.put_oi, pick.put_gamma),
        Side::Call => (pick.call_gex, pick.call_oi, pick.call_gamma),
    };
    let distance = (pick.strike - spot).abs();
    let distance_pct = if spot > 0.0 { distance / spot } else { 0.0 };

    Some(Wall {
        strike: pick.strike,
        gex,
        open_interest,
        gamma,
        distance,
        distance_pct,
    })
}

/// Put wall: strike with the most negative put-side GEX
#[must_use]
pub fn put_wall(profile: &[GammaProfilePoint], spot: f64) -> Option<Wall> {
    wall(profile, spot, Side::Put)
}

/// Call wall: strike with the most positive call-side GEX
#[must_use]
pub fn call_wall(profile: &[GammaProfilePoint], spot: f64) -> Option<Wall> {
    wall(profile, spot, Side::Call)
}

/// Build a wall zone around a peak: strikes on the same side whose |GEX| is
/// at least `threshold * |peak|`
#[must_use]
pub fn wall_zone(profile: &[GammaProfilePoint], side: Side, threshold: f64) -> Option<WallZone> {
    let peak_point = match side {
        Side::Put => profile.iter().min_by(|a, b| a.put_gex.partial_cmp(&b.put_gex).unwrap_or(std::cmp::Ordering::Equal)),
        Side::Call => profile.iter().max_by(|a, b| a.call_gex.partial_cmp(&b.call_gex).unwrap_or(std::cmp::Ordering::Equal)),
    }?;
    let peak_gex = match side {
        Side::Put => peak_point.put_gex,
        Side::Call => peak_point.call_gex,
    };
    if peak_gex == 0.0 {
        return None;
    }
    let peak_strike = peak_point.strike;
    let cutoff = threshold * peak_gex.abs();

    let mut zone_strikes: Vec<(f64, f64)> = Vec::new();
    for point in profile {
        let side_gex = match side {
            Side::Put => point.put_gex,
            Side::Call => point.call_gex,
        };
        if side_gex.abs() >= cutoff {
            let pct = if peak_gex.abs() > 0.0 { side_gex.abs() / peak_gex.abs() * 100.0 } else { 0.0 };
            zone_strikes.push((point.strike, pct));
        }
    }

    if zone_strikes.is_empty() {
        return None;
    }

    let zone_low = zone_strikes.iter().map(|(s, _)| *s).fold(f64::INFINITY, f64::min);
    let zone_high = zone_strikes.iter().map(|(s, _)| *s).fold(f64::NEG_INFINITY, f64::max);
    let total_zone_gex: f64 = profile
        .iter()
        .filter(|p| zone_strikes.iter().any(|(s, _)| (*s - p.strike).abs() < f64::EPSILON))
        .map(|p| match side {
            Side::Put => p.put_gex,
            Side::Call => p.call_gex,
        })
        .sum();

    Some(WallZone {
        peak_strike,
        peak_gex,
        zone_low,
        zone_high,
        zone_strikes,
        total_zone_gex,
        threshold,
    })
}

/// Range info accompanying a smart-range filtered profile
#[derive(Debug, Clone, Copy)]
pub struct RangeInfo {
    /// Lower bound of the price range considered
    pub low: f64,
    /// Upper bound of the price range considered
    pub high: f64,
    /// strikes kept / strikes considered
    pub compression_ratio: f64,
}

/// Smart-range strike filter: spot +- range% expanded to cover wall zones,
/// keeping strikes that are significant or inside a wall zone
#[must_use]
pub fn smart_range(
    profile: &[GammaProfilePoint],
    spot: f64,
    zones: &[WallZone],
    range_pct: f64,
    gex_threshold_pct: f64,
) -> (Vec<GammaProfilePoint>, RangeInfo) {
    if profile.is_empty() || spot <= 0.0 {
        return (
            Vec::new(),
            RangeInfo {
                low: 0.0,
                high: 0.0,
                compression_ratio: 0.0,
            },
        );
    }

    let mut low = spot * (1.0 - range_pct);
    let mut high = spot * (1.0 + range_pct);
    let margin = spot * 0.05;
    for zone in zones {
        low = low.min(zone.zone_low - margin);
        high = high.max(zone.zone_high + margin);
    }

    let max_abs_side_gex = profile
        .iter()
        .flat_map(|p| [p.call_gex.abs(), p.put_gex.abs()])
        .fold(0.0_f64, f64::max);
    let gex_cutoff = gex_threshold_pct * max_abs_side_gex;

    let kept: Vec<GammaProfilePoint> = profile
        .iter()
        .filter(|p| {
            if p.strike < low || p.strike > high {
                return false;
            }
            let significant = p.total_gex.abs() >= gex_cutoff;
            let in_zone = zones.iter().any(|z| p.strike >= z.zone_low && p.strike <= z.zone_high);
            significant || in_zone
        })
        .copied()
        .collect();

    let compression_ratio = if profile.is_empty() {
        0.0
    } else {
        kept.len() as f64 / profile.len() as f64
    };

    (kept, RangeInfo { low, high, compression_ratio })
}

#[cfg(test)]
mod tests {
    use super::*;
    use services_common::Ts;

    fn opt(strike: f64, side: Side, gamma: f64, oi: f64) -> OptionContract {
        OptionContract {
            symbol: format!("S{strike}"),
            underlying: "BTC".into(),
            strike,
            expiry: Ts::from_nanos(0),
            side,
            contract_size: 1.0,
            mark_price: 0.0,
            bid: 0.0,
            ask: 0.0,
            last_price: 0.0,
            bid_iv: 0.0,
            ask_iv: 0.0,
            mark_iv: 0.0,
            delta: 0.0,
            gamma,
            theta: 0.0,
            vega: 0.0,
            open_interest: oi,
            volume: 0.0,
            last_update: Ts::from_nanos(0),
        }
    }

    #[test]
    fn gex_aggregate_matches_scenario_1() {
        let options = vec![
            opt(100_000.0, Side::Call, 0.001, 100.0),
            opt(100_000.0, Side::Put, 0.001, 50.0),
        ];
        let profile = gamma_profile(&options, 100_000.0);
        let total = total_gex(&profile);
        assert!((total.calls - 1.0e8).abs() < 1.0);
        assert!((total.puts - (-5.0e7)).abs() < 1.0);
        assert!((total.total - 5.0e7).abs() < 1.0);
    }

    #[test]
    fn zero_gamma_or_oi_contributes_nothing() {
        let options = vec![opt(100_000.0, Side::Call, 0.0, 100.0), opt(101_000.0, Side::Call, 0.001, 0.0)];
        for option in &options {
            assert_eq!(contract_gex(option, 100_000.0), 0.0);
        }
    }

    #[test]
    fn gamma_flip_interpolates_scenario_2() {
        let profile = vec![
            GammaProfilePoint {
                strike: 99_000.0,
                total_gex: 10.0,
                call_gex: 10.0,
                put_gex: 0.0,
                call_oi: 0.0,
                put_oi: 0.0,
                call_gamma: 0.0,
                put_gamma: 0.0,
            },
            GammaProfilePoint {
                strike: 101_000.0,
                total_gex: -10.0,
                call_gex: 0.0,
                put_gex: -10.0,
                call_oi: 0.0,
                put_oi: 0.0,
                call_gamma: 0.0,
                put_gamma: 0.0,
            },
        ];
        let flip = gamma_flip(&profile).unwrap();
        assert!((flip.level - 100_000.0).abs() < 1e-6);
        assert_eq!(flip.confidence, FlipConfidence::High);
    }

    #[test]
    fn wall_zone_matches_scenario_3() {
        let profile = vec![
            GammaProfilePoint { strike: 98_000.0, total_gex: -100.0, call_gex: 0.0, put_gex: -100.0, call_oi: 0.0, put_oi: 0.0, call_gamma: 0.0, put_gamma: 0.0 },
            GammaProfilePoint { strike: 99_000.0, total_gex: -90.0, call_gex: 0.0, put_gex: -90.0, call_oi: 0.0, put_oi: 0.0, call_gamma: 0.0, put_gamma: 0.0 },
            GammaProfilePoint { strike: 100_000.0, total_gex: -30.0, call_gex: 0.0, put_gex: -30.0, call_oi: 0.0, put_oi: 0.0, call_gamma: 0.0, put_gamma: 0.0 },
            GammaProfilePoint { strike: 101_000.0, total_gex: -20.0, call_gex: 0.0, put_gex: -20.0, call_oi: 0.0, put_oi: 0.0, call_gamma: 0.0, put_gamma: 0.0 },
        ];
        let zone = wall_zone(&profile, Side::Put, 0.7).unwrap();
        assert!((zone.zone_low - 98_000.0).abs() < f64::EPSILON);
        assert!((zone.zone_high - 99_000.0).abs() < f64::EPSILON);
        assert!((zone.total_zone_gex - (-190.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn put_wall_is_minimum_and_call_wall_is_maximum() {
        let options = vec![
            opt(98_000.0, Side::Put, 0.002, 100.0),
            opt(99_000.0, Side::Put, 0.001, 50.0),
            opt(101_000.0, Side::Call, 0.002, 100.0),
            opt(102_000.0, Side::Call, 0.001, 50.0),
        ];
        let profile = gamma_profile(&options, 100_000.0);
        let pw = put_wall(&profile, 100_000.0).unwrap();
        let cw = call_wall(&profile, 100_000.0).unwrap();
        for p in &profile {
            assert!(pw.gex <= p.put_gex || p.put_gex == 0.0 || (pw.gex - p.put_gex).abs() < 1e-9);
            assert!(cw.gex >= p.call_gex || p.call_gex == 0.0 || (cw.gex - p.call_gex).abs() < 1e-9);
        }
    }

    #[test]
    fn empty_input_returns_empty_not_error() {
        let profile = gamma_profile(&[], 100_000.0);
        assert!(profile.is_empty());
        assert!(gamma_flip(&profile).is_none());
        let (kept, info) = smart_range(&profile, 100_000.0, &[], 0.3, 0.02);
        assert!(kept.is_empty());
        assert_eq!(info.compression_ratio, 0.0);
    }
}
