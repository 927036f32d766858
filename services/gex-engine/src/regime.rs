//! Gamma-regime classification and strike-distribution analysis
//!
//! Pure functions over `(spot, total_gex, gamma_flip)`, mirroring
//! `gex.rs`'s stateless style.

use crate::types::{GammaProfilePoint, RegimeLabel};

/// Static description attached to a regime label
#[derive(Debug, Clone, Copy)]
pub struct RegimeInfo {
    /// The label itself
    pub label: RegimeLabel,
    /// One-line description
    pub description: &'static str,
    /// Expected volatility behavior
    pub volatility_expectation: &'static str,
}

/// Classify the current gamma regime from spot vs. the flip level and the
/// sign of net total GEX
#[must_use]
pub fn classify(spot: f64, total_gex: f64, flip_level: f64) -> RegimeInfo {
    let positive_gamma = total_gex >= 0.0;
    let above_flip = spot >= flip_level;

    match (positive_gamma, above_flip) {
        (true, true) => RegimeInfo {
            label: RegimeLabel::PositiveGammaAboveFlip,
            description: "Dealers long gamma above the flip; hedging dampens moves",
            volatility_expectation: "Suppressed, mean-reverting",
        },
        (true, false) => RegimeInfo {
            label: RegimeLabel::PositiveGammaBelowFlip,
            description: "Dealers long gamma below the flip; hedging still dampens moves",
            volatility_expectation: "Suppressed",
        },
        (false, false) => RegimeInfo {
            label: RegimeLabel::NegativeGammaBelowFlip,
            description: "Dealers short gamma below the flip; hedging amplifies moves",
            volatility_expectation: "Elevated, trend-following",
        },
        (false, true) => RegimeInfo {
            label: RegimeLabel::NegativeGammaAboveFlip,
            description: "Dealers short gamma above the flip; hedging amplifies moves",
            volatility_expectation: "Elevated",
        },
    }
}

/// Strikes where |total_gex| exceeds twice the mean absolute total GEX
#[must_use]
pub fn significant_levels(profile: &[GammaProfilePoint]) -> Vec<f64> {
    if profile.is_empty() {
        return Vec::new();
    }
    let mean_abs = profile.iter().map(|p| p.total_gex.abs()).sum::<f64>() / profile.len() as f64;
    let cutoff = 2.0 * mean_abs;
    profile.iter().filter(|p| p.total_gex.abs() > cutoff).map(|p| p.strike).collect()
}

/// Probable trading range: `[min(strike with negative GEX), max(strike with positive GEX)]`
#[must_use]
pub fn probable_trading_range(profile: &[GammaProfilePoint]) -> Option<(f64, f64)> {
    let low = profile
        .iter()
        .filter(|p| p.total_gex < 0.0)
        .map(|p| p.strike)
        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.min(s))));
    let high = profile
        .iter()
        .filter(|p| p.total_gex > 0.0)
        .map(|p| p.strike)
        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
    match (low, high) {
        (Some(l), Some(h)) => Some((l, h)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_gamma_above_flip_is_suppressed() {
        let info = classify(101_000.0, 5.0e8, 100_000.0);
        assert_eq!(info.label, RegimeLabel::PositiveGammaAboveFlip);
    }

    #[test]
    fn negative_gamma_below_flip_is_elevated() {
        let info = classify(99_000.0, -5.0e8, 100_000.0);
        assert_eq!(info.label, RegimeLabel::NegativeGammaBelowFlip);
    }

    #[test]
    fn significant_levels_require_double_the_mean() {
        let profile = vec![
            GammaProfilePoint { strike: 1.0, total_gex: 10.0, call_gex: 0.0, put_gex: 0.0, call_oi: 0.0, put_oi: 0.0, call_gamma: 0.0, put_gamma: 0.0 },
            GammaProfilePoint { strike: 2.0, total_gex: 10.0, call_gex: 0.0, put_gex: 0.0, call_oi: 0.0, put_oi: 0.0, call_gamma: 0.0, put_gamma: 0.0 },
            GammaProfilePoint { strike: 3.0, total_gex: 100.0, call_gex: 0.0, put_gex: 0.0, call_oi: 0.0, put_oi: 0.0, call_gamma: 0.0, put_gamma: 0.0 },
        ];
        assert_eq!(significant_levels(&profile), vec![3.0]);
    }

    #[test]
    fn probable_trading_range_spans_negative_to_positive() {
        let profile = vec![
            GammaProfilePoint { strike: 98_000.0, total_gex: -10.0, call_gex: 0.0, put_gex: 0.0, call_oi: 0.0, put_oi: 0.0, call_gamma: 0.0, put_gamma: 0.0 },
            GammaProfilePoint { strike: 102_000.0, total_gex: 10.0, call_gex: 0.0, put_gex: 0.0, call_oi: 0.0, put_oi: 0.0, call_gamma: 0.0, put_gamma: 0.0 },
        ];
        assert_eq!(probable_trading_range(&profile), Some((98_000.0, 102_000.0)));
    }
}
