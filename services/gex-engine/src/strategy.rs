//! Strategy recommendation: score a static catalog against derived market state
//!
//! Pure function over a `MarketConditions` snapshot, scored (not executed)
//! against a static catalog of templates — the same construction style as
//! `options-engine`'s strategy builders, minus the execution path.

use crate::types::{AnomalyKind, RegimeLabel, Sentiment};
use serde::Serialize;

/// Strategy category tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    /// Range-bound, theta-positive strategies
    Neutral,
    /// Directional bets
    Directional,
    /// Vol-expansion or vol-crush bets
    Volatility,
}

/// Coarse implied-volatility bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityBucket {
    /// ATM IV < 0.4
    Low,
    /// 0.4 <= ATM IV < 0.8
    Normal,
    /// ATM IV >= 0.8
    High,
}

impl VolatilityBucket {
    /// Bucket an ATM IV reading
    #[must_use]
    pub fn from_atm_iv(atm_iv: f64) -> Self {
        if atm_iv >= 0.8 {
            Self::High
        } else if atm_iv >= 0.4 {
            Self::Normal
        } else {
            Self::Low
        }
    }
}

/// Coarse skew bucket from `total_skew` (put_iv - call_iv)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkewBucket {
    /// total_skew > 0.02
    PutSkew,
    /// total_skew < -0.02
    CallSkew,
    /// |total_skew| <= 0.02
    Flat,
}

impl SkewBucket {
    /// Bucket a total-skew reading
    #[must_use]
    pub fn from_total_skew(total_skew: Option<f64>) -> Self {
        match total_skew {
            Some(v) if v > 0.02 => Self::PutSkew,
            Some(v) if v < -0.02 => Self::CallSkew,
            _ => Self::Flat,
        }
    }
}

/// Sign of net total GEX
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GexSign {
    /// total_gex >= 0
    Positive,
    /// total_gex < 0
    Negative,
}

impl GexSign {
    /// Classify net total GEX
    #[must_use]
    pub fn from_total(total_gex: f64) -> Self {
        if total_gex >= 0.0 {
            Self::Positive
        } else {
            Self::Negative
        }
    }
}

/// Market-state snapshot the recommender scores against
#[derive(Debug, Clone, Copy)]
pub struct MarketConditions<'a> {
    /// Current gamma regime
    pub regime: RegimeLabel,
    /// Coarse IV bucket
    pub volatility: VolatilityBucket,
    /// Coarse skew bucket
    pub skew: SkewBucket,
    /// Net GEX sign
    pub gex_sign: GexSign,
    /// |max_pain - spot| / spot
    pub max_pain_distance_pct: f64,
    /// Put/call sentiment bucket
    pub sentiment: Sentiment,
    /// Anomaly kinds observed in the current snapshot
    pub anomaly_kinds: &'a [AnomalyKind],
}

struct Condition {
    name: &'static str,
    weight: f64,
    matches: fn(&MarketConditions) -> bool,
}

struct StrategyTemplate {
    name: &'static str,
    category: Category,
    conditions: &'static [Condition],
}

/// Fit bucket for a scored strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FitBucket {
    /// score >= 80
    Excellent,
    /// score >= 65
    Good,
    /// score >= 50
    Fair,
    /// score < 50
    Poor,
}

impl FitBucket {
    fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Excellent
        } else if score >= 65.0 {
            Self::Good
        } else if score >= 50.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

/// A scored strategy recommendation
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    /// Strategy name
    pub name: &'static str,
    /// Category tag
    pub category: Category,
    /// 0-100 score
    pub score: f64,
    /// Fit bucket derived from `score`
    pub fit: FitBucket,
    /// Per-condition reasoning strings for matched conditions
    pub reasons: Vec<String>,
}

macro_rules! strategy {
    ($name:literal, $category:expr, [$($cond:expr),+ $(,)?]) => {
        StrategyTemplate {
            name: $name,
            category: $category,
            conditions: &[$($cond),+],
        }
    };
}

static CATALOG: &[StrategyTemplate] = &[
    strategy!(
        "Iron Condor",
        Category::Neutral,
        [
            Condition { name: "positive gamma regime", weight: 35.0, matches: |c| matches!(c.regime, RegimeLabel::PositiveGammaAboveFlip | RegimeLabel::PositiveGammaBelowFlip) },
            Condition { name: "normal or low volatility", weight: 25.0, matches: |c| matches!(c.volatility, VolatilityBucket::Low | VolatilityBucket::Normal) },
            Condition { name: "flat skew", weight: 20.0, matches: |c| c.skew == SkewBucket::Flat },
            Condition { name: "spot near max pain", weight: 20.0, matches: |c| c.max_pain_distance_pct < 0.03 },
        ]
    ),
    strategy!(
        "Short Strangle",
        Category::Neutral,
        [
            Condition { name: "positive gamma regime", weight: 30.0, matches: |c| matches!(c.regime, RegimeLabel::PositiveGammaAboveFlip | RegimeLabel::PositiveGammaBelowFlip) },
            Condition { name: "high volatility to sell", weight: 35.0, matches: |c| c.volatility == VolatilityBucket::High },
            Condition { name: "neutral sentiment", weight: 20.0, matches: |c| c.sentiment == Sentiment::Neutral },
            Condition { name: "spot near max pain", weight: 15.0, matches: |c| c.max_pain_distance_pct < 0.05 },
        ]
    ),
    strategy!(
        "Long Straddle",
        Category::Volatility,
        [
            Condition { name: "negative gamma regime", weight: 40.0, matches: |c| matches!(c.regime, RegimeLabel::NegativeGammaBelowFlip | RegimeLabel::NegativeGammaAboveFlip) },
            Condition { name: "low volatility to buy", weight: 30.0, matches: |c| c.volatility == VolatilityBucket::Low },
            Condition { name: "IV outlier observed", weight: 30.0, matches: |c| c.anomaly_kinds.contains(&AnomalyKind::IvOutlier) },
        ]
    ),
    strategy!(
        "Risk Reversal (Call Side)",
        Category::Directional,
        [
            Condition { name: "negative gex sign", weight: 30.0, matches: |c| c.gex_sign == GexSign::Negative },
            Condition { name: "bullish sentiment", weight: 35.0, matches: |c| matches!(c.sentiment, Sentiment::Bullish | Sentiment::VeryBullish) },
            Condition { name: "put skew to finance calls", weight: 35.0, matches: |c| c.skew == SkewBucket::PutSkew },
        ]
    ),
    strategy!(
        "Risk Reversal (Put Side)",
        Category::Directional,
        [
            Condition { name: "negative gex sign", weight: 30.0, matches: |c| c.gex_sign == GexSign::Negative },
            Condition { name: "bearish sentiment", weight: 35.0, matches: |c| matches!(c.sentiment, Sentiment::Bearish | Sentiment::VeryBearish) },
            Condition { name: "call skew to finance puts", weight: 35.0, matches: |c| c.skew == SkewBucket::CallSkew },
        ]
    ),
    strategy!(
        "Calendar Spread",
        Category::Volatility,
        [
            Condition { name: "skew anomaly observed", weight: 40.0, matches: |c| c.anomaly_kinds.contains(&AnomalyKind::SkewAnomaly) },
            Condition { name: "normal volatility", weight: 30.0, matches: |c| c.volatility == VolatilityBucket::Normal },
            Condition { name: "spot near max pain", weight: 30.0, matches: |c| c.max_pain_distance_pct < 0.05 },
        ]
    ),
];

fn score_template(template: &StrategyTemplate, conditions: &MarketConditions) -> Recommendation {
    let mut score = 0.0;
    let mut reasons = Vec::new();
    for cond in template.conditions {
        if (cond.matches)(conditions) {
            score += cond.weight;
            reasons.push(cond.name.to_string());
        }
    }
    score = score.min(100.0);
    Recommendation {
        name: template.name,
        category: template.category,
        score,
        fit: FitBucket::from_score(score),
        reasons,
    }
}

/// Score every strategy in the catalog and return the top `n` by score
#[must_use]
pub fn recommend(conditions: &MarketConditions, top_n: usize) -> Vec<Recommendation> {
    let mut scored: Vec<Recommendation> = CATALOG.iter().map(|t| score_template(t, conditions)).collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_n);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> MarketConditions<'static> {
        MarketConditions {
            regime: RegimeLabel::PositiveGammaAboveFlip,
            volatility: VolatilityBucket::Normal,
            skew: SkewBucket::Flat,
            gex_sign: GexSign::Positive,
            max_pain_distance_pct: 0.01,
            sentiment: Sentiment::Neutral,
            anomaly_kinds: &[],
        }
    }

    #[test]
    fn iron_condor_scores_high_in_quiet_positive_gamma() {
        let conditions = base();
        let recs = recommend(&conditions, 1);
        assert_eq!(recs[0].name, "Iron Condor");
        assert!(recs[0].score >= 80.0);
        assert_eq!(recs[0].fit, FitBucket::Excellent);
    }

    #[test]
    fn top_n_truncates_and_sorts_descending() {
        let conditions = base();
        let recs = recommend(&conditions, 3);
        assert_eq!(recs.len(), 3);
        assert!(recs[0].score >= recs[1].score);
        assert!(recs[1].score >= recs[2].score);
    }

    #[test]
    fn directional_strategy_picks_up_sentiment_and_skew() {
        let mut conditions = base();
        conditions.gex_sign = GexSign::Negative;
        conditions.sentiment = Sentiment::VeryBullish;
        conditions.skew = SkewBucket::PutSkew;
        let recs = recommend(&conditions, 1);
        assert_eq!(recs[0].name, "Risk Reversal (Call Side)");
        assert!((recs[0].score - 100.0).abs() < f64::EPSILON);
    }
}
