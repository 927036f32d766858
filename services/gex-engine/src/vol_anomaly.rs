//! Statistical anomaly detection over the volatility surface
//!
//! Pure function over `SurfacePoint`s grouped by DTE; uses `statrs` for
//! mean/stdev the way `options-engine` already depends on it for its own
//! volatility statistics.

use crate::types::{Anomaly, AnomalyKind, PriceType, Severity, SkewType, SurfacePoint};
use rustc_hash::FxHashMap;
use statrs::statistics::Statistics;

const MIN_POINTS_PER_DTE: usize = 5;
const MIN_PAIRS_PER_DTE: usize = 5;

fn severity_for(z_abs: f64, relevance: f64, is_wing: bool) -> Severity {
    if is_wing && z_abs < 3.5 {
        return Severity::Low;
    }
    if z_abs > 3.0 && relevance > 30.0 {
        Severity::Critical
    } else if z_abs > 3.0 {
        Severity::High
    } else if z_abs > 2.5 || (z_abs > 2.0 && relevance > 20.0) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn relevance_score(volume: f64, open_interest: f64) -> f64 {
    let score = 0.3 * (1.0 + volume).log10() * 10.0 + 0.7 * (1.0 + open_interest).log10() * 10.0;
    score.min(100.0)
}

fn expected_iv_interpolated(points: &[&SurfacePoint], target: &SurfacePoint, dte_mean: f64) -> f64 {
    let mut below: Option<&&SurfacePoint> = None;
    let mut above: Option<&&SurfacePoint> = None;
    for point in points {
        if std::ptr::eq(*point, target) {
            continue;
        }
        let Some(_iv) = point.avg_iv else { continue };
        if point.moneyness <= target.moneyness {
            if below.is_none_or(|b| point.moneyness > b.moneyness) {
                below = Some(point);
            }
        } else if above.is_none_or(|a| point.moneyness < a.moneyness) {
            above = Some(point);
        }
    }

    match (below, above) {
        (Some(b), Some(a)) => {
            let (biv, aiv) = (b.avg_iv.unwrap_or(dte_mean), a.avg_iv.unwrap_or(dte_mean));
            let span = a.moneyness - b.moneyness;
            if span.abs() < f64::EPSILON {
                (biv + aiv) / 2.0
            } else {
                let t = (target.moneyness - b.moneyness) / span;
                biv + (aiv - biv) * t
            }
        }
        (Some(b), None) => b.avg_iv.unwrap_or(dte_mean),
        (None, Some(a)) => a.avg_iv.unwrap_or(dte_mean),
        (None, None) => dte_mean,
    }
}

/// Detect IV-outlier and skew anomalies across a surface, given a z threshold
#[must_use]
pub fn detect_anomalies(points: &[SurfacePoint], z_threshold: f64) -> Vec<Anomaly> {
    let mut by_dte: FxHashMap<i64, Vec<&SurfacePoint>> = FxHashMap::default();
    for point in points {
        by_dte.entry(point.dte).or_default().push(point);
    }

    let mut dtes_sorted: Vec<i64> = by_dte.keys().copied().collect();
    dtes_sorted.sort_unstable();

    let mut anomalies = Vec::new();

    for dte in &dtes_sorted {
        let group = &by_dte[dte];
        if group.len() < MIN_POINTS_PER_DTE {
            continue;
        }

        let valid_ivs: Vec<f64> = group.iter().filter_map(|p| p.avg_iv).collect();
        if valid_ivs.len() < MIN_POINTS_PER_DTE {
            continue;
        }
        let mean = valid_ivs.clone().mean();
        let stdev = valid_ivs.clone().std_dev();
        let dte_count = group.len();
        let is_wing_index = |idx: usize| idx == 0 || idx == dte_count.saturating_sub(1);

        let mut sorted_group = group.clone();
        sorted_group.sort_by(|a, b| a.moneyness.partial_cmp(&b.moneyness).unwrap());

        for (idx, point) in sorted_group.iter().enumerate() {
            let Some(iv) = point.avg_iv else { continue };
            if stdev <= 0.0 {
                continue;
            }
            let z = (iv - mean) / stdev;
            if z.abs() <= z_threshold {
                continue;
            }

            let expected = expected_iv_interpolated(&sorted_group, point, mean);
            let deviation = iv - expected;
            let relevance = relevance_score(point.volume, point.open_interest);
            let is_wing = is_wing_index(idx);
            let severity = severity_for(z.abs(), relevance, is_wing);
            let price_type = if deviation > 0.0 {
                PriceType::Overpriced
            } else {
                PriceType::Underpriced
            };

            anomalies.push(Anomaly {
                kind: AnomalyKind::IvOutlier,
                strike: point.strike,
                dte: *dte,
                moneyness: point.moneyness,
                observed: iv,
                observed_secondary: None,
                expected,
                deviation,
                z_score: z,
                severity,
                price_type: Some(price_type),
                skew_type: None,
                relevance,
                is_wing,
            });
        }

        // Skew anomalies: pairs with both call and put IV at this DTE
        let pairs: Vec<(&SurfacePoint, f64, f64)> = group
            .iter()
            .filter_map(|p| match (p.call_iv, p.put_iv) {
                (Some(c), Some(pu)) => Some((*p, c, pu)),
                _ => None,
            })
            .collect();

        if pairs.len() < MIN_PAIRS_PER_DTE {
            continue;
        }

        let spreads: Vec<f64> = pairs.iter().map(|(_, c, p)| p - c).collect();
        let spread_mean = spreads.clone().mean();
        let spread_stdev = spreads.clone().std_dev();
        if spread_stdev <= 0.0 {
            continue;
        }

        for (point, call_iv, put_iv) in &pairs {
            let spread = put_iv - call_iv;
            let z = (spread - spread_mean) / spread_stdev;
            if z.abs() <= z_threshold {
                continue;
            }
            let relevance = relevance_score(point.volume, point.open_interest);
            let severity = severity_for(z.abs(), relevance, false);
            let skew_type = if spread > spread_mean {
                SkewType::PutPremium
            } else {
                SkewType::CallPremium
            };

            anomalies.push(Anomaly {
                kind: AnomalyKind::SkewAnomaly,
                strike: point.strike,
                dte: *dte,
                moneyness: point.moneyness,
                observed: *put_iv,
                observed_secondary: Some(*call_iv),
                expected: spread_mean,
                deviation: spread - spread_mean,
                z_score: z,
                severity,
                price_type: None,
                skew_type: Some(skew_type),
                relevance,
                is_wing: false,
            });
        }
    }

    anomalies.sort_by(|a, b| {
        let score = |x: &Anomaly| x.z_score.abs() * (1.0 + (1.0 + x.relevance).log10());
        score(b).partial_cmp(&score(a)).unwrap_or(std::cmp::Ordering::Equal)
    });

    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(dte: i64, strike: f64, moneyness: f64, iv: f64, volume: f64, oi: f64) -> SurfacePoint {
        SurfacePoint {
            dte,
            strike,
            moneyness,
            avg_iv: Some(iv),
            call_iv: Some(iv),
            put_iv: Some(iv),
            volume,
            open_interest: oi,
        }
    }

    #[test]
    fn dte_with_too_few_points_is_skipped() {
        let points = vec![point(7, 100.0, 1.0, 0.5, 10.0, 10.0); 4];
        assert!(detect_anomalies(&points, 2.0).is_empty());
    }

    #[test]
    fn scenario_5_outlier_is_critical_overpriced() {
        let mut points: Vec<SurfacePoint> = (0..9)
            .map(|i| point(7, 100_000.0 + f64::from(i) * 100.0, 1.0, 0.6, 100.0, 1000.0))
            .collect();
        points.push(point(7, 101_000.0, 1.01, 0.9, 1000.0, 8000.0));

        let anomalies = detect_anomalies(&points, 2.0);
        let outlier = anomalies.iter().find(|a| (a.observed - 0.9).abs() < 1e-9).unwrap();
        assert!(outlier.z_score > 2.5);
        assert_eq!(outlier.severity, Severity::Critical);
        assert_eq!(outlier.price_type, Some(PriceType::Overpriced));
    }

    #[test]
    fn relevance_is_capped_at_100() {
        assert!(relevance_score(1e12, 1e12) <= 100.0);
    }
}
