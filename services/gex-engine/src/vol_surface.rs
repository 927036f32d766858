//! Implied-volatility surface construction
//!
//! Pure function over an option snapshot, keyed by (DTE, strike) the same way
//! `options-engine`'s `VolatilitySurface` keys its smile table, except the
//! fixed-point key here is (days, strike-in-ticks) rather than
//! (moneyness, tenor) since spec.md wants axes sorted by raw strike and DTE.

use crate::types::{OptionContract, Side, SurfacePoint, VolSurface};
use rustc_hash::FxHashMap;
use services_common::Ts;

fn days_to_expiry(now: Ts, expiry: Ts) -> i64 {
    let delta_secs = expiry.as_nanos().saturating_sub(now.as_nanos()) as f64 / 1_000_000_000.0;
    (delta_secs.max(0.0) / 86_400.0).ceil() as i64
}

fn strike_key(strike: f64) -> i64 {
    (strike * 100.0).round() as i64
}

struct CellAccumulator {
    call_iv_weighted: f64,
    call_oi: f64,
    call_iv_sum: f64,
    call_count: u32,
    put_iv_weighted: f64,
    put_oi: f64,
    put_iv_sum: f64,
    put_count: u32,
    volume: f64,
}

impl CellAccumulator {
    fn new() -> Self {
        Self {
            call_iv_weighted: 0.0,
            call_oi: 0.0,
            call_iv_sum: 0.0,
            call_count: 0,
            put_iv_weighted: 0.0,
            put_oi: 0.0,
            put_iv_sum: 0.0,
            put_count: 0,
            volume: 0.0,
        }
    }

    fn add(&mut self, side: Side, iv: f64, oi: f64, volume: f64) {
        self.volume += volume;
        match side {
            Side::Call => {
                self.call_iv_weighted += iv * oi;
                self.call_oi += oi;
                self.call_iv_sum += iv;
                self.call_count += 1;
            }
            Side::Put => {
                self.put_iv_weighted += iv * oi;
                self.put_oi += oi;
                self.put_iv_sum += iv;
                self.put_count += 1;
            }
        }
    }

    fn call_avg(&self) -> Option<f64> {
        if self.call_count == 0 {
            return None;
        }
        if self.call_oi > 0.0 {
            Some(self.call_iv_weighted / self.call_oi)
        } else {
            Some(self.call_iv_sum / f64::from(self.call_count))
        }
    }

    fn put_avg(&self) -> Option<f64> {
        if self.put_count == 0 {
            return None;
        }
        if self.put_oi > 0.0 {
            Some(self.put_iv_weighted / self.put_oi)
        } else {
            Some(self.put_iv_sum / f64::from(self.put_count))
        }
    }

    fn pooled_avg(&self) -> Option<f64> {
        let total_oi = self.call_oi + self.put_oi;
        let count = self.call_count + self.put_count;
        if count == 0 {
            return None;
        }
        if total_oi > 0.0 {
            Some((self.call_iv_weighted + self.put_iv_weighted) / total_oi)
        } else {
            Some((self.call_iv_sum + self.put_iv_sum) / f64::from(count))
        }
    }

    fn total_oi(&self) -> f64 {
        self.call_oi + self.put_oi
    }
}

/// Flattened per-cell surface points, used by the anomaly detector
#[must_use]
pub fn surface_points(options: &[OptionContract], spot: f64, now: Ts) -> Vec<SurfacePoint> {
    let eligible: Vec<&OptionContract> = options
        .iter()
        .filter(|o| o.mark_iv > 0.0 && o.strike > 0.0)
        .collect();

    let mut cells: FxHashMap<(i64, i64), CellAccumulator> = FxHashMap::default();
    for option in &eligible {
        let dte = days_to_expiry(now, option.expiry);
        let key = (dte, strike_key(option.strike));
        let cell = cells.entry(key).or_insert_with(CellAccumulator::new);
        cell.add(option.side, option.mark_iv, option.open_interest, option.volume);
    }

    let mut points: Vec<SurfacePoint> = cells
        .into_iter()
        .map(|((dte, strike_ticks), cell)| {
            let strike = strike_ticks as f64 / 100.0;
            SurfacePoint {
                dte,
                strike,
                moneyness: if spot > 0.0 { strike / spot } else { 0.0 },
                avg_iv: cell.pooled_avg(),
                call_iv: cell.call_avg(),
                put_iv: cell.put_avg(),
                volume: cell.volume,
                open_interest: cell.total_oi(),
            }
        })
        .collect();

    points.sort_by(|a, b| a.dte.cmp(&b.dte).then(a.strike.partial_cmp(&b.strike).unwrap_or(std::cmp::Ordering::Equal)));
    points
}

/// Build the full sorted-axis (dte x strike) IV surface
#[must_use]
pub fn build_surface(options: &[OptionContract], spot: f64, now: Ts) -> Option<VolSurface> {
    let points = surface_points(options, spot, now);
    if points.is_empty() {
        return None;
    }

    let mut strikes: Vec<f64> = points.iter().map(|p| p.strike).collect();
    strikes.sort_by(|a, b| a.partial_cmp(b).unwrap());
    strikes.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);

    let mut dtes: Vec<i64> = points.iter().map(|p| p.dte).collect();
    dtes.sort_unstable();
    dtes.dedup();

    let mut iv_matrix = vec![vec![None; strikes.len()]; dtes.len()];
    let mut call_iv_matrix = vec![vec![None; strikes.len()]; dtes.len()];
    let mut put_iv_matrix = vec![vec![None; strikes.len()]; dtes.len()];

    for point in &points {
        let row = dtes.iter().position(|d| *d == point.dte).unwrap();
        let col = strikes
            .iter()
            .position(|s| (*s - point.strike).abs() < f64::EPSILON)
            .unwrap();
        iv_matrix[row][col] = point.avg_iv;
        call_iv_matrix[row][col] = point.call_iv;
        put_iv_matrix[row][col] = point.put_iv;
    }

    let atm_strike = strikes
        .iter()
        .copied()
        .min_by(|a, b| (a - spot).abs().partial_cmp(&(b - spot).abs()).unwrap())
        .unwrap_or(spot);
    let atm_col = strikes.iter().position(|s| (*s - atm_strike).abs() < f64::EPSILON).unwrap();
    let smallest_dte_row = 0usize;
    let atm_iv = iv_matrix[smallest_dte_row][atm_col].unwrap_or(0.0);

    let put_otm = points
        .iter()
        .filter(|p| p.dte == dtes[0] && p.moneyness <= 0.90)
        .max_by(|a, b| a.moneyness.partial_cmp(&b.moneyness).unwrap());
    let call_otm = points
        .iter()
        .filter(|p| p.dte == dtes[0] && p.moneyness >= 1.10)
        .min_by(|a, b| a.moneyness.partial_cmp(&b.moneyness).unwrap());

    let put_iv = put_otm.and_then(|p| p.put_iv);
    let call_iv = call_otm.and_then(|p| p.call_iv);

    let put_skew = put_iv.map(|iv| iv - atm_iv);
    let call_skew = call_iv.map(|iv| iv - atm_iv);
    let total_skew = match (put_iv, call_iv) {
        (Some(p), Some(c)) => Some(p - c),
        _ => None,
    };

    Some(VolSurface {
        strikes,
        dtes,
        iv_matrix,
        call_iv_matrix,
        put_iv_matrix,
        atm_strike,
        atm_iv,
        put_skew,
        call_skew,
        total_skew,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use services_common::Ts;

    fn opt(strike: f64, side: Side, iv: f64, oi: f64, expiry_days: u64) -> OptionContract {
        OptionContract {
            symbol: format!("{strike}-{expiry_days}"),
            underlying: "BTC".into(),
            strike,
            expiry: Ts::from_nanos(expiry_days * 86_400 * 1_000_000_000),
            side,
            contract_size: 1.0,
            mark_price: 0.0,
            bid: 0.0,
            ask: 0.0,
            last_price: 0.0,
            bid_iv: 0.0,
            ask_iv: 0.0,
            mark_iv: iv,
            delta: 0.0,
            gamma: 0.0,
            theta: 0.0,
            vega: 0.0,
            open_interest: oi,
            volume: 10.0,
            last_update: Ts::from_nanos(0),
        }
    }

    #[test]
    fn empty_input_returns_none() {
        assert!(build_surface(&[], 100_000.0, Ts::from_nanos(0)).is_none());
    }

    #[test]
    fn missing_iv_is_dropped() {
        let mut o = opt(100_000.0, Side::Call, 0.0, 10.0, 7);
        o.mark_iv = 0.0;
        let points = surface_points(&[o], 100_000.0, Ts::from_nanos(0));
        assert!(points.is_empty());
    }

    #[test]
    fn zero_oi_falls_back_to_arithmetic_mean() {
        let options = vec![
            opt(100_000.0, Side::Call, 0.5, 0.0, 7),
            opt(100_000.0, Side::Call, 0.7, 0.0, 7),
        ];
        let points = surface_points(&options, 100_000.0, Ts::from_nanos(0));
        assert_eq!(points.len(), 1);
        assert!((points[0].call_iv.unwrap() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn surface_builds_axes_and_atm() {
        let options = vec![
            opt(99_000.0, Side::Put, 0.6, 100.0, 7),
            opt(100_000.0, Side::Call, 0.5, 100.0, 7),
            opt(101_000.0, Side::Call, 0.55, 100.0, 7),
        ];
        let surface = build_surface(&options, 100_000.0, Ts::from_nanos(0)).unwrap();
        assert_eq!(surface.dtes, vec![7]);
        assert!((surface.atm_strike - 100_000.0).abs() < f64::EPSILON);
    }
}
