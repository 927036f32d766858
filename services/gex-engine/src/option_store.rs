//! Canonical in-memory `symbol -> OptionContract` store
//!
//! Single writer (the ingestion adapter), many readers (the derived
//! calculators). Backed by `DashMap` rather than a `RwLock<HashMap>` so
//! concurrent readers never block each other or the writer on unrelated keys,
//! the same tradeoff the workspace makes elsewhere for hot shared maps.

use crate::error::{EngineError, EngineResult};
use crate::types::{OptionContract, Side};
use dashmap::DashMap;
use services_common::Ts;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Metadata needed to admit a new contract
#[derive(Debug, Clone)]
pub struct ContractMeta {
    /// Exchange symbol
    pub symbol: String,
    /// Underlying asset
    pub underlying: String,
    /// Strike price
    pub strike: f64,
    /// Expiry timestamp
    pub expiry: Ts,
    /// Call or put
    pub side: Side,
    /// Contract multiplier
    pub contract_size: f64,
}

/// A Greeks refresh for one symbol
#[derive(Debug, Clone, Copy)]
pub struct GreeksUpdate {
    /// Target symbol
    pub delta: f64,
    /// Gamma
    pub gamma: f64,
    /// Theta
    pub theta: f64,
    /// Vega
    pub vega: f64,
    /// IV implied by the mark price
    pub mark_iv: f64,
}

/// Canonical option store: single writer, many readers
#[derive(Debug, Default)]
pub struct OptionStore {
    contracts: DashMap<String, OptionContract>,
}

impl OptionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            contracts: DashMap::new(),
        }
    }

    /// Admit a new contract, or no-op if the symbol already decodes consistently
    ///
    /// Rejects when `meta` doesn't match an already-present contract's decoded
    /// fields (the symbol-decoder agreement invariant from spec.md 4.1).
    pub fn upsert_contract(&self, meta: ContractMeta, now: Ts) -> EngineResult<()> {
        if let Some(existing) = self.contracts.get(&meta.symbol) {
            let mismatched = (existing.underlying != meta.underlying)
                || (existing.strike - meta.strike).abs() > f64::EPSILON
                || existing.expiry != meta.expiry
                || existing.side != meta.side;
            if mismatched {
                return Err(EngineError::InvariantViolation(format!(
                    "symbol {} metadata mismatch on upsert",
                    meta.symbol
                )));
            }
            return Ok(());
        }

        debug!(symbol = %meta.symbol, "admitting new option contract");
        self.contracts.insert(
            meta.symbol.clone(),
            OptionContract {
                symbol: meta.symbol,
                underlying: meta.underlying,
                strike: meta.strike,
                expiry: meta.expiry,
                side: meta.side,
                contract_size: meta.contract_size,
                mark_price: 0.0,
                bid: 0.0,
                ask: 0.0,
                last_price: 0.0,
                bid_iv: 0.0,
                ask_iv: 0.0,
                mark_iv: 0.0,
                delta: 0.0,
                gamma: 0.0,
                theta: 0.0,
                vega: 0.0,
                open_interest: 0.0,
                volume: 0.0,
                last_update: now,
            },
        );
        Ok(())
    }

    /// Apply a batch of Greeks refreshes
    pub fn apply_greeks(&self, updates: &[(String, GreeksUpdate)], now: Ts) {
        for (symbol, update) in updates {
            match self.contracts.get_mut(symbol) {
                Some(mut contract) => {
                    contract.delta = update.delta;
                    contract.gamma = update.gamma;
                    contract.theta = update.theta;
                    contract.vega = update.vega;
                    contract.mark_iv = update.mark_iv;
                    contract.last_update = now;
                }
                None => warn!(symbol = %symbol, "greeks update for unknown symbol dropped"),
            }
        }
    }

    /// Apply a mark-price update
    pub fn apply_mark_price(&self, symbol: &str, px: f64, now: Ts) {
        match self.contracts.get_mut(symbol) {
            Some(mut contract) => {
                contract.mark_price = px;
                contract.last_update = now;
            }
            None => warn!(symbol = %symbol, "mark price update for unknown symbol dropped"),
        }
    }

    /// Apply a ticker update (volume, bid/ask, last price, implied bid/ask vol)
    pub fn apply_ticker(
        &self,
        symbol: &str,
        volume: f64,
        bid: f64,
        ask: f64,
        last: f64,
        bid_iv: f64,
        ask_iv: f64,
        now: Ts,
    ) {
        match self.contracts.get_mut(symbol) {
            Some(mut contract) => {
                contract.volume = volume;
                contract.bid = bid;
                contract.ask = ask;
                contract.last_price = last;
                contract.bid_iv = bid_iv;
                contract.ask_iv = ask_iv;
                contract.last_update = now;
            }
            None => warn!(symbol = %symbol, "ticker update for unknown symbol dropped"),
        }
    }

    /// Apply an open-interest refresh
    pub fn apply_oi(&self, symbol: &str, oi: f64, now: Ts) {
        match self.contracts.get_mut(symbol) {
            Some(mut contract) => {
                contract.open_interest = oi;
                contract.last_update = now;
            }
            None => warn!(symbol = %symbol, "oi update for unknown symbol dropped"),
        }
    }

    /// Snapshot of every contract, used by the pure downstream calculators
    #[must_use]
    pub fn snapshot(&self) -> Vec<OptionContract> {
        self.contracts.iter().map(|e| e.value().clone()).collect()
    }

    /// Contracts at a given strike
    #[must_use]
    pub fn by_strike(&self, strike: f64) -> Vec<OptionContract> {
        self.contracts
            .iter()
            .filter(|e| (e.value().strike - strike).abs() < f64::EPSILON)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Contracts on a given side
    #[must_use]
    pub fn by_side(&self, side: Side) -> Vec<OptionContract> {
        self.contracts
            .iter()
            .filter(|e| e.value().side == side)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Contracts expiring at `expiry`
    #[must_use]
    pub fn by_expiry(&self, expiry: Ts) -> Vec<OptionContract> {
        self.contracts
            .iter()
            .filter(|e| e.value().expiry == expiry)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Sorted, de-duplicated strikes across all contracts
    #[must_use]
    pub fn unique_strikes(&self) -> Vec<f64> {
        let mut strikes: Vec<f64> = self
            .contracts
            .iter()
            .map(|e| e.value().strike)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        strikes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        strikes.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
        strikes
    }

    /// Sorted, de-duplicated expiries across all contracts
    #[must_use]
    pub fn unique_expiries(&self) -> Vec<Ts> {
        let mut expiries: Vec<Ts> = self.contracts.iter().map(|e| e.value().expiry).collect();
        expiries.sort_unstable();
        expiries.dedup();
        expiries
    }

    /// Number of contracts currently stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    /// True when the store holds no contracts
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services_common::Ts;

    fn meta(symbol: &str, strike: f64, side: Side) -> ContractMeta {
        ContractMeta {
            symbol: symbol.to_string(),
            underlying: "BTC".to_string(),
            strike,
            expiry: Ts::from_nanos(1),
            side,
            contract_size: 1.0,
        }
    }

    #[test]
    fn upsert_then_query_roundtrips() {
        let store = OptionStore::new();
        store
            .upsert_contract(meta("BTC-100000-C", 100_000.0, Side::Call), Ts::from_nanos(0))
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.unique_strikes(), vec![100_000.0]);
    }

    #[test]
    fn upsert_rejects_metadata_mismatch() {
        let store = OptionStore::new();
        store
            .upsert_contract(meta("SYM", 100_000.0, Side::Call), Ts::from_nanos(0))
            .unwrap();
        let err = store.upsert_contract(meta("SYM", 101_000.0, Side::Call), Ts::from_nanos(0));
        assert!(err.is_err());
    }

    #[test]
    fn stale_after_ttl() {
        let mut contract = OptionContract {
            symbol: "S".into(),
            underlying: "BTC".into(),
            strike: 1.0,
            expiry: Ts::from_nanos(0),
            side: Side::Call,
            contract_size: 1.0,
            mark_price: 0.0,
            bid: 0.0,
            ask: 0.0,
            last_price: 0.0,
            bid_iv: 0.0,
            ask_iv: 0.0,
            mark_iv: 0.0,
            delta: 0.0,
            gamma: 0.0,
            theta: 0.0,
            vega: 0.0,
            open_interest: 0.0,
            volume: 0.0,
            last_update: Ts::from_nanos(0),
        };
        assert!(!contract.is_stale(Ts::from_nanos(5_000_000_000), 10));
        contract.last_update = Ts::from_nanos(0);
        assert!(contract.is_stale(Ts::from_nanos(11_000_000_000), 10));
    }
}
