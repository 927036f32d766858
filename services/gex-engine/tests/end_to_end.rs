//! End-to-end scenarios driven entirely through the `Engine` facade, the way
//! an ingestion adapter and the HTTP layer actually call it.

use gex_engine::{Engine, EngineConfig};
use gex_engine::option_store::ContractMeta;
use gex_engine::types::{LiquidationEvent, LiquidationSide, OrderBookSnapshot, Side};
use services_common::{Px, Qty, Ts};

fn option(symbol: &str, strike: f64, side: Side, gamma: f64, oi: f64, engine: &Engine, now: Ts) {
    engine
        .options()
        .upsert_contract(
            ContractMeta {
                symbol: symbol.to_string(),
                underlying: "BTC".to_string(),
                strike,
                expiry: Ts::from_nanos(now.as_nanos() + 86_400_000_000_000),
                side,
                contract_size: 1.0,
            },
            now,
        )
        .unwrap();
    engine.options().apply_greeks(&[(symbol.to_string(), gex_engine::option_store::GreeksUpdate {
        delta: 0.0,
        gamma,
        theta: 0.0,
        vega: 0.0,
        mark_iv: 0.6,
    })], now);
    engine.options().apply_oi(symbol, oi, now);
}

#[tokio::test]
async fn gex_aggregate_matches_two_contract_scenario() {
    let engine = Engine::new(EngineConfig::default());
    engine.set_spot(100_000.0);
    let now = Ts::from_nanos(0);

    option("BTC-100000-C", 100_000.0, Side::Call, 0.001, 100.0, &engine, now);
    let view = engine.gex_view().await;
    assert!((view.total.calls - 1.0e8).abs() < 1.0);

    option("BTC-100000-P", 100_000.0, Side::Put, 0.001, 50.0, &engine, now);
    let view = engine.gex_view().await;
    assert!((view.total.calls - 1.0e8).abs() < 1.0);
    assert!((view.total.puts - (-5.0e7)).abs() < 1.0);
    assert!((view.total.total - 5.0e7).abs() < 1.0);
}

#[tokio::test]
async fn empty_store_yields_empty_aggregates_without_error() {
    let engine = Engine::new(EngineConfig::default());
    let view = engine.gex_view().await;
    assert!(view.profile.is_empty());
    assert!((view.total.total - 0.0).abs() < f64::EPSILON);
    assert!(view.flip.is_none());
    assert!(view.put_wall.is_none());
    assert!(view.call_wall.is_none());
    assert!(engine.max_pain().await.is_none());
    assert!(engine.volatility_surface(Ts::from_nanos(0)).await.is_none());
    assert!(engine.volatility_anomalies(Ts::from_nanos(0)).await.is_empty());
}

#[tokio::test]
async fn metrics_bundle_is_byte_equal_within_cache_ttl() {
    let engine = Engine::new(EngineConfig::default());
    engine.set_spot(100_000.0);
    let now = Ts::from_nanos(0);
    option("BTC-100000-C", 100_000.0, Side::Call, 0.001, 100.0, &engine, now);

    let first = engine.metrics_bundle(now).await;
    let second = engine.metrics_bundle(now).await;
    assert!((first.total_gex - second.total_gex).abs() < f64::EPSILON);
    assert!((first.max_gex_strike - second.max_gex_strike).abs() < f64::EPSILON);
    assert_eq!(first.regime, second.regime);
    assert_eq!(first.sentiment, second.sentiment);
}

#[tokio::test]
async fn liquidation_cascade_detected_through_engine() {
    let engine = Engine::new(EngineConfig::default());
    let now = Ts::from_nanos(60_000_000_000);
    for i in 0..11 {
        engine.liquidations().record(LiquidationEvent::new(
            Ts::from_nanos(i * 1_000_000_000),
            LiquidationSide::Sell,
            Px::new(10_000.0),
            Qty::new(1.0),
        ));
    }
    let stats = engine.liquidation_summary(now).await;
    assert!(stats.cascade);

    let detection = engine.run_escape_tick(now).await;
    // no order book / spot primed yet, so no escape hypothesis should fire
    assert_eq!(detection.hypothesis, gex_engine::types::EscapeHypothesis::None);
}

#[tokio::test]
async fn order_book_ingest_enables_book_backed_queries() {
    let engine = Engine::new(EngineConfig::default());
    assert!(engine.order_book_metrics().await.is_err());

    engine.ingest_order_book(OrderBookSnapshot {
        ts: Ts::from_nanos(0),
        bids: vec![(Px::new(99_900.0), Qty::new(5.0)), (Px::new(99_800.0), Qty::new(3.0))],
        asks: vec![(Px::new(100_100.0), Qty::new(4.0)), (Px::new(100_200.0), Qty::new(2.0))],
    });

    let metrics = engine.order_book_metrics().await.unwrap();
    assert!(metrics.bid_depth > 0.0);
    assert!(metrics.ask_depth > 0.0);

    let status = engine.status();
    assert!(status.order_book_primed);
    assert_eq!(status.option_count, 0);
}

#[tokio::test]
async fn strategy_recommendations_are_returned_for_a_quiet_market() {
    let engine = Engine::new(EngineConfig::default());
    engine.set_spot(100_000.0);
    let now = Ts::from_nanos(0);
    option("BTC-100000-C", 100_000.0, Side::Call, 0.001, 500.0, &engine, now);
    option("BTC-100000-P", 100_000.0, Side::Put, 0.001, 500.0, &engine, now);

    let recs = engine.recommend_strategies(now, 3).await;
    assert!(!recs.is_empty());
    assert!(recs.len() <= 3);
    for window in recs.windows(2) {
        assert!(window[0].score >= window[1].score);
    }
}
