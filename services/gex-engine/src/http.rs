//! Thin HTTP adapter over the query surface
//!
//! One handler per query class, wrapping `Engine`/`InMemorySink` methods in a
//! `{success, data, error}` envelope. No handler ever holds a component lock
//! across an await point -- everything awaited here is already a snapshot by
//! the time it reaches this layer (see `engine.rs`).

use crate::cache::InMemorySink;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::types::Side;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
};
use serde::{Deserialize, Serialize};
use services_common::Ts;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub history: Arc<InMemorySink>,
}

/// Error body for a failed response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Generic envelope wrapping every handler's response
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub timestamp: i64,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

/// Map an `EngineError` to its HTTP status, per the error-handling design:
/// construction-time and numeric failures are server faults, precondition
/// and not-yet-initialized failures mean "no data yet".
fn engine_error_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::QueryPrecondition(_) | EngineError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::InvariantViolation(_) | EngineError::NumericGuard(_) => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    }
}

fn error_response(err: EngineError) -> (StatusCode, Json<ApiResponse<()>>) {
    error!(error = %err, "query failed");
    let status = engine_error_status(&err);
    let body = ApiResponse {
        success: false,
        data: None,
        error: Some(ErrorBody {
            error: match &err {
                EngineError::InvariantViolation(_) => "INVARIANT_VIOLATION".to_string(),
                EngineError::NumericGuard(_) => "NUMERIC_GUARD".to_string(),
                EngineError::QueryPrecondition(_) => "PRECONDITION_FAILED".to_string(),
                EngineError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE".to_string(),
                EngineError::InvalidRequest(_) => "INVALID_REQUEST".to_string(),
            },
            message: err.to_string(),
        }),
        timestamp: chrono::Utc::now().timestamp(),
    };
    (status, Json(body))
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

fn now_ts() -> Ts {
    Ts::now()
}

// ---------------------------------------------------------------------
// System
// ---------------------------------------------------------------------

async fn health() -> Json<ApiResponse<&'static str>> {
    ok("ok")
}

async fn status(State(state): State<AppState>) -> Json<ApiResponse<crate::engine::EngineStatus>> {
    ok(state.engine.status())
}

// ---------------------------------------------------------------------
// Metrics (GEX)
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GammaProfileQuery {
    auto: Option<bool>,
}

#[derive(Debug, Serialize)]
struct GammaProfileResponse {
    profile: Vec<crate::types::GammaProfilePoint>,
    total: crate::types::TotalGex,
    flip: Option<crate::types::GammaFlip>,
    range_low: Option<f64>,
    range_high: Option<f64>,
    compression_ratio: Option<f64>,
}

async fn gamma_profile(State(state): State<AppState>, Query(query): Query<GammaProfileQuery>) -> Json<ApiResponse<GammaProfileResponse>> {
    if query.auto.unwrap_or(false) {
        let (profile, range) = state.engine.smart_range().await;
        let view = state.engine.gex_view().await;
        return ok(GammaProfileResponse {
            profile,
            total: view.total,
            flip: view.flip,
            range_low: Some(range.low),
            range_high: Some(range.high),
            compression_ratio: Some(range.compression_ratio),
        });
    }
    let view = state.engine.gex_view().await;
    ok(GammaProfileResponse {
        profile: view.profile,
        total: view.total,
        flip: view.flip,
        range_low: None,
        range_high: None,
        compression_ratio: None,
    })
}

async fn total_gex(State(state): State<AppState>) -> Json<ApiResponse<crate::types::TotalGex>> {
    ok(state.engine.gex_view().await.total)
}

async fn gamma_flip(State(state): State<AppState>) -> Json<ApiResponse<Option<crate::types::GammaFlip>>> {
    ok(state.engine.gex_view().await.flip)
}

#[derive(Debug, Serialize)]
struct WallsResponse {
    put_wall: Option<crate::types::Wall>,
    call_wall: Option<crate::types::Wall>,
}

async fn walls(State(state): State<AppState>) -> Json<ApiResponse<WallsResponse>> {
    let view = state.engine.gex_view().await;
    ok(WallsResponse {
        put_wall: view.put_wall,
        call_wall: view.call_wall,
    })
}

#[derive(Debug, Serialize)]
struct WallZonesResponse {
    put_zone: Option<crate::types::WallZone>,
    call_zone: Option<crate::types::WallZone>,
}

async fn wall_zones(State(state): State<AppState>) -> Json<ApiResponse<WallZonesResponse>> {
    let view = state.engine.gex_view().await;
    ok(WallZonesResponse {
        put_zone: view.put_zone,
        call_zone: view.call_zone,
    })
}

async fn regime(State(state): State<AppState>) -> Json<ApiResponse<serde_json::Value>> {
    let (label, description) = state.engine.regime().await;
    ok(serde_json::json!({ "label": label, "description": description }))
}

// ---------------------------------------------------------------------
// Volatility
// ---------------------------------------------------------------------

async fn vol_surface(State(state): State<AppState>) -> ApiResult<crate::types::VolSurface> {
    match state.engine.volatility_surface(now_ts()).await {
        Some(surface) => Ok(ok(surface)),
        None => Err(error_response(EngineError::QueryPrecondition("no eligible options for a volatility surface yet".to_string()))),
    }
}

#[derive(Debug, Deserialize)]
struct AnomalyQuery {
    limit: Option<usize>,
    severity: Option<String>,
}

async fn vol_anomalies(State(state): State<AppState>, Query(query): Query<AnomalyQuery>) -> Json<ApiResponse<Vec<crate::types::Anomaly>>> {
    let mut anomalies = state.engine.volatility_anomalies(now_ts()).await;
    if let Some(severity) = query.severity.as_deref() {
        anomalies.retain(|a| format!("{:?}", a.severity).eq_ignore_ascii_case(severity));
    }
    anomalies.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
    if let Some(limit) = query.limit {
        anomalies.truncate(limit);
    }
    ok(anomalies)
}

// ---------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OptionsQuery {
    side: Option<String>,
}

async fn options(State(state): State<AppState>, Query(query): Query<OptionsQuery>) -> ApiResult<Vec<crate::types::OptionContract>> {
    match query.side.as_deref() {
        Some("call") | Some("CALL") => Ok(ok(state.engine.options_by_side(Side::Call).await)),
        Some("put") | Some("PUT") => Ok(ok(state.engine.options_by_side(Side::Put).await)),
        Some(other) => Err(error_response(EngineError::InvalidRequest(format!("unknown side '{other}', expected call or put")))),
        None => Ok(ok(state.engine.options().snapshot())),
    }
}

async fn options_by_strike(State(state): State<AppState>, Path(strike): Path<f64>) -> Json<ApiResponse<Vec<crate::types::OptionContract>>> {
    ok(state.engine.options_by_strike(strike).await)
}

async fn strikes(State(state): State<AppState>) -> Json<ApiResponse<Vec<f64>>> {
    ok(state.engine.options().unique_strikes())
}

async fn expiries(State(state): State<AppState>) -> Json<ApiResponse<Vec<Ts>>> {
    ok(state.engine.options().unique_expiries())
}

// ---------------------------------------------------------------------
// Max pain & sentiment
// ---------------------------------------------------------------------

async fn max_pain(State(state): State<AppState>) -> ApiResult<crate::types::MaxPain> {
    match state.engine.max_pain().await {
        Some(result) => Ok(ok(result)),
        None => Err(error_response(EngineError::QueryPrecondition("no option open interest recorded yet".to_string()))),
    }
}

#[derive(Debug, Serialize)]
struct SentimentResponse {
    sentiment: crate::types::Sentiment,
    pc_oi_ratio: f64,
    pc_volume_ratio: f64,
}

async fn sentiment(State(state): State<AppState>) -> Json<ApiResponse<SentimentResponse>> {
    let (sentiment, pc_oi_ratio, pc_volume_ratio) = state.engine.sentiment().await;
    ok(SentimentResponse {
        sentiment,
        pc_oi_ratio,
        pc_volume_ratio,
    })
}

// ---------------------------------------------------------------------
// Liquidations
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MinutesQuery {
    minutes: Option<u64>,
}

async fn liquidations_recent(State(state): State<AppState>, Query(query): Query<MinutesQuery>) -> Json<ApiResponse<Vec<crate::types::LiquidationEvent>>> {
    let now = now_ts();
    let minutes = query.minutes.unwrap_or(60);
    let t_from = Ts::from_nanos(now.as_nanos().saturating_sub(minutes * 60 * 1_000_000_000));
    ok(state.engine.liquidations_in_range(t_from, now).await)
}

async fn liquidations_stats(State(state): State<AppState>) -> Json<ApiResponse<crate::liquidation::LiquidationStats>> {
    ok(state.engine.liquidation_summary(now_ts()).await)
}

async fn liquidations_energy(State(state): State<AppState>) -> Json<ApiResponse<serde_json::Value>> {
    let (score, level, direction) = state.engine.liquidations().energy_score(now_ts());
    ok(serde_json::json!({ "score": score, "level": format!("{level:?}"), "direction": direction }))
}

async fn liquidations_early(State(state): State<AppState>, Query(query): Query<MinutesQuery>) -> Json<ApiResponse<serde_json::Value>> {
    let minutes = query.minutes.unwrap_or(5);
    let (share, risk) = state.engine.liquidations().early_spike(now_ts(), minutes, 60);
    ok(serde_json::json!({ "share": share, "risk": format!("{risk:?}") }))
}

async fn liquidations_growth(State(state): State<AppState>) -> Json<ApiResponse<serde_json::Value>> {
    let (trend, rate) = state.engine.liquidations().growth(now_ts(), 30);
    ok(serde_json::json!({ "trend": format!("{trend:?}"), "rate": rate }))
}

// ---------------------------------------------------------------------
// Order book
// ---------------------------------------------------------------------

async fn orderbook_metrics(State(state): State<AppState>) -> ApiResult<crate::orderbook_analyzer::OrderBookMetrics> {
    state.engine.order_book_metrics().await.map(ok).map_err(error_response)
}

// ---------------------------------------------------------------------
// Escape detector
// ---------------------------------------------------------------------

async fn escape_detect(State(state): State<AppState>) -> ApiResult<crate::types::Detection> {
    match state.engine.latest_detection() {
        Some(detection) => Ok(ok(detection)),
        None => Err(error_response(EngineError::QueryPrecondition("no escape tick has run yet".to_string()))),
    }
}

async fn escape_probability(State(state): State<AppState>) -> ApiResult<f64> {
    match state.engine.latest_detection() {
        Some(detection) => Ok(ok(detection.p_escape)),
        None => Err(error_response(EngineError::QueryPrecondition("no escape tick has run yet".to_string()))),
    }
}

async fn escape_history(State(state): State<AppState>, Query(query): Query<MinutesQuery>) -> Json<ApiResponse<Vec<crate::types::DetectionHistoryEntry>>> {
    let mut history = state.engine.escape_history();
    if let Some(minutes) = query.minutes {
        let now = now_ts();
        let cutoff = now.as_nanos().saturating_sub(minutes * 60 * 1_000_000_000);
        history.retain(|h| h.ts.as_nanos() >= cutoff);
    }
    ok(history)
}

async fn escape_alerts(State(state): State<AppState>) -> Json<ApiResponse<Vec<crate::types::Alert>>> {
    ok(state.engine.alerts())
}

// ---------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RecommendQuery {
    top_n: Option<usize>,
    min_score: Option<f64>,
}

async fn strategies_recommend(State(state): State<AppState>, Query(query): Query<RecommendQuery>) -> Json<ApiResponse<Vec<crate::strategy::Recommendation>>> {
    let top_n = query.top_n.unwrap_or(5);
    let mut recs = state.engine.recommend_strategies(now_ts(), top_n).await;
    if let Some(min_score) = query.min_score {
        recs.retain(|r| r.score >= min_score);
    }
    ok(recs)
}

// ---------------------------------------------------------------------
// History
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    hours: Option<u64>,
    limit: Option<usize>,
}

async fn market_history(State(state): State<AppState>, Query(query): Query<HistoryQuery>) -> Json<ApiResponse<Vec<crate::types::MarketSnapshot>>> {
    let mut snapshots = state.history.snapshots();
    if let Some(hours) = query.hours {
        let now = now_ts();
        let cutoff = now.as_nanos().saturating_sub(hours * 3600 * 1_000_000_000);
        snapshots.retain(|s| s.ts.as_nanos() >= cutoff);
    }
    if let Some(limit) = query.limit {
        let drop = snapshots.len().saturating_sub(limit);
        snapshots.drain(0..drop);
    }
    ok(snapshots)
}

async fn regime_history(State(state): State<AppState>, Query(query): Query<HistoryQuery>) -> Json<ApiResponse<Vec<crate::types::RegimeLabel>>> {
    let mut snapshots = state.history.snapshots();
    if let Some(hours) = query.hours {
        let now = now_ts();
        let cutoff = now.as_nanos().saturating_sub(hours * 3600 * 1_000_000_000);
        snapshots.retain(|s| s.ts.as_nanos() >= cutoff);
    }
    ok(snapshots.into_iter().map(|s| s.regime).collect())
}

/// Build the full router over a shared engine and history sink
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics/gamma-profile", get(gamma_profile))
        .route("/metrics/total-gex", get(total_gex))
        .route("/metrics/gamma-flip", get(gamma_flip))
        .route("/metrics/walls", get(walls))
        .route("/metrics/wall-zones", get(wall_zones))
        .route("/metrics/regime", get(regime))
        .route("/volatility/surface", get(vol_surface))
        .route("/volatility/anomalies", get(vol_anomalies))
        .route("/options", get(options))
        .route("/options/strike/:strike", get(options_by_strike))
        .route("/options/strikes", get(strikes))
        .route("/options/expiries", get(expiries))
        .route("/max-pain", get(max_pain))
        .route("/sentiment", get(sentiment))
        .route("/liquidations/recent", get(liquidations_recent))
        .route("/liquidations/stats", get(liquidations_stats))
        .route("/liquidations/energy", get(liquidations_energy))
        .route("/liquidations/early", get(liquidations_early))
        .route("/liquidations/growth", get(liquidations_growth))
        .route("/orderbook/metrics", get(orderbook_metrics))
        .route("/escape/detect", get(escape_detect))
        .route("/escape/probability", get(escape_probability))
        .route("/escape/history", get(escape_history))
        .route("/escape/alerts", get(escape_alerts))
        .route("/strategies/recommend", get(strategies_recommend))
        .route("/history/market", get(market_history))
        .route("/history/regime", get(regime_history))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        let state = AppState {
            engine: Arc::new(Engine::new(EngineConfig::default())),
            history: Arc::new(InMemorySink::new(60)),
        };
        build_router(state)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = get(app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], "ok");
    }

    #[tokio::test]
    async fn status_reflects_empty_engine() {
        let (status, body) = get(app(), "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["option_count"], 0);
        assert_eq!(body["data"]["spot_primed"], false);
    }

    #[tokio::test]
    async fn vol_surface_is_unavailable_before_any_option_is_ingested() {
        let (status, body) = get(app(), "/volatility/surface").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["error"], "PRECONDITION_FAILED");
    }

    #[tokio::test]
    async fn options_rejects_unknown_side() {
        let (status, body) = get(app(), "/options?side=straddle").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["error"], "INVALID_REQUEST");
    }
}
