//! Engine configuration, loaded from the environment with process-local defaults

use serde::{Deserialize, Serialize};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Iceberg detector thresholds, broken out because they're tuned together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcebergThresholds {
    /// Minimum recurrences of a small size at a level to flag refilling
    pub refilling_min_occurrences: u32,
    /// executed/visible volume ratio that flags a volume anomaly
    pub volume_anomaly_ratio: f64,
    /// Minimum recurring local-extrema count to flag price rejection
    pub rejection_min_count: u32,
    /// Minimum depth drop fraction that starts a regeneration sequence
    pub regen_min_drop: f64,
    /// Minimum recovery fraction that completes a regeneration sequence
    pub regen_min_recovery: f64,
    /// Minimum recurrences of a rounded size to flag consistent sizing
    pub consistent_size_min_occurrences: u32,
}

impl Default for IcebergThresholds {
    fn default() -> Self {
        Self {
            refilling_min_occurrences: env_or("ICEBERG_REFILLING_MIN_OCCURRENCES", 5),
            volume_anomaly_ratio: env_or("ICEBERG_VOLUME_ANOMALY_RATIO", 2.0),
            rejection_min_count: env_or("ICEBERG_REJECTION_MIN_COUNT", 3),
            regen_min_drop: env_or("ICEBERG_REGEN_MIN_DROP", 0.20),
            regen_min_recovery: env_or("ICEBERG_REGEN_MIN_RECOVERY", 0.15),
            consistent_size_min_occurrences: env_or("ICEBERG_CONSISTENT_SIZE_MIN_OCCURRENCES", 5),
        }
    }
}

/// Process-wide engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Underlying symbol this engine instance tracks (e.g. "BTC")
    pub underlying: String,
    /// Seconds after which an unrefreshed option is considered stale
    pub option_ttl_secs: u64,
    /// Metric bundle cache TTL in seconds
    pub metric_cache_ttl_secs: u64,
    /// Liquidations-per-minute threshold that flags a cascade
    pub cascade_threshold: u32,
    /// Wall-zone contribution threshold as a fraction of the peak (0,1]
    pub wall_zone_threshold: f64,
    /// Smart-range price window as a fraction of spot (e.g. 0.30 = +-30%)
    pub smart_range_pct: f64,
    /// Smart-range significant-GEX threshold as a fraction of max |side-GEX|
    pub smart_range_gex_threshold_pct: f64,
    /// Volatility anomaly z-score threshold
    pub anomaly_z_threshold: f64,
    /// Order book levels considered for imbalance/depth metrics
    pub orderbook_top_n: usize,
    /// Order-book wall size multiplier against the average level size
    pub orderbook_wall_multiplier: f64,
    /// Iceberg detector thresholds
    pub iceberg: IcebergThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            underlying: env_string_or("GEX_UNDERLYING", "BTC"),
            option_ttl_secs: env_or("GEX_OPTION_TTL_SECS", 10),
            metric_cache_ttl_secs: env_or("GEX_METRIC_CACHE_TTL_SECS", 5),
            cascade_threshold: env_or("GEX_CASCADE_THRESHOLD", 10),
            wall_zone_threshold: env_or("GEX_WALL_ZONE_THRESHOLD", 0.7),
            smart_range_pct: env_or("GEX_SMART_RANGE_PCT", 0.30),
            smart_range_gex_threshold_pct: env_or("GEX_SMART_RANGE_GEX_THRESHOLD_PCT", 0.02),
            anomaly_z_threshold: env_or("GEX_ANOMALY_Z_THRESHOLD", 2.0),
            orderbook_top_n: env_or("GEX_ORDERBOOK_TOP_N", 10),
            orderbook_wall_multiplier: env_or("GEX_ORDERBOOK_WALL_MULTIPLIER", 10.0),
            iceberg: IcebergThresholds::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.option_ttl_secs, 10);
        assert!((cfg.wall_zone_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(cfg.cascade_threshold, 10);
        assert_eq!(cfg.iceberg.consistent_size_min_occurrences, 5);
    }
}
