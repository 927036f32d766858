//! Real-time gamma-exposure, volatility-surface and microstructure analytics
//! for crypto options/futures.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod escape;
pub mod gex;
pub mod http;
pub mod iceberg;
pub mod liquidation;
pub mod option_store;
pub mod orderbook_analyzer;
pub mod regime;
pub mod strategy;
pub mod types;
pub mod vol_anomaly;
pub mod vol_surface;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
