//! Fixed-point market types shared by the order-book and liquidation components

pub mod types;

pub use types::*;
