//! Shared types and utilities used by the analytics core
//!
//! Kept deliberately small: fixed-point market types, the crate-wide error
//! enum, and the handful of constants every analytics component reaches for.

pub mod constants;
pub mod errors;
pub mod types;

pub use constants::*;
pub use errors::*;
pub use types::*;
