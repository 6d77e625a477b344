//! Drift Analytics
//!
//! Market reports (long/short ratio, fees, funding rates) for a perpetual
//! futures DEX, and CSV exports of wallet SPL transfer histories pulled from a
//! rate-limited indexing API.

pub mod charts;
pub mod config;
pub mod export;
pub mod market;
pub mod report;
pub mod transfers;
pub mod types;

pub use config::Config;
pub use types::*;
