//! # Spread Arb
//!
//! Cross-venue spread arbitrage between two perpetual futures venues that
//! list the same underlying. The engine samples both top-of-book quotes,
//! tracks rolling mean spreads and dispatches paired buy/sell orders when
//! the live spread deviates far enough from its mean.
//!
//! ## Architecture
//!
//! - `config`: Layered configuration, market mapping and validation
//! - `exchange`: Venue abstraction, retry policy and the paper venue
//! - `strategy`: Spread analysis, order execution and the control loop
//! - `risk`: Position tracking and per-venue order budgets
//! - `notify`: Telegram notifications
//! - `persistence`: SQLite journal of samples and trades
//! - `utils`: Tick and lot rounding

pub mod config;
pub mod exchange;
pub mod notify;
pub mod persistence;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
