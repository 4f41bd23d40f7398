//! Configuration management for the spread arbitrage engine.
//!
//! Loads settings from `config.toml` (optional), `.env` and `ARB__*`
//! environment variables, in increasing order of precedence.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::risk::AdmissionCaps;
use crate::strategy::SpreadConfig;

/// Built-in ticker to (venue A market, venue B market) mapping.
const MARKET_MAPPING: &[(&str, &str, &str)] = &[
    ("BTC", "BTC-USD-PERP", "BTC"),
    ("ETH", "ETH-USD-PERP", "ETH"),
    ("SOL", "SOL-USD-PERP", "SOL"),
    ("ARB", "ARB-USD-PERP", "ARB"),
    ("DOGE", "DOGE-USD-PERP", "DOGE"),
    ("AVAX", "AVAX-USD-PERP", "AVAX"),
    ("LINK", "LINK-USD-PERP", "LINK"),
    ("OP", "OP-USD-PERP", "OP"),
    ("WIF", "WIF-USD-PERP", "WIF"),
    ("PEPE", "PEPE-USD-PERP", "PEPE"),
];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Instrument, sizing and signal parameters
    #[serde(default)]
    pub trading: TradingConfig,
    /// Order dispatch and loop timing
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Venue order-rate budgets
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Telegram notifications
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// SQLite journal
    #[serde(default)]
    pub journal: JournalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Base asset, e.g. "BTC"
    #[serde(default = "default_ticker")]
    pub ticker: String,
    /// Explicit venue A market; resolved from the ticker when empty
    #[serde(default)]
    pub market_a: String,
    /// Explicit venue B market; resolved from the ticker when empty
    #[serde(default)]
    pub market_b: String,
    /// Order size per leg
    #[serde(default = "default_size")]
    pub size: Decimal,
    /// Cap on absolute venue A exposure
    #[serde(default = "default_max_position")]
    pub max_position: Decimal,
    #[serde(default = "default_threshold")]
    pub long_threshold: Decimal,
    #[serde(default = "default_threshold")]
    pub short_threshold: Decimal,
    /// Absolute floor on the trigger level
    #[serde(default = "default_min_spread")]
    pub min_spread: Decimal,
    #[serde(default = "default_warmup_samples")]
    pub warmup_samples: u64,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Stop trading when either venue's balance drops below this
    #[serde(default = "default_min_balance")]
    pub min_balance: Decimal,
}

/// How the two legs are dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Passive post-only entry on venue A, market hedge on venue B once filled
    #[default]
    Maker,
    /// Market orders on both venues at once
    Taker,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Maker => write!(f, "maker"),
            ExecutionMode::Taker => write!(f, "taker"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Seconds to wait for a passive entry to fill
    #[serde(default = "default_fill_timeout_secs")]
    pub fill_timeout_secs: u64,
    /// Order status polling interval during fill-wait
    #[serde(default = "default_fill_poll_interval_ms")]
    pub fill_poll_interval_ms: u64,
    /// Minimum spacing between trade attempts
    #[serde(default = "default_trade_cooldown_secs")]
    pub trade_cooldown_secs: u64,
    /// Consecutive unfilled entries before backing off
    #[serde(default = "default_reject_threshold")]
    pub reject_threshold: u32,
    /// Backoff per consecutive reject
    #[serde(default = "default_reject_backoff_step_secs")]
    pub reject_backoff_step_secs: u64,
    #[serde(default = "default_reject_backoff_max_secs")]
    pub reject_backoff_max_secs: u64,
    /// Pause between signal cycles
    #[serde(default = "default_loop_interval_ms")]
    pub loop_interval_ms: u64,
    /// Pause before retrying when a quote is missing
    #[serde(default = "default_missing_quote_retry_ms")]
    pub missing_quote_retry_ms: u64,
    #[serde(default = "default_housekeeping_interval_secs")]
    pub housekeeping_interval_secs: u64,
    /// Position verification attempts during shutdown
    #[serde(default = "default_shutdown_verify_retries")]
    pub shutdown_verify_retries: u32,
    #[serde(default = "default_shutdown_verify_interval_ms")]
    pub shutdown_verify_interval_ms: u64,
    /// Tick used when the venue reports no market metadata
    #[serde(default = "default_tick_size")]
    pub default_tick_size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_orders_per_hour")]
    pub venue_a_per_hour: usize,
    #[serde(default = "default_orders_per_day")]
    pub venue_a_per_day: usize,
    #[serde(default = "default_orders_per_hour")]
    pub venue_b_per_hour: usize,
    #[serde(default = "default_orders_per_day")]
    pub venue_b_per_day: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    /// Prefix identifying this account in messages
    #[serde(default = "default_account_label")]
    pub account_label: String,
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_journal_enabled")]
    pub enabled: bool,
    #[serde(default = "default_journal_path")]
    pub path: String,
}

fn default_ticker() -> String {
    "BTC".to_string()
}

fn default_size() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_max_position() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_threshold() -> Decimal {
    Decimal::new(10, 0)
}

fn default_min_spread() -> Decimal {
    Decimal::new(5, 0)
}

fn default_warmup_samples() -> u64 {
    100
}

fn default_window_size() -> usize {
    500
}

fn default_min_balance() -> Decimal {
    Decimal::new(10, 0)
}

fn default_fill_timeout_secs() -> u64 {
    5
}

fn default_fill_poll_interval_ms() -> u64 {
    300
}

fn default_trade_cooldown_secs() -> u64 {
    3
}

fn default_reject_threshold() -> u32 {
    3
}

fn default_reject_backoff_step_secs() -> u64 {
    5
}

fn default_reject_backoff_max_secs() -> u64 {
    30
}

fn default_loop_interval_ms() -> u64 {
    1000
}

fn default_missing_quote_retry_ms() -> u64 {
    500
}

fn default_housekeeping_interval_secs() -> u64 {
    1800
}

fn default_shutdown_verify_retries() -> u32 {
    10
}

fn default_shutdown_verify_interval_ms() -> u64 {
    1000
}

fn default_tick_size() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_orders_per_hour() -> usize {
    200
}

fn default_orders_per_day() -> usize {
    1000
}

fn default_account_label() -> String {
    "A1".to_string()
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_journal_enabled() -> bool {
    true
}

fn default_journal_path() -> String {
    "data/spread_arb.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("ARB"))
            .build()
            .context("Failed to build configuration")?;

        let mut config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.trading.resolve_markets();
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let trading = &self.trading;
        anyhow::ensure!(!trading.ticker.is_empty(), "ticker must be set");
        anyhow::ensure!(
            !trading.market_a.is_empty() && !trading.market_b.is_empty(),
            "markets must be resolved before validation"
        );
        anyhow::ensure!(trading.size > Decimal::ZERO, "size must be positive");
        anyhow::ensure!(
            trading.max_position >= trading.size,
            "max_position must be at least one order size"
        );
        anyhow::ensure!(
            trading.long_threshold >= Decimal::ZERO && trading.short_threshold >= Decimal::ZERO,
            "thresholds must be non-negative"
        );
        anyhow::ensure!(
            trading.window_size > 0 && trading.warmup_samples as usize <= trading.window_size,
            "warmup_samples must fit inside window_size"
        );

        let execution = &self.execution;
        anyhow::ensure!(execution.fill_timeout_secs > 0, "fill_timeout_secs must be positive");
        anyhow::ensure!(
            execution.fill_poll_interval_ms > 0,
            "fill_poll_interval_ms must be positive"
        );
        anyhow::ensure!(execution.reject_threshold > 0, "reject_threshold must be positive");
        anyhow::ensure!(
            execution.default_tick_size > Decimal::ZERO,
            "default_tick_size must be positive"
        );

        let admission = &self.admission;
        anyhow::ensure!(
            admission.venue_a_per_hour > 0
                && admission.venue_a_per_hour <= admission.venue_a_per_day
                && admission.venue_b_per_hour > 0
                && admission.venue_b_per_hour <= admission.venue_b_per_day,
            "admission caps must be positive with hourly <= daily"
        );

        Ok(())
    }

    /// Analyzer parameters derived from the trading section.
    pub fn spread_config(&self) -> SpreadConfig {
        SpreadConfig {
            long_threshold: self.trading.long_threshold,
            short_threshold: self.trading.short_threshold,
            min_spread: self.trading.min_spread,
            warmup_samples: self.trading.warmup_samples,
            window_size: self.trading.window_size,
        }
    }
}

impl TradingConfig {
    /// Fill in empty market names from the ticker.
    ///
    /// Known tickers use the built-in mapping; unknown ones fall back to
    /// `<TICKER>-USD-PERP` on venue A and the bare ticker on venue B.
    pub fn resolve_markets(&mut self) {
        self.ticker = self.ticker.trim().to_uppercase();
        let mapped = MARKET_MAPPING
            .iter()
            .find(|(ticker, _, _)| *ticker == self.ticker);

        if self.market_a.is_empty() {
            self.market_a = match mapped {
                Some((_, a, _)) => a.to_string(),
                None => format!("{}-USD-PERP", self.ticker),
            };
        }
        if self.market_b.is_empty() {
            self.market_b = match mapped {
                Some((_, _, b)) => b.to_string(),
                None => self.ticker.clone(),
            };
        }
    }
}

impl ExecutionConfig {
    pub fn fill_timeout(&self) -> Duration {
        Duration::from_secs(self.fill_timeout_secs)
    }

    pub fn fill_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fill_poll_interval_ms)
    }

    pub fn trade_cooldown(&self) -> Duration {
        Duration::from_secs(self.trade_cooldown_secs)
    }

    /// Entry suspension after `consecutive_rejects` unfilled entries.
    pub fn reject_backoff(&self, consecutive_rejects: u32) -> Duration {
        let secs = self
            .reject_backoff_step_secs
            .saturating_mul(consecutive_rejects as u64)
            .min(self.reject_backoff_max_secs);
        Duration::from_secs(secs)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }

    pub fn missing_quote_retry(&self) -> Duration {
        Duration::from_millis(self.missing_quote_retry_ms)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs)
    }

    pub fn shutdown_verify_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_verify_interval_ms)
    }
}

impl AdmissionConfig {
    pub fn venue_a_caps(&self) -> AdmissionCaps {
        AdmissionCaps {
            per_hour: self.venue_a_per_hour,
            per_day: self.venue_a_per_day,
        }
    }

    pub fn venue_b_caps(&self) -> AdmissionCaps {
        AdmissionCaps {
            per_hour: self.venue_b_per_hour,
            per_day: self.venue_b_per_day,
        }
    }
}

impl TelegramConfig {
    /// Notifications are sent only with both a token and a chat.
    pub fn is_enabled(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut trading = TradingConfig::default();
        trading.resolve_markets();
        Self {
            trading,
            execution: ExecutionConfig::default(),
            admission: AdmissionConfig::default(),
            telegram: TelegramConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            ticker: default_ticker(),
            market_a: String::new(),
            market_b: String::new(),
            size: default_size(),
            max_position: default_max_position(),
            long_threshold: default_threshold(),
            short_threshold: default_threshold(),
            min_spread: default_min_spread(),
            warmup_samples: default_warmup_samples(),
            window_size: default_window_size(),
            min_balance: default_min_balance(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            fill_timeout_secs: default_fill_timeout_secs(),
            fill_poll_interval_ms: default_fill_poll_interval_ms(),
            trade_cooldown_secs: default_trade_cooldown_secs(),
            reject_threshold: default_reject_threshold(),
            reject_backoff_step_secs: default_reject_backoff_step_secs(),
            reject_backoff_max_secs: default_reject_backoff_max_secs(),
            loop_interval_ms: default_loop_interval_ms(),
            missing_quote_retry_ms: default_missing_quote_retry_ms(),
            housekeeping_interval_secs: default_housekeeping_interval_secs(),
            shutdown_verify_retries: default_shutdown_verify_retries(),
            shutdown_verify_interval_ms: default_shutdown_verify_interval_ms(),
            default_tick_size: default_tick_size(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            venue_a_per_hour: default_orders_per_hour(),
            venue_a_per_day: default_orders_per_day(),
            venue_b_per_hour: default_orders_per_hour(),
            venue_b_per_day: default_orders_per_day(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            account_label: default_account_label(),
            api_url: default_telegram_api_url(),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: default_journal_enabled(),
            path: default_journal_path(),
        }
    }
}
