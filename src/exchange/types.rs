//! Venue-neutral types shared by every adapter.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Best bid/ask prices and quantities.
#[derive(Debug, Clone)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    pub timestamp: Instant,
}

impl Quote {
    /// Create a quote stamped with the current instant.
    pub fn new(bid: Decimal, ask: Decimal) -> Self {
        Self {
            bid,
            ask,
            bid_size: Decimal::ZERO,
            ask_size: Decimal::ZERO,
            timestamp: Instant::now(),
        }
    }

    /// Set top-of-book sizes.
    pub fn with_sizes(mut self, bid_size: Decimal, ask_size: Decimal) -> Self {
        self.bid_size = bid_size;
        self.ask_size = ask_size;
        self
    }

    /// Top-of-book width.
    pub fn width(&self) -> Decimal {
        self.ask - self.bid
    }
}

/// Per-market trading parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketInfo {
    pub symbol: String,
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_size: Decimal,
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Signed multiplier applied to an exposure (+1 buy, -1 sell).
    pub fn sign(self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Lifecycle state of an order as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderState {
    Open,
    Closed,
}

/// Normalized order placement result.
#[derive(Debug, Clone, Default)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub status: Option<OrderState>,
    pub error: Option<String>,
}

impl OrderResult {
    pub fn accepted(order_id: impl Into<String>, status: OrderState) -> Self {
        Self {
            success: true,
            order_id: Some(order_id.into()),
            status: Some(status),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            status: None,
            error: Some(error.into()),
        }
    }
}

/// Status snapshot of a single order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderInfo {
    pub status: OrderState,
    pub remaining_size: Decimal,
}
