//! Venue-agnostic adapter trait.
//!
//! Every venue exposes the same capability surface to the engine:
//! - Top-of-book quotes and market metadata
//! - Passive/aggressive order placement and cancellation
//! - Order status, position and balance queries
//! - Forced close-out of a market's exposure
//!
//! Adapters own their transport session and are expected to retry transient
//! failures internally (see [`super::retry`]) before returning an error.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;

use super::error::VenueResult;
use super::types::{MarketInfo, OrderInfo, OrderResult, OrderSide, Quote};

/// Which side of the paired trade a venue serves.
///
/// Venue A is the primary leg whose exposure is capped; venue B hedges it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    A,
    B,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::A => write!(f, "A"),
            Leg::B => write!(f, "B"),
        }
    }
}

/// Capability surface of one trading venue.
///
/// Implement this trait to add support for a new venue.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Human-readable venue name for logs.
    fn name(&self) -> &str;

    /// Open the session. Fails with [`super::VenueError::Connection`] on auth failure.
    async fn connect(&self) -> VenueResult<()>;

    async fn disconnect(&self) -> VenueResult<()>;

    /// Best bid/ask, or `None` when the book is empty.
    async fn get_quote(&self, market: &str) -> VenueResult<Option<Quote>>;

    /// Tick/step sizes for a market.
    async fn get_market_info(&self, market: &str) -> VenueResult<Option<MarketInfo>>;

    async fn place_limit_order(
        &self,
        market: &str,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
        post_only: bool,
        reduce_only: bool,
    ) -> VenueResult<OrderResult>;

    async fn place_market_order(
        &self,
        market: &str,
        side: OrderSide,
        size: Decimal,
        reduce_only: bool,
    ) -> VenueResult<OrderResult>;

    async fn cancel_order(&self, order_id: &str) -> VenueResult<bool>;

    /// Cancel every open order in a market, returning how many were cancelled.
    async fn cancel_all_orders(&self, market: &str) -> VenueResult<usize>;

    /// Order status, or `None` when the venue no longer knows the order.
    async fn get_order_info(&self, order_id: &str) -> VenueResult<Option<OrderInfo>>;

    /// Signed position size (long positive, short negative).
    async fn get_position_size(&self, market: &str) -> VenueResult<Decimal>;

    /// Collateral balance, if the venue reports one.
    async fn get_balance(&self) -> VenueResult<Option<Decimal>>;

    /// Flatten the market's position with a reduce-only market order.
    async fn close_position(&self, market: &str) -> VenueResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leg_display() {
        assert_eq!(Leg::A.to_string(), "A");
        assert_eq!(Leg::B.to_string(), "B");
    }
}
