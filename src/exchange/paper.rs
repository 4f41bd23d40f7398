//! Paper-trading venue for dry runs and tests.
//!
//! Simulates a single venue in memory:
//! - Quotes set externally (or by [`QuoteWalk`])
//! - POST_ONLY orders closed immediately when they would cross
//! - Resting orders filled when the touch trades through them
//! - Market orders filled at the touch, with a flat taker fee
//! - Fault injection per operation for failure-path testing

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::error::{VenueError, VenueResult};
use super::retry::{retry, RetryPolicy};
use super::traits::VenueAdapter;
use super::types::{MarketInfo, OrderInfo, OrderResult, OrderSide, OrderState, Quote};

/// Venue operations that can have faults injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaperOp {
    Connect,
    Quote,
    LimitOrder,
    MarketOrder,
    Cancel,
    CancelAll,
    OrderInfo,
    Position,
    Balance,
    Close,
}

/// How resting (non-crossing) limit orders get filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperFillMode {
    /// Fill when a later quote trades through the order price.
    Touch,
    /// Fill as soon as the order is accepted.
    Immediate,
    /// Never fill; the order rests until cancelled.
    Never,
    /// Fill half of a resting order on acceptance; the rest never fills.
    Partial,
    /// Accept the order, then forget it (status queries return nothing).
    Vanish,
}

/// A simulated order.
#[derive(Debug, Clone)]
pub struct PaperOrder {
    pub order_id: String,
    pub market: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub price: Decimal,
    pub remaining: Decimal,
    pub state: OrderState,
}

/// Call counters exposed for inspection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperStats {
    pub connect_calls: u32,
    pub disconnect_calls: u32,
    pub limit_orders: u32,
    pub market_orders: u32,
    pub cancel_calls: u32,
    pub cancel_all_calls: u32,
    pub close_calls: u32,
}

/// Simulated venue state.
#[derive(Debug)]
pub struct PaperState {
    pub balance: Decimal,
    pub positions: HashMap<String, Decimal>,
    pub quotes: HashMap<String, Quote>,
    pub orders: HashMap<String, PaperOrder>,
    pub fees_paid: Decimal,
    pub fill_mode: PaperFillMode,
    pub stats: PaperStats,
    faults: HashMap<PaperOp, VecDeque<VenueError>>,
}

impl Default for PaperState {
    fn default() -> Self {
        Self {
            balance: dec!(10000),
            positions: HashMap::new(),
            quotes: HashMap::new(),
            orders: HashMap::new(),
            fees_paid: Decimal::ZERO,
            fill_mode: PaperFillMode::Touch,
            stats: PaperStats::default(),
            faults: HashMap::new(),
        }
    }
}

impl PaperState {
    fn take_fault(&mut self, op: PaperOp) -> VenueResult<()> {
        match self.faults.get_mut(&op).and_then(|queue| queue.pop_front()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Quantity a reduce-only order on `side` may trade.
    fn reducible(&self, market: &str, side: OrderSide) -> Decimal {
        let position = self.positions.get(market).copied().unwrap_or(Decimal::ZERO);
        match side {
            OrderSide::Buy if position < Decimal::ZERO => position.abs(),
            OrderSide::Sell if position > Decimal::ZERO => position,
            _ => Decimal::ZERO,
        }
    }

    fn apply_fill(&mut self, market: &str, side: OrderSide, size: Decimal, price: Decimal, fee_rate: Decimal) {
        let position = self.positions.entry(market.to_string()).or_insert(Decimal::ZERO);
        *position += side.sign() * size;
        let fee = size * price * fee_rate;
        self.balance -= fee;
        self.fees_paid += fee;
    }
}

/// In-memory venue implementing [`VenueAdapter`].
pub struct PaperVenue {
    name: String,
    state: Arc<RwLock<PaperState>>,
    order_id_counter: AtomicU64,
    tick_size: Decimal,
    /// Taker fee charged on every fill
    fee_rate: Decimal,
    retry_policy: RetryPolicy,
}

impl PaperVenue {
    /// Create a paper venue with an initial balance.
    pub fn new(name: &str, initial_balance: Decimal) -> Self {
        let state = PaperState {
            balance: initial_balance,
            ..Default::default()
        };

        Self {
            name: name.to_string(),
            state: Arc::new(RwLock::new(state)),
            order_id_counter: AtomicU64::new(1),
            tick_size: dec!(0.1),
            fee_rate: Decimal::ZERO,
            retry_policy: RetryPolicy::none(),
        }
    }

    pub fn with_tick_size(mut self, tick_size: Decimal) -> Self {
        self.tick_size = tick_size;
        self
    }

    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Update the top of book and fill any resting orders it trades through.
    pub async fn set_quote(&self, market: &str, bid: Decimal, ask: Decimal) {
        let mut state = self.state.write().await;
        state
            .quotes
            .insert(market.to_string(), Quote::new(bid, ask).with_sizes(dec!(1), dec!(1)));

        if state.fill_mode != PaperFillMode::Touch {
            return;
        }

        let crossed: Vec<(String, OrderSide, Decimal, Decimal)> = state
            .orders
            .values()
            .filter(|o| o.market == market && o.state == OrderState::Open)
            .filter(|o| match o.side {
                OrderSide::Buy => ask <= o.price,
                OrderSide::Sell => bid >= o.price,
            })
            .map(|o| (o.order_id.clone(), o.side, o.remaining, o.price))
            .collect();

        for (order_id, side, remaining, price) in crossed {
            state.apply_fill(market, side, remaining, price, self.fee_rate);
            if let Some(order) = state.orders.get_mut(&order_id) {
                order.remaining = Decimal::ZERO;
                order.state = OrderState::Closed;
            }
            debug!(venue = %self.name, %order_id, %price, "Paper resting order filled");
        }
    }

    /// Remove the quote so the venue reports an empty book.
    pub async fn clear_quote(&self, market: &str) {
        self.state.write().await.quotes.remove(market);
    }

    pub async fn set_fill_mode(&self, mode: PaperFillMode) {
        self.state.write().await.fill_mode = mode;
    }

    pub async fn set_position(&self, market: &str, size: Decimal) {
        self.state.write().await.positions.insert(market.to_string(), size);
    }

    pub async fn set_balance(&self, balance: Decimal) {
        self.state.write().await.balance = balance;
    }

    /// Make the next call of `op` fail with `error`. Faults queue up.
    pub async fn inject_fault(&self, op: PaperOp, error: VenueError) {
        self.state
            .write()
            .await
            .faults
            .entry(op)
            .or_default()
            .push_back(error);
    }

    pub async fn position(&self, market: &str) -> Decimal {
        self.state
            .read()
            .await
            .positions
            .get(market)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn stats(&self) -> PaperStats {
        self.state.read().await.stats.clone()
    }

    pub async fn open_orders(&self) -> Vec<PaperOrder> {
        self.state
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.state == OrderState::Open)
            .cloned()
            .collect()
    }

    fn next_order_id(&self) -> String {
        format!("{}-{}", self.name, self.order_id_counter.fetch_add(1, Ordering::SeqCst))
    }

    async fn quote_once(&self, market: &str) -> VenueResult<Option<Quote>> {
        let mut state = self.state.write().await;
        state.take_fault(PaperOp::Quote)?;
        Ok(state.quotes.get(market).cloned())
    }

    async fn limit_once(
        &self,
        market: &str,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
        post_only: bool,
        reduce_only: bool,
    ) -> VenueResult<OrderResult> {
        let mut state = self.state.write().await;
        state.take_fault(PaperOp::LimitOrder)?;
        state.stats.limit_orders += 1;

        let mut size = size;
        if reduce_only {
            let reducible = state.reducible(market, side);
            if reducible == Decimal::ZERO {
                return Ok(OrderResult::failed("reduce-only order would increase position"));
            }
            size = size.min(reducible);
        }

        let quote = state
            .quotes
            .get(market)
            .cloned()
            .ok_or_else(|| VenueError::Rejected(format!("no book for {}", market)))?;

        let crosses = match side {
            OrderSide::Buy => price >= quote.ask,
            OrderSide::Sell => price <= quote.bid,
        };

        let order_id = self.next_order_id();
        let mut order = PaperOrder {
            order_id: order_id.clone(),
            market: market.to_string(),
            side,
            size,
            price,
            remaining: size,
            state: OrderState::Open,
        };

        if crosses && post_only {
            // Venue accepts the request, then closes it unfilled
            order.state = OrderState::Closed;
        } else if crosses || state.fill_mode == PaperFillMode::Immediate {
            state.apply_fill(market, side, size, price, self.fee_rate);
            order.remaining = Decimal::ZERO;
            order.state = OrderState::Closed;
        } else if state.fill_mode == PaperFillMode::Partial {
            let filled = size / Decimal::TWO;
            state.apply_fill(market, side, filled, price, self.fee_rate);
            order.remaining = size - filled;
        }

        let status = order.state;
        info!(
            venue = %self.name,
            %order_id,
            %market,
            %side,
            %size,
            %price,
            post_only,
            reduce_only,
            status = ?status,
            "Paper limit order accepted"
        );

        if state.fill_mode != PaperFillMode::Vanish {
            state.orders.insert(order_id.clone(), order);
        }

        Ok(OrderResult::accepted(order_id, status))
    }

    async fn market_once(
        &self,
        market: &str,
        side: OrderSide,
        size: Decimal,
        reduce_only: bool,
    ) -> VenueResult<OrderResult> {
        let mut state = self.state.write().await;
        state.take_fault(PaperOp::MarketOrder)?;
        state.stats.market_orders += 1;

        let Some(quote) = state.quotes.get(market).cloned() else {
            return Ok(OrderResult::failed(format!("no book for {}", market)));
        };

        let mut size = size;
        if reduce_only {
            let reducible = state.reducible(market, side);
            if reducible == Decimal::ZERO {
                return Ok(OrderResult::failed("reduce-only order would increase position"));
            }
            size = size.min(reducible);
        }

        let price = match side {
            OrderSide::Buy => quote.ask,
            OrderSide::Sell => quote.bid,
        };
        state.apply_fill(market, side, size, price, self.fee_rate);

        let order_id = self.next_order_id();
        info!(
            venue = %self.name,
            %order_id,
            %market,
            %side,
            %size,
            %price,
            reduce_only,
            "Paper market order filled"
        );

        Ok(OrderResult::accepted(order_id, OrderState::Closed))
    }

    async fn cancel_once(&self, order_id: &str) -> VenueResult<bool> {
        let mut state = self.state.write().await;
        state.take_fault(PaperOp::Cancel)?;
        state.stats.cancel_calls += 1;

        match state.orders.get_mut(order_id) {
            Some(order) if order.state == OrderState::Open => {
                order.state = OrderState::Closed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_all_once(&self, market: &str) -> VenueResult<usize> {
        let mut state = self.state.write().await;
        state.take_fault(PaperOp::CancelAll)?;
        state.stats.cancel_all_calls += 1;

        let mut cancelled = 0;
        for order in state.orders.values_mut() {
            if order.market == market && order.state == OrderState::Open {
                order.state = OrderState::Closed;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn order_info_once(&self, order_id: &str) -> VenueResult<Option<OrderInfo>> {
        let mut state = self.state.write().await;
        state.take_fault(PaperOp::OrderInfo)?;
        Ok(state.orders.get(order_id).map(|o| OrderInfo {
            status: o.state,
            remaining_size: o.remaining,
        }))
    }

    async fn position_once(&self, market: &str) -> VenueResult<Decimal> {
        let mut state = self.state.write().await;
        state.take_fault(PaperOp::Position)?;
        Ok(state.positions.get(market).copied().unwrap_or(Decimal::ZERO))
    }

    async fn balance_once(&self) -> VenueResult<Option<Decimal>> {
        let mut state = self.state.write().await;
        state.take_fault(PaperOp::Balance)?;
        Ok(Some(state.balance))
    }
}

#[async_trait]
impl VenueAdapter for PaperVenue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> VenueResult<()> {
        let mut state = self.state.write().await;
        state.stats.connect_calls += 1;
        state.take_fault(PaperOp::Connect)?;
        info!(venue = %self.name, balance = %state.balance, "Paper venue connected");
        Ok(())
    }

    async fn disconnect(&self) -> VenueResult<()> {
        self.state.write().await.stats.disconnect_calls += 1;
        debug!(venue = %self.name, "Paper venue disconnected");
        Ok(())
    }

    async fn get_quote(&self, market: &str) -> VenueResult<Option<Quote>> {
        retry(&self.retry_policy, "get_quote", || self.quote_once(market)).await
    }

    async fn get_market_info(&self, market: &str) -> VenueResult<Option<MarketInfo>> {
        Ok(Some(MarketInfo {
            symbol: market.to_string(),
            tick_size: self.tick_size,
            step_size: dec!(0.0001),
            min_size: dec!(0.0001),
        }))
    }

    async fn place_limit_order(
        &self,
        market: &str,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
        post_only: bool,
        reduce_only: bool,
    ) -> VenueResult<OrderResult> {
        retry(&self.retry_policy, "place_limit_order", || {
            self.limit_once(market, side, size, price, post_only, reduce_only)
        })
        .await
    }

    async fn place_market_order(
        &self,
        market: &str,
        side: OrderSide,
        size: Decimal,
        reduce_only: bool,
    ) -> VenueResult<OrderResult> {
        retry(&self.retry_policy, "place_market_order", || {
            self.market_once(market, side, size, reduce_only)
        })
        .await
    }

    async fn cancel_order(&self, order_id: &str) -> VenueResult<bool> {
        retry(&self.retry_policy, "cancel_order", || self.cancel_once(order_id)).await
    }

    async fn cancel_all_orders(&self, market: &str) -> VenueResult<usize> {
        retry(&self.retry_policy, "cancel_all_orders", || self.cancel_all_once(market)).await
    }

    async fn get_order_info(&self, order_id: &str) -> VenueResult<Option<OrderInfo>> {
        retry(&self.retry_policy, "get_order_info", || self.order_info_once(order_id)).await
    }

    async fn get_position_size(&self, market: &str) -> VenueResult<Decimal> {
        retry(&self.retry_policy, "get_position_size", || self.position_once(market)).await
    }

    async fn get_balance(&self) -> VenueResult<Option<Decimal>> {
        retry(&self.retry_policy, "get_balance", || self.balance_once()).await
    }

    async fn close_position(&self, market: &str) -> VenueResult<bool> {
        {
            let mut state = self.state.write().await;
            state.stats.close_calls += 1;
            state.take_fault(PaperOp::Close)?;
        }

        let position = self.get_position_size(market).await?;
        if position == Decimal::ZERO {
            return Ok(true);
        }

        let side = if position > Decimal::ZERO {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let result = self
            .place_market_order(market, side, position.abs(), true)
            .await?;

        Ok(result.success)
    }
}

/// Random-walk quote driver for paper runs.
///
/// Moves a shared mid price and publishes slightly offset books to both
/// venues so the spread oscillates around zero.
pub struct QuoteWalk {
    mid: Decimal,
    half_width: Decimal,
    step: Decimal,
    max_skew: Decimal,
}

impl QuoteWalk {
    pub fn new(mid: Decimal, half_width: Decimal, step: Decimal, max_skew: Decimal) -> Self {
        Self {
            mid,
            half_width,
            step,
            max_skew,
        }
    }

    /// Advance one step and publish quotes to both venues.
    pub async fn tick(
        &mut self,
        venue_a: &PaperVenue,
        market_a: &str,
        venue_b: &PaperVenue,
        market_b: &str,
    ) {
        let (drift, skew) = {
            let mut rng = rand::thread_rng();
            let drift: i64 = rng.gen_range(-10..=10);
            let skew: i64 = rng.gen_range(-100..=100);
            (drift, skew)
        };

        self.mid += self.step * Decimal::from(drift);
        let skew = self.max_skew * Decimal::from(skew) / dec!(100);

        venue_a
            .set_quote(market_a, self.mid - self.half_width, self.mid + self.half_width)
            .await;
        venue_b
            .set_quote(
                market_b,
                self.mid + skew - self.half_width,
                self.mid + skew + self.half_width,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKET: &str = "BTC-USD-PERP";

    async fn venue_with_book(bid: Decimal, ask: Decimal) -> PaperVenue {
        let venue = PaperVenue::new("paper", dec!(1000));
        venue.set_quote(MARKET, bid, ask).await;
        venue
    }

    #[tokio::test]
    async fn test_market_order_updates_position() {
        let venue = venue_with_book(dec!(100), dec!(101)).await;

        let result = venue
            .place_market_order(MARKET, OrderSide::Buy, dec!(0.5), false)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(venue.position(MARKET).await, dec!(0.5));
    }

    #[tokio::test]
    async fn test_crossing_post_only_is_closed_unfilled() {
        let venue = venue_with_book(dec!(100), dec!(101)).await;

        let result = venue
            .place_limit_order(MARKET, OrderSide::Buy, dec!(1), dec!(101), true, false)
            .await
            .unwrap();
        let info = venue
            .get_order_info(result.order_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(info.status, OrderState::Closed);
        assert_eq!(info.remaining_size, dec!(1));
        assert_eq!(venue.position(MARKET).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_resting_order_fills_on_touch() {
        let venue = venue_with_book(dec!(100), dec!(101)).await;

        let result = venue
            .place_limit_order(MARKET, OrderSide::Buy, dec!(1), dec!(100.5), true, false)
            .await
            .unwrap();
        let order_id = result.order_id.unwrap();
        assert_eq!(venue.open_orders().await.len(), 1);

        venue.set_quote(MARKET, dec!(100), dec!(100.5)).await;

        let info = venue.get_order_info(&order_id).await.unwrap().unwrap();
        assert_eq!(info.status, OrderState::Closed);
        assert_eq!(info.remaining_size, Decimal::ZERO);
        assert_eq!(venue.position(MARKET).await, dec!(1));
    }

    #[tokio::test]
    async fn test_reduce_only_never_flips_position() {
        let venue = venue_with_book(dec!(100), dec!(101)).await;
        venue.set_position(MARKET, dec!(-0.3)).await;

        let result = venue
            .place_market_order(MARKET, OrderSide::Buy, dec!(1), true)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(venue.position(MARKET).await, Decimal::ZERO);

        let rejected = venue
            .place_market_order(MARKET, OrderSide::Buy, dec!(1), true)
            .await
            .unwrap();
        assert!(!rejected.success);
    }

    #[tokio::test]
    async fn test_reduce_only_limit_is_clamped_to_position() {
        let venue = venue_with_book(dec!(100), dec!(101)).await;

        let flat = venue
            .place_limit_order(MARKET, OrderSide::Sell, dec!(1), dec!(102), false, true)
            .await
            .unwrap();
        assert!(!flat.success);
        assert!(venue.open_orders().await.is_empty());

        venue.set_position(MARKET, dec!(0.4)).await;
        let result = venue
            .place_limit_order(MARKET, OrderSide::Sell, dec!(1), dec!(102), false, true)
            .await
            .unwrap();
        assert!(result.success);
        let resting = venue.open_orders().await;
        assert_eq!(resting.len(), 1);
        assert_eq!(resting[0].size, dec!(0.4));
    }

    #[tokio::test]
    async fn test_partial_mode_leaves_remainder_resting() {
        let venue = venue_with_book(dec!(100), dec!(101)).await;
        venue.set_fill_mode(PaperFillMode::Partial).await;

        let result = venue
            .place_limit_order(MARKET, OrderSide::Buy, dec!(0.002), dec!(100.5), true, false)
            .await
            .unwrap();
        let info = venue
            .get_order_info(result.order_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(info.status, OrderState::Open);
        assert_eq!(info.remaining_size, dec!(0.001));
        assert_eq!(venue.position(MARKET).await, dec!(0.001));
    }

    #[tokio::test]
    async fn test_close_position_flattens() {
        let venue = venue_with_book(dec!(100), dec!(101)).await;
        venue.set_position(MARKET, dec!(0.02)).await;

        assert!(venue.close_position(MARKET).await.unwrap());
        assert_eq!(venue.position(MARKET).await, Decimal::ZERO);
        assert_eq!(venue.stats().await.close_calls, 1);
    }

    #[tokio::test]
    async fn test_injected_fault_surfaces_once() {
        let venue = venue_with_book(dec!(100), dec!(101)).await;
        venue
            .inject_fault(PaperOp::Quote, VenueError::Network("timeout".into()))
            .await;

        assert!(venue.get_quote(MARKET).await.is_err());
        assert!(venue.get_quote(MARKET).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_hides_transient_fault() {
        let venue = PaperVenue::new("paper", dec!(1000)).with_retry_policy(RetryPolicy::default());
        venue.set_quote(MARKET, dec!(100), dec!(101)).await;
        venue
            .inject_fault(PaperOp::Quote, VenueError::RateLimited("429".into()))
            .await;

        let quote = venue.get_quote(MARKET).await.unwrap().unwrap();
        assert_eq!(quote.bid, dec!(100));
    }

    #[tokio::test]
    async fn test_fee_reduces_balance() {
        let venue = PaperVenue::new("paper", dec!(1000)).with_fee_rate(dec!(0.001));
        venue.set_quote(MARKET, dec!(100), dec!(100)).await;

        venue
            .place_market_order(MARKET, OrderSide::Sell, dec!(1), false)
            .await
            .unwrap();

        assert_eq!(venue.get_balance().await.unwrap(), Some(dec!(999.9)));
    }

    #[tokio::test]
    async fn test_quote_walk_publishes_both_books() {
        let a = PaperVenue::new("a", dec!(1000));
        let b = PaperVenue::new("b", dec!(1000));
        let mut walk = QuoteWalk::new(dec!(50000), dec!(0.5), dec!(1), dec!(20));

        walk.tick(&a, "A", &b, "B").await;

        let qa = a.get_quote("A").await.unwrap().unwrap();
        let qb = b.get_quote("B").await.unwrap().unwrap();
        assert_eq!(qa.width(), dec!(1));
        assert_eq!(qb.width(), dec!(1));
    }
}
