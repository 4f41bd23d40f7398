//! Two-leg order dispatch and outcome reconciliation.
//!
//! Venue A carries the primary exposure, venue B hedges it:
//! - LONG buys on A and sells on B
//! - SHORT sells on A and buys on B
//!
//! When exactly one leg fills, the filled venue is force-closed so the two
//! exposures never drift apart.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ExecutionConfig;
use crate::exchange::{
    Leg, OrderResult, OrderSide, OrderState, Quote, VenueAdapter, VenueResult,
};
use crate::strategy::spread::Direction;
use crate::utils::{ceil_to_tick, floor_to_tick, round_down_to_lot};

/// Grace period before re-querying an order the venue has not indexed yet.
const ORDER_LOOKUP_GRACE: Duration = Duration::from_millis(500);

/// How a passive entry order ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FillStatus {
    Filled,
    /// Closed unfilled on the first status check (post-only cross).
    Rejected,
    /// Still resting when the fill timeout elapsed.
    Timeout,
}

impl fmt::Display for FillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillStatus::Filled => write!(f, "filled"),
            FillStatus::Rejected => write!(f, "rejected"),
            FillStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// Result of one leg's order.
#[derive(Debug, Clone)]
pub enum LegOutcome {
    Filled(OrderResult),
    Failed(String),
}

impl LegOutcome {
    /// Classify a venue response. Both transport errors and unsuccessful
    /// responses count as a failed leg.
    pub fn from_result(result: VenueResult<OrderResult>) -> Self {
        match result {
            Ok(order) if order.success => LegOutcome::Filled(order),
            Ok(order) => LegOutcome::Failed(
                order
                    .error
                    .unwrap_or_else(|| "order not accepted".to_string()),
            ),
            Err(e) => LegOutcome::Failed(e.to_string()),
        }
    }

    pub fn is_filled(&self) -> bool {
        matches!(self, LegOutcome::Filled(_))
    }

    pub fn order_id(&self) -> Option<&str> {
        match self {
            LegOutcome::Filled(order) => order.order_id.as_deref(),
            LegOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            LegOutcome::Filled(_) => None,
            LegOutcome::Failed(reason) => Some(reason),
        }
    }
}

/// What happened to the pair after both legs resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Reconciliation {
    BothFilled,
    /// Only A filled; A was force-closed (`closed` reports whether that worked).
    CompensatedA { closed: bool },
    /// Only B filled; B was force-closed.
    CompensatedB { closed: bool },
    BothFailed,
    /// The passive entry never filled, so no hedge was sent.
    EntryNotFilled(FillStatus),
}

impl Reconciliation {
    /// Whether a compensation close failed, leaving one leg unhedged.
    pub fn is_unhedged(&self) -> bool {
        matches!(
            self,
            Reconciliation::CompensatedA { closed: false }
                | Reconciliation::CompensatedB { closed: false }
        )
    }

    pub fn is_compensated(&self) -> bool {
        matches!(
            self,
            Reconciliation::CompensatedA { .. } | Reconciliation::CompensatedB { .. }
        )
    }
}

impl fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reconciliation::BothFilled => write!(f, "both_filled"),
            Reconciliation::CompensatedA { closed } => write!(f, "compensated_a(closed={})", closed),
            Reconciliation::CompensatedB { closed } => write!(f, "compensated_b(closed={})", closed),
            Reconciliation::BothFailed => write!(f, "both_failed"),
            Reconciliation::EntryNotFilled(status) => write!(f, "entry_not_filled({})", status),
        }
    }
}

/// One dispatched pair and its resolution.
#[derive(Debug, Clone)]
pub struct ExecutionAttempt {
    pub direction: Direction,
    pub size: Decimal,
    /// Passive entry price on venue A (maker mode only)
    pub entry_price: Option<Decimal>,
    pub leg_a: Option<LegOutcome>,
    pub leg_b: Option<LegOutcome>,
    pub reconciliation: Reconciliation,
    /// Every order submitted during the attempt, in order, by venue
    pub submitted: Vec<Leg>,
}

impl ExecutionAttempt {
    fn new(direction: Direction, size: Decimal) -> Self {
        Self {
            direction,
            size,
            entry_price: None,
            leg_a: None,
            leg_b: None,
            reconciliation: Reconciliation::BothFailed,
            submitted: Vec::new(),
        }
    }

    pub fn is_trade(&self) -> bool {
        self.reconciliation == Reconciliation::BothFilled
    }
}

impl Direction {
    /// Order sides on (venue A, venue B).
    pub fn sides(self) -> (OrderSide, OrderSide) {
        let side_a = match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        };
        // Venue B always takes the other side of venue A
        (side_a, side_a.opposite())
    }
}

/// Tick and lot sizes used for passive pricing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingInfo {
    pub tick_size: Decimal,
    pub step_size: Decimal,
}

/// Places and reconciles paired orders on the two venues.
pub struct OrderExecutor {
    venue_a: Arc<dyn VenueAdapter>,
    venue_b: Arc<dyn VenueAdapter>,
    market_a: String,
    market_b: String,
    config: ExecutionConfig,
}

impl OrderExecutor {
    pub fn new(
        venue_a: Arc<dyn VenueAdapter>,
        venue_b: Arc<dyn VenueAdapter>,
        market_a: impl Into<String>,
        market_b: impl Into<String>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            venue_a,
            venue_b,
            market_a: market_a.into(),
            market_b: market_b.into(),
            config,
        }
    }

    fn venue(&self, leg: Leg) -> (&dyn VenueAdapter, &str) {
        match leg {
            Leg::A => (self.venue_a.as_ref(), &self.market_a),
            Leg::B => (self.venue_b.as_ref(), &self.market_b),
        }
    }

    /// Venue A tick and lot sizes, falling back to the configured tick.
    pub async fn pricing_info(&self) -> PricingInfo {
        let fallback = PricingInfo {
            tick_size: self.config.default_tick_size,
            step_size: Decimal::ZERO,
        };

        match self.venue_a.get_market_info(&self.market_a).await {
            Ok(Some(info)) if info.tick_size > Decimal::ZERO => PricingInfo {
                tick_size: info.tick_size,
                step_size: info.step_size,
            },
            Ok(_) => fallback,
            Err(e) => {
                warn!(venue = %self.venue_a.name(), error = %e, "Market info unavailable, using default tick");
                fallback
            }
        }
    }

    /// Simultaneous taker dispatch: market orders on both venues at once.
    pub async fn execute_taker(&self, direction: Direction, size: Decimal) -> ExecutionAttempt {
        let (side_a, side_b) = direction.sides();
        let mut attempt = ExecutionAttempt::new(direction, size);

        info!(%direction, %size, "[TRADE] Dispatching taker legs");

        attempt.submitted.extend([Leg::A, Leg::B]);
        let (result_a, result_b) = tokio::join!(
            self.venue_a
                .place_market_order(&self.market_a, side_a, size, false),
            self.venue_b
                .place_market_order(&self.market_b, side_b, size, false),
        );

        let leg_a = LegOutcome::from_result(result_a);
        let leg_b = LegOutcome::from_result(result_b);
        self.reconcile(&mut attempt, leg_a, leg_b).await;
        attempt
    }

    /// Passive entry on venue A, then a market hedge on venue B once filled.
    ///
    /// The caller is responsible for the book-width guard: `quote_a` must be
    /// wider than one tick or the entry price would cross.
    pub async fn execute_maker(
        &self,
        direction: Direction,
        size: Decimal,
        quote_a: &Quote,
        pricing: PricingInfo,
        cancel: &CancellationToken,
    ) -> ExecutionAttempt {
        let (side_a, side_b) = direction.sides();
        let mut attempt = ExecutionAttempt::new(direction, size);

        let tick = pricing.tick_size;
        let price = match side_a {
            OrderSide::Buy => floor_to_tick(quote_a.ask - tick, tick),
            OrderSide::Sell => ceil_to_tick(quote_a.bid + tick, tick),
        };
        let size = match round_down_to_lot(size, pricing.step_size) {
            rounded if rounded > Decimal::ZERO => rounded,
            _ => size,
        };
        attempt.size = size;
        attempt.entry_price = Some(price);

        info!(
            %direction,
            side = %side_a,
            %size,
            %price,
            bid = %quote_a.bid,
            ask = %quote_a.ask,
            "[TRADE] Placing passive entry on venue A"
        );

        attempt.submitted.push(Leg::A);
        let placed = LegOutcome::from_result(
            self.venue_a
                .place_limit_order(&self.market_a, side_a, size, price, true, false)
                .await,
        );

        let order_id = match placed.order_id() {
            Some(id) => id.to_string(),
            None => {
                warn!(
                    reason = placed.failure().unwrap_or("missing order id"),
                    "Passive entry not accepted"
                );
                attempt.leg_a = Some(placed);
                attempt.reconciliation = Reconciliation::EntryNotFilled(FillStatus::Rejected);
                return attempt;
            }
        };

        let mut status = self.wait_for_fill(&order_id, cancel).await;
        let mut filled = size;
        if status == FillStatus::Timeout {
            filled = self.cancel_unfilled(&order_id, size).await;
            if filled >= size {
                info!(%order_id, "Entry filled while cancelling");
                status = FillStatus::Filled;
            } else if filled > Decimal::ZERO {
                warn!(%order_id, %filled, %size, "Entry partially filled before cancel, hedging filled quantity");
                attempt.size = filled;
                status = FillStatus::Filled;
            }
        }

        if status != FillStatus::Filled {
            info!(%order_id, %status, "Passive entry not filled, skipping hedge");
            attempt.leg_a = Some(LegOutcome::Failed(format!("entry {}", status)));
            attempt.reconciliation = Reconciliation::EntryNotFilled(status);
            return attempt;
        }

        let hedge_size = filled.min(size);
        info!(%order_id, %price, size = %hedge_size, "Passive entry filled, hedging on venue B");

        attempt.submitted.push(Leg::B);
        let hedge = LegOutcome::from_result(
            self.venue_b
                .place_market_order(&self.market_b, side_b, hedge_size, false)
                .await,
        );
        self.reconcile(&mut attempt, placed, hedge).await;
        attempt
    }

    /// Poll venue A until the order fills, is rejected, or times out.
    ///
    /// A closed order with size left on the first check is a rejection
    /// (post-only cross). Cancellation of `cancel` ends the wait early as a
    /// timeout so the caller still cancels the order.
    pub async fn wait_for_fill(&self, order_id: &str, cancel: &CancellationToken) -> FillStatus {
        let deadline = Instant::now() + self.config.fill_timeout();
        let poll_interval = self.config.fill_poll_interval();
        let mut first_check = true;
        let mut lookup_retried = false;

        loop {
            let info = match self.venue_a.get_order_info(order_id).await {
                Ok(info) => info,
                Err(e) => {
                    debug!(%order_id, error = %e, "Order status query failed");
                    None
                }
            };

            match info {
                Some(info) if info.remaining_size <= Decimal::ZERO => return FillStatus::Filled,
                Some(info) if info.status == OrderState::Closed => {
                    if first_check {
                        debug!(%order_id, remaining = %info.remaining_size, "Order closed on first check");
                        return FillStatus::Rejected;
                    }
                    // Closed externally after resting
                    return FillStatus::Timeout;
                }
                Some(_) => {}
                None if first_check => {
                    if lookup_retried {
                        warn!(%order_id, "Order unknown to venue");
                        return FillStatus::Rejected;
                    }
                    lookup_retried = true;
                    tokio::time::sleep(ORDER_LOOKUP_GRACE).await;
                    continue;
                }
                None => {}
            }
            first_check = false;

            if Instant::now() >= deadline {
                return FillStatus::Timeout;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(%order_id, "Stop requested during fill-wait");
                    return FillStatus::Timeout;
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// Cancel a timed-out entry and report how much of `size` filled,
    /// including fills that raced the cancel.
    async fn cancel_unfilled(&self, order_id: &str, size: Decimal) -> Decimal {
        if let Err(e) = self.venue_a.cancel_order(order_id).await {
            warn!(%order_id, error = %e, "Failed to cancel timed-out entry");
        }

        match self.venue_a.get_order_info(order_id).await {
            Ok(Some(info)) => (size - info.remaining_size.max(Decimal::ZERO)).max(Decimal::ZERO),
            Ok(None) => {
                warn!(%order_id, "Timed-out entry unknown after cancel");
                Decimal::ZERO
            }
            Err(e) => {
                warn!(%order_id, error = %e, "Failed to re-check timed-out entry");
                Decimal::ZERO
            }
        }
    }

    async fn reconcile(&self, attempt: &mut ExecutionAttempt, leg_a: LegOutcome, leg_b: LegOutcome) {
        attempt.reconciliation = match (&leg_a, &leg_b) {
            (LegOutcome::Filled(_), LegOutcome::Filled(_)) => {
                info!(
                    direction = %attempt.direction,
                    size = %attempt.size,
                    order_a = leg_a.order_id().unwrap_or("-"),
                    order_b = leg_b.order_id().unwrap_or("-"),
                    "[TRADE] Both legs filled"
                );
                Reconciliation::BothFilled
            }
            (LegOutcome::Filled(_), LegOutcome::Failed(reason)) => {
                error!(%reason, "[HEDGE] Venue B leg failed, closing venue A");
                let closed = self.compensate(Leg::A, attempt).await;
                Reconciliation::CompensatedA { closed }
            }
            (LegOutcome::Failed(reason), LegOutcome::Filled(_)) => {
                error!(%reason, "[HEDGE] Venue A leg failed, closing venue B");
                let closed = self.compensate(Leg::B, attempt).await;
                Reconciliation::CompensatedB { closed }
            }
            (LegOutcome::Failed(reason_a), LegOutcome::Failed(reason_b)) => {
                warn!(%reason_a, %reason_b, "Both legs failed, no position change");
                Reconciliation::BothFailed
            }
        };
        attempt.leg_a = Some(leg_a);
        attempt.leg_b = Some(leg_b);
    }

    /// Force-close one venue's exposure. Best-effort: never retried here.
    async fn compensate(&self, leg: Leg, attempt: &mut ExecutionAttempt) -> bool {
        let (venue, market) = self.venue(leg);
        attempt.submitted.push(leg);

        match venue.close_position(market).await {
            Ok(true) => {
                info!(venue = %venue.name(), %market, "[HEDGE] Compensation close succeeded");
                true
            }
            Ok(false) => {
                error!(venue = %venue.name(), %market, "[HEDGE] Compensation close rejected - position may be UNHEDGED");
                false
            }
            Err(e) => {
                error!(venue = %venue.name(), %market, error = %e, "[HEDGE] Compensation close failed - position may be UNHEDGED");
                false
            }
        }
    }
}
