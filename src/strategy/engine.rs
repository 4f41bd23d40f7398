//! Main control loop.
//!
//! Each cycle fetches both quotes, feeds the analyzer, and on a signal runs
//! the entry gates (cooldown, order budget, position cap) before handing the
//! pair to the [`OrderExecutor`]. Housekeeping runs on its own interval and
//! shutdown flattens both venues exactly once.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Config, ExecutionMode};
use crate::exchange::{Quote, VenueAdapter, VenueResult};
use crate::notify::Notifier;
use crate::persistence::{BboSample, TradeJournal, TradeRecord};
use crate::risk::{AdmissionGate, PositionTracker};
use crate::strategy::executor::{ExecutionAttempt, OrderExecutor, Reconciliation};
use crate::strategy::spread::{Direction, Signal, SpreadAnalyzer};

/// Pause after an unexpected cycle error.
const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Why a signal was not acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateRejection {
    /// Trade cooldown or reject backoff still running
    Cooldown,
    /// Venue order budget exhausted
    Admission,
    /// Entry would breach the position cap
    Position,
}

/// Why a gated-through signal was still not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Venue A book is no wider than one tick
    NarrowBook,
}

/// Result of one signal cycle.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// At least one venue returned no quote
    NoQuotes,
    /// Quotes sampled, no signal
    Idle,
    Gated(GateRejection),
    Skipped(SkipReason),
    Dispatched(ExecutionAttempt),
}

/// Final statistics emitted at shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub trade_count: u64,
    pub compensation_count: u64,
    /// Last verified exposure per venue (`None` when the query failed)
    pub final_a: Option<Decimal>,
    pub final_b: Option<Decimal>,
}

impl RunSummary {
    pub fn hours(&self) -> f64 {
        self.elapsed.as_secs_f64() / 3600.0
    }

    pub fn is_flat(&self) -> bool {
        self.final_a == Some(Decimal::ZERO) && self.final_b == Some(Decimal::ZERO)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<Decimal>| v.map_or_else(|| "unknown".to_string(), |d| d.to_string());
        write!(
            f,
            "Runtime: {:.2}h | Trades: {} | Compensations: {} | Final A: {} | Final B: {}",
            self.hours(),
            self.trade_count,
            self.compensation_count,
            show(self.final_a),
            show(self.final_b)
        )
    }
}

/// Cross-venue spread arbitrage engine.
pub struct Engine {
    config: Config,
    venue_a: Arc<dyn VenueAdapter>,
    venue_b: Arc<dyn VenueAdapter>,
    executor: OrderExecutor,
    analyzer: SpreadAnalyzer,
    positions: PositionTracker,
    admission: AdmissionGate,
    notifier: Option<Arc<dyn Notifier>>,
    journal: Option<Arc<dyn TradeJournal>>,
    cancel: CancellationToken,
    shutdown_started: AtomicBool,
    /// At least one venue accepted `connect`
    venues_connected: bool,
    started_at: Instant,
    trade_count: AtomicU64,
    compensation_count: AtomicU64,
    last_attempt: Option<Instant>,
    entries_blocked_until: Option<Instant>,
    consecutive_rejects: u32,
    last_housekeeping: Instant,
}

impl Engine {
    pub fn new(
        config: Config,
        venue_a: Arc<dyn VenueAdapter>,
        venue_b: Arc<dyn VenueAdapter>,
        cancel: CancellationToken,
    ) -> Self {
        let executor = OrderExecutor::new(
            venue_a.clone(),
            venue_b.clone(),
            config.trading.market_a.clone(),
            config.trading.market_b.clone(),
            config.execution.clone(),
        );
        let now = Instant::now();

        Self {
            analyzer: SpreadAnalyzer::new(config.spread_config()),
            positions: PositionTracker::new(config.trading.max_position),
            admission: AdmissionGate::new(
                config.admission.venue_a_caps(),
                config.admission.venue_b_caps(),
            ),
            executor,
            venue_a,
            venue_b,
            config,
            notifier: None,
            journal: None,
            cancel,
            shutdown_started: AtomicBool::new(false),
            venues_connected: false,
            started_at: now,
            trade_count: AtomicU64::new(0),
            compensation_count: AtomicU64::new(0),
            last_attempt: None,
            entries_blocked_until: None,
            consecutive_rejects: 0,
            last_housekeeping: now,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_journal(mut self, journal: Arc<dyn TradeJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn positions(&self) -> &PositionTracker {
        &self.positions
    }

    pub fn analyzer(&self) -> &SpreadAnalyzer {
        &self.analyzer
    }

    pub fn trade_count(&self) -> u64 {
        self.trade_count.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn market_a(&self) -> &str {
        &self.config.trading.market_a
    }

    fn market_b(&self) -> &str {
        &self.config.trading.market_b
    }

    async fn notify(&self, message: &str) {
        if let Some(notifier) = &self.notifier {
            notifier.send(message).await;
        }
    }

    /// Initialize, trade until stopped, then shut down.
    pub async fn run(&mut self) -> Result<RunSummary> {
        if let Err(e) = self.initialize().await {
            error!(error = %format!("{:#}", e), "Initialization failed");
            if self.venues_connected {
                self.shutdown().await;
            } else {
                self.cancel.cancel();
            }
            return Err(e);
        }

        info!(
            mode = %self.config.execution.mode,
            "Entering main loop"
        );

        while !self.cancel.is_cancelled() {
            let pause = match self.run_cycle().await {
                Ok(CycleOutcome::NoQuotes) => self.config.execution.missing_quote_retry(),
                Ok(_) => self.config.execution.loop_interval(),
                Err(e) => {
                    error!(error = %e, "Cycle failed");
                    ERROR_PAUSE
                }
            };

            if self.last_housekeeping.elapsed() >= self.config.execution.housekeeping_interval() {
                self.housekeeping().await;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        match self.shutdown().await {
            Some(summary) => Ok(summary),
            None => Ok(self.current_summary(None, None)),
        }
    }

    /// Connect both venues and seed local state.
    #[instrument(skip(self))]
    pub async fn initialize(&mut self) -> Result<()> {
        let name_a = self.venue_a.name().to_string();
        let name_b = self.venue_b.name().to_string();

        let (connect_a, connect_b) = tokio::join!(self.venue_a.connect(), self.venue_b.connect());
        self.venues_connected = connect_a.is_ok() || connect_b.is_ok();
        connect_a.with_context(|| format!("Failed to connect to {}", name_a))?;
        connect_b.with_context(|| format!("Failed to connect to {}", name_b))?;
        info!(venue_a = %name_a, venue_b = %name_b, "Venues connected");

        let (info_a, info_b) = tokio::join!(
            self.venue_a.get_market_info(self.market_a()),
            self.venue_b.get_market_info(self.market_b()),
        );
        for (name, info) in [(&name_a, info_a), (&name_b, info_b)] {
            match info {
                Ok(Some(info)) => info!(
                    venue = %name,
                    market = %info.symbol,
                    tick_size = %info.tick_size,
                    step_size = %info.step_size,
                    min_size = %info.min_size,
                    "Market info"
                ),
                Ok(None) => warn!(venue = %name, "No market info reported"),
                Err(e) => warn!(venue = %name, error = %e, "Failed to fetch market info"),
            }
        }

        self.refresh_positions()
            .await
            .context("Failed to seed positions")?;
        self.positions.log_positions();

        let (balance_a, balance_b) = self.fetch_balances().await;
        self.started_at = Instant::now();
        self.last_housekeeping = self.started_at;

        let trading = &self.config.trading;
        self.notify(&format!(
            "🚀 Started {} ({} / {})\nMode: {} | Size: {} | Max position: {}\nBalances: A={} B={}",
            trading.ticker,
            trading.market_a,
            trading.market_b,
            self.config.execution.mode,
            trading.size,
            trading.max_position,
            show_balance(balance_a),
            show_balance(balance_b),
        ))
        .await;

        Ok(())
    }

    /// Run one signal cycle.
    #[instrument(skip(self), level = "debug")]
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let (quote_a, quote_b) = tokio::join!(
            self.venue_a.get_quote(self.market_a()),
            self.venue_b.get_quote(self.market_b()),
        );
        let quote_a = usable_quote(self.venue_a.name(), quote_a);
        let quote_b = usable_quote(self.venue_b.name(), quote_b);
        let (Some(quote_a), Some(quote_b)) = (quote_a, quote_b) else {
            return Ok(CycleOutcome::NoQuotes);
        };

        self.analyzer
            .add_sample(quote_a.bid, quote_a.ask, quote_b.bid, quote_b.ask);
        self.journal_bbo(&quote_a, &quote_b);

        let Some(signal) = self.analyzer.check_signal() else {
            return Ok(CycleOutcome::Idle);
        };

        info!(
            direction = %signal.direction,
            spread = %signal.spread,
            mean = %signal.mean.round_dp(4),
            trigger = %signal.trigger(self.config.trading.min_spread).round_dp(4),
            "Signal"
        );

        if let Some(rejection) = self.check_gates(&signal).await? {
            return Ok(CycleOutcome::Gated(rejection));
        }

        let size = self.config.trading.size;
        let attempt = match self.config.execution.mode {
            ExecutionMode::Taker => self.executor.execute_taker(signal.direction, size).await,
            ExecutionMode::Maker => {
                let pricing = self.executor.pricing_info().await;
                if quote_a.width() <= pricing.tick_size {
                    debug!(
                        width = %quote_a.width(),
                        tick = %pricing.tick_size,
                        "Venue A book too narrow for a passive entry"
                    );
                    return Ok(CycleOutcome::Skipped(SkipReason::NarrowBook));
                }
                self.executor
                    .execute_maker(signal.direction, size, &quote_a, pricing, &self.cancel)
                    .await
            }
        };

        self.last_attempt = Some(Instant::now());
        self.handle_attempt(&signal, &attempt).await;

        Ok(CycleOutcome::Dispatched(attempt))
    }

    /// Entry gates in order: cooldown/backoff, order budget, position cap.
    async fn check_gates(&mut self, signal: &Signal) -> Result<Option<GateRejection>> {
        let now = Instant::now();

        if let Some(until) = self.entries_blocked_until {
            if now < until {
                debug!(
                    remaining_ms = until.saturating_duration_since(now).as_millis() as u64,
                    "Entries suspended after rejects"
                );
                return Ok(Some(GateRejection::Cooldown));
            }
            info!("Reject backoff elapsed, entries resumed");
            self.entries_blocked_until = None;
        }

        if let Some(last) = self.last_attempt {
            if now.saturating_duration_since(last) < self.config.execution.trade_cooldown() {
                debug!("Trade cooldown active");
                return Ok(Some(GateRejection::Cooldown));
            }
        }

        if self.admission.should_pause() {
            return Ok(Some(GateRejection::Admission));
        }

        self.refresh_positions().await?;
        let size = self.config.trading.size;
        let allowed = match signal.direction {
            Direction::Long => self.positions.can_open_long(size),
            Direction::Short => self.positions.can_open_short(size),
        };
        if !allowed {
            info!(
                direction = %signal.direction,
                venue_a = %self.positions.venue_a(),
                max_position = %self.positions.max_position(),
                "Position cap reached"
            );
            return Ok(Some(GateRejection::Position));
        }

        Ok(None)
    }

    async fn handle_attempt(&mut self, signal: &Signal, attempt: &ExecutionAttempt) {
        for leg in &attempt.submitted {
            self.admission.record(*leg);
        }

        match attempt.reconciliation {
            Reconciliation::EntryNotFilled(status) => {
                self.consecutive_rejects += 1;
                let threshold = self.config.execution.reject_threshold;
                info!(
                    %status,
                    consecutive = self.consecutive_rejects,
                    threshold,
                    "Entry not filled"
                );
                if self.consecutive_rejects >= threshold {
                    let backoff = self.config.execution.reject_backoff(self.consecutive_rejects);
                    warn!(
                        consecutive = self.consecutive_rejects,
                        backoff_secs = backoff.as_secs(),
                        "Too many unfilled entries, backing off"
                    );
                    self.entries_blocked_until = Some(Instant::now() + backoff);
                    self.consecutive_rejects = 0;
                }
                return;
            }
            Reconciliation::BothFilled => {
                self.consecutive_rejects = 0;
                let count = self.trade_count.fetch_add(1, Ordering::SeqCst) + 1;
                info!(
                    direction = %attempt.direction,
                    size = %attempt.size,
                    spread = %signal.spread,
                    trade_count = count,
                    "[TRADE] Arbitrage complete"
                );
                self.notify(&format!(
                    "✅ {} {} @ spread {}\nTrades: {}",
                    attempt.direction, attempt.size, signal.spread, count
                ))
                .await;
            }
            Reconciliation::CompensatedA { closed } | Reconciliation::CompensatedB { closed } => {
                self.consecutive_rejects = 0;
                self.compensation_count.fetch_add(1, Ordering::SeqCst);
                let message = if closed {
                    format!(
                        "⚠️ {} hedge failed, compensated ({})",
                        attempt.direction, attempt.reconciliation
                    )
                } else {
                    format!(
                        "🚨 {} hedge failed and compensation FAILED ({}), position may be unhedged",
                        attempt.direction, attempt.reconciliation
                    )
                };
                self.notify(&message).await;
            }
            Reconciliation::BothFailed => {
                self.consecutive_rejects = 0;
            }
        }

        self.journal_trade(signal, attempt);

        match self.refresh_positions().await {
            Ok(()) => self.positions.log_positions(),
            Err(e) => warn!(error = %e, "Failed to refresh positions after trade"),
        }
    }

    /// Overwrite cached exposures from both venues.
    async fn refresh_positions(&mut self) -> Result<()> {
        let (pos_a, pos_b) = tokio::join!(
            self.venue_a.get_position_size(self.market_a()),
            self.venue_b.get_position_size(self.market_b()),
        );
        let pos_a = pos_a.with_context(|| format!("Failed to query position on {}", self.venue_a.name()))?;
        let pos_b = pos_b.with_context(|| format!("Failed to query position on {}", self.venue_b.name()))?;
        self.positions.update_a(pos_a);
        self.positions.update_b(pos_b);
        Ok(())
    }

    async fn fetch_balances(&self) -> (Option<Decimal>, Option<Decimal>) {
        let (balance_a, balance_b) =
            tokio::join!(self.venue_a.get_balance(), self.venue_b.get_balance());
        let balance_a = log_balance(self.venue_a.name(), balance_a);
        let balance_b = log_balance(self.venue_b.name(), balance_b);
        (balance_a, balance_b)
    }

    /// Periodic balance, position and budget checks.
    #[instrument(skip(self))]
    pub async fn housekeeping(&mut self) {
        self.last_housekeeping = Instant::now();

        let (balance_a, balance_b) = self.fetch_balances().await;
        let min_balance = self.config.trading.min_balance;
        for (name, balance) in [
            (self.venue_a.name().to_string(), balance_a),
            (self.venue_b.name().to_string(), balance_b),
        ] {
            if let Some(balance) = balance {
                if balance < min_balance {
                    error!(venue = %name, %balance, %min_balance, "Balance below minimum, stopping");
                    self.notify(&format!(
                        "🛑 {} balance {} below minimum {}, stopping",
                        name, balance, min_balance
                    ))
                    .await;
                    self.cancel.cancel();
                }
            }
        }

        match self.refresh_positions().await {
            Ok(()) => {
                self.positions.log_positions();
                let threshold = self.config.trading.size * Decimal::TWO;
                if self.positions.check_imbalance(threshold) {
                    let snapshot = self.positions.snapshot();
                    self.notify(&format!(
                        "⚠️ Position imbalance: A={} B={} Net={} (threshold {})",
                        snapshot.venue_a, snapshot.venue_b, snapshot.net, threshold
                    ))
                    .await;
                }
            }
            Err(e) => warn!(error = %e, "Failed to refresh positions during housekeeping"),
        }

        self.admission.log_status();

        let report = self.status_report(balance_a, balance_b);
        self.notify(&report).await;
    }

    fn status_report(&mut self, balance_a: Option<Decimal>, balance_b: Option<Decimal>) -> String {
        let spread = self.analyzer.status();
        let positions = self.positions.snapshot();
        let admission = self.admission.info();
        format!(
            "📊 Status\nRuntime: {:.2}h | Trades: {}\nBalances: A={} B={}\nPositions: A={} B={} Net={}\nSpreads: long={} (mean {}) short={} (mean {})\nOrders 1h: A={}/{} B={}/{}",
            self.started_at.elapsed().as_secs_f64() / 3600.0,
            self.trade_count(),
            show_balance(balance_a),
            show_balance(balance_b),
            positions.venue_a,
            positions.venue_b,
            positions.net,
            spread.long_spread,
            spread.long_mean.round_dp(4),
            spread.short_spread,
            spread.short_mean.round_dp(4),
            admission.venue_a.count_1h,
            admission.venue_a.caps.per_hour,
            admission.venue_b.count_1h,
            admission.venue_b.caps.per_hour,
        )
    }

    /// Cancel orders, flatten both venues and disconnect.
    ///
    /// Runs once; later or concurrent calls return `None`. Every step is
    /// attempted even when an earlier one fails.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Option<RunSummary> {
        if self
            .shutdown_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already in progress");
            return None;
        }
        self.cancel.cancel();

        info!("[SHUTDOWN] Cancelling open orders");
        let (cancel_a, cancel_b) = tokio::join!(
            self.venue_a.cancel_all_orders(self.market_a()),
            self.venue_b.cancel_all_orders(self.market_b()),
        );
        for (name, result) in [(self.venue_a.name(), cancel_a), (self.venue_b.name(), cancel_b)] {
            match result {
                Ok(count) => info!(venue = %name, cancelled = count, "[SHUTDOWN] Orders cancelled"),
                Err(e) => warn!(venue = %name, error = %e, "[SHUTDOWN] Cancel-all failed"),
            }
        }

        info!("[SHUTDOWN] Closing positions");
        let (close_a, close_b) = tokio::join!(
            self.venue_a.close_position(self.market_a()),
            self.venue_b.close_position(self.market_b()),
        );
        log_close(self.venue_a.name(), close_a);
        log_close(self.venue_b.name(), close_b);

        let (final_a, final_b) = self.verify_flat().await;

        let summary = self.current_summary(final_a, final_b);
        info!(
            hours = %format!("{:.2}", summary.hours()),
            trades = summary.trade_count,
            compensations = summary.compensation_count,
            final_a = ?summary.final_a,
            final_b = ?summary.final_b,
            "[SHUTDOWN] Run summary"
        );
        self.notify(&format!("🛑 Stopped\n{}", summary)).await;

        let (disconnect_a, disconnect_b) =
            tokio::join!(self.venue_a.disconnect(), self.venue_b.disconnect());
        for (name, result) in [(self.venue_a.name(), disconnect_a), (self.venue_b.name(), disconnect_b)] {
            if let Err(e) = result {
                warn!(venue = %name, error = %e, "[SHUTDOWN] Disconnect failed");
            }
        }

        if let Some(journal) = &self.journal {
            journal.flush();
        }

        info!("[SHUTDOWN] Complete");
        Some(summary)
    }

    /// Poll both positions, re-closing whichever side is still open.
    async fn verify_flat(&self) -> (Option<Decimal>, Option<Decimal>) {
        let retries = self.config.execution.shutdown_verify_retries;
        let interval = self.config.execution.shutdown_verify_interval();
        let mut last = (None, None);

        for attempt in 1..=retries {
            let (pos_a, pos_b) = tokio::join!(
                self.venue_a.get_position_size(self.market_a()),
                self.venue_b.get_position_size(self.market_b()),
            );
            let pos_a = pos_a.ok();
            let pos_b = pos_b.ok();
            info!(
                attempt,
                retries,
                venue_a = ?pos_a,
                venue_b = ?pos_b,
                "[SHUTDOWN] Verifying positions"
            );
            last = (pos_a, pos_b);

            let a_open = pos_a.is_some_and(|p| p != Decimal::ZERO);
            let b_open = pos_b.is_some_and(|p| p != Decimal::ZERO);
            if pos_a.is_some() && pos_b.is_some() && !a_open && !b_open {
                info!("[SHUTDOWN] Both venues flat");
                return last;
            }

            if a_open {
                log_close(self.venue_a.name(), self.venue_a.close_position(self.market_a()).await);
            }
            if b_open {
                log_close(self.venue_b.name(), self.venue_b.close_position(self.market_b()).await);
            }

            if attempt < retries {
                tokio::time::sleep(interval).await;
            }
        }

        error!(
            venue_a = ?last.0,
            venue_b = ?last.1,
            "[SHUTDOWN] Positions not confirmed flat - CHECK MANUALLY"
        );
        last
    }

    fn current_summary(&self, final_a: Option<Decimal>, final_b: Option<Decimal>) -> RunSummary {
        RunSummary {
            elapsed: self.started_at.elapsed(),
            trade_count: self.trade_count.load(Ordering::SeqCst),
            compensation_count: self.compensation_count.load(Ordering::SeqCst),
            final_a,
            final_b,
        }
    }

    fn journal_bbo(&self, quote_a: &Quote, quote_b: &Quote) {
        let Some(journal) = &self.journal else {
            return;
        };
        let (long_spread, short_spread) = self.analyzer.current_spreads();
        journal.log_bbo(&BboSample {
            timestamp: Utc::now(),
            a_bid: quote_a.bid,
            a_ask: quote_a.ask,
            b_bid: quote_b.bid,
            b_ask: quote_b.ask,
            long_spread,
            short_spread,
        });
    }

    fn journal_trade(&self, signal: &Signal, attempt: &ExecutionAttempt) {
        let Some(journal) = &self.journal else {
            return;
        };
        journal.log_trade(&TradeRecord {
            timestamp: Utc::now(),
            direction: attempt.direction.to_string(),
            size: attempt.size,
            spread: signal.spread,
            entry_price: attempt.entry_price,
            outcome: attempt.reconciliation.to_string(),
            order_a: attempt
                .leg_a
                .as_ref()
                .and_then(|l| l.order_id())
                .map(str::to_string),
            order_b: attempt
                .leg_b
                .as_ref()
                .and_then(|l| l.order_id())
                .map(str::to_string),
        });
    }
}

/// Treat query failures and empty books alike as "no data this cycle".
fn usable_quote(venue: &str, result: VenueResult<Option<Quote>>) -> Option<Quote> {
    match result {
        Ok(Some(quote)) if quote.bid > Decimal::ZERO && quote.ask > quote.bid => Some(quote),
        Ok(Some(quote)) => {
            debug!(%venue, bid = %quote.bid, ask = %quote.ask, "Ignoring crossed or empty quote");
            None
        }
        Ok(None) => {
            debug!(%venue, "No quote");
            None
        }
        Err(e) => {
            warn!(%venue, error = %e, "Quote fetch failed");
            None
        }
    }
}

fn log_balance(venue: &str, result: VenueResult<Option<Decimal>>) -> Option<Decimal> {
    match result {
        Ok(Some(balance)) => {
            info!(%venue, %balance, "Balance");
            Some(balance)
        }
        Ok(None) => {
            debug!(%venue, "Balance not reported");
            None
        }
        Err(e) => {
            warn!(%venue, error = %e, "Balance query failed");
            None
        }
    }
}

fn log_close(venue: &str, result: VenueResult<bool>) {
    match result {
        Ok(true) => info!(%venue, "[SHUTDOWN] Position closed"),
        Ok(false) => warn!(%venue, "[SHUTDOWN] Close not accepted"),
        Err(e) => error!(%venue, error = %e, "[SHUTDOWN] Close failed"),
    }
}

fn show_balance(balance: Option<Decimal>) -> String {
    balance.map_or_else(|| "n/a".to_string(), |b| b.round_dp(2).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{PaperFillMode, PaperOp, PaperVenue, VenueError};
    use crate::persistence::SqliteJournal;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    const MARKET_A: &str = "BTC-USD-PERP";
    const MARKET_B: &str = "BTC";

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, message: &str) -> bool {
            self.messages.lock().unwrap().push(message.to_string());
            true
        }
    }

    struct Harness {
        a: Arc<PaperVenue>,
        b: Arc<PaperVenue>,
        engine: Engine,
    }

    fn test_config(mode: ExecutionMode) -> Config {
        let mut config = Config::default();
        config.trading.warmup_samples = 1;
        config.trading.long_threshold = dec!(5);
        config.trading.short_threshold = dec!(5);
        config.trading.min_spread = dec!(1);
        config.execution.mode = mode;
        config.execution.fill_timeout_secs = 1;
        config
    }

    async fn harness(config: Config) -> Harness {
        let a = Arc::new(PaperVenue::new("venue-a", dec!(1000)));
        let b = Arc::new(PaperVenue::new("venue-b", dec!(1000)));
        a.set_quote(MARKET_A, dec!(100), dec!(101)).await;
        b.set_quote(MARKET_B, dec!(100), dec!(101)).await;
        let engine = Engine::new(config, a.clone(), b.clone(), CancellationToken::new());
        Harness { a, b, engine }
    }

    /// Warm up on a flat book, then widen venue B so LONG fires.
    async fn warm_then_widen(h: &mut Harness) {
        assert!(matches!(h.engine.run_cycle().await.unwrap(), CycleOutcome::Idle));
        h.b.set_quote(MARKET_B, dec!(120), dec!(121)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_quote_yields_no_quotes() {
        let mut h = harness(test_config(ExecutionMode::Taker)).await;
        h.b.clear_quote(MARKET_B).await;
        assert!(matches!(h.engine.run_cycle().await.unwrap(), CycleOutcome::NoQuotes));

        h.b.set_quote(MARKET_B, dec!(100), dec!(101)).await;
        h.a.inject_fault(PaperOp::Quote, VenueError::Network("timeout".into())).await;
        assert!(matches!(h.engine.run_cycle().await.unwrap(), CycleOutcome::NoQuotes));
        assert_eq!(h.engine.analyzer().sample_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_taker_signal_trades_and_hedges() {
        let mut h = harness(test_config(ExecutionMode::Taker)).await;
        warm_then_widen(&mut h).await;

        let outcome = h.engine.run_cycle().await.unwrap();
        let CycleOutcome::Dispatched(attempt) = outcome else {
            panic!("expected dispatch, got {:?}", outcome);
        };
        assert_eq!(attempt.direction, Direction::Long);
        assert_eq!(attempt.reconciliation, Reconciliation::BothFilled);
        assert_eq!(h.engine.trade_count(), 1);
        assert_eq!(h.engine.positions().venue_a(), dec!(0.001));
        assert_eq!(h.engine.positions().venue_b(), dec!(-0.001));
        assert!(h.engine.positions().is_balanced());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_then_position_cap() {
        let mut config = test_config(ExecutionMode::Taker);
        config.trading.max_position = dec!(0.001);
        let mut h = harness(config).await;
        warm_then_widen(&mut h).await;

        assert!(matches!(h.engine.run_cycle().await.unwrap(), CycleOutcome::Dispatched(_)));
        assert!(matches!(
            h.engine.run_cycle().await.unwrap(),
            CycleOutcome::Gated(GateRejection::Cooldown)
        ));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(matches!(
            h.engine.run_cycle().await.unwrap(),
            CycleOutcome::Gated(GateRejection::Position)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_budget_pauses_entries() {
        let mut config = test_config(ExecutionMode::Taker);
        config.admission.venue_b_per_hour = 1;
        let mut h = harness(config).await;
        warm_then_widen(&mut h).await;

        assert!(matches!(h.engine.run_cycle().await.unwrap(), CycleOutcome::Dispatched(_)));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(matches!(
            h.engine.run_cycle().await.unwrap(),
            CycleOutcome::Gated(GateRejection::Admission)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_backoff_suppresses_entries() {
        let mut h = harness(test_config(ExecutionMode::Maker)).await;
        h.a.set_fill_mode(PaperFillMode::Never).await;
        warm_then_widen(&mut h).await;

        // Keep widening so the spread stays above its rising mean
        let mut b_bid = dec!(120);
        for _ in 0..3 {
            let outcome = h.engine.run_cycle().await.unwrap();
            let CycleOutcome::Dispatched(attempt) = outcome else {
                panic!("expected dispatch, got {:?}", outcome);
            };
            assert_eq!(
                attempt.reconciliation,
                Reconciliation::EntryNotFilled(crate::strategy::FillStatus::Timeout)
            );
            tokio::time::advance(Duration::from_secs(3)).await;
            b_bid += dec!(20);
            h.b.set_quote(MARKET_B, b_bid, b_bid + dec!(1)).await;
        }

        // Backoff is min(3 * 5s, 30s) = 15s from the third reject
        assert!(matches!(
            h.engine.run_cycle().await.unwrap(),
            CycleOutcome::Gated(GateRejection::Cooldown)
        ));

        tokio::time::advance(Duration::from_secs(13)).await;
        b_bid += dec!(20);
        h.b.set_quote(MARKET_B, b_bid, b_bid + dec!(1)).await;
        assert!(matches!(h.engine.run_cycle().await.unwrap(), CycleOutcome::Dispatched(_)));
        assert_eq!(h.b.stats().await.market_orders, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maker_fill_hedges_on_b() {
        let mut h = harness(test_config(ExecutionMode::Maker)).await;
        h.a.set_fill_mode(PaperFillMode::Immediate).await;
        warm_then_widen(&mut h).await;

        let CycleOutcome::Dispatched(attempt) = h.engine.run_cycle().await.unwrap() else {
            panic!("expected dispatch");
        };
        assert_eq!(attempt.reconciliation, Reconciliation::BothFilled);
        assert_eq!(attempt.entry_price, Some(dec!(100.9)));
        assert_eq!(h.b.position(MARKET_B).await, dec!(-0.001));
    }

    #[tokio::test(start_paused = true)]
    async fn test_narrow_book_skips_maker_entry() {
        let mut h = harness(test_config(ExecutionMode::Maker)).await;
        h.a.set_quote(MARKET_A, dec!(100), dec!(100.1)).await;
        assert!(matches!(h.engine.run_cycle().await.unwrap(), CycleOutcome::Idle));
        h.b.set_quote(MARKET_B, dec!(120), dec!(121)).await;

        assert!(matches!(
            h.engine.run_cycle().await.unwrap(),
            CycleOutcome::Skipped(SkipReason::NarrowBook)
        ));
        assert_eq!(h.a.stats().await.limit_orders, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_query_failure_is_cycle_error() {
        let mut h = harness(test_config(ExecutionMode::Taker)).await;
        warm_then_widen(&mut h).await;
        h.a.inject_fault(PaperOp::Position, VenueError::Other("down".into())).await;

        assert!(h.engine.run_cycle().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trade_notified_and_journaled() {
        let notifier = Arc::new(RecordingNotifier::default());
        let journal = Arc::new(SqliteJournal::in_memory().unwrap());
        let mut h = harness(test_config(ExecutionMode::Taker)).await;
        h.engine = h
            .engine
            .with_notifier(notifier.clone())
            .with_journal(journal.clone());
        warm_then_widen(&mut h).await;

        assert!(matches!(h.engine.run_cycle().await.unwrap(), CycleOutcome::Dispatched(_)));

        let summary = journal.summary().unwrap();
        assert_eq!(summary.bbo_samples, 2);
        assert_eq!(summary.filled_trades, 1);
        let messages = notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("LONG"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_balance_stops_engine() {
        let mut h = harness(test_config(ExecutionMode::Taker)).await;
        h.b.set_balance(dec!(5)).await;

        h.engine.housekeeping().await;
        assert!(h.engine.cancel_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_housekeeping_keeps_running() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut h = harness(test_config(ExecutionMode::Taker)).await;
        h.engine = h.engine.with_notifier(notifier.clone());

        h.engine.housekeeping().await;
        assert!(!h.engine.cancel_token().is_cancelled());
        let messages = notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Status"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_housekeeping_alerts_on_imbalance() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut h = harness(test_config(ExecutionMode::Taker)).await;
        h.engine = h.engine.with_notifier(notifier.clone());
        h.a.set_position(MARKET_A, dec!(0.009)).await;

        h.engine.housekeeping().await;

        let messages = notifier.messages.lock().unwrap();
        let alert = messages
            .iter()
            .find(|m| m.contains("imbalance"))
            .expect("imbalance alert");
        assert!(alert.contains("A=0.009"));
        assert!(alert.contains("threshold 0.002"));
        assert!(!h.engine.cancel_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flattens_once_under_concurrency() {
        let h = harness(test_config(ExecutionMode::Taker)).await;
        h.a.set_position(MARKET_A, dec!(0.003)).await;
        h.b.set_position(MARKET_B, dec!(-0.003)).await;

        let (first, second) = tokio::join!(h.engine.shutdown(), h.engine.shutdown());
        assert!(first.is_some() ^ second.is_some());

        let summary = first.or(second).unwrap();
        assert!(summary.is_flat());
        assert_eq!(h.a.stats().await.cancel_all_calls, 1);
        assert_eq!(h.b.stats().await.cancel_all_calls, 1);
        assert_eq!(h.a.stats().await.close_calls, 1);
        assert_eq!(h.a.stats().await.disconnect_calls, 1);
        assert!(h.engine.shutdown().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_retries_failed_close() {
        let h = harness(test_config(ExecutionMode::Taker)).await;
        h.a.set_position(MARKET_A, dec!(0.002)).await;
        h.a.inject_fault(PaperOp::Close, VenueError::Other("busy".into())).await;
        h.b.inject_fault(PaperOp::CancelAll, VenueError::Other("busy".into())).await;

        let summary = h.engine.shutdown().await.unwrap();
        assert!(summary.is_flat());
        assert_eq!(h.a.stats().await.close_calls, 2);
        assert_eq!(h.a.position(MARKET_A).await, Decimal::ZERO);
        assert_eq!(h.b.stats().await.disconnect_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel_and_shuts_down() {
        let h = harness(test_config(ExecutionMode::Taker)).await;
        let mut engine = h.engine;
        let cancel = engine.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });

        let summary = engine.run().await.unwrap();
        assert_eq!(summary.trade_count, 0);
        assert!(summary.is_flat());
        assert_eq!(h.a.stats().await.connect_calls, 1);
        assert_eq!(h.b.stats().await.disconnect_calls, 1);
        assert!(engine.analyzer().sample_count() > 1);
    }

    #[tokio::test]
    async fn test_connection_failure_is_fatal() {
        let mut h = harness(test_config(ExecutionMode::Taker)).await;
        h.b.inject_fault(PaperOp::Connect, VenueError::Connection("bad key".into())).await;

        let err = h.engine.run().await.unwrap_err();
        assert!(err.to_string().contains("venue-b"));
        // Venue A did connect, so it is still flattened and released
        assert_eq!(h.a.stats().await.close_calls, 1);
        assert_eq!(h.a.stats().await.disconnect_calls, 1);
        assert!(h.engine.cancel_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_shutdown_when_neither_venue_connects() {
        let mut h = harness(test_config(ExecutionMode::Taker)).await;
        h.a.inject_fault(PaperOp::Connect, VenueError::Connection("bad key".into())).await;
        h.b.inject_fault(PaperOp::Connect, VenueError::Connection("bad key".into())).await;

        assert!(h.engine.run().await.is_err());
        assert_eq!(h.a.stats().await.close_calls, 0);
        assert_eq!(h.b.stats().await.disconnect_calls, 0);
        assert!(h.engine.cancel_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_startup_flattens_seeded_position() {
        let mut h = harness(test_config(ExecutionMode::Taker)).await;
        h.a.set_position(MARKET_A, dec!(0.005)).await;
        h.b.inject_fault(PaperOp::Position, VenueError::Network("down".into())).await;

        let err = h.engine.run().await.unwrap_err();
        assert!(format!("{:#}", err).contains("seed positions"));
        assert_eq!(h.a.position(MARKET_A).await, Decimal::ZERO);
        assert_eq!(h.a.stats().await.close_calls, 1);
        assert_eq!(h.a.stats().await.disconnect_calls, 1);
        assert_eq!(h.b.stats().await.disconnect_calls, 1);
    }
}
