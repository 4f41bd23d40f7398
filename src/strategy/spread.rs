//! Directional spread sampling and rolling-mean signal detection.
//!
//! Two spreads are tracked per quote pair:
//! - long  = B.bid - A.ask (buy on A, sell on B)
//! - short = A.bid - B.ask (sell on A, buy on B)
//!
//! A signal fires when the instantaneous spread exceeds
//! `max(rolling_mean + threshold, min_spread)` after warmup.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Minimum wall-clock spacing between window insertions.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(900);

/// Fixed-capacity ring buffer with an exact mean over its contents.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    buf: Vec<Decimal>,
    capacity: usize,
    head: usize,
    len: usize,
    sum: Decimal,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: vec![Decimal::ZERO; capacity],
            capacity,
            head: 0,
            len: 0,
            sum: Decimal::ZERO,
        }
    }

    /// Append a value, evicting the oldest one when full.
    pub fn push(&mut self, value: Decimal) {
        self.buf[self.head] = value;
        self.head = (self.head + 1) % self.capacity;
        if self.len < self.capacity {
            self.len += 1;
        }
        // Recomputed rather than adjusted so rounding never accumulates.
        self.sum = self.iter().sum();
    }

    /// Arithmetic mean of the current contents (zero when empty).
    pub fn mean(&self) -> Decimal {
        if self.len == 0 {
            return Decimal::ZERO;
        }
        self.sum / Decimal::from(self.len as u64)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Values from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = Decimal> + '_ {
        let start = (self.head + self.capacity - self.len) % self.capacity;
        (0..self.len).map(move |i| self.buf[(start + i) % self.capacity])
    }
}

/// Trade direction relative to venue A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Buy on A, sell on B.
    Long,
    /// Sell on A, buy on B.
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// A spread that exceeded its trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub direction: Direction,
    pub spread: Decimal,
    pub mean: Decimal,
    pub threshold: Decimal,
}

impl Signal {
    /// Trigger level that was crossed.
    pub fn trigger(&self, min_spread: Decimal) -> Decimal {
        (self.mean + self.threshold).max(min_spread)
    }
}

/// Analyzer parameters.
#[derive(Debug, Clone)]
pub struct SpreadConfig {
    pub long_threshold: Decimal,
    pub short_threshold: Decimal,
    /// Absolute floor for the trigger, guards against a negative mean
    pub min_spread: Decimal,
    pub warmup_samples: u64,
    pub window_size: usize,
}

impl Default for SpreadConfig {
    fn default() -> Self {
        Self {
            long_threshold: dec!(10),
            short_threshold: dec!(10),
            min_spread: dec!(5),
            warmup_samples: 100,
            window_size: 500,
        }
    }
}

/// Point-in-time analyzer state for reports.
#[derive(Debug, Clone, Serialize)]
pub struct SpreadStatus {
    pub sample_count: u64,
    pub warmed_up: bool,
    pub long_spread: Decimal,
    pub short_spread: Decimal,
    pub long_mean: Decimal,
    pub short_mean: Decimal,
    pub long_threshold: Decimal,
    pub short_threshold: Decimal,
}

/// Rolling-mean spread analyzer.
#[derive(Debug)]
pub struct SpreadAnalyzer {
    config: SpreadConfig,
    long_window: RollingWindow,
    short_window: RollingWindow,
    sample_count: u64,
    last_sample_at: Option<Instant>,
    current_long: Decimal,
    current_short: Decimal,
}

impl SpreadAnalyzer {
    pub fn new(config: SpreadConfig) -> Self {
        Self {
            long_window: RollingWindow::new(config.window_size),
            short_window: RollingWindow::new(config.window_size),
            config,
            sample_count: 0,
            last_sample_at: None,
            current_long: Decimal::ZERO,
            current_short: Decimal::ZERO,
        }
    }

    pub fn is_warmed_up(&self) -> bool {
        self.sample_count >= self.config.warmup_samples
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn current_spreads(&self) -> (Decimal, Decimal) {
        (self.current_long, self.current_short)
    }

    pub fn means(&self) -> (Decimal, Decimal) {
        (self.long_window.mean(), self.short_window.mean())
    }

    pub fn config(&self) -> &SpreadConfig {
        &self.config
    }

    /// Feed one quote pair using the current instant.
    pub fn add_sample(&mut self, a_bid: Decimal, a_ask: Decimal, b_bid: Decimal, b_ask: Decimal) {
        self.add_sample_at(Instant::now(), a_bid, a_ask, b_bid, b_ask);
    }

    /// Feed one quote pair observed at `now`.
    ///
    /// Current spreads always update; the windows and sample counter advance
    /// at most once per [`SAMPLE_INTERVAL`]. Returns whether the sample was
    /// admitted to the windows.
    pub fn add_sample_at(
        &mut self,
        now: Instant,
        a_bid: Decimal,
        a_ask: Decimal,
        b_bid: Decimal,
        b_ask: Decimal,
    ) -> bool {
        self.current_long = b_bid - a_ask;
        self.current_short = a_bid - b_ask;

        if let Some(last) = self.last_sample_at {
            if now.saturating_duration_since(last) < SAMPLE_INTERVAL {
                return false;
            }
        }

        self.long_window.push(self.current_long);
        self.short_window.push(self.current_short);
        self.sample_count += 1;
        self.last_sample_at = Some(now);

        let warmup = self.config.warmup_samples;
        if self.sample_count < warmup && self.sample_count % 20 == 0 {
            info!(
                samples = self.sample_count,
                warmup,
                long_mean = %self.long_window.mean().round_dp(4),
                short_mean = %self.short_window.mean().round_dp(4),
                "Warming up spread baseline"
            );
        } else if self.sample_count == warmup {
            info!(
                samples = self.sample_count,
                long_mean = %self.long_window.mean().round_dp(4),
                short_mean = %self.short_window.mean().round_dp(4),
                "✅ Spread baseline warmed up"
            );
        }

        true
    }

    /// Check the latest spreads against their triggers. LONG wins ties.
    pub fn check_signal(&self) -> Option<Signal> {
        if !self.is_warmed_up() {
            return None;
        }

        let long_mean = self.long_window.mean();
        let long_trigger = (long_mean + self.config.long_threshold).max(self.config.min_spread);
        if self.current_long > long_trigger {
            return Some(Signal {
                direction: Direction::Long,
                spread: self.current_long,
                mean: long_mean,
                threshold: self.config.long_threshold,
            });
        }

        let short_mean = self.short_window.mean();
        let short_trigger = (short_mean + self.config.short_threshold).max(self.config.min_spread);
        if self.current_short > short_trigger {
            return Some(Signal {
                direction: Direction::Short,
                spread: self.current_short,
                mean: short_mean,
                threshold: self.config.short_threshold,
            });
        }

        None
    }

    pub fn status(&self) -> SpreadStatus {
        SpreadStatus {
            sample_count: self.sample_count,
            warmed_up: self.is_warmed_up(),
            long_spread: self.current_long,
            short_spread: self.current_short,
            long_mean: self.long_window.mean(),
            short_mean: self.short_window.mean(),
            long_threshold: self.config.long_threshold,
            short_threshold: self.config.short_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer(warmup: u64) -> SpreadAnalyzer {
        SpreadAnalyzer::new(SpreadConfig {
            long_threshold: dec!(10),
            short_threshold: dec!(10),
            min_spread: dec!(5),
            warmup_samples: warmup,
            window_size: 500,
        })
    }

    /// Feed a long spread value (A ask fixed at 100) one second apart.
    fn feed_long(analyzer: &mut SpreadAnalyzer, at: &mut Instant, long_spread: Decimal) -> bool {
        *at += Duration::from_secs(1);
        analyzer.add_sample_at(*at, dec!(99), dec!(100), dec!(100) + long_spread, dec!(200))
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = RollingWindow::new(3);
        for v in 1..=10 {
            window.push(Decimal::from(v));
            assert!(window.len() <= 3);
        }
        assert_eq!(window.iter().collect::<Vec<_>>(), vec![dec!(8), dec!(9), dec!(10)]);
        assert_eq!(window.mean(), dec!(9));
    }

    #[test]
    fn test_empty_window_mean_is_zero() {
        let window = RollingWindow::new(5);
        assert!(window.is_empty());
        assert_eq!(window.mean(), Decimal::ZERO);
    }

    #[test]
    fn test_mean_tracks_contents_after_wrap() {
        let mut window = RollingWindow::new(4);
        let values = [dec!(1.5), dec!(-2), dec!(7), dec!(3.25), dec!(0), dec!(11)];
        for v in values {
            window.push(v);
            let contents: Vec<Decimal> = window.iter().collect();
            let expected = contents.iter().sum::<Decimal>() / Decimal::from(contents.len() as u64);
            assert_eq!(window.mean(), expected);
        }
        assert_eq!(window.capacity(), 4);
    }

    #[test]
    fn test_spread_directions() {
        let mut analyzer = analyzer(1);
        analyzer.add_sample_at(Instant::now(), dec!(100), dec!(101), dec!(104), dec!(105));

        // long = B.bid - A.ask, short = A.bid - B.ask
        assert_eq!(analyzer.current_spreads(), (dec!(3), dec!(-5)));
    }

    #[test]
    fn test_rate_limited_insertion_still_updates_current() {
        let mut analyzer = analyzer(10);
        let start = Instant::now();

        assert!(analyzer.add_sample_at(start, dec!(99), dec!(100), dec!(101), dec!(200)));
        assert!(!analyzer.add_sample_at(
            start + Duration::from_millis(500),
            dec!(99),
            dec!(100),
            dec!(107),
            dec!(200)
        ));

        assert_eq!(analyzer.sample_count(), 1);
        assert_eq!(analyzer.current_spreads().0, dec!(7));
        assert_eq!(analyzer.means().0, dec!(1));

        assert!(analyzer.add_sample_at(
            start + Duration::from_millis(900),
            dec!(99),
            dec!(100),
            dec!(103),
            dec!(200)
        ));
        assert_eq!(analyzer.sample_count(), 2);
    }

    #[test]
    fn test_no_signal_before_warmup_boundary() {
        let mut analyzer = analyzer(3);
        let mut at = Instant::now();

        feed_long(&mut analyzer, &mut at, dec!(100));
        feed_long(&mut analyzer, &mut at, dec!(100));
        assert!(analyzer.check_signal().is_none());

        // Third sample reaches warmup; a huge instantaneous spread fires at once
        feed_long(&mut analyzer, &mut at, dec!(100));
        assert!(analyzer.is_warmed_up());
        analyzer.add_sample_at(at, dec!(99), dec!(100), dec!(300), dec!(200));
        assert_eq!(analyzer.check_signal().map(|s| s.direction), Some(Direction::Long));
    }

    #[test]
    fn test_min_spread_floors_negative_mean() {
        let mut analyzer = analyzer(1);
        let mut at = Instant::now();
        feed_long(&mut analyzer, &mut at, dec!(-12));
        assert_eq!(analyzer.means().0, dec!(-12));

        // mean + threshold = -2, floored to 5
        analyzer.add_sample_at(at, dec!(99), dec!(100), dec!(104), dec!(200));
        assert!(analyzer.check_signal().is_none());

        analyzer.add_sample_at(at, dec!(99), dec!(100), dec!(105.5), dec!(200));
        let signal = analyzer.check_signal().unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.trigger(dec!(5)), dec!(5));
    }

    #[test]
    fn test_warmup_mean_scenario() {
        let mut analyzer = analyzer(3);
        let mut at = Instant::now();
        for v in [dec!(4), dec!(6), dec!(5)] {
            feed_long(&mut analyzer, &mut at, v);
        }
        assert_eq!(analyzer.means().0, dec!(5));

        // Trigger = max(5 + 10, 5) = 15
        analyzer.add_sample_at(at, dec!(99), dec!(100), dec!(114), dec!(200));
        assert!(analyzer.check_signal().is_none());

        analyzer.add_sample_at(at, dec!(99), dec!(100), dec!(120), dec!(200));
        let signal = analyzer.check_signal().unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.spread, dec!(20));
        assert_eq!(signal.mean, dec!(5));
    }

    #[test]
    fn test_short_signal() {
        let mut analyzer = analyzer(1);
        let start = Instant::now();
        analyzer.add_sample_at(start, dec!(100), dec!(101), dec!(99), dec!(100));
        assert_eq!(analyzer.means().1, dec!(0));

        // short = A.bid - B.ask = 120 - 100 = 20 > max(0 + 10, 5)
        analyzer.add_sample_at(start, dec!(120), dec!(121), dec!(99), dec!(100));
        let signal = analyzer.check_signal().unwrap();
        assert_eq!(signal.direction, Direction::Short);
        assert_eq!(signal.spread, dec!(20));
    }

    #[test]
    fn test_status_snapshot() {
        let mut analyzer = analyzer(2);
        analyzer.add_sample_at(Instant::now(), dec!(100), dec!(101), dec!(104), dec!(105));
        let status = analyzer.status();
        assert_eq!(status.sample_count, 1);
        assert!(!status.warmed_up);
        assert_eq!(status.long_spread, dec!(3));
    }
}
