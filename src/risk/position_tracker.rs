//! Cross-venue exposure tracking.
//!
//! Holds the last queried signed exposure on each venue and answers:
//! - Whether a new entry would breach the venue A position cap
//! - Whether the two legs have drifted apart (imbalance)
//!
//! Exposures are always overwritten from venue queries, never accumulated
//! from order results.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Net exposure below this is treated as flat.
const BALANCE_EPSILON: Decimal = dec!(0.00001);

/// Snapshot of both legs' exposure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionSnapshot {
    pub venue_a: Decimal,
    pub venue_b: Decimal,
    pub net: Decimal,
    pub max_position: Decimal,
}

/// Tracks signed exposure on venue A and venue B.
#[derive(Debug)]
pub struct PositionTracker {
    venue_a: Decimal,
    venue_b: Decimal,
    max_position: Decimal,
}

impl PositionTracker {
    pub fn new(max_position: Decimal) -> Self {
        Self {
            venue_a: Decimal::ZERO,
            venue_b: Decimal::ZERO,
            max_position,
        }
    }

    /// Overwrite venue A exposure.
    pub fn update_a(&mut self, size: Decimal) {
        if size != self.venue_a {
            debug!(old = %self.venue_a, new = %size, "Venue A exposure updated");
        }
        self.venue_a = size;
    }

    /// Overwrite venue B exposure.
    pub fn update_b(&mut self, size: Decimal) {
        if size != self.venue_b {
            debug!(old = %self.venue_b, new = %size, "Venue B exposure updated");
        }
        self.venue_b = size;
    }

    pub fn venue_a(&self) -> Decimal {
        self.venue_a
    }

    pub fn venue_b(&self) -> Decimal {
        self.venue_b
    }

    pub fn max_position(&self) -> Decimal {
        self.max_position
    }

    /// Sum of both legs; zero when fully hedged.
    pub fn net(&self) -> Decimal {
        self.venue_a + self.venue_b
    }

    pub fn is_balanced(&self) -> bool {
        self.net().abs() < BALANCE_EPSILON
    }

    /// Whether buying `size` more on venue A stays within the cap.
    pub fn can_open_long(&self, size: Decimal) -> bool {
        self.max_position > Decimal::ZERO && self.venue_a + size <= self.max_position
    }

    /// Whether selling `size` more on venue A stays within the cap.
    pub fn can_open_short(&self, size: Decimal) -> bool {
        self.max_position > Decimal::ZERO && self.venue_a - size >= -self.max_position
    }

    /// Returns true (and warns) when |net| exceeds `threshold`.
    pub fn check_imbalance(&self, threshold: Decimal) -> bool {
        let net = self.net();
        if net.abs() > threshold {
            warn!(
                venue_a = %self.venue_a,
                venue_b = %self.venue_b,
                net = %net,
                threshold = %threshold,
                "⚠️ Position imbalance detected"
            );
            return true;
        }
        false
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            venue_a: self.venue_a,
            venue_b: self.venue_b,
            net: self.net(),
            max_position: self.max_position,
        }
    }

    pub fn log_positions(&self) {
        info!(
            venue_a = %self.venue_a,
            venue_b = %self.venue_b,
            net = %self.net(),
            max_position = %self.max_position,
            balanced = self.is_balanced(),
            "Positions"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updates_overwrite() {
        let mut tracker = PositionTracker::new(dec!(0.01));
        tracker.update_a(dec!(0.003));
        tracker.update_a(dec!(0.002));
        tracker.update_b(dec!(-0.002));

        assert_eq!(tracker.venue_a(), dec!(0.002));
        assert_eq!(tracker.net(), Decimal::ZERO);
        assert!(tracker.is_balanced());
    }

    #[test]
    fn test_long_cap_is_inclusive() {
        let mut tracker = PositionTracker::new(dec!(0.01));
        tracker.update_a(dec!(0.009));

        assert!(tracker.can_open_long(dec!(0.001)));
        assert!(!tracker.can_open_long(dec!(0.0010001)));
        assert!(!tracker.can_open_long(dec!(0.002)));
    }

    #[test]
    fn test_short_cap_is_inclusive() {
        let mut tracker = PositionTracker::new(dec!(0.01));
        tracker.update_a(dec!(-0.009));

        assert!(tracker.can_open_short(dec!(0.001)));
        assert!(!tracker.can_open_short(dec!(0.002)));
        // Long side still has room
        assert!(tracker.can_open_long(dec!(0.019)));
    }

    #[test]
    fn test_zero_cap_blocks_everything() {
        let tracker = PositionTracker::new(Decimal::ZERO);
        assert!(!tracker.can_open_long(dec!(0.001)));
        assert!(!tracker.can_open_short(dec!(0.001)));
    }

    #[test]
    fn test_imbalance_threshold_is_strict() {
        let mut tracker = PositionTracker::new(dec!(0.01));
        tracker.update_a(dec!(0.004));
        tracker.update_b(dec!(-0.002));

        assert!(!tracker.check_imbalance(dec!(0.002)));
        assert!(tracker.check_imbalance(dec!(0.0019)));
        assert!(!tracker.is_balanced());
    }

    #[test]
    fn test_snapshot() {
        let mut tracker = PositionTracker::new(dec!(0.01));
        tracker.update_a(dec!(0.001));
        tracker.update_b(dec!(-0.001));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.venue_a, dec!(0.001));
        assert_eq!(snapshot.net, Decimal::ZERO);
        assert_eq!(snapshot.max_position, dec!(0.01));
    }
}
