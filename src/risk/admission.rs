//! Venue rate-budget tracking.
//!
//! Venues cap how many orders an account may submit per hour and per day.
//! The gate keeps a sliding log of submission instants per venue and vetoes
//! new entries while any window is at its cap. Hedge and compensation
//! orders are still recorded but never vetoed.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::exchange::Leg;

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(24 * 3600);

/// Order caps for one venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionCaps {
    pub per_hour: usize,
    pub per_day: usize,
}

impl Default for AdmissionCaps {
    fn default() -> Self {
        Self {
            per_hour: 200,
            per_day: 1000,
        }
    }
}

/// Counter state for one venue.
#[derive(Debug, Clone, Serialize)]
pub struct VenueAdmission {
    pub count_1h: usize,
    pub count_24h: usize,
    pub caps: AdmissionCaps,
    pub paused: bool,
}

/// Counter state for both venues.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionInfo {
    pub venue_a: VenueAdmission,
    pub venue_b: VenueAdmission,
    pub paused: bool,
}

#[derive(Debug)]
struct OrderLog {
    caps: AdmissionCaps,
    submitted: VecDeque<Instant>,
}

impl OrderLog {
    fn new(caps: AdmissionCaps) -> Self {
        Self {
            caps,
            submitted: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.submitted.front() {
            if now.saturating_duration_since(*front) >= DAY {
                self.submitted.pop_front();
            } else {
                break;
            }
        }
    }

    fn count_within(&self, now: Instant, window: Duration) -> usize {
        // Newest entries are at the back
        self.submitted
            .iter()
            .rev()
            .take_while(|t| now.saturating_duration_since(**t) < window)
            .count()
    }

    fn state(&mut self, now: Instant) -> VenueAdmission {
        self.prune(now);
        let count_1h = self.count_within(now, HOUR);
        let count_24h = self.submitted.len();
        VenueAdmission {
            count_1h,
            count_24h,
            caps: self.caps,
            paused: count_1h >= self.caps.per_hour || count_24h >= self.caps.per_day,
        }
    }
}

/// Sliding-window order budget for both venues.
#[derive(Debug)]
pub struct AdmissionGate {
    venue_a: OrderLog,
    venue_b: OrderLog,
    paused: bool,
}

impl AdmissionGate {
    pub fn new(caps_a: AdmissionCaps, caps_b: AdmissionCaps) -> Self {
        Self {
            venue_a: OrderLog::new(caps_a),
            venue_b: OrderLog::new(caps_b),
            paused: false,
        }
    }

    fn log_mut(&mut self, leg: Leg) -> &mut OrderLog {
        match leg {
            Leg::A => &mut self.venue_a,
            Leg::B => &mut self.venue_b,
        }
    }

    /// Record one order submitted on `leg`.
    pub fn record(&mut self, leg: Leg) {
        self.record_at(leg, Instant::now());
    }

    pub fn record_at(&mut self, leg: Leg, now: Instant) {
        let log = self.log_mut(leg);
        log.prune(now);
        log.submitted.push_back(now);
        debug!(venue = %leg, count_24h = log.submitted.len(), "Order recorded");
    }

    /// Whether new entries should be held back.
    pub fn should_pause(&mut self) -> bool {
        self.should_pause_at(Instant::now())
    }

    pub fn should_pause_at(&mut self, now: Instant) -> bool {
        let info = self.info_at(now);
        if info.paused != self.paused {
            if info.paused {
                warn!(
                    a_1h = info.venue_a.count_1h,
                    a_24h = info.venue_a.count_24h,
                    b_1h = info.venue_b.count_1h,
                    b_24h = info.venue_b.count_24h,
                    "⏸️ Order budget exhausted, pausing entries"
                );
            } else {
                info!("▶️ Order budget available again, resuming entries");
            }
            self.paused = info.paused;
        }
        info.paused
    }

    pub fn info(&mut self) -> AdmissionInfo {
        self.info_at(Instant::now())
    }

    pub fn info_at(&mut self, now: Instant) -> AdmissionInfo {
        let venue_a = self.venue_a.state(now);
        let venue_b = self.venue_b.state(now);
        let paused = venue_a.paused || venue_b.paused;
        AdmissionInfo {
            venue_a,
            venue_b,
            paused,
        }
    }

    /// Emit the current counters.
    pub fn log_status(&mut self) {
        let info = self.info();
        info!(
            a_1h = info.venue_a.count_1h,
            a_24h = info.venue_a.count_24h,
            a_caps = ?(info.venue_a.caps.per_hour, info.venue_a.caps.per_day),
            b_1h = info.venue_b.count_1h,
            b_24h = info.venue_b.count_24h,
            b_caps = ?(info.venue_b.caps.per_hour, info.venue_b.caps.per_day),
            paused = info.paused,
            "Admission status"
        );
    }
}
