//! Exposure and order-budget controls.
//!
//! - Position tracking, the venue A cap and cross-venue imbalance
//! - Sliding-window order budgets per venue

mod admission;
mod position_tracker;

pub use admission::{AdmissionCaps, AdmissionGate, AdmissionInfo, VenueAdmission};
pub use position_tracker::{PositionSnapshot, PositionTracker};
