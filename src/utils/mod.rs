//! Shared helpers.

pub mod decimal;

pub use decimal::{ceil_to_tick, floor_to_tick, round_down_to_lot};
