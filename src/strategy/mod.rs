//! Trading strategy implementation.
//!
//! Contains the core logic for:
//! - Spread sampling and signal detection
//! - Two-leg order dispatch, fill-wait and compensation
//! - The control loop, entry gates, housekeeping and shutdown

mod engine;
mod executor;
mod spread;

pub use engine::{CycleOutcome, Engine, GateRejection, RunSummary, SkipReason};
pub use executor::{
    ExecutionAttempt, FillStatus, LegOutcome, OrderExecutor, PricingInfo, Reconciliation,
};
pub use spread::{
    Direction, RollingWindow, Signal, SpreadAnalyzer, SpreadConfig, SpreadStatus, SAMPLE_INTERVAL,
};
