//! Venue integrations for cross-venue spread trading.
//!
//! ## Adapter surface
//! Every venue implements [`VenueAdapter`]:
//! - Market data (top of book, tick sizes)
//! - Order placement, cancellation and status
//! - Position, balance and forced close-out
//!
//! ## Paper venue
//! [`PaperVenue`] simulates a venue in memory for dry runs and tests.

mod error;
pub mod paper;
pub mod retry;
mod traits;
mod types;

pub use error::{VenueError, VenueResult};
pub use paper::{PaperFillMode, PaperOp, PaperVenue, QuoteWalk};
pub use retry::RetryPolicy;
pub use traits::{Leg, VenueAdapter};
pub use types::*;
