//! API handlers for StayFinder backend

mod booking;
mod payment;
mod webhook;

pub use booking::*;
pub use payment::*;
pub use webhook::*;

// Re-export the identity extractor for handler use
pub use crate::models::AuthenticatedUser;
