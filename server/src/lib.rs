//! StayFinder Backend Library
//!
//! Booking admission and payment reconciliation for the StayFinder
//! vacation-rental marketplace.

pub mod booking;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod payment;
pub mod routes;
pub mod state;
pub mod store;
pub mod stripe;
pub mod sweeper;
