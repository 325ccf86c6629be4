//! Route definitions for StayFinder API

use axum::{
    routing::{get, patch, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::*;
use crate::state::AppState;

// Booking routes
pub fn booking_routes() -> Router<AppState> {
    Router::new()
        .route("/api/bookings", post(create_booking))
        .route("/api/bookings/me", get(list_my_bookings))
        .route("/api/bookings/host", get(list_host_bookings))
        .route("/api/bookings/:id/cancel", put(cancel_booking))
        .route("/api/bookings/:id/status", patch(update_booking_status))
}

// Listing routes
pub fn listing_routes() -> Router<AppState> {
    Router::new().route("/api/listings/:id/bookings", get(get_listing_bookings))
}

// Payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/payments/create-checkout-session",
            post(create_checkout_session),
        )
        .route("/api/webhook", post(payment_webhook))
}

/// Full application router
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .merge(booking_routes())
        .merge(listing_routes())
        .merge(payment_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn root() -> &'static str {
    "StayFinder API Server"
}

async fn health_check() -> &'static str {
    "OK"
}
