//! Application state shared across handlers

use std::sync::Arc;

use crate::booking::BookingService;
use crate::middleware::auth::AuthService;
use crate::payment::PaymentService;

use axum::extract::FromRef;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub booking_service: Arc<BookingService>,
    pub payment_service: Arc<PaymentService>,
    pub auth_service: Arc<AuthService>,
}

impl AppState {
    pub fn new(
        booking_service: Arc<BookingService>,
        payment_service: Arc<PaymentService>,
        auth_service: Arc<AuthService>,
    ) -> Self {
        Self {
            booking_service,
            payment_service,
            auth_service,
        }
    }
}

impl FromRef<AppState> for Arc<BookingService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.booking_service.clone()
    }
}

impl FromRef<AppState> for Arc<PaymentService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.payment_service.clone()
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_service.clone()
    }
}
