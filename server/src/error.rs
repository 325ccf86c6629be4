//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::booking::BookingError;
use crate::payment::PaymentError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("You are not logged in. Please log in to get access.")]
    Unauthenticated,

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Payment(#[from] PaymentError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Booking(e) => match e {
                BookingError::ListingNotFound | BookingError::BookingNotFound => {
                    StatusCode::NOT_FOUND
                }
                BookingError::InvalidGuestCount { .. }
                | BookingError::InvalidDateRange
                | BookingError::AlreadyCancelled
                | BookingError::InvalidTransition
                | BookingError::AlreadyPaid => StatusCode::BAD_REQUEST,
                BookingError::DateConflict | BookingError::Contended => StatusCode::CONFLICT,
                BookingError::Forbidden => StatusCode::FORBIDDEN,
                BookingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Payment(e) => match e {
                PaymentError::BookingNotFound => StatusCode::NOT_FOUND,
                PaymentError::Forbidden => StatusCode::FORBIDDEN,
                PaymentError::AlreadyPaid
                | PaymentError::NotConfirmed
                | PaymentError::InvalidAmount
                | PaymentError::InvalidSignature(_) => StatusCode::BAD_REQUEST,
                PaymentError::Contended => StatusCode::CONFLICT,
                PaymentError::WebhookNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
                PaymentError::Provider(_) => StatusCode::BAD_GATEWAY,
                PaymentError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Message safe to show the client
    fn public_message(&self) -> String {
        match self {
            ApiError::Booking(BookingError::Store(_)) | ApiError::Payment(PaymentError::Store(_)) => {
                "Internal server error".to_string()
            }
            ApiError::Payment(PaymentError::Provider(_)) => {
                "Failed to create checkout session".to_string()
            }
            ApiError::Payment(PaymentError::InvalidSignature(_)) => {
                "Webhook Error: invalid signature".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (status, Json(json!({ "message": self.public_message() }))).into_response()
    }
}
