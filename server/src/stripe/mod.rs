//! Hosted checkout provider integration
//!
//! We talk to Stripe's REST API with reqwest instead of pulling in an SDK.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod client;
pub mod event;
pub mod signature;

pub use client::StripeClient;
pub use event::{CheckoutEvent, WebhookEvent};
pub use signature::{verify_signature, SignatureError};

/// Checkout provider error
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Provider response had no checkout URL")]
    MissingUrl,
}

/// What we ask the provider to charge for
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub booking_id: Uuid,
    pub product_name: String,
    pub description: String,
    pub amount: i64, // minor currency units
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Requests sharing a key get the same provider session back
    pub idempotency_key: String,
}

/// Session handed back by the provider
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError>;
}
