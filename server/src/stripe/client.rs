//! Stripe Checkout API client

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;

use super::{CheckoutProvider, CheckoutRequest, CheckoutSession, ProviderError};

/// Metadata key that carries our booking id through the provider
pub const BOOKING_ID_METADATA_KEY: &str = "bookingId";

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Stripe Checkout client
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(secret_key: String, api_base: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    fn session_form(request: &CheckoutRequest) -> Vec<(&'static str, String)> {
        vec![
            ("mode", "payment".to_string()),
            ("payment_method_types[0]", "card".to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", request.currency.clone()),
            ("line_items[0][price_data][unit_amount]", request.amount.to_string()),
            (
                "line_items[0][price_data][product_data][name]",
                request.product_name.clone(),
            ),
            (
                "line_items[0][price_data][product_data][description]",
                request.description.clone(),
            ),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("client_reference_id", request.booking_id.to_string()),
            ("metadata[bookingId]", request.booking_id.to_string()),
        ]
    }
}

#[async_trait]
impl CheckoutProvider for StripeClient {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let url = format!("{}/v1/checkout/sessions", self.api_base);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&Self::session_form(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let session: SessionResponse = response.json().await?;
        let url = session.url.ok_or(ProviderError::MissingUrl)?;

        Ok(CheckoutSession {
            id: session.id,
            url,
            expires_at: session
                .expires_at
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_session_form_carries_booking_metadata() {
        let booking_id = Uuid::new_v4();
        let request = CheckoutRequest {
            booking_id,
            product_name: "Stay at Cabin".to_string(),
            description: "3 nights · 2 guests".to_string(),
            amount: 30_000,
            currency: "usd".to_string(),
            success_url: "http://localhost/ok".to_string(),
            cancel_url: "http://localhost/no".to_string(),
            idempotency_key: format!("checkout-{booking_id}-first"),
        };

        let form = StripeClient::session_form(&request);
        let get = |key: &str| form.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str());

        assert_eq!(get("metadata[bookingId]"), Some(booking_id.to_string().as_str()));
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("30000"));
        assert_eq!(get("mode"), Some("payment"));
    }
}
