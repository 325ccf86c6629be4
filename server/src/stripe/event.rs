//! Webhook event decoding

use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

use super::client::BOOKING_ID_METADATA_KEY;
use crate::models::PaymentOutcome;

/// Raw webhook envelope
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// The checkout session object embedded in checkout events
#[derive(Debug, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub payment_status: Option<String>,
}

/// A webhook event reduced to what reconciliation cares about
#[derive(Debug)]
pub enum CheckoutEvent {
    /// The session settled with this outcome
    Settled {
        session_id: String,
        booking_id: Option<Uuid>,
        outcome: PaymentOutcome,
    },
    /// Completed, but funds arrive later through an async payment event
    AwaitingPayment { session_id: String },
    /// Not a type we handle
    Unhandled,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Classify the event. Fails only when a handled event type carries a
    /// session object we cannot read.
    pub fn checkout_event(&self) -> Result<CheckoutEvent, serde_json::Error> {
        let outcome = match self.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                PaymentOutcome::Completed
            }
            "checkout.session.expired" | "checkout.session.async_payment_failed" => {
                PaymentOutcome::Failed
            }
            _ => return Ok(CheckoutEvent::Unhandled),
        };

        let session: CheckoutSessionObject = serde_json::from_value(self.data.object.clone())?;

        if self.event_type == "checkout.session.completed"
            && !matches!(
                session.payment_status.as_deref(),
                None | Some("paid") | Some("no_payment_required")
            )
        {
            return Ok(CheckoutEvent::AwaitingPayment {
                session_id: session.id,
            });
        }

        let booking_id = session
            .metadata
            .get(BOOKING_ID_METADATA_KEY)
            .and_then(|id| Uuid::parse_str(id).ok());

        Ok(CheckoutEvent::Settled {
            session_id: session.id,
            booking_id,
            outcome,
        })
    }
}
