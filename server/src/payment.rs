//! Payment reconciliation service for StayFinder backend
//!
//! Opens hosted checkout sessions for confirmed bookings and applies the
//! provider's asynchronous outcomes to booking state. Each provider event is
//! applied at most once: the event id is recorded in the same store write
//! that changes the booking.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{
    AuthenticatedUser, Booking, BookingStatus, PaymentOutcome, PaymentSession, PaymentStatus,
    PaymentTransition, ProcessedEvent, SessionStatus, TransitionError,
};
use crate::store::{EventWrite, Store, StoreError};
use crate::stripe::{
    verify_signature, CheckoutEvent, CheckoutProvider, CheckoutRequest, ProviderError,
    SignatureError, WebhookEvent,
};

const MAX_APPLY_ATTEMPTS: usize = 3;

/// Payment service error
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Booking not found")]
    BookingNotFound,
    #[error("Not authorized to pay for this booking")]
    Forbidden,
    #[error("Booking already paid")]
    AlreadyPaid,
    #[error("Booking not confirmed")]
    NotConfirmed,
    #[error("Booking total cannot be charged")]
    InvalidAmount,
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("Webhook endpoint is not configured")]
    WebhookNotConfigured,
    #[error("Booking was modified concurrently, please retry")]
    Contended,
    #[error("Payment provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Create checkout session request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    pub booking_id: Uuid,
}

/// What happened to a verified webhook delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The booking changed
    Applied,
    /// The event id was seen before, or the booking already reflects it
    Duplicate,
    /// Acknowledged without changing anything
    Ignored(&'static str),
}

/// Payment settings
#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub client_url: String,
    pub currency: String,
    pub webhook_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
}

/// Payment service
pub struct PaymentService {
    store: Arc<dyn Store>,
    provider: Arc<dyn CheckoutProvider>,
    settings: PaymentSettings,
}

/// Booking total in minor currency units
pub fn amount_in_minor_units(total: Decimal) -> Option<i64> {
    (total * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn CheckoutProvider>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    /// Return a checkout URL for the requester's confirmed, unpaid booking.
    ///
    /// A still-open session is reused, so retries never open a second one.
    pub async fn create_checkout_session(
        &self,
        requester: &AuthenticatedUser,
        booking_id: Uuid,
    ) -> Result<String, PaymentError> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or(PaymentError::BookingNotFound)?;

        if booking.user_id != requester.id {
            return Err(PaymentError::Forbidden);
        }

        if booking.payment_status == PaymentStatus::Paid {
            info!(booking_id = %booking.id, "checkout refused: already paid");
            return Err(PaymentError::AlreadyPaid);
        }

        if booking.status != BookingStatus::Confirmed {
            info!(booking_id = %booking.id, status = ?booking.status, "checkout refused: not confirmed");
            return Err(PaymentError::NotConfirmed);
        }

        let now = Utc::now();
        if let Some(session) = self.store.find_open_session(booking.id).await? {
            if session.is_live(now) {
                debug!(booking_id = %booking.id, session_id = %session.provider_session_id, "reusing open checkout session");
                return Ok(session.url);
            }
            self.store
                .close_session(&session.provider_session_id, SessionStatus::Expired)
                .await?;
        }

        // Concurrent creates for the same booking and generation share an
        // idempotency key, so the provider hands them one session. The
        // generation is the session being replaced, whoever closed it.
        let generation = self
            .store
            .latest_session(booking.id)
            .await?
            .map(|session| session.provider_session_id)
            .unwrap_or_else(|| "first".to_string());

        let request = self.checkout_request(&booking, &generation).await?;
        let amount = request.amount;
        let currency = request.currency.clone();

        let checkout = match self.provider.create_checkout_session(request).await {
            Ok(checkout) => checkout,
            Err(e) => {
                error!(booking_id = %booking.id, error = %e, "failed to create checkout session");
                return Err(e.into());
            }
        };

        let stored = self
            .store
            .insert_session(PaymentSession {
                id: Uuid::new_v4(),
                booking_id: booking.id,
                provider_session_id: checkout.id,
                url: checkout.url,
                amount,
                currency,
                status: SessionStatus::Open,
                expires_at: checkout.expires_at,
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!(
            booking_id = %booking.id,
            session_id = %stored.provider_session_id,
            amount = stored.amount,
            "checkout session created"
        );

        Ok(stored.url)
    }

    async fn checkout_request(
        &self,
        booking: &Booking,
        generation: &str,
    ) -> Result<CheckoutRequest, PaymentError> {
        let title = self
            .store
            .get_listing(booking.listing_id)
            .await?
            .map(|listing| listing.title)
            .unwrap_or_else(|| "StayFinder".to_string());

        let amount = amount_in_minor_units(booking.total_price)
            .filter(|amount| *amount > 0)
            .ok_or(PaymentError::InvalidAmount)?;

        let client_url = self.settings.client_url.trim_end_matches('/');

        Ok(CheckoutRequest {
            booking_id: booking.id,
            product_name: format!("Stay at {title}"),
            description: format!("{} nights · {} guests", booking.nights, booking.guests),
            amount,
            currency: self.settings.currency.clone(),
            success_url: format!("{client_url}/bookings?success=true&bookingId={}", booking.id),
            cancel_url: format!("{client_url}/bookings?canceled=true&bookingId={}", booking.id),
            idempotency_key: format!("checkout-{}-{generation}", booking.id),
        })
    }

    /// Verify and apply one webhook delivery.
    ///
    /// # Errors
    /// `InvalidSignature` and `WebhookNotConfigured` reject the delivery
    /// without touching state. Storage errors are returned so the provider
    /// redelivers. Unusable but authentic payloads are acknowledged as
    /// `WebhookOutcome::Ignored`.
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, PaymentError> {
        let Some(secret) = self.settings.webhook_secret.as_deref().filter(|s| !s.is_empty())
        else {
            error!("Webhook secret not configured - rejecting request");
            return Err(PaymentError::WebhookNotConfigured);
        };

        if let Err(e) = verify_signature(
            payload,
            signature,
            secret,
            Utc::now().timestamp(),
            self.settings.webhook_tolerance_secs,
        ) {
            warn!(error = %e, "webhook signature verification failed");
            return Err(e.into());
        }

        let event = match WebhookEvent::parse(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "verified webhook payload is not an event");
                return Ok(WebhookOutcome::Ignored("malformed event"));
            }
        };

        debug!(event_id = %event.id, event_type = %event.event_type, "processing webhook event");

        if self.store.is_event_processed(&event.id).await? {
            info!(event_id = %event.id, "duplicate webhook event ignored");
            return Ok(WebhookOutcome::Duplicate);
        }

        let checkout = match event.checkout_event() {
            Ok(checkout) => checkout,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "unreadable checkout session in event");
                return self.acknowledge(&event, None, "malformed session").await;
            }
        };

        match checkout {
            CheckoutEvent::Unhandled => Ok(WebhookOutcome::Ignored("unhandled event type")),
            CheckoutEvent::AwaitingPayment { session_id } => {
                info!(event_id = %event.id, session_id = %session_id, "checkout completed, awaiting async payment");
                self.acknowledge(&event, None, "awaiting payment").await
            }
            CheckoutEvent::Settled {
                session_id,
                booking_id,
                outcome,
            } => {
                let session_status = match (outcome, event.event_type.as_str()) {
                    (PaymentOutcome::Completed, _) => SessionStatus::Completed,
                    (PaymentOutcome::Failed, "checkout.session.expired") => SessionStatus::Expired,
                    (PaymentOutcome::Failed, _) => SessionStatus::Failed,
                };
                self.store.close_session(&session_id, session_status).await?;

                let Some(booking_id) = booking_id else {
                    error!(event_id = %event.id, session_id = %session_id, "No bookingId found in session metadata");
                    return self.acknowledge(&event, None, "missing booking id").await;
                };

                // The guest already holds a newer session, so a failure of
                // this one says nothing about the booking.
                if outcome == PaymentOutcome::Failed {
                    if let Some(current) = self.store.find_open_session(booking_id).await? {
                        if current.provider_session_id != session_id {
                            info!(
                                event_id = %event.id,
                                session_id = %session_id,
                                current_session_id = %current.provider_session_id,
                                "failure for a replaced checkout session ignored"
                            );
                            return self
                                .acknowledge(&event, Some(booking_id), "superseded session")
                                .await;
                        }
                    }
                }

                self.apply_outcome(&event, booking_id, outcome).await
            }
        }
    }

    async fn apply_outcome(
        &self,
        event: &WebhookEvent,
        booking_id: Uuid,
        outcome: PaymentOutcome,
    ) -> Result<WebhookOutcome, PaymentError> {
        for _ in 0..MAX_APPLY_ATTEMPTS {
            let Some(booking) = self.store.get_booking(booking_id).await? else {
                warn!(event_id = %event.id, booking_id = %booking_id, "webhook references unknown booking");
                return self
                    .acknowledge(event, Some(booking_id), "booking not found")
                    .await;
            };

            let change = match booking.apply_payment(outcome, Utc::now()) {
                PaymentTransition::Apply(change) => change,
                PaymentTransition::AlreadyApplied => {
                    self.acknowledge(event, Some(booking_id), "already applied").await?;
                    return Ok(WebhookOutcome::Duplicate);
                }
                PaymentTransition::Rejected(reason) => {
                    if reason == TransitionError::Cancelled {
                        error!(
                            event_id = %event.id,
                            booking_id = %booking_id,
                            "payment completed for a cancelled booking, refund required"
                        );
                    } else {
                        warn!(event_id = %event.id, booking_id = %booking_id, reason = %reason, "payment outcome not applied");
                    }
                    return self
                        .acknowledge(event, Some(booking_id), "terminal booking")
                        .await;
                }
            };

            let record = ProcessedEvent {
                event_id: event.id.clone(),
                event_type: event.event_type.clone(),
                booking_id: Some(booking_id),
                processed_at: Utc::now(),
            };

            match self
                .store
                .apply_event(record, booking_id, booking.state(), &change)
                .await?
            {
                EventWrite::Applied(updated) => {
                    info!(
                        event_id = %event.id,
                        booking_id = %booking_id,
                        status = ?updated.status,
                        payment_status = ?updated.payment_status,
                        "booking reconciled"
                    );
                    return Ok(WebhookOutcome::Applied);
                }
                EventWrite::Duplicate => return Ok(WebhookOutcome::Duplicate),
                EventWrite::Stale => {
                    debug!(booking_id = %booking_id, "booking changed while reconciling, retrying");
                }
            }
        }

        warn!(event_id = %event.id, booking_id = %booking_id, "giving up on contended reconciliation");
        Err(PaymentError::Contended)
    }

    /// Record the event as handled without changing any booking
    async fn acknowledge(
        &self,
        event: &WebhookEvent,
        booking_id: Option<Uuid>,
        reason: &'static str,
    ) -> Result<WebhookOutcome, PaymentError> {
        let recorded = self
            .store
            .record_event(ProcessedEvent {
                event_id: event.id.clone(),
                event_type: event.event_type.clone(),
                booking_id,
                processed_at: Utc::now(),
            })
            .await?;

        if recorded {
            Ok(WebhookOutcome::Ignored(reason))
        } else {
            Ok(WebhookOutcome::Duplicate)
        }
    }

    /// Close open sessions whose provider expiry has passed
    pub async fn expire_stale_sessions(&self) -> Result<u64, PaymentError> {
        Ok(self.store.expire_stale_sessions(Utc::now()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units_round_half_cent() {
        assert_eq!(amount_in_minor_units(dec!(300)), Some(30_000));
        assert_eq!(amount_in_minor_units(dec!(99.995)), Some(10_000));
        assert_eq!(amount_in_minor_units(dec!(0.01)), Some(1));
        assert_eq!(amount_in_minor_units(dec!(0.005)), Some(1));
    }
}
