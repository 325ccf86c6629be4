//! Data models for StayFinder backend

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod auth;
pub use auth::*;

/// Seconds in one booked night
pub const SECONDS_PER_NIGHT: i64 = 86_400;

/// Property types a listing can be
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "property_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    House,
    Apartment,
    Villa,
    Condo,
    Studio,
}

/// Listing model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub location: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal, // per night
    pub images: Vec<String>,
    pub amenities: Vec<String>,
    pub guests: i32,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub property_type: PropertyType,
    #[serde(rename = "host")]
    pub host_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Booking status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "booking_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

/// Payment status of a booking
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

/// Booking model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    #[serde(rename = "listing")]
    pub listing_id: Uuid,
    #[serde(rename = "user")]
    pub user_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>, // exclusive
    pub nights: i32,
    pub guests: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_price: Decimal,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The part of a booking that state transitions compare and swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingState {
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
}

/// New state written by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingChange {
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
}

/// Outcome reported by the checkout provider for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Completed,
    Failed,
}

/// Why a transition was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Booking is already cancelled")]
    AlreadyCancelled,
    #[error("Cannot update status of a cancelled booking")]
    Cancelled,
    #[error("Booking already paid")]
    AlreadyPaid,
}

/// Result of applying a provider outcome to a booking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentTransition {
    Apply(BookingChange),
    AlreadyApplied,
    Rejected(TransitionError),
}

impl Booking {
    /// Number of nights in `[start, end)`, rounded up to whole nights
    pub fn nights_between(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        let secs = (end - start).num_seconds();
        (secs + SECONDS_PER_NIGHT - 1).div_euclid(SECONDS_PER_NIGHT)
    }

    /// Half-open overlap test against another date range
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_date < end && self.end_date > start
    }

    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }

    pub fn state(&self) -> BookingState {
        BookingState {
            status: self.status,
            payment_status: self.payment_status,
        }
    }

    /// Cancel on behalf of `actor`
    pub fn cancel(&self, actor: Uuid, now: DateTime<Utc>) -> Result<BookingChange, TransitionError> {
        if self.status == BookingStatus::Cancelled {
            return Err(TransitionError::AlreadyCancelled);
        }

        Ok(BookingChange {
            status: BookingStatus::Cancelled,
            payment_status: self.payment_status,
            cancelled_at: Some(now),
            cancelled_by: Some(actor),
        })
    }

    /// Host or admin driven status change
    pub fn set_status(
        &self,
        status: BookingStatus,
        actor: Uuid,
        now: DateTime<Utc>,
    ) -> Result<BookingChange, TransitionError> {
        if self.status == BookingStatus::Cancelled {
            return Err(TransitionError::Cancelled);
        }
        // a paid booking stays confirmed unless it is cancelled
        if self.payment_status == PaymentStatus::Paid && status == BookingStatus::Pending {
            return Err(TransitionError::AlreadyPaid);
        }

        let (cancelled_at, cancelled_by) = if status == BookingStatus::Cancelled {
            (Some(now), Some(actor))
        } else {
            (None, None)
        };

        Ok(BookingChange {
            status,
            payment_status: self.payment_status,
            cancelled_at,
            cancelled_by,
        })
    }

    /// Payment sub-state machine. `paid` and `cancelled` are both terminal.
    pub fn apply_payment(&self, outcome: PaymentOutcome, now: DateTime<Utc>) -> PaymentTransition {
        match outcome {
            PaymentOutcome::Completed => {
                if self.payment_status == PaymentStatus::Paid {
                    return PaymentTransition::AlreadyApplied;
                }
                if self.status == BookingStatus::Cancelled {
                    return PaymentTransition::Rejected(TransitionError::Cancelled);
                }
                PaymentTransition::Apply(BookingChange {
                    status: BookingStatus::Confirmed,
                    payment_status: PaymentStatus::Paid,
                    cancelled_at: None,
                    cancelled_by: None,
                })
            }
            PaymentOutcome::Failed => {
                if self.payment_status == PaymentStatus::Paid {
                    return PaymentTransition::Rejected(TransitionError::AlreadyPaid);
                }
                if self.status == BookingStatus::Cancelled {
                    return PaymentTransition::AlreadyApplied;
                }
                PaymentTransition::Apply(BookingChange {
                    status: BookingStatus::Cancelled,
                    payment_status: PaymentStatus::Unpaid,
                    cancelled_at: Some(now),
                    cancelled_by: None,
                })
            }
        }
    }

    /// Copy of this booking with `change` applied
    pub fn with_change(&self, change: &BookingChange, now: DateTime<Utc>) -> Booking {
        Booking {
            status: change.status,
            payment_status: change.payment_status,
            cancelled_at: change.cancelled_at.or(self.cancelled_at),
            cancelled_by: change.cancelled_by.or(self.cancelled_by),
            updated_at: now,
            ..self.clone()
        }
    }
}

/// Booked date range exposed publicly for availability calendars
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BookedRange {
    pub id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl From<&Booking> for BookedRange {
    fn from(booking: &Booking) -> Self {
        Self {
            id: booking.id,
            start_date: booking.start_date,
            end_date: booking.end_date,
        }
    }
}

/// Checkout session status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "session_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Completed,
    Expired,
    Failed,
}

/// Hosted checkout session opened for a booking
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct PaymentSession {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub provider_session_id: String, // provider checkout session ID
    pub url: String,
    pub amount: i64, // minor currency units
    pub currency: String,
    pub status: SessionStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentSession {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Open && self.expires_at.map_or(true, |at| at > now)
    }
}

/// Provider webhook event that has been handled
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub event_type: String,
    pub booking_id: Option<Uuid>,
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn booking(status: BookingStatus, payment_status: PaymentStatus) -> Booking {
        Booking {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            start_date: at(2024, 6, 1),
            end_date: at(2024, 6, 4),
            nights: 3,
            guests: 2,
            total_price: dec!(300),
            status,
            payment_status,
            cancelled_at: None,
            cancelled_by: None,
            created_at: at(2024, 5, 1),
            updated_at: at(2024, 5, 1),
        }
    }

    #[test]
    fn nights_round_up_partial_days() {
        assert_eq!(Booking::nights_between(at(2024, 6, 1), at(2024, 6, 4)), 3);
        let late = Utc.with_ymd_and_hms(2024, 6, 4, 10, 0, 0).unwrap();
        assert_eq!(Booking::nights_between(at(2024, 6, 1), late), 4);
    }

    #[test]
    fn overlap_is_half_open() {
        let b = booking(BookingStatus::Pending, PaymentStatus::Unpaid);
        assert!(b.overlaps(at(2024, 6, 3), at(2024, 6, 5)));
        assert!(!b.overlaps(at(2024, 6, 4), at(2024, 6, 6)));
        assert!(!b.overlaps(at(2024, 5, 28), at(2024, 6, 1)));
    }

    #[test]
    fn cancel_is_terminal() {
        let actor = Uuid::new_v4();
        let b = booking(BookingStatus::Confirmed, PaymentStatus::Unpaid);
        let change = b.cancel(actor, at(2024, 5, 2)).unwrap();
        assert_eq!(change.status, BookingStatus::Cancelled);
        assert_eq!(change.cancelled_by, Some(actor));

        let cancelled = b.with_change(&change, at(2024, 5, 2));
        assert_eq!(cancelled.cancel(actor, at(2024, 5, 3)), Err(TransitionError::AlreadyCancelled));
        assert_eq!(
            cancelled.set_status(BookingStatus::Pending, actor, at(2024, 5, 3)),
            Err(TransitionError::Cancelled)
        );
    }

    #[test]
    fn paid_booking_cannot_return_to_pending() {
        let actor = Uuid::new_v4();
        let b = booking(BookingStatus::Confirmed, PaymentStatus::Paid);
        assert_eq!(
            b.set_status(BookingStatus::Pending, actor, at(2024, 5, 2)),
            Err(TransitionError::AlreadyPaid)
        );
        assert!(b.set_status(BookingStatus::Confirmed, actor, at(2024, 5, 2)).is_ok());
        let cancel = b.set_status(BookingStatus::Cancelled, actor, at(2024, 5, 2)).unwrap();
        assert_eq!(cancel.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn set_status_stamps_only_cancellation() {
        let actor = Uuid::new_v4();
        let b = booking(BookingStatus::Pending, PaymentStatus::Unpaid);
        let confirm = b.set_status(BookingStatus::Confirmed, actor, at(2024, 5, 2)).unwrap();
        assert_eq!(confirm.cancelled_at, None);
        let cancel = b.set_status(BookingStatus::Cancelled, actor, at(2024, 5, 2)).unwrap();
        assert_eq!(cancel.cancelled_by, Some(actor));
    }

    #[test]
    fn payment_completion_confirms_and_is_idempotent() {
        let now = at(2024, 5, 2);
        let b = booking(BookingStatus::Confirmed, PaymentStatus::Unpaid);
        let PaymentTransition::Apply(change) = b.apply_payment(PaymentOutcome::Completed, now) else {
            panic!("expected a transition");
        };
        assert_eq!(change.status, BookingStatus::Confirmed);
        assert_eq!(change.payment_status, PaymentStatus::Paid);

        let paid = b.with_change(&change, now);
        assert_eq!(
            paid.apply_payment(PaymentOutcome::Completed, now),
            PaymentTransition::AlreadyApplied
        );
        assert_eq!(
            paid.apply_payment(PaymentOutcome::Failed, now),
            PaymentTransition::Rejected(TransitionError::AlreadyPaid)
        );
    }

    #[test]
    fn payment_failure_cancels_unpaid_booking() {
        let now = at(2024, 5, 2);
        let b = booking(BookingStatus::Pending, PaymentStatus::Unpaid);
        let PaymentTransition::Apply(change) = b.apply_payment(PaymentOutcome::Failed, now) else {
            panic!("expected a transition");
        };
        assert_eq!(change.status, BookingStatus::Cancelled);
        assert_eq!(change.payment_status, PaymentStatus::Unpaid);
        assert_eq!(change.cancelled_at, Some(now));
        assert_eq!(change.cancelled_by, None);

        let cancelled = b.with_change(&change, now);
        assert_eq!(
            cancelled.apply_payment(PaymentOutcome::Completed, now),
            PaymentTransition::Rejected(TransitionError::Cancelled)
        );
    }
}
