//! Booking admission service for StayFinder backend
//!
//! Admission validates a requested stay against the listing and existing
//! reservations, prices it, and stores it as `pending`. The overlap check
//! and the insert are a single store operation, so two concurrent requests
//! for the same dates can never both succeed.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    AuthenticatedUser, BookedRange, Booking, BookingChange, BookingStatus, PaymentStatus,
    TransitionError, UserRole,
};
use crate::store::{Store, StoreError};

/// How many times a state change is re-validated after losing a race
const MAX_TRANSITION_ATTEMPTS: usize = 3;

/// Booking service error
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Listing not found")]
    ListingNotFound,
    #[error("Booking not found")]
    BookingNotFound,
    #[error("Number of guests must be between 1 and {max}")]
    InvalidGuestCount { max: i32 },
    #[error("Invalid date range")]
    InvalidDateRange,
    #[error("This listing is already booked for selected dates")]
    DateConflict,
    #[error("Not authorized to modify this booking")]
    Forbidden,
    #[error("Booking is already cancelled")]
    AlreadyCancelled,
    #[error("Cannot update status of a cancelled booking")]
    InvalidTransition,
    #[error("A paid booking cannot return to pending")]
    AlreadyPaid,
    #[error("Booking was modified concurrently, please retry")]
    Contended,
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<TransitionError> for BookingError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::AlreadyCancelled => BookingError::AlreadyCancelled,
            TransitionError::Cancelled => BookingError::InvalidTransition,
            TransitionError::AlreadyPaid => BookingError::AlreadyPaid,
        }
    }
}

/// Create booking request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub listing: Uuid,
    #[serde(deserialize_with = "deserialize_date")]
    pub start_date: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_date")]
    pub end_date: DateTime<Utc>,
    pub guests: i32,
}

/// Status update request
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: BookingStatus,
}

/// Parse an RFC 3339 timestamp or a bare `YYYY-MM-DD` (midnight UTC)
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|at| Utc.from_utc_datetime(&at))
}

fn deserialize_date<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_date(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid date: {raw}")))
}

/// Booking service
pub struct BookingService {
    store: Arc<dyn Store>,
}

impl BookingService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Admit a new booking for `requester`
    ///
    /// # Errors
    /// `ListingNotFound`, `InvalidGuestCount`, `InvalidDateRange` and
    /// `DateConflict`, checked in that order.
    pub async fn create_booking(
        &self,
        requester: Uuid,
        req: CreateBookingRequest,
    ) -> Result<Booking, BookingError> {
        let listing = self
            .store
            .get_listing(req.listing)
            .await?
            .ok_or(BookingError::ListingNotFound)?;

        if req.guests < 1 || req.guests > listing.guests {
            return Err(BookingError::InvalidGuestCount {
                max: listing.guests,
            });
        }

        if req.start_date >= req.end_date {
            return Err(BookingError::InvalidDateRange);
        }

        let nights = Booking::nights_between(req.start_date, req.end_date);
        let nights = i32::try_from(nights).map_err(|_| BookingError::InvalidDateRange)?;
        let total_price = Decimal::from(nights) * listing.price;

        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            listing_id: listing.id,
            user_id: requester,
            start_date: req.start_date,
            end_date: req.end_date,
            nights,
            guests: req.guests,
            total_price,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            cancelled_at: None,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
        };

        let booking = match self.store.insert_booking(booking).await {
            Ok(booking) => booking,
            Err(StoreError::Overlap) => {
                info!(listing_id = %listing.id, "booking rejected: dates overlap");
                return Err(BookingError::DateConflict);
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            booking_id = %booking.id,
            listing_id = %booking.listing_id,
            nights = booking.nights,
            total_price = %booking.total_price,
            "booking created"
        );

        Ok(booking)
    }

    /// Cancel a booking as its guest or the listing's host
    pub async fn cancel_booking(
        &self,
        actor: &AuthenticatedUser,
        booking_id: Uuid,
    ) -> Result<Booking, BookingError> {
        let booking = self
            .transition(booking_id, |booking, host_id| {
                let is_guest = booking.user_id == actor.id;
                let is_host = host_id == Some(actor.id);
                if !is_guest && !is_host {
                    return Err(BookingError::Forbidden);
                }
                Ok(booking.cancel(actor.id, Utc::now())?)
            })
            .await?;

        info!(booking_id = %booking.id, cancelled_by = %actor.id, "booking cancelled");
        Ok(booking)
    }

    /// Set a booking's status as the listing's host or an admin
    pub async fn update_status(
        &self,
        actor: &AuthenticatedUser,
        booking_id: Uuid,
        status: BookingStatus,
    ) -> Result<Booking, BookingError> {
        let booking = self
            .transition(booking_id, |booking, host_id| {
                let is_host = host_id == Some(actor.id);
                if !is_host && actor.role != UserRole::Admin {
                    return Err(BookingError::Forbidden);
                }
                Ok(booking.set_status(status, actor.id, Utc::now())?)
            })
            .await?;

        info!(booking_id = %booking.id, status = ?booking.status, "booking status updated");
        Ok(booking)
    }

    /// Bookings made by `user_id`, newest first
    pub async fn list_user_bookings(&self, user_id: Uuid) -> Result<Vec<Booking>, BookingError> {
        Ok(self.store.list_user_bookings(user_id).await?)
    }

    /// Bookings on the actor's listings, newest first. Hosts and admins only.
    pub async fn list_host_bookings(
        &self,
        actor: &AuthenticatedUser,
    ) -> Result<Vec<Booking>, BookingError> {
        if !matches!(actor.role, UserRole::Host | UserRole::Admin) {
            return Err(BookingError::Forbidden);
        }
        Ok(self.store.list_host_bookings(actor.id).await?)
    }

    /// Date ranges currently held on a listing
    pub async fn listing_availability(
        &self,
        listing_id: Uuid,
    ) -> Result<Vec<BookedRange>, BookingError> {
        if self.store.get_listing(listing_id).await?.is_none() {
            return Err(BookingError::ListingNotFound);
        }

        let bookings = self.store.list_active_listing_bookings(listing_id).await?;
        Ok(bookings.iter().map(BookedRange::from).collect())
    }

    /// Validate and apply a state change with compare-and-set, re-validating
    /// against fresh state if another request got there first.
    async fn transition<F>(&self, booking_id: Uuid, decide: F) -> Result<Booking, BookingError>
    where
        F: Fn(&Booking, Option<Uuid>) -> Result<BookingChange, BookingError>,
    {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let booking = self
                .store
                .get_booking(booking_id)
                .await?
                .ok_or(BookingError::BookingNotFound)?;

            let host_id = self
                .store
                .get_listing(booking.listing_id)
                .await?
                .map(|listing| listing.host_id);

            let change = decide(&booking, host_id)?;

            if let Some(updated) = self
                .store
                .update_booking_state(booking_id, booking.state(), &change)
                .await?
            {
                return Ok(updated);
            }

            debug!(booking_id = %booking_id, "booking changed concurrently, retrying");
        }

        warn!(booking_id = %booking_id, "giving up on contended booking update");
        Err(BookingError::Contended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_dates_and_timestamps() {
        let plain = parse_date("2024-06-01").unwrap();
        assert_eq!(plain, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());

        let stamped = parse_date("2024-06-01T12:00:00+02:00").unwrap();
        assert_eq!(stamped, Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());

        assert!(parse_date("June 1st").is_none());
    }

    #[test]
    fn create_request_accepts_mixed_date_formats() {
        let listing = Uuid::new_v4();
        let body = serde_json::json!({
            "listing": listing,
            "startDate": "2024-07-10",
            "endDate": "2024-07-12T00:00:00Z",
            "guests": 2
        });
        let req: CreateBookingRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.listing, listing);
        assert_eq!(Booking::nights_between(req.start_date, req.end_date), 2);
    }
}
