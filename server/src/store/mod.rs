//! Storage ports for listings, bookings and payment state
//!
//! Every cross-request invariant lives behind these traits: the overlap
//! check and the booking insert are one operation, state changes are
//! compare-and-set, and a webhook event is recorded in the same write that
//! applies it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Booking, BookingChange, BookingState, Listing, PaymentSession, ProcessedEvent, SessionStatus,
};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PgStore;

/// Storage error
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Overlapping booking exists for this listing")]
    Overlap,
}

/// Result of writing a webhook event together with its booking change
#[derive(Debug)]
pub enum EventWrite {
    Applied(Booking),
    /// The event id was already recorded; nothing was written
    Duplicate,
    /// The booking left the expected state; nothing was written
    Stale,
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, StoreError>;
    async fn insert_listing(&self, listing: Listing) -> Result<Listing, StoreError>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Insert a booking unless an active booking on the same listing
    /// overlaps it, in which case `StoreError::Overlap` is returned.
    async fn insert_booking(&self, booking: Booking) -> Result<Booking, StoreError>;

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;

    async fn list_user_bookings(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError>;

    /// Bookings on every listing owned by `host_id`
    async fn list_host_bookings(&self, host_id: Uuid) -> Result<Vec<Booking>, StoreError>;

    async fn list_active_listing_bookings(
        &self,
        listing_id: Uuid,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Apply `change` only if the booking is still in `expected`.
    /// Returns `None` when the booking moved on (or is gone).
    async fn update_booking_state(
        &self,
        id: Uuid,
        expected: BookingState,
        change: &BookingChange,
    ) -> Result<Option<Booking>, StoreError>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn find_open_session(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<PaymentSession>, StoreError>;

    /// Most recently created session for the booking, in any status
    async fn latest_session(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<PaymentSession>, StoreError>;

    /// Insert `session` unless the booking already has an open one.
    /// Returns whichever session ends up stored as open.
    async fn insert_session(&self, session: PaymentSession) -> Result<PaymentSession, StoreError>;

    /// Move an open session to a closed status. Returns false if no open
    /// session had that provider id.
    async fn close_session(
        &self,
        provider_session_id: &str,
        status: SessionStatus,
    ) -> Result<bool, StoreError>;

    /// Mark open sessions past their expiry as expired
    async fn expire_stale_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn is_event_processed(&self, event_id: &str) -> Result<bool, StoreError>;

    /// Record an event with no booking change. Returns false on a duplicate.
    async fn record_event(&self, event: ProcessedEvent) -> Result<bool, StoreError>;

    /// Record `event` and apply `change` to the booking atomically
    async fn apply_event(
        &self,
        event: ProcessedEvent,
        booking_id: Uuid,
        expected: BookingState,
        change: &BookingChange,
    ) -> Result<EventWrite, StoreError>;
}

/// Everything the services need from storage
pub trait Store: ListingStore + BookingStore + PaymentStore {}

impl<T: ListingStore + BookingStore + PaymentStore> Store for T {}
