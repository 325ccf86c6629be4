//! In-memory store
//!
//! Mirrors the Postgres store's atomicity with a single lock, for tests and
//! local runs without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BookingStore, EventWrite, ListingStore, PaymentStore, StoreError};
use crate::models::{
    Booking, BookingChange, BookingState, Listing, PaymentSession, ProcessedEvent, SessionStatus,
};

#[derive(Default)]
struct Inner {
    listings: HashMap<Uuid, Listing>,
    bookings: HashMap<Uuid, Booking>,
    sessions: HashMap<Uuid, PaymentSession>,
    events: HashMap<String, ProcessedEvent>,
}

impl Inner {
    fn compare_and_set(
        &mut self,
        id: Uuid,
        expected: BookingState,
        change: &BookingChange,
    ) -> Option<Booking> {
        let booking = self.bookings.get_mut(&id)?;
        if booking.state() != expected {
            return None;
        }
        *booking = booking.with_change(change, Utc::now());
        Some(booking.clone())
    }

    fn open_session(&self, booking_id: Uuid) -> Option<&PaymentSession> {
        self.sessions
            .values()
            .find(|s| s.booking_id == booking_id && s.status == SessionStatus::Open)
    }
}

/// A thread-safe in-memory store.
///
/// One write lock covers every collection, so each trait operation is
/// atomic with respect to all others.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(mut bookings: Vec<Booking>) -> Vec<Booking> {
    bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    bookings
}

#[async_trait]
impl ListingStore for InMemoryStore {
    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.listings.get(&id).cloned())
    }

    async fn insert_listing(&self, listing: Listing) -> Result<Listing, StoreError> {
        let mut inner = self.inner.write().await;
        inner.listings.insert(listing.id, listing.clone());
        Ok(listing)
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn insert_booking(&self, booking: Booking) -> Result<Booking, StoreError> {
        let mut inner = self.inner.write().await;

        let conflict = booking.is_active()
            && inner.bookings.values().any(|b| {
                b.listing_id == booking.listing_id
                    && b.is_active()
                    && b.overlaps(booking.start_date, booking.end_date)
            });
        if conflict {
            return Err(StoreError::Overlap);
        }

        inner.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.bookings.get(&id).cloned())
    }

    async fn list_user_bookings(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let inner = self.inner.read().await;
        let bookings = inner
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(bookings))
    }

    async fn list_host_bookings(&self, host_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let inner = self.inner.read().await;
        let bookings = inner
            .bookings
            .values()
            .filter(|b| {
                inner
                    .listings
                    .get(&b.listing_id)
                    .is_some_and(|l| l.host_id == host_id)
            })
            .cloned()
            .collect();
        Ok(newest_first(bookings))
    }

    async fn list_active_listing_bookings(
        &self,
        listing_id: Uuid,
    ) -> Result<Vec<Booking>, StoreError> {
        let inner = self.inner.read().await;
        let mut bookings: Vec<Booking> = inner
            .bookings
            .values()
            .filter(|b| b.listing_id == listing_id && b.is_active())
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.start_date);
        Ok(bookings)
    }

    async fn update_booking_state(
        &self,
        id: Uuid,
        expected: BookingState,
        change: &BookingChange,
    ) -> Result<Option<Booking>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.compare_and_set(id, expected, change))
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn find_open_session(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<PaymentSession>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.open_session(booking_id).cloned())
    }

    async fn latest_session(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<PaymentSession>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.booking_id == booking_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn insert_session(&self, session: PaymentSession) -> Result<PaymentSession, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.open_session(session.booking_id) {
            return Ok(existing.clone());
        }
        inner.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn close_session(
        &self,
        provider_session_id: &str,
        status: SessionStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let open = inner.sessions.values_mut().find(|s| {
            s.provider_session_id == provider_session_id && s.status == SessionStatus::Open
        });
        match open {
            Some(session) => {
                session.status = status;
                session.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expire_stale_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let mut expired = 0;
        for session in inner.sessions.values_mut() {
            if session.status == SessionStatus::Open && !session.is_live(now) {
                session.status = SessionStatus::Expired;
                session.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn is_event_processed(&self, event_id: &str) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.events.contains_key(event_id))
    }

    async fn record_event(&self, event: ProcessedEvent) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.events.contains_key(&event.event_id) {
            return Ok(false);
        }
        inner.events.insert(event.event_id.clone(), event);
        Ok(true)
    }

    async fn apply_event(
        &self,
        event: ProcessedEvent,
        booking_id: Uuid,
        expected: BookingState,
        change: &BookingChange,
    ) -> Result<EventWrite, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.events.contains_key(&event.event_id) {
            return Ok(EventWrite::Duplicate);
        }

        match inner.compare_and_set(booking_id, expected, change) {
            Some(booking) => {
                inner.events.insert(event.event_id.clone(), event);
                Ok(EventWrite::Applied(booking))
            }
            None => Ok(EventWrite::Stale),
        }
    }
}
