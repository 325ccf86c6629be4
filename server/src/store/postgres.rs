//! PostgreSQL store
//!
//! Overlap protection is the `bookings_no_overlap` exclusion constraint and
//! the one-open-session rule is a partial unique index; see
//! `migrations/0001_init.sql`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{BookingStore, EventWrite, ListingStore, PaymentStore, StoreError};
use crate::models::{
    Booking, BookingChange, BookingState, Listing, PaymentSession, ProcessedEvent, SessionStatus,
};

const EXCLUSION_VIOLATION: &str = "23P01";

const UPDATE_BOOKING_STATE: &str = r#"
    UPDATE bookings
    SET status = $1,
        payment_status = $2,
        cancelled_at = COALESCE($3, cancelled_at),
        cancelled_by = COALESCE($4, cancelled_by),
        updated_at = NOW()
    WHERE id = $5 AND status = $6 AND payment_status = $7
    RETURNING *
"#;

const INSERT_EVENT: &str = r#"
    INSERT INTO processed_events (event_id, event_type, booking_id, processed_at)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (event_id) DO NOTHING
"#;

/// Store backed by a Postgres pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_exclusion_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(EXCLUSION_VIOLATION),
        _ => false,
    }
}

#[async_trait]
impl ListingStore for PgStore {
    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        let listing = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(listing)
    }

    async fn insert_listing(&self, listing: Listing) -> Result<Listing, StoreError> {
        let listing = sqlx::query_as::<_, Listing>(
            r#"
            INSERT INTO listings (
                id, title, description, location, price, images, amenities,
                guests, bedrooms, bathrooms, property_type, host_id,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(listing.id)
        .bind(&listing.title)
        .bind(&listing.description)
        .bind(&listing.location)
        .bind(listing.price)
        .bind(&listing.images)
        .bind(&listing.amenities)
        .bind(listing.guests)
        .bind(listing.bedrooms)
        .bind(listing.bathrooms)
        .bind(listing.property_type)
        .bind(listing.host_id)
        .bind(listing.created_at)
        .bind(listing.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(listing)
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn insert_booking(&self, booking: Booking) -> Result<Booking, StoreError> {
        let result = sqlx::query_as::<_, Booking>(
            r#"
            INSERT INTO bookings (
                id, listing_id, user_id, start_date, end_date, nights, guests,
                total_price, status, payment_status, cancelled_at, cancelled_by,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(booking.id)
        .bind(booking.listing_id)
        .bind(booking.user_id)
        .bind(booking.start_date)
        .bind(booking.end_date)
        .bind(booking.nights)
        .bind(booking.guests)
        .bind(booking.total_price)
        .bind(booking.status)
        .bind(booking.payment_status)
        .bind(booking.cancelled_at)
        .bind(booking.cancelled_by)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(booking) => Ok(booking),
            Err(e) if is_exclusion_violation(&e) => Err(StoreError::Overlap),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(booking)
    }

    async fn list_user_bookings(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let bookings = sqlx::query_as::<_, Booking>(
            "SELECT * FROM bookings WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(bookings)
    }

    async fn list_host_bookings(&self, host_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let bookings = sqlx::query_as::<_, Booking>(
            r#"
            SELECT b.* FROM bookings b
            JOIN listings l ON l.id = b.listing_id
            WHERE l.host_id = $1
            ORDER BY b.created_at DESC
            "#,
        )
        .bind(host_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(bookings)
    }

    async fn list_active_listing_bookings(
        &self,
        listing_id: Uuid,
    ) -> Result<Vec<Booking>, StoreError> {
        let bookings = sqlx::query_as::<_, Booking>(
            r#"
            SELECT * FROM bookings
            WHERE listing_id = $1 AND status <> 'cancelled'
            ORDER BY start_date
            "#,
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(bookings)
    }

    async fn update_booking_state(
        &self,
        id: Uuid,
        expected: BookingState,
        change: &BookingChange,
    ) -> Result<Option<Booking>, StoreError> {
        let booking = sqlx::query_as::<_, Booking>(UPDATE_BOOKING_STATE)
            .bind(change.status)
            .bind(change.payment_status)
            .bind(change.cancelled_at)
            .bind(change.cancelled_by)
            .bind(id)
            .bind(expected.status)
            .bind(expected.payment_status)
            .fetch_optional(&self.pool)
            .await?;

        Ok(booking)
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn find_open_session(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<PaymentSession>, StoreError> {
        let session = sqlx::query_as::<_, PaymentSession>(
            "SELECT * FROM payment_sessions WHERE booking_id = $1 AND status = 'open'",
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn latest_session(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<PaymentSession>, StoreError> {
        let session = sqlx::query_as::<_, PaymentSession>(
            r#"
            SELECT * FROM payment_sessions
            WHERE booking_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn insert_session(&self, session: PaymentSession) -> Result<PaymentSession, StoreError> {
        let inserted = sqlx::query_as::<_, PaymentSession>(
            r#"
            INSERT INTO payment_sessions (
                id, booking_id, provider_session_id, url, amount, currency,
                status, expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (booking_id) WHERE status = 'open' DO NOTHING
            RETURNING *
            "#,
        )
        .bind(session.id)
        .bind(session.booking_id)
        .bind(&session.provider_session_id)
        .bind(&session.url)
        .bind(session.amount)
        .bind(&session.currency)
        .bind(session.status)
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(session) = inserted {
            return Ok(session);
        }

        // Lost the race to a concurrent request; hand back the winner
        let existing = sqlx::query_as::<_, PaymentSession>(
            "SELECT * FROM payment_sessions WHERE booking_id = $1 AND status = 'open'",
        )
        .bind(session.booking_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(existing)
    }

    async fn close_session(
        &self,
        provider_session_id: &str,
        status: SessionStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_sessions
            SET status = $1, updated_at = NOW()
            WHERE provider_session_id = $2 AND status = 'open'
            "#,
        )
        .bind(status)
        .bind(provider_session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn expire_stale_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_sessions
            SET status = 'expired', updated_at = NOW()
            WHERE status = 'open' AND expires_at IS NOT NULL AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn is_event_processed(&self, event_id: &str) -> Result<bool, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM processed_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count > 0)
    }

    async fn record_event(&self, event: ProcessedEvent) -> Result<bool, StoreError> {
        let result = sqlx::query(INSERT_EVENT)
            .bind(&event.event_id)
            .bind(&event.event_type)
            .bind(event.booking_id)
            .bind(event.processed_at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn apply_event(
        &self,
        event: ProcessedEvent,
        booking_id: Uuid,
        expected: BookingState,
        change: &BookingChange,
    ) -> Result<EventWrite, StoreError> {
        let mut tx = self.pool.begin().await?;

        let recorded = sqlx::query(INSERT_EVENT)
            .bind(&event.event_id)
            .bind(&event.event_type)
            .bind(event.booking_id)
            .bind(event.processed_at)
            .execute(&mut *tx)
            .await?;

        if recorded.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(EventWrite::Duplicate);
        }

        let updated = sqlx::query_as::<_, Booking>(UPDATE_BOOKING_STATE)
            .bind(change.status)
            .bind(change.payment_status)
            .bind(change.cancelled_at)
            .bind(change.cancelled_by)
            .bind(booking_id)
            .bind(expected.status)
            .bind(expected.payment_status)
            .fetch_optional(&mut *tx)
            .await?;

        match updated {
            Some(booking) => {
                tx.commit().await?;
                Ok(EventWrite::Applied(booking))
            }
            None => {
                tx.rollback().await?;
                Ok(EventWrite::Stale)
            }
        }
    }
}
