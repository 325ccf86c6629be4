use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::booking::{CreateBookingRequest, UpdateStatusRequest};
use crate::error::ApiError;
use crate::models::{AuthenticatedUser, BookedRange, Booking};
use crate::state::AppState;

/// Create a booking for the caller
pub async fn create_booking(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), ApiError> {
    let booking = app_state
        .booking_service
        .create_booking(user.id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(booking)))
}

/// Bookings made by the caller
pub async fn list_my_bookings(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Booking>>, ApiError> {
    let bookings = app_state.booking_service.list_user_bookings(user.id).await?;
    Ok(Json(bookings))
}

/// Bookings on the caller's listings
pub async fn list_host_bookings(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    let bookings = app_state.booking_service.list_host_bookings(&user).await?;
    Ok(Json(json!({ "bookings": bookings })))
}

pub async fn cancel_booking(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let booking = app_state.booking_service.cancel_booking(&user, id).await?;

    Ok(Json(json!({
        "message": "Booking cancelled successfully",
        "booking": booking,
    })))
}

pub async fn update_booking_status(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, ApiError> {
    let booking = app_state
        .booking_service
        .update_status(&user, id, request.status)
        .await?;

    Ok(Json(json!({
        "message": "Booking status updated successfully",
        "booking": booking,
    })))
}

/// Held date ranges for a listing, for availability calendars
pub async fn get_listing_bookings(
    State(app_state): State<AppState>,
    Path(listing_id): Path<Uuid>,
) -> Result<Json<Vec<BookedRange>>, ApiError> {
    let ranges = app_state
        .booking_service
        .listing_availability(listing_id)
        .await?;
    Ok(Json(ranges))
}
