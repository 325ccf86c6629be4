use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::AuthenticatedUser;
use crate::payment::CreateCheckoutRequest;
use crate::state::AppState;

/// Open (or reuse) a hosted checkout session for a booking
pub async fn create_checkout_session(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateCheckoutRequest>,
) -> Result<Json<Value>, ApiError> {
    let url = app_state
        .payment_service
        .create_checkout_session(&user, request.booking_id)
        .await?;

    Ok(Json(json!({ "url": url })))
}
