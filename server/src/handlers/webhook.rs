use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the provider's payload signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Provider callback. Needs the raw body for signature verification.
pub async fn payment_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    let outcome = app_state
        .payment_service
        .handle_webhook(&body, signature)
        .await?;

    tracing::debug!(?outcome, "webhook acknowledged");

    Ok(Json(json!({ "received": true })))
}
