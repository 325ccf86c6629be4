//! Shared fixtures for HTTP-level tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use stayfinder_server::booking::BookingService;
use stayfinder_server::middleware::auth::AuthService;
use stayfinder_server::models::{Listing, PropertyType, UserRole};
use stayfinder_server::payment::{PaymentService, PaymentSettings};
use stayfinder_server::routes;
use stayfinder_server::state::AppState;
use stayfinder_server::store::{InMemoryStore, ListingStore};
use stayfinder_server::stripe::signature::compute_signature;
use stayfinder_server::stripe::{CheckoutProvider, CheckoutRequest, CheckoutSession, ProviderError};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Checkout provider that hands out numbered sessions, counting calls and
/// recording the idempotency key of each
pub struct FakeCheckout {
    calls: AtomicUsize,
    keys: Mutex<Vec<String>>,
    pub fail: bool,
    /// Lifetime of issued sessions; negative hands out already expired ones
    pub session_ttl: Duration,
}

impl Default for FakeCheckout {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            keys: Mutex::new(Vec::new()),
            fail: false,
            session_ttl: Duration::hours(24),
        }
    }
}

impl FakeCheckout {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn idempotency_keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckoutProvider for FakeCheckout {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.keys.lock().unwrap().push(request.idempotency_key.clone());
        if self.fail {
            return Err(ProviderError::Api {
                status: 500,
                message: "provider down".to_string(),
            });
        }
        Ok(CheckoutSession {
            id: format!("cs_test_{n}"),
            url: format!("https://checkout.test/pay/cs_test_{n}?b={}", request.booking_id),
            expires_at: Some(Utc::now() + self.session_ttl),
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: InMemoryStore,
    pub provider: Arc<FakeCheckout>,
    pub payment_service: Arc<PaymentService>,
    pub auth: Arc<AuthService>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(Some(WEBHOOK_SECRET.to_string()), FakeCheckout::default())
    }

    pub fn without_webhook_secret() -> Self {
        Self::build(None, FakeCheckout::default())
    }

    pub fn with_failing_provider() -> Self {
        Self::build(
            Some(WEBHOOK_SECRET.to_string()),
            FakeCheckout {
                fail: true,
                ..Default::default()
            },
        )
    }

    /// Provider sessions that have expired by the time they are stored
    pub fn with_expired_sessions() -> Self {
        Self::build(
            Some(WEBHOOK_SECRET.to_string()),
            FakeCheckout {
                session_ttl: Duration::minutes(-1),
                ..Default::default()
            },
        )
    }

    fn build(webhook_secret: Option<String>, provider: FakeCheckout) -> Self {
        let store = InMemoryStore::new();
        let provider = Arc::new(provider);
        let auth = Arc::new(AuthService::new(JWT_SECRET));

        let booking_service = Arc::new(BookingService::new(Arc::new(store.clone())));
        let payment_service = Arc::new(PaymentService::new(
            Arc::new(store.clone()),
            provider.clone(),
            PaymentSettings {
                client_url: "http://localhost:5173".to_string(),
                currency: "usd".to_string(),
                webhook_secret,
                webhook_tolerance_secs: 300,
            },
        ));

        let state = AppState::new(booking_service, payment_service.clone(), auth.clone());

        Self {
            router: routes::app(state),
            store,
            provider,
            payment_service,
            auth,
        }
    }

    /// Insert a listing owned by `host_id`
    pub async fn seed_listing(&self, host_id: Uuid, price: Decimal, guests: i32) -> Listing {
        let now = Utc::now();
        self.store
            .insert_listing(Listing {
                id: Uuid::new_v4(),
                title: "Lakeside Cabin".to_string(),
                description: "Quiet cabin by the lake".to_string(),
                location: "Tahoe".to_string(),
                price,
                images: vec![],
                amenities: vec!["wifi".to_string()],
                guests,
                bedrooms: 2,
                bathrooms: 1,
                property_type: PropertyType::House,
                host_id,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
    }

    pub fn token(&self, user_id: Uuid, role: UserRole) -> String {
        self.auth.issue_token(user_id, role).unwrap()
    }

    /// Send a JSON request, authenticated when `token` is given
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.request(request).await
    }

    /// Deliver a webhook payload with the given signature header
    pub async fn deliver_webhook(&self, payload: &str, signature: Option<String>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/webhook")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header("stripe-signature", signature);
        }
        self.request(builder.body(Body::from(payload.to_string())).unwrap())
            .await
    }

    /// Deliver a webhook payload signed with the configured secret
    pub async fn deliver_signed_webhook(&self, payload: &str) -> (StatusCode, Value) {
        let signature = sign(WEBHOOK_SECRET, payload);
        self.deliver_webhook(payload, Some(signature)).await
    }

    /// Send a prepared request, returning status and JSON body
    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, body)
    }
}

/// `t=..,v1=..` header for `payload` signed now with `secret`
pub fn sign(secret: &str, payload: &str) -> String {
    let timestamp = Utc::now().timestamp();
    let signature = compute_signature(secret, timestamp, payload.as_bytes());
    format!("t={timestamp},v1={signature}")
}

/// A checkout session event payload
pub fn checkout_event(
    event_id: &str,
    event_type: &str,
    session_id: &str,
    booking_id: Option<Uuid>,
) -> String {
    let metadata = match booking_id {
        Some(id) => serde_json::json!({ "bookingId": id.to_string() }),
        None => serde_json::json!({}),
    };
    serde_json::json!({
        "id": event_id,
        "type": event_type,
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "payment_status": if event_type == "checkout.session.expired" { "unpaid" } else { "paid" },
                "metadata": metadata,
            }
        }
    })
    .to_string()
}
