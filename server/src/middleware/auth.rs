//! Session token handling
//!
//! Tokens are HS256 JWTs read from the `token` cookie, falling back to an
//! `Authorization: Bearer` header.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::{extract::CookieJar, TypedHeader};
use chrono::{Duration, Utc};
use headers::{authorization::Bearer, Authorization};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{AuthenticatedUser, Claims, UserRole};

/// Cookie holding the session token
pub const TOKEN_COOKIE: &str = "token";

/// Issues and verifies session tokens
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
}

impl AuthService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_ttl: Duration::days(7),
        }
    }

    pub fn issue_token(
        &self,
        user_id: Uuid,
        role: UserRole,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let exp = (Utc::now() + self.token_ttl).timestamp() as usize;
        let claims = Claims {
            sub: user_id,
            role,
            exp,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default()).map(|data| data.claims)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Arc::<AuthService>::from_ref(state);

        let cookie_token = CookieJar::from_headers(&parts.headers)
            .get(TOKEN_COOKIE)
            .map(|cookie| cookie.value().to_string());

        let token = match cookie_token {
            Some(token) => token,
            None => {
                let TypedHeader(Authorization(bearer)) =
                    TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                        .await
                        .map_err(|_| ApiError::Unauthenticated)?;
                bearer.token().to_string()
            }
        };

        let claims = auth.verify_token(&token).map_err(|e| {
            tracing::debug!(error = %e, "rejected session token");
            ApiError::Unauthenticated
        })?;

        Ok(claims.into())
    }
}
