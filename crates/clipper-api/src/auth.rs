//! Access token authentication.
//!
//! Tokens are HS256 JWTs carrying a `user_id` claim. They are looked up in
//! the `Authorization: Bearer` header, then the `access_token` cookie, then
//! the `access_token` query parameter. Browsers cannot set headers on an
//! `EventSource`, which is why the last two exist.

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Cookie and query parameter holding the token.
pub const ACCESS_TOKEN: &str = "access_token";

/// Decoded token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    /// Expiration (seconds since epoch)
    pub exp: usize,
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

/// Verifies HS256 access tokens.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> ApiResult<Claims> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| ApiError::unauthorized(format!("Token validation failed: {}", e)))?;

        if data.claims.user_id.is_empty() {
            return Err(ApiError::unauthorized("Token has no user_id"));
        }
        Ok(data.claims)
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

/// Find the raw token in a request, in lookup order.
pub fn token_from_parts(parts: &Parts) -> Option<String> {
    if let Some(header) = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    if let Some(cookie) = CookieJar::from_headers(&parts.headers).get(ACCESS_TOKEN) {
        return Some(cookie.value().to_string());
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.access_token)
        .filter(|t| !t.is_empty())
}

/// Axum extractor for authenticated user.
#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token =
            token_from_parts(parts).ok_or_else(|| ApiError::unauthorized("Missing access token"))?;

        let claims = state.jwt.verify(&token)?;

        Ok(AuthUser {
            user_id: claims.user_id,
        })
    }
}
