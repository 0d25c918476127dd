//! Session Authentication
//!
//! Sessions are HS256 JWTs minted by the identity layer. They arrive as
//! `Authorization: Bearer <jwt>` or in the `session` cookie.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use givers_donations::{DonationError, Principal};

use crate::error::ApiError;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "session";
pub const DONOR_TOKEN_COOKIE: &str = "donor_token";

/// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,

    #[serde(default)]
    pub host: bool,

    pub exp: usize,
}

/// Verification key; `None` when no secret is configured
pub struct SessionKeys {
    decoding: Option<DecodingKey>,
    validation: Validation,
}

impl SessionKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: (!secret.is_empty()).then(|| DecodingKey::from_secret(secret.as_bytes())),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Option<Principal> {
        let key = self.decoding.as_ref()?;
        match decode::<Claims>(token, key, &self.validation) {
            Ok(data) if !data.claims.sub.is_empty() => Some(Principal {
                user_id: data.claims.sub,
                is_host: data.claims.host,
            }),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Session verification failed");
                None
            }
        }
    }
}

/// Value of cookie `name`, if present and non-empty
pub fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}

fn principal(parts: &Parts, state: &AppState) -> Option<Principal> {
    let token = bearer(&parts.headers).or_else(|| cookie(&parts.headers, SESSION_COOKIE))?;
    state.sessions.verify(&token)
}

/// A signed-in caller; rejects with 401 otherwise
pub struct AuthUser(pub Principal);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        principal(parts, state)
            .map(AuthUser)
            .ok_or(ApiError(DonationError::Unauthorized))
    }
}

/// The caller, when signed in
pub struct MaybeUser(pub Option<Principal>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Infallible> {
        Ok(MaybeUser(principal(parts, state)))
    }
}
