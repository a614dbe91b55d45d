use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use serde::{Deserialize, Serialize};

use crate::auth::jwt;

/// Platform role of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Entrepreneur,
    Investor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Entrepreneur => "entrepreneur",
            Role::Investor => "investor",
        }
    }
}

/// Verified caller identity, extracted from `Authorization: Bearer`.
/// Implements axum's FromRequestParts for use as an extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user id issued by the identity collaborator
    pub sub: String,
    /// Display name, denormalized onto sent messages
    pub name: String,
    pub role: Role,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl Identity {
    pub fn user_id(&self) -> &str {
        &self.sub
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // Secret is set in request extensions by the router middleware
        let secret = parts
            .extensions
            .get::<IdentitySecret>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

        jwt::validate_identity_token(&secret.0, token).map_err(|_| StatusCode::UNAUTHORIZED)
    }
}

/// Identity secret stored in request extensions for the Identity extractor
#[derive(Clone)]
pub struct IdentitySecret(pub Vec<u8>);
