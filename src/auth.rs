use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use ulid::Ulid;

use crate::api::{ApiError, AppState};
use crate::engine::Actor;

/// Identity carried by the bearer token. Password handling lives elsewhere;
/// this layer only needs to know who is calling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Admin,
    User(Ulid),
}

impl Caller {
    /// `Authorization: Bearer <token>`: the admin token, or a user id.
    pub fn identify(header: Option<&str>, admin_token: &str) -> Result<Self, ApiError> {
        let header = header.ok_or(ApiError::Unauthorized("missing bearer token"))?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::Unauthorized("malformed authorization header"))?;
        if token == admin_token {
            return Ok(Caller::Admin);
        }
        Ulid::from_string(token)
            .map(Caller::User)
            .map_err(|_| ApiError::Unauthorized("unknown bearer token"))
    }

    pub fn actor(self) -> Actor {
        match self {
            Caller::Admin => Actor::Admin,
            Caller::User(id) => Actor::User(id),
        }
    }

    pub fn require_admin(self) -> Result<(), ApiError> {
        match self {
            Caller::Admin => Ok(()),
            Caller::User(_) => Err(ApiError::AdminOnly),
        }
    }

    pub fn require_user(self) -> Result<Ulid, ApiError> {
        match self {
            Caller::User(id) => Ok(id),
            Caller::Admin => Err(ApiError::MemberOnly),
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        Caller::identify(header, &state.admin_token)
    }
}
