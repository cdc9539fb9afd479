//! Caller identity. Session issuance and verification live at the platform
//! gateway, which injects the authenticated user as trusted headers; this
//! service only reads them back out.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
    Donor,
    Partner,
    User,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "staff" => Some(Role::Staff),
            "donor" => Some(Role::Donor),
            "partner" | "vendor" => Some(Role::Partner),
            "user" | "beneficiary" => Some(Role::User),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_role(&self, allowed: &[Role]) -> Result<(), AppError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "You do not have permission to perform this action".to_string(),
            ))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;

        let role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|h| h.to_str().ok())
            .and_then(Role::parse)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;

        Ok(AuthUser { id, role })
    }
}

/// For routes that behave differently for anonymous callers instead of
/// rejecting them.
#[derive(Debug, Clone, Copy)]
pub struct OptionalUser(pub Option<AuthUser>);

#[async_trait]
impl<S> FromRequestParts<S> for OptionalUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalUser(
            AuthUser::from_request_parts(parts, state).await.ok(),
        ))
    }
}
