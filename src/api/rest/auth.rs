use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use crate::error::AppError;
use crate::ports::{Principal, Role};
use crate::state::AppState;

pub const BEARER_PREFIX: &str = "Bearer ";

/// Any caller holding a valid bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Principal);

/// A caller authenticated with the courier role.
#[derive(Debug, Clone, Copy)]
pub struct CourierUser(pub Principal);

impl CourierUser {
    pub fn courier_id(&self) -> uuid::Uuid {
        self.0.user_id
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AppError::Unauthenticated)?;

        match state.token_verifier.verify(token) {
            Some(principal) => Ok(AuthUser(principal)),
            None => {
                debug!(path = %parts.uri.path(), "rejected bearer token");
                Err(AppError::Unauthenticated)
            }
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for CourierUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(principal) = AuthUser::from_request_parts(parts, state).await?;

        if principal.role != Role::Courier {
            return Err(AppError::Unauthorized(format!(
                "role {} cannot act as a courier",
                principal.role.as_str()
            )));
        }

        Ok(CourierUser(principal))
    }
}
