use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub const ACTOR_HEADER: &str = "x-actor-id";

pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Result<Uuid, AppError>;
}

/// Trusts the actor id header set by the gateway.
#[derive(Debug, Default)]
pub struct HeaderIdentity;

impl IdentityResolver for HeaderIdentity {
    fn resolve(&self, headers: &HeaderMap) -> Result<Uuid, AppError> {
        let raw = headers
            .get(ACTOR_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("missing {ACTOR_HEADER} header")))?
            .to_str()
            .map_err(|_| AppError::Unauthorized(format!("malformed {ACTOR_HEADER} header")))?;

        Uuid::parse_str(raw.trim()).map_err(|_| AppError::Unauthorized(format!("malformed {ACTOR_HEADER} header")))
    }
}

/// Authenticated actor making the request.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Uuid);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        state.identity.resolve(&parts.headers).map(Caller)
    }
}
