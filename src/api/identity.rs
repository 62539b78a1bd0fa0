// src/api/identity.rs
// Identity resolution at the HTTP boundary. Authentication itself lives in
// front of this service; by the time a request arrives the caller identity is
// an x-user-id header. With auth disabled the guest user fills in so local
// development works without any upstream.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::error::ChatError;
use crate::config::CONFIG;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Resolved caller identity for a request
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
}

impl Identity {
    pub fn guest() -> Self {
        Self {
            user_id: CONFIG.guest_user_id.clone(),
        }
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(value) = parts.headers.get(USER_ID_HEADER) {
            let user_id = value
                .to_str()
                .map_err(|_| ChatError::BadRequest("invalid x-user-id header".into()))?
                .trim()
                .to_string();
            if !user_id.is_empty() {
                return Ok(Identity { user_id });
            }
        }

        if CONFIG.auth_disabled {
            return Ok(Identity::guest());
        }

        Err(ChatError::Unauthorized("no resolvable identity".into()))
    }
}
