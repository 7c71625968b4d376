/**
 * Authentication Middleware
 *
 * This module protects the `/api` routes. It extracts the bearer token from
 * the `Authorization` header, validates it (signature, expiry, user row and
 * session) and attaches the caller to the request extensions.
 */
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::backend::auth::{authenticate, AuthenticatedUser};
use crate::backend::error::BackendError;
use crate::backend::server::state::AppState;

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authentication middleware
///
/// Returns 401 with a JSON error body if the token is missing or invalid.
pub async fn auth_middleware(
    State(app_state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, BackendError> {
    let token = bearer_token(request.headers())
        .map(str::to_string)
        .ok_or_else(|| {
            tracing::warn!("[Auth] Missing or malformed Authorization header");
            BackendError::unauthenticated("missing bearer token")
        })?;

    let user = authenticate(app_state.store.as_ref(), &app_state.keys, &token).await?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Axum extractor for the caller attached by [`auth_middleware`]
#[derive(Clone, Debug)]
pub struct AuthUser(pub AuthenticatedUser);

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = BackendError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| {
                tracing::warn!("[Auth] AuthenticatedUser not found in request extensions");
                BackendError::unauthenticated("authentication required")
            })?;

        Ok(AuthUser(user))
    }
}
