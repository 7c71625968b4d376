/**
 * Session Tokens
 *
 * JWT access-token validation for HTTP requests and socket upgrades.
 * Issuing tokens is the identity service's job; `create_token` exists so
 * development tooling and tests can mint tokens with the same claims shape.
 *
 * A token may carry a session id (`sid`). When it does, the session row must
 * exist, be unrevoked and unexpired for the token to be accepted.
 */
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::error::BackendError;
use crate::backend::store::prelude::*;

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Email
    pub email: String,
    /// Backing session, when the token was issued for one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at time (Unix timestamp)
    pub iat: u64,
}

/// Signing and verification keys derived from the shared secret
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

impl std::fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenKeys(..)")
    }
}

/// Token lifetime used by `create_token`, in days
pub const TOKEN_TTL_DAYS: i64 = 30;

/// Authenticated caller, attached to request extensions by the auth middleware
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub session_id: Option<Uuid>,
}

/// Create a JWT token for a user
pub fn create_token(
    keys: &TokenKeys,
    user_id: Uuid,
    email: &str,
    session_id: Option<Uuid>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        sid: session_id.map(|s| s.to_string()),
        exp: (now + Duration::days(TOKEN_TTL_DAYS)).timestamp().max(0) as u64,
        iat: now.timestamp().max(0) as u64,
    };
    encode(&Header::default(), &claims, &keys.encoding)
}

/// Verify signature and expiry, returning the claims
pub fn verify_token(keys: &TokenKeys, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(token, &keys.decoding, &Validation::default())?;
    Ok(token_data.claims)
}

/// Validate a bearer token end to end: signature, expiry, user row and session
pub async fn authenticate(
    store: &dyn Store,
    keys: &TokenKeys,
    token: &str,
) -> Result<AuthenticatedUser, BackendError> {
    let claims = verify_token(keys, token).map_err(|e| {
        tracing::debug!("[Auth] Token rejected: {}", e);
        BackendError::invalid_token()
    })?;

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| BackendError::invalid_token())?;
    let session_id = claims
        .sid
        .as_deref()
        .map(Uuid::parse_str)
        .transpose()
        .map_err(|_| BackendError::invalid_token())?;

    let mut repos = store.connect().await?;

    if repos.get_user(user_id).await?.is_none() {
        tracing::warn!(user_id = %user_id, "[Auth] Token subject does not exist");
        return Err(BackendError::invalid_token());
    }

    if let Some(sid) = session_id {
        let active = repos
            .get_session(sid)
            .await?
            .is_some_and(|s| s.user_id == user_id && s.is_active(Utc::now()));
        if !active {
            tracing::info!(session_id = %sid, "[Auth] Session not active");
            return Err(BackendError::session_invalid());
        }
    }

    Ok(AuthenticatedUser {
        user_id,
        email: claims.email,
        session_id,
    })
}
