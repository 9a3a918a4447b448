//! Caller identity.
//!
//! Sessions are terminated upstream; the session layer forwards the caller as
//! `x-user-id` / `x-user-role` and signs `"{user_id}:{role}"` with the shared
//! internal secret into `x-auth-signature` (hex HMAC-SHA256). Admin routes
//! also accept `Authorization: Bearer <ADMIN_API_KEY>` for operator tooling.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::database::models::UserRole;
use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::utils::{hmac_sha256_hex, secure_eq};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const SIGNATURE_HEADER: &str = "x-auth-signature";

/// An authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Proof that the caller may use admin routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAuth {
    User(AuthUser),
    ApiKey,
}

/// Signature the session layer attaches for `user_id` acting as `role`.
pub fn sign_identity(secret: &str, user_id: Uuid, role: UserRole) -> Option<String> {
    hmac_sha256_hex(
        secret.as_bytes(),
        format!("{}:{}", user_id, role.as_str()).as_bytes(),
    )
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

fn unauthorized(parts: &Parts, reason: &str) -> AppError {
    let err = AppError::unauthorized(reason);
    match get_request_id_from_headers(&parts.headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

fn authenticate(parts: &Parts, config: &AuthConfig) -> Result<AuthUser, AppError> {
    let user_id = header(parts, USER_ID_HEADER)
        .ok_or_else(|| unauthorized(parts, "missing caller identity"))?;
    let user_id = Uuid::parse_str(user_id.trim())
        .map_err(|_| unauthorized(parts, "malformed caller identity"))?;
    let role = match header(parts, USER_ROLE_HEADER) {
        Some(role) => {
            UserRole::from_str(role).map_err(|_| unauthorized(parts, "unknown caller role"))?
        }
        None => UserRole::User,
    };
    let signature = header(parts, SIGNATURE_HEADER)
        .ok_or_else(|| unauthorized(parts, "missing identity signature"))?;

    let expected = sign_identity(&config.internal_auth_secret, user_id, role)
        .ok_or_else(|| unauthorized(parts, "identity cannot be verified"))?;
    if !secure_eq(
        expected.as_bytes(),
        signature.trim().to_lowercase().as_bytes(),
    ) {
        tracing::warn!(%user_id, "identity signature mismatch");
        return Err(unauthorized(parts, "invalid identity signature"));
    }
    Ok(AuthUser { user_id, role })
}

impl<S> FromRequestParts<S> for AuthUser
where
    Arc<AuthConfig>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Arc::<AuthConfig>::from_ref(state);
        authenticate(parts, &config)
    }
}

impl<S> FromRequestParts<S> for AdminAuth
where
    Arc<AuthConfig>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Arc::<AuthConfig>::from_ref(state);

        if let (Some(key), Some(bearer)) = (
            config.admin_api_key.as_deref(),
            header(parts, "authorization").and_then(|h| h.strip_prefix("Bearer ")),
        ) {
            if secure_eq(key.as_bytes(), bearer.trim().as_bytes()) {
                return Ok(AdminAuth::ApiKey);
            }
            return Err(unauthorized(parts, "invalid admin key"));
        }

        let user = authenticate(parts, &config)?;
        if !user.is_admin() {
            return Err(AppError::forbidden("admin role required"));
        }
        Ok(AdminAuth::User(user))
    }
}
