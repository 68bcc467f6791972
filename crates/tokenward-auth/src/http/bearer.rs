//! Bearer token extractor.
//!
//! ```ignore
//! async fn whoami(BearerAuth(claims): BearerAuth) -> String {
//!     claims.subject().unwrap_or_default().to_string()
//! }
//! ```

use axum::Json;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use super::OAuthState;
use crate::claims::ClaimSet;
use crate::error::AuthError;

/// Claims of a verified `Authorization: Bearer` access token.
///
/// Rejections are [`AuthError`]s, answered with 401 and a
/// `WWW-Authenticate` challenge.
#[derive(Debug, Clone)]
pub struct BearerAuth(pub ClaimSet);

impl<S> FromRequestParts<S> for BearerAuth
where
    S: Send + Sync,
    OAuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = OAuthState::from_ref(state);

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::invalid_token("Missing bearer token"))?;

        let claims = state.generator.authenticate(token)?;
        debug!(subject = ?claims.subject(), path = %parts.uri.path(), "Bearer token accepted");
        Ok(Self(claims))
    }
}

/// `GET` userinfo endpoint: returns the claims of the presented access token.
pub async fn userinfo_handler(BearerAuth(claims): BearerAuth) -> Json<ClaimSet> {
    Json(claims)
}
