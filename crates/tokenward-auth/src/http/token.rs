//! Token endpoint handler.
//!
//! Only the `refresh_token` grant is served here; authorization codes are
//! issued by the external provider and completed through the callback.
//!
//! ```text
//! POST /oauth/token
//! Content-Type: application/x-www-form-urlencoded
//!
//! grant_type=refresh_token&refresh_token=v4.local....
//! ```
//!
//! JSON bodies with the same members are accepted as well.

use std::collections::HashMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::OAuthState;
use crate::error::AuthError;

/// Token request members used by this endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    /// OAuth grant type.
    pub grant_type: String,

    /// Refresh token for the `refresh_token` grant.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenRequest {
    fn from_form(body: &[u8]) -> Result<Self, AuthError> {
        let mut params: HashMap<String, String> = url::form_urlencoded::parse(body)
            .into_owned()
            .collect();
        let grant_type = params
            .remove("grant_type")
            .ok_or_else(|| AuthError::invalid_request("Missing grant_type"))?;
        Ok(Self {
            grant_type,
            refresh_token: params.remove("refresh_token"),
        })
    }

    fn parse(headers: &HeaderMap, body: &Bytes) -> Result<Self, AuthError> {
        let is_json = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            Json::<Self>::from_bytes(body)
                .map(|Json(request)| request)
                .map_err(|e| AuthError::invalid_request(e.body_text()))
        } else {
            Self::from_form(body)
        }
    }
}

/// `POST` token endpoint.
pub async fn token_handler(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match TokenRequest::parse(&headers, &body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Malformed token request");
            return e.into_response();
        }
    };

    debug!(grant_type = %request.grant_type, "Processing token request");

    let result = match request.grant_type.as_str() {
        "refresh_token" => match request.refresh_token.as_deref() {
            Some(token) if !token.is_empty() => {
                state.generator.refresh(token, state.resolver.as_ref())
            }
            _ => Err(AuthError::invalid_request("Missing refresh_token")),
        },
        other => {
            warn!(grant_type = other, "Unsupported grant type");
            Err(AuthError::unsupported_grant_type(other))
        }
    };

    match result {
        Ok(response) => {
            info!(grant_type = %request.grant_type, "Token issued");
            response.into_response()
        }
        Err(e) => {
            warn!(grant_type = %request.grant_type, error = %e, "Token request failed");
            e.into_response()
        }
    }
}
