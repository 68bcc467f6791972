//! Wire-level token response.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// Token type of every issued access token.
pub const BEARER: &str = "Bearer";

/// Access token response (RFC 6749 section 5.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRefreshToken {
    /// The access token.
    pub access_token: String,

    /// The refresh token, when one was issued or passed through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Always `"Bearer"`.
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// Maps generated token strings into a response.
pub trait TokenRenderer: Send + Sync {
    /// Builds the response. Infallible; inputs are already-issued tokens.
    fn render(
        &self,
        access_token: String,
        refresh_token: Option<String>,
        expires_in: i64,
    ) -> AccessRefreshToken;
}

/// Renders bearer token responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerTokenRenderer;

impl TokenRenderer for BearerTokenRenderer {
    fn render(
        &self,
        access_token: String,
        refresh_token: Option<String>,
        expires_in: i64,
    ) -> AccessRefreshToken {
        AccessRefreshToken {
            access_token,
            refresh_token,
            token_type: BEARER.to_string(),
            expires_in,
        }
    }
}

impl IntoResponse for AccessRefreshToken {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [("Cache-Control", "no-store"), ("Pragma", "no-cache")],
            Json(self),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_bearer() {
        let token = BearerTokenRenderer.render("at".to_string(), Some("rt".to_string()), 3600);
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_in, 3600);

        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "access_token": "at",
                "refresh_token": "rt",
                "token_type": "Bearer",
                "expires_in": 3600
            })
        );
    }

    #[test]
    fn test_refresh_token_omitted_when_absent() {
        let token = BearerTokenRenderer.render("at".to_string(), None, 60);
        let json = serde_json::to_string(&token).unwrap();
        assert!(!json.contains("refresh_token"));
    }

    #[test]
    fn test_into_response_headers() {
        let response = BearerTokenRenderer.render("at".to_string(), None, 60).into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["cache-control"], "no-store");
        assert_eq!(response.headers()["pragma"], "no-cache");
        assert_eq!(response.headers()["content-type"], "application/json");
    }
}
