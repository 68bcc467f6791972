//! OAuth error responses.
//!
//! Authorization errors are rendered as HTTP 400 with the OAuth error body.
//! An [`ErrorResponseProcessor`] can rewrite those responses (for instance
//! into a problem+json or platform-specific envelope); without one the body is
//! returned unmodified.

use std::sync::Arc;

use axum::Json;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::warn;

use crate::error::AuthError;
use crate::oauth::AuthorizationErrorResponse;

/// Request details handed to an [`ErrorResponseProcessor`].
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Request method.
    pub method: Method,
    /// Request URI.
    pub uri: Uri,
    /// Display form of the error being rendered.
    pub error_message: String,
}

impl ErrorContext {
    /// Captures the context of `parts` for `error`.
    #[must_use]
    pub fn new(parts: &Parts, error: &impl std::fmt::Display) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            error_message: error.to_string(),
        }
    }
}

/// Post-processes error responses.
pub trait ErrorResponseProcessor: Send + Sync {
    /// Returns the response to send instead of `response`.
    fn process_response(&self, context: &ErrorContext, response: Response) -> Response;
}

impl<F> ErrorResponseProcessor for F
where
    F: Fn(&ErrorContext, Response) -> Response + Send + Sync,
{
    fn process_response(&self, context: &ErrorContext, response: Response) -> Response {
        self(context, response)
    }
}

/// Renders [`AuthorizationErrorResponse`]s.
#[derive(Clone, Default)]
pub struct AuthorizationErrorHandler {
    processor: Option<Arc<dyn ErrorResponseProcessor>>,
}

impl AuthorizationErrorHandler {
    /// Creates a handler that returns error bodies unmodified.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes every response through `processor`.
    #[must_use]
    pub fn with_processor(mut self, processor: Arc<dyn ErrorResponseProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Renders `error` as HTTP 400.
    pub fn handle(&self, parts: &Parts, error: &AuthorizationErrorResponse) -> Response {
        warn!(
            method = %parts.method,
            path = %parts.uri.path(),
            error = %error.error,
            "Authorization failed"
        );

        let response = (
            StatusCode::BAD_REQUEST,
            [(header::CACHE_CONTROL, "no-store"), (header::PRAGMA, "no-cache")],
            Json(error),
        )
            .into_response();

        match &self.processor {
            Some(processor) => {
                let context = ErrorContext::new(parts, error);
                processor.process_response(&context, response)
            }
            None => response,
        }
    }
}

impl std::fmt::Debug for AuthorizationErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationErrorHandler")
            .field("processor", &self.processor.is_some())
            .finish()
    }
}

// =============================================================================
// AuthError
// =============================================================================

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let error = self.oauth_error_code();

        // server-side details stay in the logs
        let description = if status.is_server_error() {
            warn!(error = %self, category = %self.category(), "Token request failed");
            "The server could not issue a token".to_string()
        } else {
            self.to_string()
        };

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        if status == StatusCode::UNAUTHORIZED {
            let challenge = format!(
                "Bearer error=\"{}\", error_description=\"{}\"",
                error,
                description.replace('"', "\\\"")
            );
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        let body = json!({
            "error": error,
            "error_description": description,
        });

        (status, headers, Json(body)).into_response()
    }
}

fn status_for(error: &AuthError) -> StatusCode {
    match error {
        AuthError::InvalidToken { .. } | AuthError::TokenExpired => StatusCode::UNAUTHORIZED,
        AuthError::InvalidGrant { .. }
        | AuthError::UnknownPrincipal { .. }
        | AuthError::InvalidRequest { .. }
        | AuthError::UnsupportedGrantType { .. }
        | AuthError::RefreshDisabled => StatusCode::BAD_REQUEST,
        AuthError::Encoding(_) | AuthError::Configuration { .. } | AuthError::Internal { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;

    use crate::oauth::AuthorizationErrorCode;

    fn parts() -> Parts {
        Request::builder()
            .method(Method::GET)
            .uri("/oauth/callback?error=access_denied")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_handle_without_processor_passes_through() {
        let error = AuthorizationErrorResponse::new(AuthorizationErrorCode::AccessDenied)
            .with_description("User denied access");
        let response = AuthorizationErrorHandler::new().handle(&parts(), &error);

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert_eq!(
            body_json(response).await,
            json!({"error": "access_denied", "error_description": "User denied access"})
        );
    }

    #[tokio::test]
    async fn test_handle_with_processor() {
        let processor = |context: &ErrorContext, _response: Response| -> Response {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "path": context.uri.path(),
                    "message": context.error_message,
                })),
            )
                .into_response()
        };
        let handler = AuthorizationErrorHandler::new().with_processor(Arc::new(processor));

        let error = AuthorizationErrorResponse::new(AuthorizationErrorCode::LoginRequired);
        let response = handler.handle(&parts(), &error);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({"path": "/oauth/callback", "message": "Authorization failed: login_required"})
        );
    }

    #[tokio::test]
    async fn test_auth_error_responses() {
        let response = AuthError::TokenExpired.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
        assert!(challenge.contains("error=\"invalid_token\""));

        let response = AuthError::unsupported_grant_type("password").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!response.headers().contains_key(header::WWW_AUTHENTICATE));
        assert_eq!(body_json(response).await["error"], "unsupported_grant_type");

        let response = AuthError::internal("db password leaked").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "server_error");
        assert!(!body["error_description"].as_str().unwrap().contains("leaked"));
    }
}
