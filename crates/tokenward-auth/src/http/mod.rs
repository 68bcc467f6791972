//! Axum handlers for the token and authorization-code endpoints.
//!
//! - [`token`] - `refresh_token` grant
//! - [`bearer`] - Bearer token extractor and userinfo
//! - [`callback`] - login redirect and provider callback
//! - [`error`] - OAuth error rendering and the error response processor hook

pub mod bearer;
pub mod callback;
pub mod error;
pub mod token;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

pub use bearer::{BearerAuth, userinfo_handler};
pub use callback::{authorize_handler, callback_handler};
pub use error::{AuthorizationErrorHandler, ErrorContext, ErrorResponseProcessor};
pub use token::{TokenRequest, token_handler};

use crate::generator::{AccessRefreshTokenGenerator, PrincipalResolver};
use crate::oauth::AuthorizationCodeFlow;

/// Shared state of the OAuth handlers.
#[derive(Clone)]
pub struct OAuthState {
    /// Local token issuance.
    pub generator: Arc<AccessRefreshTokenGenerator>,
    /// Resolves refresh token subjects.
    pub resolver: Arc<dyn PrincipalResolver>,
    /// Authorization-code flow, when a provider is configured.
    pub flow: Option<Arc<AuthorizationCodeFlow>>,
    /// Renders authorization errors.
    pub error_handler: AuthorizationErrorHandler,
}

impl OAuthState {
    /// Creates state serving only the token endpoint.
    #[must_use]
    pub fn new(
        generator: Arc<AccessRefreshTokenGenerator>,
        resolver: Arc<dyn PrincipalResolver>,
    ) -> Self {
        Self {
            generator,
            resolver,
            flow: None,
            error_handler: AuthorizationErrorHandler::new(),
        }
    }

    /// Enables the login and callback endpoints.
    #[must_use]
    pub fn with_flow(mut self, flow: Arc<AuthorizationCodeFlow>) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Replaces the authorization error handler.
    #[must_use]
    pub fn with_error_handler(mut self, handler: AuthorizationErrorHandler) -> Self {
        self.error_handler = handler;
        self
    }
}

impl std::fmt::Debug for OAuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthState")
            .field("generator", &self.generator)
            .field("flow", &self.flow.is_some())
            .field("error_handler", &self.error_handler)
            .finish_non_exhaustive()
    }
}

/// Routes:
///
/// - `GET /oauth/authorize`
/// - `GET /oauth/callback`
/// - `POST /oauth/token`
/// - `GET /oauth/userinfo`
pub fn router(state: OAuthState) -> Router {
    Router::new()
        .route("/oauth/authorize", get(authorize_handler))
        .route("/oauth/callback", get(callback_handler))
        .route("/oauth/token", post(token_handler))
        .route("/oauth/userinfo", get(userinfo_handler))
        .with_state(state)
}
