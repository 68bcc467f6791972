//! Login redirect and provider callback handlers.

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Redirect, Response};
use tracing::{debug, warn};

use super::OAuthState;
use crate::error::AuthError;
use crate::oauth::{CallbackParameters, FlowError};

/// `GET` login endpoint: redirects the user agent to the provider.
pub async fn authorize_handler(State(state): State<OAuthState>) -> Response {
    let Some(flow) = state.flow.as_ref() else {
        return AuthError::configuration("Authorization code flow is not configured")
            .into_response();
    };

    let (url, _) = flow.begin();
    debug!(host = ?url.host_str(), "Redirecting to provider");
    Redirect::to(url.as_str()).into_response()
}

/// `GET` redirect URI: classifies the callback, exchanges the code and
/// returns local tokens.
///
/// Authorization failures are answered with HTTP 400 through the configured
/// [`AuthorizationErrorHandler`](super::AuthorizationErrorHandler).
pub async fn callback_handler(State(state): State<OAuthState>, request: Request) -> Response {
    let (parts, _) = request.into_parts();

    let Some(flow) = state.flow.as_ref() else {
        return AuthError::configuration("Authorization code flow is not configured")
            .into_response();
    };

    let params = parts
        .uri
        .query()
        .map(CallbackParameters::parse)
        .unwrap_or_default();

    match flow.handle_callback(&params).await {
        Ok(tokens) => tokens.into_response(),
        Err(FlowError::Generation(e)) => e.into_response(),
        Err(e) => {
            warn!(error = %e, "Authorization code flow failed");
            state
                .error_handler
                .handle(&parts, &e.to_authorization_error())
        }
    }
}
