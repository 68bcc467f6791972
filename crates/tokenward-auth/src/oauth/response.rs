//! Authorization responses delivered to the redirect URI.
//!
//! The provider redirects back with either `code` + `state` or an
//! `error` + `error_description` + `state` triple, in the query string or
//! (for fragment response modes) in the URL fragment. [`CallbackParameters`]
//! collects those parameters and [`CallbackParameters::classify`] turns them
//! into a terminal [`FlowState`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

/// OAuth 2.0 and OpenID Connect authorization error codes.
///
/// RFC 6749 section 4.1.2.1 plus OpenID Connect Core section 3.1.2.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationErrorCode {
    /// Missing, invalid or repeated parameter.
    InvalidRequest,
    /// The client may not use this method.
    UnauthorizedClient,
    /// The resource owner or provider denied the request.
    AccessDenied,
    /// The provider does not support this response type.
    UnsupportedResponseType,
    /// The requested scope is invalid, unknown, or malformed.
    InvalidScope,
    /// The provider hit an unexpected condition. Also used for codes this
    /// crate does not recognize.
    ServerError,
    /// The provider is overloaded or in maintenance.
    TemporarilyUnavailable,

    // OpenID Connect
    /// End-user interaction is required.
    InteractionRequired,
    /// End-user authentication is required.
    LoginRequired,
    /// The end-user must select an account.
    AccountSelectionRequired,
    /// End-user consent is required.
    ConsentRequired,
    /// The `request_uri` is invalid.
    InvalidRequestUri,
    /// The request object is invalid.
    InvalidRequestObject,
    /// The `request` parameter is not supported.
    RequestNotSupported,
    /// The `request_uri` parameter is not supported.
    RequestUriNotSupported,
    /// The `registration` parameter is not supported.
    RegistrationNotSupported,
}

impl AuthorizationErrorCode {
    /// All recognized codes.
    pub const ALL: [Self; 16] = [
        Self::InvalidRequest,
        Self::UnauthorizedClient,
        Self::AccessDenied,
        Self::UnsupportedResponseType,
        Self::InvalidScope,
        Self::ServerError,
        Self::TemporarilyUnavailable,
        Self::InteractionRequired,
        Self::LoginRequired,
        Self::AccountSelectionRequired,
        Self::ConsentRequired,
        Self::InvalidRequestUri,
        Self::InvalidRequestObject,
        Self::RequestNotSupported,
        Self::RequestUriNotSupported,
        Self::RegistrationNotSupported,
    ];

    /// Returns the wire representation of the code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::InteractionRequired => "interaction_required",
            Self::LoginRequired => "login_required",
            Self::AccountSelectionRequired => "account_selection_required",
            Self::ConsentRequired => "consent_required",
            Self::InvalidRequestUri => "invalid_request_uri",
            Self::InvalidRequestObject => "invalid_request_object",
            Self::RequestNotSupported => "request_not_supported",
            Self::RequestUriNotSupported => "request_uri_not_supported",
            Self::RegistrationNotSupported => "registration_not_supported",
        }
    }

    /// Parses a wire code, returning `None` for unrecognized codes.
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }
}

impl fmt::Display for AuthorizationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Error response
// =============================================================================

/// Authorization error reported by the provider (or raised while
/// classifying its callback).
///
/// Serializes to the OAuth error body `{error, error_description?, state?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("Authorization failed: {error}")]
pub struct AuthorizationErrorResponse {
    /// Error code.
    pub error: AuthorizationErrorCode,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    /// State echoed by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl AuthorizationErrorResponse {
    /// Creates an error without description or state.
    #[must_use]
    pub fn new(error: AuthorizationErrorCode) -> Self {
        Self {
            error,
            error_description: None,
            state: None,
        }
    }

    /// Creates an `invalid_request` error.
    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(AuthorizationErrorCode::InvalidRequest).with_description(description)
    }

    /// Creates a `server_error` error.
    #[must_use]
    pub fn server_error(description: impl Into<String>) -> Self {
        Self::new(AuthorizationErrorCode::ServerError).with_description(description)
    }

    /// Builds an error from raw provider parameters.
    ///
    /// Unrecognized codes map to `server_error`; the raw code is kept at the
    /// start of the description, followed by the provider's own description.
    #[must_use]
    pub fn from_provider(
        code: &str,
        description: Option<String>,
        state: Option<String>,
    ) -> Self {
        let (error, error_description) = match AuthorizationErrorCode::parse(code) {
            Some(error) => (error, description),
            None => {
                warn!(code = %code, "Unrecognized authorization error code");
                let preserved = match description {
                    Some(description) => format!("{code}: {description}"),
                    None => code.to_string(),
                };
                (AuthorizationErrorCode::ServerError, Some(preserved))
            }
        };

        Self {
            error,
            error_description,
            state,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.error_description = Some(description.into());
        self
    }

    /// Sets the echoed state.
    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }
}

// =============================================================================
// Flow state
// =============================================================================

/// State of one authorization-code round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    /// The user agent was sent to the provider and has not come back.
    AwaitingRedirect {
        /// State value sent with the request.
        state: String,
    },
    /// The provider returned an authorization code.
    Success {
        /// Authorization code to exchange.
        code: String,
        /// Echoed state.
        state: Option<String>,
    },
    /// The provider (or classification) reported an error.
    Error(AuthorizationErrorResponse),
}

impl FlowState {
    /// Returns `true` for [`FlowState::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns `true` for [`FlowState::Error`].
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Returns `true` once the redirect has been received.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::AwaitingRedirect { .. })
    }

    /// Returns the authorization code of a successful callback.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Success { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Converts into a result, surfacing errors as [`AuthorizationErrorResponse`].
    ///
    /// # Errors
    /// Returns the error for [`FlowState::Error`] and an `invalid_request`
    /// error for a flow that has not received its redirect yet.
    pub fn into_result(self) -> Result<(String, Option<String>), AuthorizationErrorResponse> {
        match self {
            Self::Success { code, state } => Ok((code, state)),
            Self::Error(error) => Err(error),
            Self::AwaitingRedirect { state } => Err(AuthorizationErrorResponse::invalid_request(
                "Authorization response not received",
            )
            .with_state(state)),
        }
    }
}

// =============================================================================
// Callback parameters
// =============================================================================

/// Parameters of a redirect callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct CallbackParameters(HashMap<String, String>);

impl CallbackParameters {
    /// Parses a query string or fragment (`a=b&c=d`, leading `?`/`#` allowed).
    #[must_use]
    pub fn parse(encoded: &str) -> Self {
        let encoded = encoded.trim_start_matches(['?', '#']);
        url::form_urlencoded::parse(encoded.as_bytes())
            .into_owned()
            .collect()
    }

    /// Collects parameters from a full redirect URL.
    ///
    /// The query is used when it carries `code` or `error`; otherwise the
    /// fragment is read (fragment response mode).
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        let query = url.query().map(Self::parse).unwrap_or_default();
        if query.is_response() {
            return query;
        }
        match url.fragment() {
            Some(fragment) => Self::parse(fragment),
            None => query,
        }
    }

    /// Returns a parameter value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Returns the echoed state.
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.get("state")
    }

    fn is_response(&self) -> bool {
        self.0.contains_key("code") || self.0.contains_key("error")
    }

    /// Classifies the callback.
    ///
    /// An `error` parameter always wins. Without one, a non-empty `code`
    /// yields [`FlowState::Success`]; anything else is `invalid_request`.
    #[must_use]
    pub fn classify(&self) -> FlowState {
        let state = self.state().map(String::from);

        if let Some(code) = self.get("error") {
            let error = AuthorizationErrorResponse::from_provider(
                code,
                self.get("error_description").map(String::from),
                state,
            );
            debug!(error = %error.error, "Authorization callback carries an error");
            return FlowState::Error(error);
        }

        match self.get("code").filter(|c| !c.is_empty()) {
            Some(code) => FlowState::Success {
                code: code.to_string(),
                state,
            },
            None => {
                let mut error =
                    AuthorizationErrorResponse::invalid_request("Missing authorization code");
                error.state = state;
                FlowState::Error(error)
            }
        }
    }

    /// Classifies the callback and checks the echoed state against
    /// `expected_state`.
    ///
    /// A success without the expected state, or any response echoing a
    /// different state, becomes `invalid_request` ("state mismatch").
    #[must_use]
    pub fn classify_with_state(&self, expected_state: &str) -> FlowState {
        let echoed = self.state();
        let mismatch = match (&self.classify(), echoed) {
            (_, Some(echoed)) => echoed != expected_state,
            (FlowState::Success { .. }, None) => true,
            _ => false,
        };

        if mismatch {
            warn!("Authorization callback state mismatch");
            let mut error = AuthorizationErrorResponse::invalid_request("state mismatch");
            error.state = echoed.map(String::from);
            return FlowState::Error(error);
        }

        self.classify()
    }
}

impl FromIterator<(String, String)> for CallbackParameters {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<HashMap<String, String>> for CallbackParameters {
    fn from(params: HashMap<String, String>) -> Self {
        Self(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_as_str_and_parse() {
        for code in AuthorizationErrorCode::ALL {
            assert_eq!(AuthorizationErrorCode::parse(code.as_str()), Some(code));
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
        assert_eq!(AuthorizationErrorCode::parse("made_up"), None);
        assert_eq!(AuthorizationErrorCode::LoginRequired.to_string(), "login_required");
    }

    #[test]
    fn test_classify_error() {
        let state = CallbackParameters::parse("error=access_denied&state=xyz").classify();
        assert_eq!(
            state,
            FlowState::Error(AuthorizationErrorResponse {
                error: AuthorizationErrorCode::AccessDenied,
                error_description: None,
                state: Some("xyz".to_string()),
            })
        );
    }

    #[test]
    fn test_classify_success() {
        let state = CallbackParameters::parse("?code=abc123&state=xyz").classify();
        assert!(state.is_success());
        assert_eq!(state.code(), Some("abc123"));
        assert_eq!(
            state.into_result().unwrap(),
            ("abc123".to_string(), Some("xyz".to_string()))
        );
    }

    #[test]
    fn test_error_wins_over_code() {
        let state = CallbackParameters::parse("code=abc&error=login_required").classify();
        let FlowState::Error(error) = state else {
            panic!("expected error");
        };
        assert_eq!(error.error, AuthorizationErrorCode::LoginRequired);
    }

    #[test]
    fn test_unknown_code_preserved_in_description() {
        let state =
            CallbackParameters::parse("error=quota_exceeded&error_description=Too+many&state=s")
                .classify();
        let FlowState::Error(error) = state else {
            panic!("expected error");
        };
        assert_eq!(error.error, AuthorizationErrorCode::ServerError);
        assert_eq!(error.error_description.as_deref(), Some("quota_exceeded: Too many"));

        let error = AuthorizationErrorResponse::from_provider("odd", None, None);
        assert_eq!(error.error_description.as_deref(), Some("odd"));
    }

    #[test]
    fn test_missing_code_is_invalid_request() {
        for params in ["state=xyz", "code=&state=xyz"] {
            let FlowState::Error(error) = CallbackParameters::parse(params).classify() else {
                panic!("expected error for {params}");
            };
            assert_eq!(error.error, AuthorizationErrorCode::InvalidRequest);
            assert_eq!(error.state.as_deref(), Some("xyz"));
        }
    }

    #[test]
    fn test_state_checks() {
        let ok = CallbackParameters::parse("code=abc&state=xyz").classify_with_state("xyz");
        assert!(ok.is_success());

        for params in ["code=abc&state=other", "code=abc", "error=access_denied&state=other"] {
            let FlowState::Error(error) =
                CallbackParameters::parse(params).classify_with_state("xyz")
            else {
                panic!("expected mismatch for {params}");
            };
            assert_eq!(error.error, AuthorizationErrorCode::InvalidRequest);
            assert_eq!(error.error_description.as_deref(), Some("state mismatch"));
        }

        let provider_error =
            CallbackParameters::parse("error=access_denied").classify_with_state("xyz");
        let FlowState::Error(error) = provider_error else {
            panic!("expected provider error");
        };
        assert_eq!(error.error, AuthorizationErrorCode::AccessDenied);
    }

    #[test]
    fn test_from_url_reads_fragment() {
        let url = Url::parse("https://app.example.com/cb#code=frag&state=s1").unwrap();
        assert_eq!(CallbackParameters::from_url(&url).classify().code(), Some("frag"));

        let url = Url::parse("https://app.example.com/cb?code=q&state=s1#code=frag").unwrap();
        assert_eq!(CallbackParameters::from_url(&url).classify().code(), Some("q"));
    }

    #[test]
    fn test_error_serialization() {
        let error = AuthorizationErrorResponse::invalid_request("Missing scope");
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            serde_json::json!({"error": "invalid_request", "error_description": "Missing scope"})
        );
        assert_eq!(error.to_string(), "Authorization failed: invalid_request");
    }

    #[test]
    fn test_awaiting_redirect_is_not_terminal() {
        let state = FlowState::AwaitingRedirect {
            state: "s".to_string(),
        };
        assert!(!state.is_terminal());
        assert!(state.into_result().is_err());
    }
}
