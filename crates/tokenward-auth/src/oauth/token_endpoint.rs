//! Client for the provider's token endpoint (RFC 6749 section 4.1.3 / 6).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::pkce::PkceVerifier;
use super::response::AuthorizationErrorResponse;
use crate::config::{ConfigError, TokenSecurityConfig};

/// How the client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// Public client; only `client_id` is sent in the body.
    None,
    /// HTTP Basic authentication with client_id and client_secret.
    #[default]
    ClientSecretBasic,
    /// client_id and client_secret in the request body.
    ClientSecretPost,
}

impl TokenEndpointAuthMethod {
    /// Returns the wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
        }
    }

    /// Returns `true` if the method needs a client secret.
    #[must_use]
    pub fn requires_secret(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for TokenEndpointAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding of token request bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenRequestContentType {
    /// `application/x-www-form-urlencoded`, as RFC 6749 requires.
    #[default]
    #[serde(rename = "form", alias = "application/x-www-form-urlencoded")]
    Form,
    /// `application/json`, accepted by some providers.
    #[serde(rename = "json", alias = "application/json")]
    Json,
}

impl TokenRequestContentType {
    /// Returns the MIME type.
    #[must_use]
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Form => "application/x-www-form-urlencoded",
            Self::Json => "application/json",
        }
    }
}

impl fmt::Display for TokenRequestContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Successful token endpoint response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEndpointResponse {
    /// Provider access token.
    pub access_token: String,

    /// Token type, usually `Bearer`.
    pub token_type: String,

    /// Lifetime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Provider refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// OpenID Connect ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Provider-specific members.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Error body returned by the token endpoint (RFC 6749 section 5.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenErrorResponse {
    /// Error code.
    pub error: String,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    /// Page describing the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

impl TokenErrorResponse {
    /// Returns `true` for `invalid_grant` (expired, used or revoked code or
    /// refresh token).
    #[must_use]
    pub fn is_invalid_grant(&self) -> bool {
        self.error == "invalid_grant"
    }
}

impl fmt::Display for TokenErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {}", self.error, description),
            None => f.write_str(&self.error),
        }
    }
}

impl From<TokenErrorResponse> for AuthorizationErrorResponse {
    fn from(error: TokenErrorResponse) -> Self {
        Self::from_provider(&error.error, error.error_description, None)
    }
}

/// Token endpoint failures.
#[derive(Debug, thiserror::Error)]
pub enum TokenEndpointError {
    /// The provider answered with an OAuth error body.
    #[error("Token endpoint error: {0}")]
    Protocol(TokenErrorResponse),

    /// The request could not be sent or the response not read.
    #[error("Token endpoint transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success status without an OAuth error body.
    #[error("Token endpoint returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Success status with a body that is not a token response.
    #[error("Invalid token endpoint response: {message}")]
    InvalidResponse {
        /// Parse failure.
        message: String,
    },
}

impl TokenEndpointError {
    /// Creates a new `InvalidResponse` error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Returns `true` for provider-reported OAuth errors.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Returns `true` for network-level failures.
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns the authorization error to report to the client.
    ///
    /// Protocol errors keep the provider's code; everything else is
    /// `server_error` (or `temporarily_unavailable` for 503).
    #[must_use]
    pub fn to_authorization_error(&self) -> AuthorizationErrorResponse {
        match self {
            Self::Protocol(error) => error.clone().into(),
            Self::Status { status: 503, .. } => AuthorizationErrorResponse::new(
                super::response::AuthorizationErrorCode::TemporarilyUnavailable,
            )
            .with_description(self.to_string()),
            _ => AuthorizationErrorResponse::server_error(self.to_string()),
        }
    }
}

/// Client registration used to authenticate token requests.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Client identifier.
    pub client_id: String,
    /// Client secret for confidential clients.
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    /// Credentials of a public client.
    #[must_use]
    pub fn public(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
        }
    }

    /// Credentials of a confidential client.
    #[must_use]
    pub fn confidential(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Some(client_secret.into()),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Posts grants to the provider token endpoint.
#[derive(Debug, Clone)]
pub struct TokenEndpointClient {
    http: reqwest::Client,
    url: Url,
    content_type: TokenRequestContentType,
    auth_method: TokenEndpointAuthMethod,
    credentials: ClientCredentials,
}

impl TokenEndpointClient {
    /// Creates a client posting form bodies with `client_secret_basic`
    /// authentication (or `none` for public credentials).
    #[must_use]
    pub fn new(url: Url, credentials: ClientCredentials) -> Self {
        let auth_method = if credentials.client_secret.is_some() {
            TokenEndpointAuthMethod::ClientSecretBasic
        } else {
            TokenEndpointAuthMethod::None
        };
        Self {
            http: reqwest::Client::new(),
            url,
            content_type: TokenRequestContentType::Form,
            auth_method,
            credentials,
        }
    }

    /// Builds a client from the `token_endpoint` and `client` sections.
    ///
    /// # Errors
    /// Returns [`ConfigError::Missing`] if no token endpoint URL is set or the
    /// auth method needs a secret that is not configured.
    pub fn from_config(config: &TokenSecurityConfig) -> Result<Self, ConfigError> {
        let endpoint = &config.token_endpoint;
        let url = endpoint
            .url
            .clone()
            .ok_or_else(|| ConfigError::Missing("token_endpoint.url".to_string()))?;

        if endpoint.auth_method.requires_secret() && config.client.client_secret.is_none() {
            return Err(ConfigError::Missing("client.client_secret".to_string()));
        }

        Ok(Self::new(
            url,
            ClientCredentials {
                client_id: config.client.client_id.clone(),
                client_secret: config.client.client_secret.clone(),
            },
        )
        .with_content_type(endpoint.content_type)
        .with_auth_method(endpoint.auth_method))
    }

    /// Sets the request body encoding.
    #[must_use]
    pub fn with_content_type(mut self, content_type: TokenRequestContentType) -> Self {
        self.content_type = content_type;
        self
    }

    /// Sets the client authentication method.
    #[must_use]
    pub fn with_auth_method(mut self, auth_method: TokenEndpointAuthMethod) -> Self {
        self.auth_method = auth_method;
        self
    }

    /// Uses a preconfigured HTTP client (timeouts, proxies, TLS roots).
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Token endpoint URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Exchanges an authorization code.
    ///
    /// # Errors
    /// See [`TokenEndpointError`].
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&PkceVerifier>,
    ) -> Result<TokenEndpointResponse, TokenEndpointError> {
        let mut params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
        ];
        if let Some(redirect_uri) = redirect_uri {
            params.push(("redirect_uri", redirect_uri.to_string()));
        }
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier.as_str().to_string()));
        }

        self.post(params).await
    }

    /// Uses a provider refresh token.
    ///
    /// # Errors
    /// See [`TokenEndpointError`].
    pub async fn refresh(
        &self,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<TokenEndpointResponse, TokenEndpointError> {
        let mut params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];
        if let Some(scope) = scope {
            params.push(("scope", scope.to_string()));
        }

        self.post(params).await
    }

    async fn post(
        &self,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<TokenEndpointResponse, TokenEndpointError> {
        let grant_type = params
            .first()
            .map(|(_, value)| value.clone())
            .unwrap_or_default();

        let mut request = self.http.post(self.url.clone());
        match (self.auth_method, &self.credentials.client_secret) {
            (TokenEndpointAuthMethod::ClientSecretBasic, Some(secret)) => {
                request = request.basic_auth(
                    form_encode(&self.credentials.client_id),
                    Some(form_encode(secret)),
                );
            }
            (TokenEndpointAuthMethod::ClientSecretPost, Some(secret)) => {
                params.push(("client_id", self.credentials.client_id.clone()));
                params.push(("client_secret", secret.clone()));
            }
            _ => params.push(("client_id", self.credentials.client_id.clone())),
        }

        request = match self.content_type {
            TokenRequestContentType::Form => request.form(&params),
            TokenRequestContentType::Json => {
                let body: HashMap<&str, String> = params.into_iter().collect();
                request.json(&body)
            }
        };

        debug!(
            endpoint = %self.url,
            grant_type = %grant_type,
            auth_method = %self.auth_method,
            content_type = %self.content_type,
            "Calling token endpoint"
        );

        let response = request
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<TokenErrorResponse>(&body) {
                warn!(status = status.as_u16(), error = %error.error, "Token endpoint rejected grant");
                return Err(TokenEndpointError::Protocol(error));
            }
            warn!(status = status.as_u16(), "Token endpoint failed");
            return Err(TokenEndpointError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| TokenEndpointError::invalid_response(e.to_string()))
    }
}

/// `application/x-www-form-urlencoded` encoding applied to HTTP Basic
/// client credentials (RFC 6749 section 2.3.1).
fn form_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_method_serde() {
        let method: TokenEndpointAuthMethod =
            serde_json::from_str("\"client_secret_post\"").unwrap();
        assert_eq!(method, TokenEndpointAuthMethod::ClientSecretPost);
        assert_eq!(TokenEndpointAuthMethod::default().as_str(), "client_secret_basic");
        assert!(!TokenEndpointAuthMethod::None.requires_secret());
        assert!(TokenEndpointAuthMethod::ClientSecretBasic.requires_secret());
    }

    #[test]
    fn test_content_type_serde() {
        for raw in ["\"form\"", "\"application/x-www-form-urlencoded\""] {
            let ct: TokenRequestContentType = serde_json::from_str(raw).unwrap();
            assert_eq!(ct, TokenRequestContentType::Form);
        }
        let ct: TokenRequestContentType = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(ct.mime(), "application/json");
        assert_eq!(
            serde_json::to_string(&TokenRequestContentType::Form).unwrap(),
            "\"form\""
        );
    }

    #[test]
    fn test_token_response_extra_members() {
        let response: TokenEndpointResponse = serde_json::from_value(serde_json::json!({
            "access_token": "at",
            "token_type": "Bearer",
            "expires_in": 300,
            "id_token": "idt",
            "session_state": "abc"
        }))
        .unwrap();
        assert_eq!(response.expires_in, Some(300));
        assert_eq!(response.id_token.as_deref(), Some("idt"));
        assert_eq!(response.extra["session_state"], "abc");
    }

    #[test]
    fn test_token_error_to_authorization_error() {
        let error = TokenErrorResponse {
            error: "invalid_grant".to_string(),
            error_description: Some("Code expired".to_string()),
            error_uri: None,
        };
        assert!(error.is_invalid_grant());
        assert_eq!(error.to_string(), "invalid_grant: Code expired");

        // invalid_grant is a token endpoint code, not an authorization one
        let auth: AuthorizationErrorResponse = error.into();
        assert_eq!(auth.error.as_str(), "server_error");
        assert_eq!(
            auth.error_description.as_deref(),
            Some("invalid_grant: Code expired")
        );
    }

    #[test]
    fn test_status_error_mapping() {
        let unavailable = TokenEndpointError::Status {
            status: 503,
            body: "down".to_string(),
        };
        assert_eq!(
            unavailable.to_authorization_error().error.as_str(),
            "temporarily_unavailable"
        );
        assert_eq!(
            TokenEndpointError::invalid_response("x")
                .to_authorization_error()
                .error
                .as_str(),
            "server_error"
        );
    }

    #[test]
    fn test_from_config_requires_url_and_secret() {
        let mut config = TokenSecurityConfig::default();
        assert!(TokenEndpointClient::from_config(&config).is_err());

        config.token_endpoint.url = Some(Url::parse("https://idp.example.com/token").unwrap());
        config.client.client_id = "app".to_string();
        assert!(TokenEndpointClient::from_config(&config).is_err());

        config.token_endpoint.auth_method = TokenEndpointAuthMethod::None;
        let client = TokenEndpointClient::from_config(&config).unwrap();
        assert_eq!(client.url().as_str(), "https://idp.example.com/token");
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let credentials = ClientCredentials::confidential("app", "s3cret");
        assert!(!format!("{credentials:?}").contains("s3cret"));
    }

    #[tokio::test]
    async fn test_basic_credentials_are_form_encoded() {
        use base64::Engine;
        use base64::engine::general_purpose::STANDARD;
        use wiremock::matchers::{header, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let expected = format!("Basic {}", STANDARD.encode("my%3Aapp:s%2Bcret+word"));
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", expected.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TokenEndpointClient::new(
            Url::parse(&format!("{}/token", server.uri())).unwrap(),
            ClientCredentials::confidential("my:app", "s+cret word"),
        );
        let response = client.refresh("rt", None).await.unwrap();
        assert_eq!(response.access_token, "at");
    }
}
