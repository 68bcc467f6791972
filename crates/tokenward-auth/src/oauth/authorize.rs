//! Authorization requests sent to the provider.
//!
//! The user agent is redirected to the provider's authorization endpoint with
//! `response_type=code`, the client registration and fresh `state`, `nonce`
//! and PKCE values. Those secrets are kept in a [`PendingAuthorization`] until
//! the callback arrives.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use time::OffsetDateTime;
use url::Url;

use super::pkce::PkceVerifier;
use crate::config::{ConfigError, TokenSecurityConfig};

/// Generates a 128-bit random value encoded as base64url.
///
/// Used for `state` and `nonce`.
#[must_use]
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Secrets of an authorization request awaiting its callback.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    /// CSRF state sent with the request.
    pub state: String,
    /// OpenID Connect nonce expected in the ID token.
    pub nonce: Option<String>,
    /// PKCE verifier to send with the code exchange.
    pub pkce_verifier: Option<PkceVerifier>,
    /// Redirect URI the code is bound to.
    pub redirect_uri: String,
    /// When the request was created.
    pub created_at: OffsetDateTime,
}

impl PendingAuthorization {
    /// Returns `true` if the authorization is older than `max_age_secs`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime, max_age_secs: i64) -> bool {
        (now - self.created_at).whole_seconds() >= max_age_secs
    }
}

/// Builds authorization-code requests.
#[derive(Debug, Clone)]
pub struct AuthorizationRequestBuilder {
    authorization_url: Url,
    client_id: String,
    redirect_uri: String,
    scopes: Vec<String>,
    use_pkce: bool,
    use_nonce: bool,
    state: Option<String>,
    extra: Vec<(String, String)>,
}

impl AuthorizationRequestBuilder {
    /// Starts a request for `client_id` against `authorization_url`.
    #[must_use]
    pub fn new(
        authorization_url: Url,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            authorization_url,
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes: vec!["openid".to_string()],
            use_pkce: true,
            use_nonce: true,
            state: None,
            extra: Vec::new(),
        }
    }

    /// Builds a request from the `client` configuration section.
    ///
    /// # Errors
    /// Returns [`ConfigError::Missing`] when the authorization URL, redirect
    /// URI or client id is not configured.
    pub fn from_config(config: &TokenSecurityConfig) -> Result<Self, ConfigError> {
        let client = &config.client;
        let authorization_url = client
            .authorization_url
            .clone()
            .ok_or_else(|| ConfigError::Missing("client.authorization_url".to_string()))?;
        let redirect_uri = client
            .redirect_uri
            .as_ref()
            .ok_or_else(|| ConfigError::Missing("client.redirect_uri".to_string()))?;
        if client.client_id.is_empty() {
            return Err(ConfigError::Missing("client.client_id".to_string()));
        }

        Ok(
            Self::new(authorization_url, client.client_id.clone(), redirect_uri.as_str())
                .scopes(client.scopes.iter().cloned())
                .pkce(client.use_pkce),
        )
    }

    /// Replaces the requested scopes.
    #[must_use]
    pub fn scopes(mut self, scopes: impl IntoIterator<Item = String>) -> Self {
        self.scopes = scopes.into_iter().collect();
        self
    }

    /// Enables or disables PKCE.
    #[must_use]
    pub fn pkce(mut self, enabled: bool) -> Self {
        self.use_pkce = enabled;
        self
    }

    /// Enables or disables the OpenID Connect nonce.
    #[must_use]
    pub fn nonce(mut self, enabled: bool) -> Self {
        self.use_nonce = enabled;
        self
    }

    /// Uses a caller-chosen state instead of a random one.
    #[must_use]
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Adds a provider-specific parameter (`prompt`, `login_hint`, ...).
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((name.into(), value.into()));
        self
    }

    /// Builds the redirect URL and the matching pending authorization.
    #[must_use]
    pub fn build(self) -> (Url, PendingAuthorization) {
        let state = self.state.unwrap_or_else(generate_state);
        let nonce = self.use_nonce.then(generate_state);
        let pkce_verifier = self.use_pkce.then(PkceVerifier::generate);

        let mut url = self.authorization_url;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("state", &state);
            if !self.scopes.is_empty() {
                pairs.append_pair("scope", &self.scopes.join(" "));
            }
            if let Some(nonce) = &nonce {
                pairs.append_pair("nonce", nonce);
            }
            if let Some(verifier) = &pkce_verifier {
                let challenge = verifier.challenge();
                pairs
                    .append_pair("code_challenge", challenge.as_str())
                    .append_pair("code_challenge_method", challenge.method());
            }
            for (name, value) in &self.extra {
                pairs.append_pair(name, value);
            }
        }

        let pending = PendingAuthorization {
            state,
            nonce,
            pkce_verifier,
            redirect_uri: self.redirect_uri,
            created_at: OffsetDateTime::now_utc(),
        };

        (url, pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    fn builder() -> AuthorizationRequestBuilder {
        AuthorizationRequestBuilder::new(
            Url::parse("https://idp.example.com/authorize").unwrap(),
            "my-app",
            "https://app.example.com/callback",
        )
    }

    #[test]
    fn test_build_request() {
        let (url, pending) = builder()
            .scopes(["openid".to_string(), "profile".to_string()])
            .param("prompt", "login")
            .build();
        let params = query(&url);

        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "my-app");
        assert_eq!(params["redirect_uri"], "https://app.example.com/callback");
        assert_eq!(params["scope"], "openid profile");
        assert_eq!(params["state"], pending.state);
        assert_eq!(params["nonce"], pending.nonce.clone().unwrap());
        assert_eq!(params["prompt"], "login");
        assert_eq!(params["code_challenge_method"], "S256");

        let verifier = pending.pkce_verifier.unwrap();
        assert_eq!(params["code_challenge"], verifier.challenge().as_str());
    }

    #[test]
    fn test_build_without_pkce_and_nonce() {
        let (url, pending) = builder().pkce(false).nonce(false).state("fixed").build();
        let params = query(&url);
        assert_eq!(params["state"], "fixed");
        assert!(!params.contains_key("code_challenge"));
        assert!(!params.contains_key("nonce"));
        assert!(pending.pkce_verifier.is_none());
    }

    #[test]
    fn test_states_are_unique() {
        assert_ne!(generate_state(), generate_state());
        assert_eq!(generate_state().len(), 22);
    }

    #[test]
    fn test_from_config() {
        let mut config = TokenSecurityConfig::default();
        assert!(AuthorizationRequestBuilder::from_config(&config).is_err());

        config.client.client_id = "app".to_string();
        config.client.authorization_url = Some(Url::parse("https://idp.example.com/auth").unwrap());
        config.client.redirect_uri = Some(Url::parse("https://app.example.com/cb").unwrap());
        config.client.use_pkce = false;

        let (url, _) = AuthorizationRequestBuilder::from_config(&config).unwrap().build();
        let params = query(&url);
        assert_eq!(params["client_id"], "app");
        assert_eq!(params["scope"], "openid");
        assert!(!params.contains_key("code_challenge"));
    }

    #[test]
    fn test_pending_expiry() {
        let (_, pending) = builder().build();
        let later = pending.created_at + time::Duration::seconds(600);
        assert!(pending.is_expired_at(later, 600));
        assert!(!pending.is_expired_at(pending.created_at, 600));
    }
}
