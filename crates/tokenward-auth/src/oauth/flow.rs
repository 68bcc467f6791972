//! Authorization-code flow against an external provider.
//!
//! ```text
//! begin() ──► AwaitingRedirect ──► receive_callback() ──► Success ──► complete()
//!                                                    └──► Error           │
//!                                                                         ▼
//!                                   token endpoint ► id_token ► Principal ► AccessRefreshToken
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use super::authorize::{AuthorizationRequestBuilder, PendingAuthorization};
use super::pending::{InMemoryPendingAuthorizationStore, PendingAuthorizationStore};
use super::response::{
    AuthorizationErrorCode, AuthorizationErrorResponse, CallbackParameters, FlowState,
};
use super::token_endpoint::{TokenEndpointClient, TokenEndpointError, TokenEndpointResponse};
use crate::claims::{ClaimSet, ClaimValue, Principal, names};
use crate::clock::{Clock, SystemClock};
use crate::codec::{TokenCodec, ValidationError};
use crate::error::AuthError;
use crate::generator::AccessRefreshTokenGenerator;
use crate::render::AccessRefreshToken;

// =============================================================================
// Authentication mapping
// =============================================================================

/// Failures turning a token endpoint response into a [`Principal`].
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    /// The response carries no `id_token`.
    #[error("Token response has no id_token")]
    MissingIdToken,

    /// The ID token did not verify.
    #[error("Invalid id_token: {0}")]
    InvalidIdToken(#[from] ValidationError),

    /// A required claim is missing or has the wrong value.
    #[error("id_token claim '{claim}' rejected: {reason}")]
    ClaimRejected {
        /// Claim name.
        claim: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl MappingError {
    /// Creates a new `ClaimRejected` error.
    #[must_use]
    pub fn claim_rejected(claim: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ClaimRejected {
            claim: claim.into(),
            reason: reason.into(),
        }
    }
}

/// Derives the authenticated principal from a provider token response.
pub trait AuthenticationMapper: Send + Sync {
    /// Maps `response` to a principal.
    ///
    /// # Errors
    /// Returns [`MappingError`] if the response does not identify a user.
    fn authenticate(
        &self,
        response: &TokenEndpointResponse,
        pending: &PendingAuthorization,
    ) -> Result<Principal, MappingError>;
}

/// Verifies the OpenID Connect `id_token` and maps its claims.
///
/// `sub` becomes the principal name, the roles claim becomes its roles and
/// every other non-registered claim (except `nonce`) becomes an attribute.
pub struct IdTokenAuthenticationMapper {
    codec: Arc<dyn TokenCodec>,
    roles_claim: String,
    issuer: Option<String>,
    audience: Option<String>,
    clock: Arc<dyn Clock>,
}

impl IdTokenAuthenticationMapper {
    /// Creates a mapper verifying ID tokens with `codec`.
    #[must_use]
    pub fn new(codec: Arc<dyn TokenCodec>) -> Self {
        Self {
            codec,
            roles_claim: names::ROLES.to_string(),
            issuer: None,
            audience: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Reads roles from `claim` instead of `roles`.
    #[must_use]
    pub fn with_roles_claim(mut self, claim: impl Into<String>) -> Self {
        self.roles_claim = claim.into();
        self
    }

    /// Requires `iss` to equal `issuer`.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Requires `aud` to contain `audience` (normally the client id).
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Replaces the clock used for the expiration check.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn check_claims(
        &self,
        claims: &ClaimSet,
        pending: &PendingAuthorization,
    ) -> Result<(), MappingError> {
        if let Some(expected) = &self.issuer {
            if claims.issuer() != Some(expected.as_str()) {
                return Err(MappingError::claim_rejected(names::ISSUER, "unexpected issuer"));
            }
        }

        if let Some(expected) = &self.audience {
            let audiences = claims
                .get(names::AUDIENCE)
                .map(ClaimValue::to_string_list)
                .unwrap_or_default();
            if !audiences.iter().any(|aud| aud == expected) {
                return Err(MappingError::claim_rejected(names::AUDIENCE, "client not in audience"));
            }
        }

        if let Some(expected) = &pending.nonce {
            let nonce = claims.get("nonce").and_then(ClaimValue::as_str);
            if nonce != Some(expected.as_str()) {
                return Err(MappingError::claim_rejected("nonce", "nonce mismatch"));
            }
        }

        Ok(())
    }
}

impl AuthenticationMapper for IdTokenAuthenticationMapper {
    fn authenticate(
        &self,
        response: &TokenEndpointResponse,
        pending: &PendingAuthorization,
    ) -> Result<Principal, MappingError> {
        let id_token = response
            .id_token
            .as_deref()
            .ok_or(MappingError::MissingIdToken)?;

        let claims = self
            .codec
            .decode_at(id_token, self.clock.unix_timestamp())?;
        self.check_claims(&claims, pending)?;

        let subject = claims
            .subject()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MappingError::claim_rejected(names::SUBJECT, "missing"))?;

        let mut principal = Principal::new(subject).with_roles(claims.roles(&self.roles_claim));
        for (name, value) in claims.iter() {
            if names::REGISTERED.contains(&name) || name == self.roles_claim || name == "nonce" {
                continue;
            }
            principal.attributes.insert(name.to_string(), value.clone());
        }

        debug!(subject = %principal.name, roles = principal.roles.len(), "Mapped id_token");
        Ok(principal)
    }
}

impl std::fmt::Debug for IdTokenAuthenticationMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenAuthenticationMapper")
            .field("family", &self.codec.family())
            .field("roles_claim", &self.roles_claim)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Flow
// =============================================================================

/// Failures of the authorization-code flow.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The provider or the callback reported an authorization error.
    #[error(transparent)]
    Authorization(#[from] AuthorizationErrorResponse),

    /// The code exchange failed.
    #[error(transparent)]
    TokenEndpoint(#[from] TokenEndpointError),

    /// The token response did not identify a user.
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// Local tokens could not be issued.
    #[error(transparent)]
    Generation(#[from] AuthError),
}

impl FlowError {
    /// Returns the OAuth error body to send to the client.
    #[must_use]
    pub fn to_authorization_error(&self) -> AuthorizationErrorResponse {
        match self {
            Self::Authorization(error) => error.clone(),
            Self::TokenEndpoint(error) => error.to_authorization_error(),
            Self::Mapping(error) => AuthorizationErrorResponse::new(AuthorizationErrorCode::AccessDenied)
                .with_description(error.to_string()),
            Self::Generation(_) => {
                AuthorizationErrorResponse::server_error("Token issuance failed")
            }
        }
    }
}

/// Result of [`AuthorizationCodeFlow::receive_callback`].
#[derive(Debug, Clone)]
pub struct ReceivedCallback {
    state: FlowState,
    pending: Option<PendingAuthorization>,
}

impl ReceivedCallback {
    /// Classified callback.
    #[must_use]
    pub fn state(&self) -> &FlowState {
        &self.state
    }

    /// Pending authorization matched by the echoed state.
    #[must_use]
    pub fn pending(&self) -> Option<&PendingAuthorization> {
        self.pending.as_ref()
    }
}

/// Drives authorization-code logins and issues local tokens for them.
pub struct AuthorizationCodeFlow {
    request: AuthorizationRequestBuilder,
    token_client: TokenEndpointClient,
    mapper: Arc<dyn AuthenticationMapper>,
    generator: Arc<AccessRefreshTokenGenerator>,
    store: Arc<dyn PendingAuthorizationStore>,
}

impl AuthorizationCodeFlow {
    /// Creates a flow keeping pending authorizations in memory.
    #[must_use]
    pub fn new(
        request: AuthorizationRequestBuilder,
        token_client: TokenEndpointClient,
        mapper: Arc<dyn AuthenticationMapper>,
        generator: Arc<AccessRefreshTokenGenerator>,
    ) -> Self {
        Self {
            request,
            token_client,
            mapper,
            generator,
            store: Arc::new(InMemoryPendingAuthorizationStore::new()),
        }
    }

    /// Uses a different pending authorization store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn PendingAuthorizationStore>) -> Self {
        self.store = store;
        self
    }

    /// Starts a login: returns the provider redirect URL and records the
    /// pending authorization.
    #[must_use]
    pub fn begin(&self) -> (Url, PendingAuthorization) {
        let (url, pending) = self.request.clone().build();
        self.store.insert(pending.clone());
        debug!(endpoint = %self.token_client.url(), "Authorization request created");
        (url, pending)
    }

    /// Classifies a redirect callback against its pending authorization.
    ///
    /// The pending authorization is consumed. Provider errors are reported
    /// as-is; a code whose state matches no pending authorization is
    /// `invalid_request` ("state mismatch").
    #[must_use]
    pub fn receive_callback(&self, params: &CallbackParameters) -> ReceivedCallback {
        let pending = params.state().and_then(|state| self.store.take(state));

        let state = match &pending {
            Some(pending) => params.classify_with_state(&pending.state),
            None => match params.classify() {
                FlowState::Success { state, .. } => {
                    warn!("Authorization callback for unknown or expired state");
                    let mut error = AuthorizationErrorResponse::invalid_request("state mismatch");
                    error.state = state;
                    FlowState::Error(error)
                }
                other => other,
            },
        };

        ReceivedCallback { state, pending }
    }

    /// Exchanges the code of a successful callback and issues local tokens.
    ///
    /// # Errors
    /// Returns [`FlowError`] naming the step that failed.
    pub async fn complete(&self, callback: ReceivedCallback) -> Result<AccessRefreshToken, FlowError> {
        let (code, _) = callback.state.into_result()?;
        let pending = callback.pending.ok_or_else(|| {
            AuthorizationErrorResponse::invalid_request("state mismatch")
        })?;

        let response = self
            .token_client
            .exchange_code(
                &code,
                Some(pending.redirect_uri.as_str()),
                pending.pkce_verifier.as_ref(),
            )
            .await?;

        let principal = self.mapper.authenticate(&response, &pending)?;
        let tokens = self.generator.generate(&principal)?;

        info!(subject = %principal.name, "Authorization code login completed");
        Ok(tokens)
    }

    /// [`receive_callback`](Self::receive_callback) followed by
    /// [`complete`](Self::complete).
    ///
    /// # Errors
    /// Returns [`FlowError`] naming the step that failed.
    pub async fn handle_callback(
        &self,
        params: &CallbackParameters,
    ) -> Result<AccessRefreshToken, FlowError> {
        self.complete(self.receive_callback(params)).await
    }

    /// The token generator used for local tokens.
    #[must_use]
    pub fn generator(&self) -> &Arc<AccessRefreshTokenGenerator> {
        &self.generator
    }
}

impl std::fmt::Debug for AuthorizationCodeFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCodeFlow")
            .field("request", &self.request)
            .field("token_client", &self.token_client)
            .finish_non_exhaustive()
    }
}
