//! Access/refresh token orchestration.
//!
//! [`AccessRefreshTokenGenerator`] is the single entry point for issuing
//! tokens. It builds claims, encodes them with the active codec, issues or
//! passes through a refresh token and renders the wire response. It never
//! knows which token family is active.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::claims::{ClaimSet, ClaimsGenerator, DefaultClaimsGenerator, Principal};
use crate::clock::{Clock, SystemClock};
use crate::codec::{TokenCodec, ValidationError};
use crate::config::SharedConfig;
use crate::error::AuthError;
use crate::event::{EventPublisher, NoopEventPublisher, TokenRefreshedEvent};
use crate::refresh::{
    DefaultRefreshTokenGenerator, RefreshTokenClaims, RefreshTokenGenerator, RefreshTokenValidator,
};
use crate::render::{AccessRefreshToken, BearerTokenRenderer, TokenRenderer};
use crate::AuthResult;

/// Looks up the principal a refresh token was issued to.
///
/// Implemented by the caller's storage layer. Returning `None` rejects the
/// refresh (unknown or revoked subject).
pub trait PrincipalResolver: Send + Sync {
    /// Resolves the principal for a validated refresh token.
    fn resolve(&self, refresh_token: &RefreshTokenClaims) -> Option<Principal>;
}

impl<F> PrincipalResolver for F
where
    F: Fn(&RefreshTokenClaims) -> Option<Principal> + Send + Sync,
{
    fn resolve(&self, refresh_token: &RefreshTokenClaims) -> Option<Principal> {
        self(refresh_token)
    }
}

/// Issues access tokens paired with refresh tokens.
#[derive(Clone)]
pub struct AccessRefreshTokenGenerator {
    config: SharedConfig,
    codec: Arc<dyn TokenCodec>,
    claims_generator: Arc<dyn ClaimsGenerator>,
    refresh_generator: Arc<dyn RefreshTokenGenerator>,
    refresh_validator: RefreshTokenValidator,
    renderer: Arc<dyn TokenRenderer>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl AccessRefreshTokenGenerator {
    /// Starts building a generator around `codec`.
    #[must_use]
    pub fn builder(
        config: SharedConfig,
        codec: Arc<dyn TokenCodec>,
    ) -> AccessRefreshTokenGeneratorBuilder {
        AccessRefreshTokenGeneratorBuilder::new(config, codec)
    }

    /// Issues an access token and a fresh refresh token for `principal`.
    ///
    /// # Errors
    /// Returns [`AuthError::Configuration`] when issuance is disabled, or
    /// [`AuthError::Encoding`] if the codec rejects the claims.
    pub fn generate(&self, principal: &Principal) -> AuthResult<AccessRefreshToken> {
        self.ensure_enabled()?;
        let expiration = self.access_token_expiration();
        let access_token = self.encode_access_token(
            self.claims_generator.generate_claims(principal, expiration),
        )?;
        let refresh_token = self.refresh_generator.generate_refresh_token(principal)?;

        debug!(
            subject = %principal.name,
            family = %self.codec.family(),
            refresh = refresh_token.is_some(),
            "Issued access token"
        );

        Ok(self
            .renderer
            .render(access_token, refresh_token, expiration))
    }

    /// Issues an access token for `principal`, passing `refresh_token`
    /// through unchanged instead of minting a new one.
    ///
    /// # Errors
    /// Returns [`AuthError::Encoding`] if the codec rejects the claims.
    pub fn generate_with_refresh_token(
        &self,
        refresh_token: impl Into<String>,
        principal: &Principal,
    ) -> AuthResult<AccessRefreshToken> {
        self.ensure_enabled()?;
        let expiration = self.access_token_expiration();
        let access_token = self.encode_access_token(
            self.claims_generator.generate_claims(principal, expiration),
        )?;

        debug!(subject = %principal.name, "Issued access token for existing refresh token");

        Ok(self
            .renderer
            .render(access_token, Some(refresh_token.into()), expiration))
    }

    /// Issues an access token from an existing claim set, passing
    /// `refresh_token` through unchanged.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidGrant`] if the claims carry no subject, or
    /// [`AuthError::Encoding`] if the codec rejects them.
    pub fn generate_from_claims(
        &self,
        refresh_token: impl Into<String>,
        claims: &ClaimSet,
    ) -> AuthResult<AccessRefreshToken> {
        self.ensure_enabled()?;
        if claims.subject().is_none() {
            return Err(AuthError::invalid_grant("Claims have no subject"));
        }

        let expiration = self.access_token_expiration();
        let access_token = self.encode_access_token(
            self.claims_generator
                .generate_claims_from(claims, expiration),
        )?;

        Ok(self
            .renderer
            .render(access_token, Some(refresh_token.into()), expiration))
    }

    /// Issues a refresh token, or `None` when refresh tokens are disabled.
    ///
    /// # Errors
    /// Returns [`AuthError::Encoding`] if a signed refresh token cannot be
    /// produced.
    pub fn generate_refresh_token(&self, principal: &Principal) -> AuthResult<Option<String>> {
        self.ensure_enabled()?;
        Ok(self.refresh_generator.generate_refresh_token(principal)?)
    }

    /// Exchanges a signed refresh token for a new access token.
    ///
    /// The refresh token is validated, its subject resolved through
    /// `resolver`, and then passed through unchanged. It is not invalidated;
    /// single-use policies belong to the resolver's store.
    ///
    /// # Errors
    /// - [`AuthError::Configuration`] when issuance is disabled
    /// - [`AuthError::RefreshDisabled`] when refresh tokens are disabled
    /// - [`AuthError::InvalidGrant`] when the token does not verify
    /// - [`AuthError::UnknownPrincipal`] when the subject cannot be resolved
    /// - [`AuthError::Encoding`] when the new access token cannot be encoded
    pub fn refresh(
        &self,
        refresh_token: &str,
        resolver: &dyn PrincipalResolver,
    ) -> AuthResult<AccessRefreshToken> {
        self.ensure_enabled()?;
        if !self.config.refresh_enabled() {
            return Err(AuthError::RefreshDisabled);
        }

        let claims = self.refresh_validator.validate(refresh_token).map_err(|e| {
            warn!(kind = %e.kind(), "Rejected refresh token");
            AuthError::invalid_grant(e.to_string())
        })?;

        let principal = resolver.resolve(&claims).ok_or_else(|| {
            warn!(subject = %claims.subject, token_id = %claims.token_id, "Refresh token subject not resolved");
            AuthError::unknown_principal(claims.subject.clone())
        })?;

        let response = self.generate_with_refresh_token(refresh_token, &principal)?;

        self.publisher.publish(
            TokenRefreshedEvent {
                principal_id: principal.name,
                refresh_token_id: claims.token_id,
                timestamp: self.clock.now(),
            }
            .into(),
        );

        Ok(response)
    }

    /// Verifies an access token issued by this generator at the current
    /// time of the configured clock.
    ///
    /// # Errors
    /// Returns the codec's [`ValidationError`].
    pub fn validate_access_token(&self, token: &str) -> Result<ClaimSet, ValidationError> {
        self.codec.decode_at(token, self.clock.unix_timestamp())
    }

    /// Verifies a bearer access token and returns its claims.
    ///
    /// Tokens without `exp` are refused, so a signed refresh token cannot be
    /// presented as an access token.
    ///
    /// # Errors
    /// - [`AuthError::TokenExpired`] when the token has expired
    /// - [`AuthError::InvalidToken`] when it is malformed, fails
    ///   verification or carries no expiration
    pub fn authenticate(&self, token: &str) -> AuthResult<ClaimSet> {
        let claims = self.validate_access_token(token).map_err(|e| {
            debug!(kind = %e.kind(), "Rejected bearer token");
            AuthError::from(e)
        })?;

        if claims.expiration().is_none() {
            debug!("Rejected bearer token without expiration");
            return Err(AuthError::invalid_token("Token has no expiration"));
        }
        Ok(claims)
    }

    /// Access token lifetime in seconds, read from configuration per call.
    #[must_use]
    pub fn access_token_expiration(&self) -> i64 {
        self.config.access_token_expiration()
    }

    /// The active codec.
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn TokenCodec> {
        &self.codec
    }

    /// The shared configuration.
    #[must_use]
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    fn ensure_enabled(&self) -> AuthResult<()> {
        if self.config.issuance_enabled() {
            Ok(())
        } else {
            warn!("Token issuance requested while disabled");
            Err(AuthError::configuration("Token issuance is disabled"))
        }
    }

    fn encode_access_token(&self, claims: ClaimSet) -> AuthResult<String> {
        self.codec.encode(&claims).map_err(|e| {
            warn!(error = %e, family = %self.codec.family(), "Access token encoding failed");
            AuthError::from(e)
        })
    }
}

impl std::fmt::Debug for AccessRefreshTokenGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessRefreshTokenGenerator")
            .field("family", &self.codec.family())
            .field("key_id", &self.codec.key_id())
            .finish_non_exhaustive()
    }
}

/// Builder for [`AccessRefreshTokenGenerator`].
///
/// Every collaborator has a default derived from the configuration, codec,
/// clock and publisher.
pub struct AccessRefreshTokenGeneratorBuilder {
    config: SharedConfig,
    codec: Arc<dyn TokenCodec>,
    claims_generator: Option<Arc<dyn ClaimsGenerator>>,
    refresh_generator: Option<Arc<dyn RefreshTokenGenerator>>,
    renderer: Arc<dyn TokenRenderer>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl AccessRefreshTokenGeneratorBuilder {
    fn new(config: SharedConfig, codec: Arc<dyn TokenCodec>) -> Self {
        Self {
            config,
            codec,
            claims_generator: None,
            refresh_generator: None,
            renderer: Arc::new(BearerTokenRenderer),
            publisher: Arc::new(NoopEventPublisher),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the claims generator.
    #[must_use]
    pub fn claims_generator(mut self, generator: Arc<dyn ClaimsGenerator>) -> Self {
        self.claims_generator = Some(generator);
        self
    }

    /// Replaces the refresh token generator.
    #[must_use]
    pub fn refresh_generator(mut self, generator: Arc<dyn RefreshTokenGenerator>) -> Self {
        self.refresh_generator = Some(generator);
        self
    }

    /// Replaces the renderer.
    #[must_use]
    pub fn renderer(mut self, renderer: Arc<dyn TokenRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Sets the clock used for claims and validation.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the generator.
    #[must_use]
    pub fn build(self) -> AccessRefreshTokenGenerator {
        let claims_generator = self.claims_generator.unwrap_or_else(|| {
            let config = self.config.load();
            let mut generator = DefaultClaimsGenerator::new()
                .with_roles_claim(config.roles_claim.as_str())
                .with_clock(self.clock.clone());
            if let Some(issuer) = &config.issuer {
                generator = generator.with_issuer(issuer.as_str());
            }
            Arc::new(generator)
        });

        let refresh_generator = self.refresh_generator.unwrap_or_else(|| {
            Arc::new(
                DefaultRefreshTokenGenerator::new(self.codec.clone(), self.config.clone())
                    .with_publisher(self.publisher.clone())
                    .with_clock(self.clock.clone()),
            )
        });

        AccessRefreshTokenGenerator {
            refresh_validator: RefreshTokenValidator::new(self.codec.clone()),
            config: self.config,
            codec: self.codec,
            claims_generator,
            refresh_generator,
            renderer: self.renderer,
            publisher: self.publisher,
            clock: self.clock,
        }
    }
}
