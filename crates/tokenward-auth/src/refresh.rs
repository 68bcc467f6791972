//! Refresh token generation and validation.
//!
//! Two representations are supported:
//!
//! - **Signed**: the active codec's encoding of `{sub, iat, jti}`. No
//!   expiration is embedded; revocation belongs to the caller's store.
//! - **Opaque**: 256 random bits, base64url encoded. Only a SHA-256 hash of
//!   the value should ever be persisted.
//!
//! Every issued token emits a [`RefreshTokenGeneratedEvent`].

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::claims::{ClaimSet, Principal, names};
use crate::clock::{Clock, SystemClock};
use crate::codec::{EncodingError, TokenCodec, ValidationError};
use crate::config::SharedConfig;
use crate::event::{EventPublisher, NoopEventPublisher, RefreshTokenGeneratedEvent};

/// Refresh token representation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshTokenFormat {
    /// Encoded with the active token codec.
    #[default]
    Signed,
    /// Random credential that must be looked up in a store.
    Opaque,
}

/// Hashes a token value with SHA-256 (hex encoded).
///
/// Used as the storage key and event identifier for opaque tokens.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generates a 256-bit random token encoded as base64url (43 characters).
#[must_use]
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Issues refresh tokens.
pub trait RefreshTokenGenerator: Send + Sync {
    /// Issues a refresh token for `principal`, or `None` when refresh tokens
    /// are disabled.
    ///
    /// # Errors
    /// Returns an error if the signed format is configured and the codec
    /// fails.
    fn generate_refresh_token(&self, principal: &Principal)
    -> Result<Option<String>, EncodingError>;
}

/// Default [`RefreshTokenGenerator`].
///
/// Enablement and format are read from [`SharedConfig`] on every call.
#[derive(Clone)]
pub struct DefaultRefreshTokenGenerator {
    codec: Arc<dyn TokenCodec>,
    config: SharedConfig,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl DefaultRefreshTokenGenerator {
    /// Creates a generator that publishes nowhere.
    #[must_use]
    pub fn new(codec: Arc<dyn TokenCodec>, config: SharedConfig) -> Self {
        Self {
            codec,
            config,
            publisher: Arc::new(NoopEventPublisher),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl RefreshTokenGenerator for DefaultRefreshTokenGenerator {
    fn generate_refresh_token(
        &self,
        principal: &Principal,
    ) -> Result<Option<String>, EncodingError> {
        let config = self.config.load();
        if !config.refresh_token.enabled {
            return Ok(None);
        }

        let now = self.clock.now();
        let (token, token_id, key_id) = match config.refresh_token.format {
            RefreshTokenFormat::Signed => {
                let jti = Uuid::new_v4().to_string();
                let claims = ClaimSet::new()
                    .with(names::SUBJECT, principal.name.as_str())
                    .with(names::ISSUED_AT, now.unix_timestamp())
                    .with(names::TOKEN_ID, jti.as_str());
                let token = self.codec.encode(&claims)?;
                (token, jti, self.codec.key_id().map(String::from))
            }
            RefreshTokenFormat::Opaque => {
                let token = generate_opaque_token();
                let token_id = hash_token(&token);
                (token, token_id, None)
            }
        };

        debug!(
            subject = %principal.name,
            token_id = %token_id,
            format = ?config.refresh_token.format,
            "Refresh token generated"
        );

        self.publisher.publish(
            RefreshTokenGeneratedEvent {
                principal_id: principal.name.clone(),
                key_id,
                token_id,
                timestamp: now,
            }
            .into(),
        );

        Ok(Some(token))
    }
}

impl std::fmt::Debug for DefaultRefreshTokenGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultRefreshTokenGenerator")
            .field("family", &self.codec.family())
            .field("key_id", &self.codec.key_id())
            .finish_non_exhaustive()
    }
}

/// Claims of a validated signed refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenClaims {
    /// Subject the token was issued to.
    pub subject: String,
    /// Issue time (Unix seconds).
    pub issued_at: i64,
    /// Token identifier.
    pub token_id: String,
}

/// Validates signed refresh tokens.
#[derive(Clone)]
pub struct RefreshTokenValidator {
    codec: Arc<dyn TokenCodec>,
}

impl RefreshTokenValidator {
    /// Creates a validator using `codec`.
    #[must_use]
    pub fn new(codec: Arc<dyn TokenCodec>) -> Self {
        Self { codec }
    }

    /// Verifies `token` and extracts its claims.
    ///
    /// Opaque tokens cannot be verified without a store and are reported as
    /// malformed. Access tokens are rejected because they carry `exp`.
    ///
    /// # Errors
    /// Returns [`ValidationError`] if the token does not verify or lacks the
    /// refresh token claims.
    pub fn validate(&self, token: &str) -> Result<RefreshTokenClaims, ValidationError> {
        let claims = self.codec.decode(token)?;

        if claims.contains(names::EXPIRATION) {
            return Err(ValidationError::malformed(
                "Access token presented as refresh token",
            ));
        }

        let subject = claims
            .subject()
            .ok_or_else(|| ValidationError::malformed("Refresh token has no subject"))?;
        let issued_at = claims
            .issued_at()
            .ok_or_else(|| ValidationError::malformed("Refresh token has no issue time"))?;
        let token_id = claims
            .token_id()
            .ok_or_else(|| ValidationError::malformed("Refresh token has no id"))?;

        Ok(RefreshTokenClaims {
            subject: subject.to_string(),
            issued_at,
            token_id: token_id.to_string(),
        })
    }
}

impl std::fmt::Debug for RefreshTokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenValidator")
            .field("family", &self.codec.family())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::codec::{PasetoCodec, ValidationErrorKind};
    use crate::config::TokenSecurityConfig;
    use crate::event::{BroadcastEventPublisher, SecurityEvent};

    fn codec() -> Arc<dyn TokenCodec> {
        Arc::new(
            PasetoCodec::generate_local()
                .unwrap()
                .with_key_id("k1")
                .unwrap(),
        )
    }

    fn config(enabled: bool, format: RefreshTokenFormat) -> SharedConfig {
        let mut config = TokenSecurityConfig::default();
        config.refresh_token.enabled = enabled;
        config.refresh_token.format = format;
        SharedConfig::new(config)
    }

    #[test]
    fn test_hash_token() {
        let hash = hash_token("test-token-value");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("test-token-value"));
        assert_ne!(hash, hash_token("different-token"));
    }

    #[test]
    fn test_generate_opaque_token() {
        let token = generate_opaque_token();
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(token, generate_opaque_token());
    }

    #[test]
    fn test_disabled_returns_none() {
        let generator =
            DefaultRefreshTokenGenerator::new(codec(), config(false, RefreshTokenFormat::Signed));
        for name in ["alice", "bob", ""] {
            assert!(
                generator
                    .generate_refresh_token(&Principal::new(name))
                    .unwrap()
                    .is_none()
            );
        }
    }

    #[tokio::test]
    async fn test_signed_token_emits_event_and_validates() {
        let codec = codec();
        let publisher = BroadcastEventPublisher::new();
        let mut events = publisher.subscribe();
        let generator = DefaultRefreshTokenGenerator::new(
            codec.clone(),
            config(true, RefreshTokenFormat::Signed),
        )
        .with_publisher(Arc::new(publisher))
        .with_clock(Arc::new(FixedClock::at_unix(1_700_000_000)));

        let token = generator
            .generate_refresh_token(&Principal::new("alice"))
            .unwrap()
            .unwrap();

        // signed refresh tokens carry exactly sub, iat and jti
        let raw = codec.decode_at(&token, 1_700_000_000).unwrap();
        assert_eq!(raw.len(), 3);
        assert!(raw.contains(names::TOKEN_ID));

        let claims = RefreshTokenValidator::new(codec).validate(&token).unwrap();
        assert_eq!(claims.subject, "alice");
        assert_eq!(claims.issued_at, 1_700_000_000);
        assert_eq!(raw.token_id(), Some(claims.token_id.as_str()));

        let SecurityEvent::RefreshTokenGenerated(event) = events.recv().await.unwrap() else {
            panic!("unexpected event");
        };
        assert_eq!(event.principal_id, "alice");
        assert_eq!(event.key_id.as_deref(), Some("k1"));
        assert_eq!(event.token_id, claims.token_id);
        assert!(!event.token_id.contains(&token));
    }

    #[tokio::test]
    async fn test_opaque_token_event_carries_hash() {
        let publisher = BroadcastEventPublisher::new();
        let mut events = publisher.subscribe();
        let generator =
            DefaultRefreshTokenGenerator::new(codec(), config(true, RefreshTokenFormat::Opaque))
                .with_publisher(Arc::new(publisher));

        let token = generator
            .generate_refresh_token(&Principal::new("bob"))
            .unwrap()
            .unwrap();
        assert_eq!(token.len(), 43);

        let SecurityEvent::RefreshTokenGenerated(event) = events.recv().await.unwrap() else {
            panic!("unexpected event");
        };
        assert_eq!(event.token_id, hash_token(&token));
        assert!(event.key_id.is_none());
    }

    #[test]
    fn test_validator_rejects_opaque_and_access_tokens() {
        let codec = codec();
        let validator = RefreshTokenValidator::new(codec.clone());

        let err = validator.validate(&generate_opaque_token()).unwrap_err();
        assert_eq!(err.kind(), ValidationErrorKind::Malformed);

        let access = codec
            .encode(
                &ClaimSet::new()
                    .with("sub", "alice")
                    .with("iat", 1_i64)
                    .with("jti", "x")
                    .with("exp", 4_000_000_000_i64),
            )
            .unwrap();
        let err = validator.validate(&access).unwrap_err();
        assert_eq!(err.kind(), ValidationErrorKind::Malformed);
    }

    #[test]
    fn test_format_serde() {
        let format: RefreshTokenFormat = serde_json::from_str("\"opaque\"").unwrap();
        assert_eq!(format, RefreshTokenFormat::Opaque);
    }
}
