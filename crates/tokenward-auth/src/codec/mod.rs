//! Token codecs.
//!
//! A [`TokenCodec`] turns a [`ClaimSet`] into a token string and back. Each
//! token family (JWT, PASETO) has its own implementation; the active codec is
//! chosen once at startup from configuration (see
//! [`crate::config::build_codec`]) and callers only ever see the trait.
//!
//! Decoding always reports one of three failure kinds so callers can tell a
//! token worth refreshing ([`ValidationErrorKind::Expired`]) from one that
//! must be rejected outright.

pub mod jwt;
pub mod paseto;

use std::fmt;

use time::OffsetDateTime;

use crate::claims::ClaimSet;

pub use jwt::{JwtCodec, SigningAlgorithm, SigningKeyPair};
pub use paseto::{PasetoCodec, PasetoPurpose};

// ============================================================================
// Error Types
// ============================================================================

/// Failure to produce a token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// Key material is missing, malformed or unusable for the algorithm.
    #[error("Invalid signing key: {message}")]
    Key {
        /// Description of the key problem.
        message: String,
    },

    /// The claim set could not be serialized.
    #[error("Failed to serialize claims: {message}")]
    Serialization {
        /// Description of the serialization problem.
        message: String,
    },

    /// The signing or encryption primitive failed.
    #[error("Cryptographic failure: {message}")]
    Crypto {
        /// Description of the failure.
        message: String,
    },
}

impl EncodingError {
    /// Creates a new `Key` error.
    #[must_use]
    pub fn key(message: impl Into<String>) -> Self {
        Self::Key {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Crypto` error.
    #[must_use]
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a key configuration problem.
    #[must_use]
    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::Key { .. })
    }
}

/// Failure to decode or verify a token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The token verified but its `exp` is not after the validation time.
    #[error("Token expired at {expired_at}")]
    Expired {
        /// The `exp` claim (Unix seconds).
        expired_at: i64,
    },

    /// The token is not a well-formed token of the expected family.
    #[error("Malformed token: {message}")]
    Malformed {
        /// Description of the problem.
        message: String,
    },

    /// Signature or MAC verification failed.
    #[error("Invalid token signature")]
    BadSignature,
}

/// Discriminant of a [`ValidationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    /// See [`ValidationError::Expired`].
    Expired,
    /// See [`ValidationError::Malformed`].
    Malformed,
    /// See [`ValidationError::BadSignature`].
    BadSignature,
}

impl ValidationErrorKind {
    /// Returns a stable name for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Malformed => "malformed",
            Self::BadSignature => "bad_signature",
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ValidationError {
    /// Creates a new `Malformed` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub fn kind(&self) -> ValidationErrorKind {
        match self {
            Self::Expired { .. } => ValidationErrorKind::Expired,
            Self::Malformed { .. } => ValidationErrorKind::Malformed,
            Self::BadSignature => ValidationErrorKind::BadSignature,
        }
    }

    /// Returns `true` if the token was authentic but expired, i.e. the caller
    /// may try a refresh.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }

    /// Returns `true` if the token must be rejected outright.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        !self.is_expired()
    }
}

// ============================================================================
// Token Family
// ============================================================================

/// Token format family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenFamily {
    /// JSON Web Token (JWS compact serialization).
    Jwt,
    /// Platform-Agnostic Security Token, version 4.
    Paseto,
}

impl TokenFamily {
    /// Returns the family name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jwt => "jwt",
            Self::Paseto => "paseto",
        }
    }
}

impl fmt::Display for TokenFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Codec Trait
// ============================================================================

/// Encodes claim sets into tokens and decodes them back.
pub trait TokenCodec: Send + Sync {
    /// The token family this codec produces.
    fn family(&self) -> TokenFamily;

    /// Identifier of the key used for signing or encryption.
    fn key_id(&self) -> Option<&str>;

    /// Signs or encrypts `claims` into a token string.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be serialized or the key
    /// material cannot produce a token.
    fn encode(&self, claims: &ClaimSet) -> Result<String, EncodingError>;

    /// Verifies `token` and returns its claims, treating `now` (Unix seconds)
    /// as the current time for the expiration check.
    ///
    /// # Errors
    /// Returns [`ValidationError`] describing why the token was rejected.
    fn decode_at(&self, token: &str, now: i64) -> Result<ClaimSet, ValidationError>;

    /// Verifies `token` against the current system time.
    ///
    /// # Errors
    /// Returns [`ValidationError`] describing why the token was rejected.
    fn decode(&self, token: &str) -> Result<ClaimSet, ValidationError> {
        self.decode_at(token, OffsetDateTime::now_utc().unix_timestamp())
    }
}

/// Rejects claims whose `exp` is not strictly after `now`.
pub(crate) fn check_expiration(claims: &ClaimSet, now: i64) -> Result<(), ValidationError> {
    match claims.expiration() {
        Some(exp) if now >= exp => Err(ValidationError::Expired { expired_at: exp }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_kinds() {
        assert_eq!(
            ValidationError::Expired { expired_at: 1 }.kind(),
            ValidationErrorKind::Expired
        );
        assert_eq!(
            ValidationError::malformed("x").kind(),
            ValidationErrorKind::Malformed
        );
        assert_eq!(
            ValidationError::BadSignature.kind(),
            ValidationErrorKind::BadSignature
        );

        assert!(ValidationError::Expired { expired_at: 1 }.is_expired());
        assert!(ValidationError::BadSignature.is_rejection());
        assert!(ValidationError::malformed("x").is_rejection());
    }

    #[test]
    fn test_check_expiration_boundary() {
        let claims = ClaimSet::new().with("exp", 100_i64);
        assert!(check_expiration(&claims, 99).is_ok());
        assert_eq!(
            check_expiration(&claims, 100),
            Err(ValidationError::Expired { expired_at: 100 })
        );
        assert!(check_expiration(&ClaimSet::new(), i64::MAX).is_ok());
    }

    #[test]
    fn test_encoding_error_predicates() {
        assert!(EncodingError::key("missing").is_key_error());
        assert!(!EncodingError::crypto("boom").is_key_error());
        assert_eq!(
            EncodingError::serialization("bad").to_string(),
            "Failed to serialize claims: bad"
        );
    }
}
