//! Crate-level error types.
//!
//! Component errors ([`EncodingError`], [`ValidationError`], configuration and
//! OAuth errors) live next to the code that raises them. [`AuthError`] is what
//! the orchestrator and HTTP handlers surface to callers.

use std::fmt;

use crate::codec::{EncodingError, ValidationError};

/// Errors surfaced by token issuance and refresh.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token is malformed or its signature does not verify.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// The token verified but has expired.
    #[error("Token expired")]
    TokenExpired,

    /// The refresh token or authorization grant cannot be used.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The subject of a verified grant is not known to the caller's store.
    #[error("Unknown principal: {subject}")]
    UnknownPrincipal {
        /// The unresolved subject.
        subject: String,
    },

    /// The request is missing a parameter or is otherwise malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The grant type is not handled by this endpoint.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// Refresh tokens are disabled by configuration.
    #[error("Refresh tokens are disabled")]
    RefreshDisabled,

    /// The active codec could not produce a token.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `UnknownPrincipal` error.
    #[must_use]
    pub fn unknown_principal(subject: impl Into<String>) -> Self {
        Self::UnknownPrincipal {
            subject: subject.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the caller sent something unusable.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidToken { .. }
                | Self::TokenExpired
                | Self::InvalidGrant { .. }
                | Self::UnknownPrincipal { .. }
                | Self::InvalidRequest { .. }
                | Self::UnsupportedGrantType { .. }
                | Self::RefreshDisabled
        )
    }

    /// Returns `true` if the failure is on the issuing side.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidToken { .. } | Self::TokenExpired => ErrorCategory::Token,
            Self::InvalidGrant { .. } | Self::UnknownPrincipal { .. } => {
                ErrorCategory::Authentication
            }
            Self::InvalidRequest { .. } | Self::UnsupportedGrantType { .. } => {
                ErrorCategory::Validation
            }
            Self::RefreshDisabled | Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Encoding(_) | Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidToken { .. } | Self::TokenExpired => "invalid_token",
            Self::InvalidGrant { .. } | Self::UnknownPrincipal { .. } => "invalid_grant",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::UnsupportedGrantType { .. } | Self::RefreshDisabled => "unsupported_grant_type",
            Self::Encoding(_) | Self::Configuration { .. } | Self::Internal { .. } => {
                "server_error"
            }
        }
    }
}

impl From<ValidationError> for AuthError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Expired { .. } => Self::TokenExpired,
            other => Self::invalid_token(other.to_string()),
        }
    }
}

impl From<crate::config::ConfigError> for AuthError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

/// Error categories for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Credential or grant problems.
    Authentication,
    /// Token validation problems.
    Token,
    /// Request validation problems.
    Validation,
    /// Configuration problems.
    Configuration,
    /// Internal failures.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Token => write!(f, "token"),
            Self::Validation => write!(f, "validation"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            AuthError::invalid_grant("unknown subject").to_string(),
            "Invalid grant: unknown subject"
        );
        assert_eq!(AuthError::TokenExpired.to_string(), "Token expired");
        assert_eq!(
            AuthError::from(EncodingError::key("no key")).to_string(),
            "Invalid signing key: no key"
        );
    }

    #[test]
    fn test_from_validation_error() {
        assert!(matches!(
            AuthError::from(ValidationError::Expired { expired_at: 1 }),
            AuthError::TokenExpired
        ));
        assert!(matches!(
            AuthError::from(ValidationError::BadSignature),
            AuthError::InvalidToken { .. }
        ));
        assert!(matches!(
            AuthError::from(ValidationError::malformed("x")),
            AuthError::InvalidToken { .. }
        ));
    }

    #[test]
    fn test_error_predicates() {
        assert!(AuthError::TokenExpired.is_client_error());
        assert!(AuthError::RefreshDisabled.is_client_error());
        assert!(AuthError::internal("boom").is_server_error());
        assert!(AuthError::from(EncodingError::crypto("x")).is_server_error());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(AuthError::TokenExpired.category(), ErrorCategory::Token);
        assert_eq!(
            AuthError::invalid_grant("x").category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            AuthError::configuration("x").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(ErrorCategory::Validation.to_string(), "validation");
    }

    #[test]
    fn test_oauth_error_code() {
        assert_eq!(AuthError::TokenExpired.oauth_error_code(), "invalid_token");
        assert_eq!(AuthError::invalid_grant("x").oauth_error_code(), "invalid_grant");
        assert_eq!(
            AuthError::unsupported_grant_type("password").oauth_error_code(),
            "unsupported_grant_type"
        );
        assert_eq!(AuthError::internal("x").oauth_error_code(), "server_error");
    }
}
