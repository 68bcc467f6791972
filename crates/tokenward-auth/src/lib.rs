//! # tokenward-auth
//!
//! Access/refresh token issuance and validation, plus an OAuth 2.0 /
//! OpenID Connect authorization-code client.
//!
//! This crate provides:
//! - Claims generation from authenticated principals or existing claim maps
//! - JWT and PASETO v4 codecs behind one [`codec::TokenCodec`] trait
//! - Signed or opaque refresh tokens with lifecycle events
//! - The access/refresh orchestrator and bearer token rendering
//! - Authorization-code flow with callback classification and OAuth error
//!   responses
//! - Adapters for the legacy configuration, claims and response shapes
//!
//! ## Overview
//!
//! ```text
//! Principal ─► ClaimsGenerator ─► TokenCodec ─► TokenRenderer ─► AccessRefreshToken
//!                                     ▲
//!          refresh token + resolver ──┘ (AccessRefreshTokenGenerator::refresh)
//! ```
//!
//! The active codec is selected once from configuration
//! ([`config::build_codec`]): PASETO when `paseto.enabled`, otherwise JWT.
//!
//! ## Modules
//!
//! - [`claims`] - Claim model and claims generation
//! - [`clock`] - Time source
//! - [`codec`] - Token codecs (JWT, PASETO)
//! - [`compat`] - Legacy shape adapters
//! - [`config`] - Configuration loading and codec selection
//! - [`error`] - Crate-level errors
//! - [`event`] - Security events and publishers
//! - [`generator`] - Access/refresh orchestration
//! - [`http`] - Axum handlers
//! - [`oauth`] - Authorization-code client
//! - [`refresh`] - Refresh token generation and validation
//! - [`render`] - Token response rendering

pub mod claims;
pub mod clock;
pub mod codec;
pub mod compat;
pub mod config;
pub mod error;
pub mod event;
pub mod generator;
pub mod http;
pub mod oauth;
pub mod refresh;
pub mod render;

pub use claims::{ClaimSet, ClaimValue, ClaimsGenerator, DefaultClaimsGenerator, Principal};
pub use codec::{EncodingError, TokenCodec, TokenFamily, ValidationError, ValidationErrorKind};
pub use config::{ConfigError, SharedConfig, TokenSecurityConfig, build_codec, load_config};
pub use error::{AuthError, ErrorCategory};
pub use event::{EventPublisher, RefreshTokenGeneratedEvent, SecurityEvent};
pub use generator::{AccessRefreshTokenGenerator, PrincipalResolver};
pub use refresh::{RefreshTokenGenerator, RefreshTokenValidator};
pub use render::{AccessRefreshToken, TokenRenderer};

/// Type alias for token issuance results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use tokenward_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::claims::{ClaimSet, ClaimValue, Principal};
    pub use crate::codec::{TokenCodec, ValidationError, ValidationErrorKind};
    pub use crate::config::{SharedConfig, TokenSecurityConfig, build_codec, load_config};
    pub use crate::error::AuthError;
    pub use crate::generator::{AccessRefreshTokenGenerator, PrincipalResolver};
    pub use crate::http::{BearerAuth, OAuthState, router};
    pub use crate::oauth::{AuthorizationCodeFlow, AuthorizationErrorResponse, CallbackParameters};
    pub use crate::render::AccessRefreshToken;
}
