//! Boundary adapters for callers still on the legacy shapes.
//!
//! Internally there is one configuration ([`TokenSecurityConfig`]), one claim
//! model ([`ClaimSet`]) and one orchestrator ([`AccessRefreshTokenGenerator`]).
//! The legacy shapes are converted at the edge in both directions:
//!
//! | legacy                              | canonical                        |
//! |-------------------------------------|----------------------------------|
//! | [`LegacyAccessTokenConfiguration`]  | `access_token.expiration`        |
//! | [`LegacyClaims`] (untyped JSON map) | [`ClaimSet`]                     |
//! | [`LegacyAccessRefreshToken`]        | [`AccessRefreshToken`]           |

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::claims::{ClaimSet, Principal};
use crate::config::TokenSecurityConfig;
use crate::generator::AccessRefreshTokenGenerator;
use crate::render::{AccessRefreshToken, BEARER};

/// Untyped claims map used by legacy callers.
pub type LegacyClaims = HashMap<String, serde_json::Value>;

/// Legacy access token settings (expiration as a 32-bit integer).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyAccessTokenConfiguration {
    /// Access token lifetime in seconds; `None` keeps the current value.
    pub expiration: Option<i32>,
}

impl LegacyAccessTokenConfiguration {
    /// Reads the legacy view of `config`. Lifetimes beyond `i32::MAX`
    /// saturate.
    #[must_use]
    pub fn from_config(config: &TokenSecurityConfig) -> Self {
        let expiration = i32::try_from(config.access_token.expiration).unwrap_or(i32::MAX);
        Self {
            expiration: Some(expiration),
        }
    }

    /// Writes the legacy settings into `config`.
    pub fn apply_to(&self, config: &mut TokenSecurityConfig) {
        if let Some(expiration) = self.expiration {
            config.access_token.expiration = i64::from(expiration);
        }
    }
}

/// Converts legacy claims into a [`ClaimSet`]. `null` and object values are
/// dropped.
#[must_use]
pub fn claims_from_legacy(claims: LegacyClaims) -> ClaimSet {
    ClaimSet::from_json_map(claims.into_iter().collect())
}

/// Converts a [`ClaimSet`] into legacy claims.
#[must_use]
pub fn claims_to_legacy(claims: &ClaimSet) -> LegacyClaims {
    claims.to_json_map().into_iter().collect()
}

/// Legacy token response: the wire members plus the principal's name and
/// roles, with a 32-bit optional lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyAccessRefreshToken {
    /// Principal name.
    pub username: String,

    /// Principal roles.
    #[serde(default)]
    pub roles: Vec<String>,

    /// The access token.
    pub access_token: String,

    /// The refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token type.
    pub token_type: String,

    /// Lifetime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i32>,
}

impl LegacyAccessRefreshToken {
    /// Wraps a canonical response for `username` with `roles`.
    #[must_use]
    pub fn from_token(
        token: AccessRefreshToken,
        username: impl Into<String>,
        roles: Vec<String>,
    ) -> Self {
        Self {
            username: username.into(),
            roles,
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            token_type: token.token_type,
            expires_in: i32::try_from(token.expires_in).ok(),
        }
    }

    /// Drops the legacy-only members. A missing lifetime becomes `0`.
    #[must_use]
    pub fn into_token(self) -> AccessRefreshToken {
        AccessRefreshToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: if self.token_type.is_empty() {
                BEARER.to_string()
            } else {
                self.token_type
            },
            expires_in: self.expires_in.map(i64::from).unwrap_or_default(),
        }
    }
}

impl From<LegacyAccessRefreshToken> for AccessRefreshToken {
    fn from(token: LegacyAccessRefreshToken) -> Self {
        token.into_token()
    }
}

/// Legacy orchestrator API.
///
/// Every call delegates to the canonical generator. Failures are logged and
/// reported as `None`.
#[derive(Debug, Clone)]
pub struct LegacyAccessRefreshTokenGenerator {
    inner: Arc<AccessRefreshTokenGenerator>,
}

impl LegacyAccessRefreshTokenGenerator {
    /// Wraps the canonical generator.
    #[must_use]
    pub fn new(inner: Arc<AccessRefreshTokenGenerator>) -> Self {
        Self { inner }
    }

    /// Issues access and refresh tokens for `principal`.
    #[must_use]
    pub fn generate(&self, principal: &Principal) -> Option<LegacyAccessRefreshToken> {
        self.inner
            .generate(principal)
            .inspect_err(|e| warn!(error = %e, "Token generation failed"))
            .ok()
            .map(|token| legacy_response(token, principal))
    }

    /// Issues an access token, passing `refresh_token` through.
    #[must_use]
    pub fn generate_with_refresh_token(
        &self,
        refresh_token: &str,
        principal: &Principal,
    ) -> Option<LegacyAccessRefreshToken> {
        self.inner
            .generate_with_refresh_token(refresh_token, principal)
            .inspect_err(|e| warn!(error = %e, "Token generation failed"))
            .ok()
            .map(|token| legacy_response(token, principal))
    }

    /// Issues an access token from legacy claims, passing `refresh_token`
    /// through.
    #[must_use]
    pub fn generate_from_claims(
        &self,
        refresh_token: &str,
        claims: LegacyClaims,
    ) -> Option<LegacyAccessRefreshToken> {
        let claims = claims_from_legacy(claims);
        let roles = claims.roles(&self.inner.config().load().roles_claim);
        let username = claims.subject().unwrap_or_default().to_string();

        self.inner
            .generate_from_claims(refresh_token, &claims)
            .inspect_err(|e| warn!(error = %e, "Token generation failed"))
            .ok()
            .map(|token| LegacyAccessRefreshToken::from_token(token, username, roles))
    }

    /// Issues a refresh token, or `None` when disabled or on failure.
    #[must_use]
    pub fn generate_refresh_token(&self, principal: &Principal) -> Option<String> {
        self.inner
            .generate_refresh_token(principal)
            .inspect_err(|e| warn!(error = %e, "Refresh token generation failed"))
            .ok()
            .flatten()
    }

    /// Access token lifetime as the legacy 32-bit value.
    #[must_use]
    pub fn access_token_expiration(&self) -> i32 {
        i32::try_from(self.inner.access_token_expiration()).unwrap_or(i32::MAX)
    }
}

fn legacy_response(token: AccessRefreshToken, principal: &Principal) -> LegacyAccessRefreshToken {
    LegacyAccessRefreshToken::from_token(token, principal.name.as_str(), principal.roles.clone())
}
