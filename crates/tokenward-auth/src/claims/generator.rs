//! Access-token claim generation.

use std::sync::Arc;

use uuid::Uuid;

use super::{ClaimSet, ClaimValue, Principal, names};
use crate::clock::{Clock, SystemClock};

/// Builds access-token claim sets.
///
/// Implementations are pure apart from reading the current time.
pub trait ClaimsGenerator: Send + Sync {
    /// Builds claims for `principal`.
    ///
    /// An `expiration` of zero or less leaves the `exp` claim unset.
    fn generate_claims(&self, principal: &Principal, expiration: i64) -> ClaimSet;

    /// Builds claims from an existing claim set, refreshing the time-bound
    /// registered claims and keeping everything else.
    fn generate_claims_from(&self, existing: &ClaimSet, expiration: i64) -> ClaimSet;
}

/// Default claims generator.
///
/// Sets `sub`, `iat`, `nbf`, `jti`, `exp`, the roles claim and `iss` when an
/// issuer is configured. Principal attributes are merged as custom claims
/// unless they collide with a reserved name.
#[derive(Clone)]
pub struct DefaultClaimsGenerator {
    issuer: Option<String>,
    roles_claim: String,
    clock: Arc<dyn Clock>,
}

impl DefaultClaimsGenerator {
    /// Creates a generator with no issuer, the default roles claim and the
    /// system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: None,
            roles_claim: names::ROLES.to_string(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the `iss` claim value.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Sets the claim used to carry roles.
    #[must_use]
    pub fn with_roles_claim(mut self, roles_claim: impl Into<String>) -> Self {
        self.roles_claim = roles_claim.into();
        self
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the claim used to carry roles.
    #[must_use]
    pub fn roles_claim(&self) -> &str {
        &self.roles_claim
    }

    fn is_reserved(&self, name: &str) -> bool {
        name == self.roles_claim || names::REGISTERED.contains(&name)
    }

    fn stamp(&self, claims: &mut ClaimSet, expiration: i64) {
        let now = self.clock.unix_timestamp();

        if let Some(issuer) = &self.issuer {
            claims.insert(names::ISSUER, issuer.as_str());
        }
        claims.insert(names::ISSUED_AT, now);
        claims.insert(names::NOT_BEFORE, now);
        claims.insert(names::TOKEN_ID, Uuid::new_v4().to_string());

        if expiration > 0 {
            claims.insert(names::EXPIRATION, now.saturating_add(expiration));
        } else {
            claims.remove(names::EXPIRATION);
        }
    }
}

impl Default for DefaultClaimsGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DefaultClaimsGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultClaimsGenerator")
            .field("issuer", &self.issuer)
            .field("roles_claim", &self.roles_claim)
            .finish_non_exhaustive()
    }
}

impl ClaimsGenerator for DefaultClaimsGenerator {
    fn generate_claims(&self, principal: &Principal, expiration: i64) -> ClaimSet {
        let mut claims = ClaimSet::new();
        claims.insert(names::SUBJECT, principal.name.as_str());
        self.stamp(&mut claims, expiration);
        claims.insert(
            self.roles_claim.clone(),
            ClaimValue::List(
                principal
                    .roles
                    .iter()
                    .map(|r| ClaimValue::from(r.as_str()))
                    .collect(),
            ),
        );

        for (name, value) in &principal.attributes {
            if self.is_reserved(name) {
                tracing::debug!(claim = %name, "Ignoring attribute that shadows a reserved claim");
                continue;
            }
            claims.insert(name.clone(), value.clone());
        }

        claims
    }

    fn generate_claims_from(&self, existing: &ClaimSet, expiration: i64) -> ClaimSet {
        let mut claims = existing.clone();
        self.stamp(&mut claims, expiration);
        claims
    }
}
