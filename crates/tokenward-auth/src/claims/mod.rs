//! Claim sets, claim values and authenticated principals.
//!
//! A [`ClaimSet`] is the canonical, format-independent representation of a
//! token's payload. Every codec encodes from and decodes back to it, so the
//! orchestrator never deals with JWT- or PASETO-specific payload shapes.

pub mod generator;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use generator::{ClaimsGenerator, DefaultClaimsGenerator};

/// Registered claim names.
pub mod names {
    /// Issuer.
    pub const ISSUER: &str = "iss";
    /// Subject.
    pub const SUBJECT: &str = "sub";
    /// Audience.
    pub const AUDIENCE: &str = "aud";
    /// Expiration time (Unix seconds).
    pub const EXPIRATION: &str = "exp";
    /// Not before (Unix seconds).
    pub const NOT_BEFORE: &str = "nbf";
    /// Issued at (Unix seconds).
    pub const ISSUED_AT: &str = "iat";
    /// Token identifier.
    pub const TOKEN_ID: &str = "jti";
    /// Default claim carrying the principal's roles.
    pub const ROLES: &str = "roles";

    /// Claims holding timestamps.
    pub const TIMESTAMPS: [&str; 3] = [EXPIRATION, NOT_BEFORE, ISSUED_AT];

    /// Registered names that principal attributes may never override.
    pub const REGISTERED: [&str; 7] = [
        ISSUER, SUBJECT, AUDIENCE, EXPIRATION, NOT_BEFORE, ISSUED_AT, TOKEN_ID,
    ];
}

/// A single claim value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    /// Boolean value.
    Bool(bool),
    /// Integral number (timestamps are stored this way).
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// String value.
    String(String),
    /// List of values.
    List(Vec<ClaimValue>),
}

impl ClaimValue {
    /// Returns the string if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an integral value.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean if this is a boolean value.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the list if this is a list value.
    #[must_use]
    pub fn as_list(&self) -> Option<&[ClaimValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Collects string entries, accepting either a list or a single
    /// comma-separated string.
    #[must_use]
    pub fn to_string_list(&self) -> Vec<String> {
        match self {
            Self::List(items) => items
                .iter()
                .filter_map(ClaimValue::as_str)
                .map(String::from)
                .collect(),
            Self::String(s) => s
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&str> for ClaimValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ClaimValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ClaimValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for ClaimValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ClaimValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<ClaimValue>> From<Vec<T>> for ClaimValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// A JSON value that has no claim representation (null or object).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported claim value: {kind}")]
pub struct UnsupportedClaimValue {
    /// JSON kind that was rejected.
    pub kind: &'static str,
}

impl TryFrom<serde_json::Value> for ClaimValue {
    type Error = UnsupportedClaimValue;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        match value {
            Value::Bool(b) => Ok(Self::Bool(b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float))
                .ok_or(UnsupportedClaimValue { kind: "number" }),
            Value::String(s) => Ok(Self::String(s)),
            Value::Array(items) => items
                .into_iter()
                .map(ClaimValue::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
            Value::Null => Err(UnsupportedClaimValue { kind: "null" }),
            Value::Object(_) => Err(UnsupportedClaimValue { kind: "object" }),
        }
    }
}

impl From<ClaimValue> for serde_json::Value {
    fn from(value: ClaimValue) -> Self {
        match value {
            ClaimValue::Bool(b) => serde_json::Value::Bool(b),
            ClaimValue::Integer(n) => serde_json::Value::from(n),
            ClaimValue::Float(f) => serde_json::Value::from(f),
            ClaimValue::String(s) => serde_json::Value::String(s),
            ClaimValue::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
        }
    }
}

impl fmt::Display for ClaimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
            Self::List(items) => {
                let joined: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

/// Ordered mapping from claim name to value.
///
/// Equality ignores insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet {
    claims: IndexMap<String, ClaimValue>,
}

impl ClaimSet {
    /// Creates an empty claim set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a claim, returning the previous value.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ClaimValue>,
    ) -> Option<ClaimValue> {
        self.claims.insert(name.into(), value.into())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ClaimValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Removes a claim.
    pub fn remove(&mut self, name: &str) -> Option<ClaimValue> {
        self.claims.shift_remove(name)
    }

    /// Returns a claim by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ClaimValue> {
        self.claims.get(name)
    }

    /// Returns `true` if the claim is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.claims.contains_key(name)
    }

    /// Returns the `sub` claim.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.get(names::SUBJECT).and_then(ClaimValue::as_str)
    }

    /// Returns the `iss` claim.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.get(names::ISSUER).and_then(ClaimValue::as_str)
    }

    /// Returns the `jti` claim.
    #[must_use]
    pub fn token_id(&self) -> Option<&str> {
        self.get(names::TOKEN_ID).and_then(ClaimValue::as_str)
    }

    /// Returns the `exp` claim (Unix seconds).
    #[must_use]
    pub fn expiration(&self) -> Option<i64> {
        self.get(names::EXPIRATION).and_then(ClaimValue::as_i64)
    }

    /// Returns the `iat` claim (Unix seconds).
    #[must_use]
    pub fn issued_at(&self) -> Option<i64> {
        self.get(names::ISSUED_AT).and_then(ClaimValue::as_i64)
    }

    /// Returns the `nbf` claim (Unix seconds).
    #[must_use]
    pub fn not_before(&self) -> Option<i64> {
        self.get(names::NOT_BEFORE).and_then(ClaimValue::as_i64)
    }

    /// Returns the roles stored under `claim`.
    #[must_use]
    pub fn roles(&self, claim: &str) -> Vec<String> {
        self.get(claim)
            .map(ClaimValue::to_string_list)
            .unwrap_or_default()
    }

    /// Returns `true` if the set carries an expiration at or before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiration().is_some_and(|exp| now >= exp)
    }

    /// Iterates over claims in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClaimValue)> {
        self.claims.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of claims.
    #[must_use]
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Returns `true` if there are no claims.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Converts to a JSON object.
    #[must_use]
    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.claims
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().into()))
            .collect()
    }

    /// Builds a claim set from a JSON object, dropping values with no claim
    /// representation (nulls and nested objects).
    #[must_use]
    pub fn from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        let mut claims = Self::new();
        for (name, value) in map {
            match ClaimValue::try_from(value) {
                Ok(value) => {
                    claims.insert(name, value);
                }
                Err(e) => tracing::debug!(claim = %name, error = %e, "Dropping claim"),
            }
        }
        claims
    }
}

impl FromIterator<(String, ClaimValue)> for ClaimSet {
    fn from_iter<I: IntoIterator<Item = (String, ClaimValue)>>(iter: I) -> Self {
        Self {
            claims: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ClaimSet {
    type Item = (String, ClaimValue);
    type IntoIter = indexmap::map::IntoIter<String, ClaimValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.claims.into_iter()
    }
}

/// An authenticated identity.
///
/// Supplied by the host's authentication layer and never mutated while
/// tokens are generated for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Identity, written to the `sub` claim.
    pub name: String,

    /// Granted roles.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Additional attributes, merged into access tokens as custom claims.
    #[serde(default)]
    pub attributes: IndexMap<String, ClaimValue>,
}

impl Principal {
    /// Creates a principal with no roles or attributes.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: Vec::new(),
            attributes: IndexMap::new(),
        }
    }

    /// Sets the roles.
    #[must_use]
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<ClaimValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_value_untagged_serde() {
        let claims = ClaimSet::new()
            .with("sub", "alice")
            .with("exp", 1_700_000_000_i64)
            .with("admin", true)
            .with("score", 0.5)
            .with("roles", vec!["ROLE_USER", "ROLE_ADMIN"]);

        let json = serde_json::to_string(&claims).unwrap();
        assert_eq!(
            json,
            r#"{"sub":"alice","exp":1700000000,"admin":true,"score":0.5,"roles":["ROLE_USER","ROLE_ADMIN"]}"#
        );

        let parsed: ClaimSet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, claims);
        assert_eq!(parsed.expiration(), Some(1_700_000_000));
        assert_eq!(parsed.get("admin"), Some(&ClaimValue::Bool(true)));
    }

    #[test]
    fn test_claim_set_equality_ignores_order() {
        let a = ClaimSet::new().with("a", 1_i64).with("b", 2_i64);
        let b = ClaimSet::new().with("b", 2_i64).with("a", 1_i64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_roles_accepts_list_or_comma_string() {
        let claims = ClaimSet::new()
            .with("roles", vec!["a", "b"])
            .with("groups", "x, y,,z");
        assert_eq!(claims.roles("roles"), vec!["a", "b"]);
        assert_eq!(claims.roles("groups"), vec!["x", "y", "z"]);
        assert!(claims.roles("missing").is_empty());
    }

    #[test]
    fn test_from_json_map_drops_unsupported_values() {
        let map = serde_json::json!({
            "sub": "bob",
            "address": {"city": "Paris"},
            "nickname": null,
            "iat": 10
        });
        let serde_json::Value::Object(map) = map else {
            unreachable!()
        };

        let claims = ClaimSet::from_json_map(map);
        assert_eq!(claims.len(), 2);
        assert_eq!(claims.subject(), Some("bob"));
        assert_eq!(claims.issued_at(), Some(10));
    }

    #[test]
    fn test_is_expired_at() {
        let claims = ClaimSet::new().with("exp", 100_i64);
        assert!(!claims.is_expired_at(99));
        assert!(claims.is_expired_at(100));
        assert!(!ClaimSet::new().is_expired_at(i64::MAX));
    }

    #[test]
    fn test_principal_builder() {
        let principal = Principal::new("alice")
            .with_roles(["ROLE_USER"])
            .with_attribute("email", "alice@example.com");
        assert_eq!(principal.name, "alice");
        assert_eq!(principal.roles, vec!["ROLE_USER"]);
        assert_eq!(
            principal.attributes.get("email"),
            Some(&ClaimValue::from("alice@example.com"))
        );
    }
}
