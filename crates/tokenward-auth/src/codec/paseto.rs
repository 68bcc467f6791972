//! PASETO v4 codec.
//!
//! - `v4.local`: XChaCha20 + BLAKE2b-MAC with a 32-byte symmetric key. The
//!   claims are encrypted.
//! - `v4.public`: Ed25519 signatures. The claims are readable by anyone but
//!   only verifiable with the public key.
//!
//! The key id travels in the footer as `{"kid":"..."}`. The footer is
//! authenticated, so swapping it for another key id fails verification.
//!
//! Registered timestamp claims (`exp`, `iat`, `nbf`) are written as RFC 3339
//! strings and read back as Unix seconds.

use std::fmt;

use pasetors::keys::{
    AsymmetricKeyPair, AsymmetricPublicKey, AsymmetricSecretKey, Generate, SymmetricKey,
};
use pasetors::token::UntrustedToken;
use pasetors::version4::{LocalToken, PublicToken, V4};
use pasetors::{Local, Public};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{EncodingError, TokenCodec, TokenFamily, ValidationError, check_expiration};
use crate::claims::{ClaimSet, ClaimValue, names};

/// Length of a `v4.local` key in bytes.
pub const LOCAL_KEY_LEN: usize = 32;

/// PASETO purpose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasetoPurpose {
    /// Symmetric authenticated encryption.
    #[default]
    Local,
    /// Asymmetric signatures.
    Public,
}

impl PasetoPurpose {
    /// Returns the token header for this purpose.
    #[must_use]
    pub fn header(&self) -> &'static str {
        match self {
            Self::Local => "v4.local.",
            Self::Public => "v4.public.",
        }
    }
}

impl fmt::Display for PasetoPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Public => f.write_str("public"),
        }
    }
}

enum PasetoKey {
    Local(SymmetricKey<V4>),
    Public {
        secret: AsymmetricSecretKey<V4>,
        public: AsymmetricPublicKey<V4>,
    },
}

#[derive(Serialize, Deserialize)]
struct Footer<'a> {
    kid: &'a str,
}

/// [`TokenCodec`] producing PASETO v4 tokens.
pub struct PasetoCodec {
    key: PasetoKey,
    key_id: Option<String>,
    footer: Option<Vec<u8>>,
}

impl PasetoCodec {
    fn with_key(key: PasetoKey) -> Self {
        Self {
            key,
            key_id: None,
            footer: None,
        }
    }

    /// Creates a `v4.local` codec from raw key bytes.
    ///
    /// # Errors
    /// Returns an error if `key` is not [`LOCAL_KEY_LEN`] bytes.
    pub fn local(key: &[u8]) -> Result<Self, EncodingError> {
        if key.len() != LOCAL_KEY_LEN {
            return Err(EncodingError::key(format!(
                "v4.local key must be {LOCAL_KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let key = SymmetricKey::<V4>::from(key).map_err(|e| EncodingError::key(format!("{e:?}")))?;
        Ok(Self::with_key(PasetoKey::Local(key)))
    }

    /// Creates a `v4.local` codec from a hex-encoded key.
    ///
    /// # Errors
    /// Returns an error if the hex is invalid or the key has the wrong length.
    pub fn local_from_hex(key: &str) -> Result<Self, EncodingError> {
        let bytes = hex::decode(key.trim()).map_err(|e| EncodingError::key(e.to_string()))?;
        Self::local(&bytes)
    }

    /// Creates a `v4.local` codec with a freshly generated key.
    ///
    /// # Errors
    /// Returns an error if the system RNG fails.
    pub fn generate_local() -> Result<Self, EncodingError> {
        let key = SymmetricKey::<V4>::generate().map_err(|e| EncodingError::crypto(format!("{e:?}")))?;
        Ok(Self::with_key(PasetoKey::Local(key)))
    }

    /// Creates a `v4.public` codec from an Ed25519 key pair.
    ///
    /// `secret` is the 64-byte secret key (seed followed by public key) and
    /// `public` the 32-byte public key.
    ///
    /// # Errors
    /// Returns an error if either key has the wrong length.
    pub fn public(secret: &[u8], public: &[u8]) -> Result<Self, EncodingError> {
        let secret = AsymmetricSecretKey::<V4>::from(secret)
            .map_err(|e| EncodingError::key(format!("{e:?}")))?;
        let public = AsymmetricPublicKey::<V4>::from(public)
            .map_err(|e| EncodingError::key(format!("{e:?}")))?;
        Ok(Self::with_key(PasetoKey::Public { secret, public }))
    }

    /// Creates a `v4.public` codec with a freshly generated key pair.
    ///
    /// # Errors
    /// Returns an error if the system RNG fails.
    pub fn generate_public() -> Result<Self, EncodingError> {
        let pair = AsymmetricKeyPair::<V4>::generate()
            .map_err(|e| EncodingError::crypto(format!("{e:?}")))?;
        Ok(Self::with_key(PasetoKey::Public {
            secret: pair.secret,
            public: pair.public,
        }))
    }

    /// Sets the key id written to (and required in) the footer.
    ///
    /// # Errors
    /// Returns an error if the footer cannot be serialized.
    pub fn with_key_id(mut self, kid: impl Into<String>) -> Result<Self, EncodingError> {
        let kid = kid.into();
        let footer = serde_json::to_vec(&Footer { kid: &kid })
            .map_err(|e| EncodingError::serialization(e.to_string()))?;
        self.key_id = Some(kid);
        self.footer = Some(footer);
        Ok(self)
    }

    /// Returns the purpose of this codec.
    #[must_use]
    pub fn purpose(&self) -> PasetoPurpose {
        match self.key {
            PasetoKey::Local(_) => PasetoPurpose::Local,
            PasetoKey::Public { .. } => PasetoPurpose::Public,
        }
    }

    /// Returns the public key bytes for `v4.public` codecs.
    #[must_use]
    pub fn public_key(&self) -> Option<&[u8]> {
        match &self.key {
            PasetoKey::Public { public, .. } => Some(public.as_bytes()),
            PasetoKey::Local(_) => None,
        }
    }

    fn verify(&self, token: &str) -> Result<String, ValidationError> {
        let footer = self.footer.as_deref();

        let trusted = match &self.key {
            PasetoKey::Local(key) => {
                UntrustedToken::<Local, V4>::try_from(token)
                    .and_then(|untrusted| LocalToken::decrypt(key, &untrusted, footer, None))
            }
            PasetoKey::Public { public, .. } => UntrustedToken::<Public, V4>::try_from(token)
                .and_then(|untrusted| PublicToken::verify(public, &untrusted, footer, None)),
        }
        // The shape was checked by `check_shape`, so any failure here lies in
        // the authenticated body or footer.
        .map_err(|_| ValidationError::BadSignature)?;

        Ok(trusted.payload().to_string())
    }
}

/// Checks the `v4.<purpose>.<body>[.<footer>]` layout after the header.
fn check_shape(rest: &str) -> Result<(), ValidationError> {
    let mut segments = rest.split('.');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(body), _, None) if !body.is_empty() => Ok(()),
        _ => Err(ValidationError::malformed(
            "Expected a body and an optional footer segment",
        )),
    }
}

/// Converts timestamp claims to RFC 3339 strings.
fn to_wire(claims: &ClaimSet) -> Result<serde_json::Map<String, Value>, EncodingError> {
    let mut wire = serde_json::Map::with_capacity(claims.len());
    for (name, value) in claims.iter() {
        let value = match value {
            ClaimValue::Integer(ts) if names::TIMESTAMPS.contains(&name) => {
                let formatted = OffsetDateTime::from_unix_timestamp(*ts)
                    .map_err(|e| EncodingError::serialization(format!("{name}: {e}")))?
                    .format(&Rfc3339)
                    .map_err(|e| EncodingError::serialization(format!("{name}: {e}")))?;
                Value::String(formatted)
            }
            other => other.clone().into(),
        };
        wire.insert(name.to_string(), value);
    }
    Ok(wire)
}

/// Converts RFC 3339 timestamp claims back to Unix seconds.
fn from_wire(payload: &str) -> Result<ClaimSet, ValidationError> {
    let mut map: serde_json::Map<String, Value> = serde_json::from_str(payload)
        .map_err(|e| ValidationError::malformed(format!("Invalid payload JSON: {e}")))?;

    for name in names::TIMESTAMPS {
        if let Some(Value::String(s)) = map.get(name) {
            let ts = OffsetDateTime::parse(s, &Rfc3339)
                .map_err(|e| ValidationError::malformed(format!("Invalid {name} claim: {e}")))?
                .unix_timestamp();
            map.insert(name.to_string(), Value::from(ts));
        }
    }

    Ok(ClaimSet::from_json_map(map))
}

impl TokenCodec for PasetoCodec {
    fn family(&self) -> TokenFamily {
        TokenFamily::Paseto
    }

    fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    fn encode(&self, claims: &ClaimSet) -> Result<String, EncodingError> {
        let payload = serde_json::to_vec(&to_wire(claims)?)
            .map_err(|e| EncodingError::serialization(e.to_string()))?;
        let footer = self.footer.as_deref();

        match &self.key {
            PasetoKey::Local(key) => LocalToken::encrypt(key, &payload, footer, None),
            PasetoKey::Public { secret, .. } => PublicToken::sign(secret, &payload, footer, None),
        }
        .map_err(|e| EncodingError::crypto(format!("{e:?}")))
    }

    fn decode_at(&self, token: &str, now: i64) -> Result<ClaimSet, ValidationError> {
        let header = self.purpose().header();
        if !token.starts_with(header) {
            return Err(ValidationError::malformed(format!(
                "Expected a {header} token"
            )));
        }
        check_shape(&token[header.len()..])?;

        let payload = self.verify(token)?;
        let claims = from_wire(&payload)?;
        check_expiration(&claims, now)?;
        Ok(claims)
    }
}

impl fmt::Debug for PasetoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasetoCodec")
            .field("purpose", &self.purpose())
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ValidationErrorKind;

    const KEY_HEX: &str = "707172737475767778797a7b7c7d7e7f808182838485868788898a8b8c8d8e8f";

    fn local() -> PasetoCodec {
        PasetoCodec::local_from_hex(KEY_HEX)
            .unwrap()
            .with_key_id("local-1")
            .unwrap()
    }

    fn claims(exp: i64) -> ClaimSet {
        ClaimSet::new()
            .with("sub", "alice")
            .with("iat", exp - 60)
            .with("nbf", exp - 60)
            .with("exp", exp)
            .with("jti", "f3a1")
            .with("roles", vec!["ROLE_USER"])
            .with("quota", 2.5)
    }

    fn flip(token: &str, index: usize) -> String {
        let mut bytes = token.as_bytes().to_vec();
        bytes[index] ^= 0x01;
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_local_round_trip() {
        let codec = local();
        let original = claims(2_000_000_000);

        let token = codec.encode(&original).unwrap();
        assert!(token.starts_with("v4.local."));

        let decoded = codec.decode_at(&token, 1_999_999_999).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(codec.family(), TokenFamily::Paseto);
        assert_eq!(codec.key_id(), Some("local-1"));
    }

    #[test]
    fn test_public_round_trip() {
        let codec = PasetoCodec::generate_public()
            .unwrap()
            .with_key_id("pub-1")
            .unwrap();
        assert_eq!(codec.purpose(), PasetoPurpose::Public);
        assert_eq!(codec.public_key().map(<[u8]>::len), Some(32));

        let original = claims(2_000_000_000);
        let token = codec.encode(&original).unwrap();
        assert!(token.starts_with("v4.public."));
        assert_eq!(codec.decode_at(&token, 0).unwrap(), original);
    }

    #[test]
    fn test_timestamps_are_rfc3339_on_the_wire() {
        let wire = to_wire(&ClaimSet::new().with("exp", 0_i64).with("count", 5_i64)).unwrap();
        assert_eq!(wire["exp"], Value::String("1970-01-01T00:00:00Z".to_string()));
        assert_eq!(wire["count"], Value::from(5));
    }

    #[test]
    fn test_expiration_boundary() {
        let codec = local();
        let token = codec.encode(&claims(5_000)).unwrap();

        assert!(codec.decode_at(&token, 4_999).is_ok());
        assert_eq!(
            codec.decode_at(&token, 5_001).unwrap_err(),
            ValidationError::Expired { expired_at: 5_000 }
        );
    }

    #[test]
    fn test_tampering_is_bad_signature() {
        let codecs = [
            local(),
            PasetoCodec::generate_public().unwrap(),
            PasetoCodec::generate_public()
                .unwrap()
                .with_key_id("pub-1")
                .unwrap(),
        ];

        for codec in codecs {
            let token = codec.encode(&claims(2_000_000_000)).unwrap();
            for index in codec.purpose().header().len()..token.len() {
                assert_eq!(
                    codec.decode_at(&flip(&token, index), 0).unwrap_err().kind(),
                    ValidationErrorKind::BadSignature,
                    "{} byte {index}",
                    codec.purpose()
                );
            }
        }
    }

    #[test]
    fn test_wrong_key_is_bad_signature() {
        let token = local().encode(&claims(2_000_000_000)).unwrap();
        let other = PasetoCodec::generate_local()
            .unwrap()
            .with_key_id("local-1")
            .unwrap();
        assert_eq!(
            other.decode_at(&token, 0).unwrap_err(),
            ValidationError::BadSignature
        );
    }

    #[test]
    fn test_foreign_key_id_is_bad_signature() {
        let token = local().encode(&claims(2_000_000_000)).unwrap();
        let renamed = PasetoCodec::local_from_hex(KEY_HEX)
            .unwrap()
            .with_key_id("local-2")
            .unwrap();
        assert_eq!(
            renamed.decode_at(&token, 0).unwrap_err(),
            ValidationError::BadSignature
        );
    }

    #[test]
    fn test_malformed_tokens() {
        let codec = local();
        for token in [
            "",
            "v4.public.abc",
            "v2.local.abc",
            "eyJhbGciOiJIUzI1NiJ9.e30.sig",
            "v4.local.",
            "v4.local..footer",
            "v4.local.body.footer.extra",
        ] {
            assert_eq!(
                codec.decode_at(token, 0).unwrap_err().kind(),
                ValidationErrorKind::Malformed,
                "token {token:?}"
            );
        }
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(PasetoCodec::local(&[0u8; 16]).unwrap_err().is_key_error());
        assert!(PasetoCodec::local_from_hex("zz").unwrap_err().is_key_error());
    }

    #[test]
    fn test_purpose_serde() {
        let purpose: PasetoPurpose = serde_json::from_str("\"public\"").unwrap();
        assert_eq!(purpose, PasetoPurpose::Public);
        assert_eq!(PasetoPurpose::default(), PasetoPurpose::Local);
    }
}
