//! JWT codec.
//!
//! Signs claim sets as JWS compact tokens using `jsonwebtoken`. Supported
//! algorithms:
//!
//! - **HS256 / HS384 / HS512**: HMAC with a shared secret
//! - **RS256 / RS384**: RSA PKCS#1 v1.5
//! - **ES384**: ECDSA with the P-384 curve
//!
//! The signing key id is written to the `kid` header. Asymmetric keys can be
//! published as a JWKS.
//!
//! ## Example
//!
//! ```ignore
//! use tokenward_auth::codec::{JwtCodec, SigningKeyPair, SigningAlgorithm, TokenCodec};
//!
//! let key = SigningKeyPair::generate_rsa(SigningAlgorithm::RS384)?;
//! let codec = JwtCodec::new(key);
//!
//! let token = codec.encode(&claims)?;
//! let decoded = codec.decode(&token)?;
//! ```

use std::collections::HashSet;
use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{EncodingError, TokenCodec, TokenFamily, ValidationError, check_expiration};
use crate::claims::ClaimSet;

/// Minimum HMAC secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms for JWT tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// HMAC with SHA-256.
    HS256,
    /// HMAC with SHA-384.
    HS384,
    /// HMAC with SHA-512.
    HS512,
    /// RSA with SHA-256.
    RS256,
    /// RSA with SHA-384.
    RS384,
    /// ECDSA with P-384 curve.
    ES384,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::HS256 => Algorithm::HS256,
            Self::HS384 => Algorithm::HS384,
            Self::HS512 => Algorithm::HS512,
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Returns the algorithm name as used in JWK/JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    /// Returns `true` if this is an HMAC algorithm.
    #[must_use]
    pub fn is_hmac(&self) -> bool {
        matches!(self, Self::HS256 | Self::HS384 | Self::HS512)
    }

    /// Returns `true` if this is an RSA-based algorithm.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }

    /// Returns `true` if this is an EC-based algorithm.
    #[must_use]
    pub fn is_ec(&self) -> bool {
        matches!(self, Self::ES384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

/// JSON Web Key (public part only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use ("sig" for signing).
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// RSA modulus (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

// ============================================================================
// Signing Key Pair
// ============================================================================

/// Key material for one signing algorithm.
pub struct SigningKeyPair {
    /// Key ID.
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_data: PublicKeyData,

    /// When the key was created or loaded.
    pub created_at: OffsetDateTime,
}

enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
    Symmetric,
}

impl SigningKeyPair {
    /// Creates an HMAC key from a shared secret.
    ///
    /// # Errors
    /// Returns an error if `algorithm` is not HMAC-based or the secret is
    /// shorter than [`MIN_SECRET_LEN`] bytes.
    pub fn from_secret(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        secret: &[u8],
    ) -> Result<Self, EncodingError> {
        if !algorithm.is_hmac() {
            return Err(EncodingError::key(format!(
                "Algorithm {algorithm} does not use a shared secret"
            )));
        }
        if secret.len() < MIN_SECRET_LEN {
            return Err(EncodingError::key(format!(
                "Secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            public_key_data: PublicKeyData::Symmetric,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Generates a new 2048-bit RSA key pair.
    ///
    /// # Errors
    /// Returns an error if key generation fails or algorithm is not RSA-based.
    pub fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, EncodingError> {
        if !algorithm.is_rsa() {
            return Err(EncodingError::key(format!(
                "Algorithm {algorithm} is not RSA-based"
            )));
        }

        let private_key =
            RsaPrivateKey::new(&mut OsRng, 2048).map_err(|e| EncodingError::crypto(e.to_string()))?;
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| EncodingError::key(e.to_string()))?;
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| EncodingError::key(e.to_string()))?;

        Self::from_pem(
            uuid::Uuid::new_v4().to_string(),
            algorithm,
            &private_pem,
            &public_pem,
        )
    }

    /// Generates a new EC key pair using the P-384 curve.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate_ec() -> Result<Self, EncodingError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| EncodingError::key(e.to_string()))?;

        Self::from_pem(
            uuid::Uuid::new_v4().to_string(),
            SigningAlgorithm::ES384,
            &private_pem,
            "",
        )
    }

    /// Loads a key pair from PEM strings.
    ///
    /// RSA keys need both halves. For ES384 the public key is derived from
    /// the PKCS#8 private key and `public_pem` is ignored.
    ///
    /// # Errors
    /// Returns an error if the PEM data is invalid or the algorithm is HMAC.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<Self, EncodingError> {
        let (encoding_key, decoding_key, public_key_data) = if algorithm.is_rsa() {
            let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
                .map_err(|e| EncodingError::key(e.to_string()))?;
            let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
                .map_err(|e| EncodingError::key(e.to_string()))?;

            let public_key = RsaPublicKey::from_public_key_pem(public_pem)
                .map_err(|e| EncodingError::key(e.to_string()))?;
            let n = public_key.n().to_bytes_be();
            let e = public_key.e().to_bytes_be();

            (encoding_key, decoding_key, PublicKeyData::Rsa { n, e })
        } else if algorithm.is_ec() {
            let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
                .map_err(|e| EncodingError::key(e.to_string()))?;

            let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
                .map_err(|e| EncodingError::key(e.to_string()))?;
            let signing_key = EcSigningKey::from(&secret_key);
            let point = signing_key.verifying_key().to_encoded_point(false);
            let x = point
                .x()
                .ok_or_else(|| EncodingError::key("Missing x coordinate"))?;
            let y = point
                .y()
                .ok_or_else(|| EncodingError::key("Missing y coordinate"))?;

            let decoding_key = DecodingKey::from_ec_components(
                &URL_SAFE_NO_PAD.encode(x.as_slice()),
                &URL_SAFE_NO_PAD.encode(y.as_slice()),
            )
            .map_err(|e| EncodingError::key(e.to_string()))?;

            (
                encoding_key,
                decoding_key,
                PublicKeyData::Ec {
                    x: x.to_vec(),
                    y: y.to_vec(),
                },
            )
        } else {
            return Err(EncodingError::key(format!(
                "Algorithm {algorithm} requires a shared secret, not PEM keys"
            )));
        };

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Exports the public key as a JWK. HMAC keys have no public part.
    #[must_use]
    pub fn to_jwk(&self) -> Option<Jwk> {
        match &self.public_key_data {
            PublicKeyData::Rsa { n, e } => Some(Jwk {
                kty: "RSA".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                crv: None,
                x: None,
                y: None,
            }),
            PublicKeyData::Ec { x, y } => Some(Jwk {
                kty: "EC".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: None,
                e: None,
                crv: Some("P-384".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
            }),
            PublicKeyData::Symmetric => None,
        }
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// JWT Codec
// ============================================================================

/// [`TokenCodec`] producing signed JWTs.
#[derive(Debug)]
pub struct JwtCodec {
    signing_key: SigningKeyPair,
}

impl JwtCodec {
    /// Creates a codec signing with `signing_key`.
    #[must_use]
    pub fn new(signing_key: SigningKeyPair) -> Self {
        Self { signing_key }
    }

    /// Returns the signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.signing_key.algorithm
    }

    /// Returns the JWKS containing the public key, empty for HMAC keys.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: self.signing_key.to_jwk().into_iter().collect(),
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.signing_key.algorithm.to_jwt_algorithm());
        // Expiration is checked against the caller's clock after verification.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();
        validation
    }

    /// Parses the header and payload segments so that structural problems
    /// are reported before signature verification.
    fn inspect(&self, token: &str) -> Result<(), ValidationError> {
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(ValidationError::malformed("Expected three dot-separated segments"));
        };

        let header: Header = decode_segment(header, "header")?;
        if header.alg != self.signing_key.algorithm.to_jwt_algorithm() {
            return Err(ValidationError::malformed(format!(
                "Unexpected algorithm {:?}",
                header.alg
            )));
        }

        let _: serde_json::Map<String, serde_json::Value> = decode_segment(payload, "payload")?;
        Ok(())
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    name: &str,
) -> Result<T, ValidationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| ValidationError::malformed(format!("Invalid {name} encoding: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ValidationError::malformed(format!("Invalid {name} JSON: {e}")))
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> ValidationError {
    use jsonwebtoken::errors::ErrorKind;

    // Header and payload were already parsed, so anything other than a
    // structural complaint comes from verifying the signature segment.
    match err.kind() {
        ErrorKind::InvalidToken
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::MissingAlgorithm => ValidationError::malformed(err.to_string()),
        _ => ValidationError::BadSignature,
    }
}

impl TokenCodec for JwtCodec {
    fn family(&self) -> TokenFamily {
        TokenFamily::Jwt
    }

    fn key_id(&self) -> Option<&str> {
        Some(&self.signing_key.kid)
    }

    fn encode(&self, claims: &ClaimSet) -> Result<String, EncodingError> {
        let mut header = Header::new(self.signing_key.algorithm.to_jwt_algorithm());
        header.kid = Some(self.signing_key.kid.clone());

        encode(&header, claims, &self.signing_key.encoding_key).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::Json(_) => EncodingError::serialization(e.to_string()),
                ErrorKind::InvalidKeyFormat
                | ErrorKind::InvalidRsaKey(_)
                | ErrorKind::InvalidEcdsaKey => EncodingError::key(e.to_string()),
                _ => EncodingError::crypto(e.to_string()),
            }
        })
    }

    fn decode_at(&self, token: &str, now: i64) -> Result<ClaimSet, ValidationError> {
        self.inspect(token)?;

        let data = decode::<serde_json::Map<String, serde_json::Value>>(
            token,
            &self.signing_key.decoding_key,
            &self.validation(),
        )
        .map_err(map_jwt_error)?;

        let claims = ClaimSet::from_json_map(data.claims);
        check_expiration(&claims, now)?;
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ValidationErrorKind;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn hmac_codec() -> JwtCodec {
        JwtCodec::new(SigningKeyPair::from_secret("hmac-1", SigningAlgorithm::HS256, SECRET).unwrap())
    }

    fn claims(exp: i64) -> ClaimSet {
        ClaimSet::new()
            .with("sub", "user123")
            .with("iat", exp - 3600)
            .with("exp", exp)
            .with("roles", vec!["ROLE_USER"])
            .with("email_verified", true)
    }

    /// Replaces one character in the middle of the signature segment.
    fn tamper_signature(token: &str) -> String {
        let sig_start = token.rfind('.').unwrap() + 1;
        let index = sig_start + (token.len() - sig_start) / 2;
        let mut bytes = token.as_bytes().to_vec();
        bytes[index] = if bytes[index] == b'A' { b'B' } else { b'A' };
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_hs256_round_trip() {
        let codec = hmac_codec();
        let original = claims(2_000_000_000);

        let token = codec.encode(&original).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let decoded = codec.decode_at(&token, 1_999_999_999).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_kid_header() {
        let codec = hmac_codec();
        let token = codec.encode(&claims(2_000_000_000)).unwrap();
        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("hmac-1"));
        assert_eq!(codec.key_id(), Some("hmac-1"));
        assert_eq!(codec.family(), TokenFamily::Jwt);
    }

    #[test]
    fn test_expiration_boundary() {
        let codec = hmac_codec();
        let token = codec.encode(&claims(1_000)).unwrap();

        assert!(codec.decode_at(&token, 999).is_ok());
        assert_eq!(
            codec.decode_at(&token, 1_001).unwrap_err(),
            ValidationError::Expired { expired_at: 1_000 }
        );
    }

    #[test]
    fn test_tampered_signature_is_bad_signature() {
        let codec = hmac_codec();
        let token = codec.encode(&claims(2_000_000_000)).unwrap();

        let err = codec.decode_at(&tamper_signature(&token), 0).unwrap_err();
        assert_eq!(err.kind(), ValidationErrorKind::BadSignature);

        let sig_start = token.rfind('.').unwrap() + 1;
        for index in sig_start..token.len() {
            let mut bytes = token.as_bytes().to_vec();
            bytes[index] ^= 0x01;
            let flipped = String::from_utf8(bytes).unwrap();
            assert_eq!(
                codec.decode_at(&flipped, 0).unwrap_err().kind(),
                ValidationErrorKind::BadSignature,
                "signature byte {index}"
            );
        }
    }

    #[test]
    fn test_tampered_payload_is_bad_signature() {
        let codec = hmac_codec();
        let token = codec.encode(&claims(2_000_000_000)).unwrap();

        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"admin","exp":2000000000}"#);
        let parts: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(
            codec.decode_at(&forged, 0).unwrap_err(),
            ValidationError::BadSignature
        );
    }

    #[test]
    fn test_wrong_key_is_bad_signature() {
        let other = JwtCodec::new(
            SigningKeyPair::from_secret("hmac-2", SigningAlgorithm::HS256, &[7u8; 32]).unwrap(),
        );
        let token = hmac_codec().encode(&claims(2_000_000_000)).unwrap();
        assert_eq!(
            other.decode_at(&token, 0).unwrap_err(),
            ValidationError::BadSignature
        );
    }

    #[test]
    fn test_malformed_tokens() {
        let codec = hmac_codec();
        for token in ["", "abc", "a.b", "a.b.c.d", "!!!.e30.sig", "e30.!!!.sig"] {
            let err = codec.decode_at(token, 0).unwrap_err();
            assert_eq!(err.kind(), ValidationErrorKind::Malformed, "token {token:?}");
        }
    }

    #[test]
    fn test_algorithm_mismatch_is_malformed() {
        let token = hmac_codec().encode(&claims(2_000_000_000)).unwrap();
        let hs512 = JwtCodec::new(
            SigningKeyPair::from_secret("hmac-1", SigningAlgorithm::HS512, SECRET).unwrap(),
        );
        assert!(matches!(
            hs512.decode_at(&token, 0),
            Err(ValidationError::Malformed { .. })
        ));
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = SigningKeyPair::from_secret("k", SigningAlgorithm::HS256, b"short").unwrap_err();
        assert!(err.is_key_error());

        let err = SigningKeyPair::from_secret("k", SigningAlgorithm::RS256, SECRET).unwrap_err();
        assert!(err.is_key_error());
    }

    #[test]
    fn test_rs256_round_trip_and_jwks() {
        let key_pair = SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap();
        let codec = JwtCodec::new(key_pair);
        let original = claims(2_000_000_000);

        let token = codec.encode(&original).unwrap();
        assert_eq!(codec.decode_at(&token, 0).unwrap(), original);
        assert_eq!(
            codec.decode_at(&tamper_signature(&token), 0).unwrap_err(),
            ValidationError::BadSignature
        );

        let jwks = codec.jwks();
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].kty, "RSA");
        assert_eq!(jwks.keys[0].alg, "RS256");
        assert!(jwks.keys[0].n.is_some());
    }

    #[test]
    fn test_es384_round_trip_and_jwk() {
        let key_pair = SigningKeyPair::generate_ec().unwrap();
        let jwk = key_pair.to_jwk().unwrap();
        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.crv.as_deref(), Some("P-384"));

        let codec = JwtCodec::new(key_pair);
        let original = claims(2_000_000_000);
        let token = codec.encode(&original).unwrap();
        assert_eq!(codec.decode_at(&token, 0).unwrap(), original);
    }

    #[test]
    fn test_hmac_has_no_jwks() {
        assert!(hmac_codec().jwks().keys.is_empty());
    }

    #[test]
    fn test_signing_algorithm_properties() {
        assert!(SigningAlgorithm::HS256.is_hmac());
        assert!(SigningAlgorithm::RS384.is_rsa());
        assert!(SigningAlgorithm::ES384.is_ec());
        assert!(!SigningAlgorithm::ES384.is_hmac());
        assert_eq!(SigningAlgorithm::HS512.as_str(), "HS512");

        let parsed: SigningAlgorithm = serde_json::from_str("\"RS384\"").unwrap();
        assert_eq!(parsed, SigningAlgorithm::RS384);
    }
}
