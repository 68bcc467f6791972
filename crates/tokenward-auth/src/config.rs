//! Token security configuration.
//!
//! Loaded once at startup from an optional TOML file plus environment
//! overrides, validated, and then shared read-only through [`SharedConfig`].
//!
//! # Example (TOML)
//!
//! ```toml
//! issuer = "https://auth.example.com"
//!
//! [access_token]
//! expiration = 900
//!
//! [refresh_token]
//! enabled = true
//! format = "signed"
//!
//! [paseto]
//! enabled = true
//! purpose = "local"
//! secret = "707172737475767778797a7b7c7d7e7f808182838485868788898a8b8c8d8e8f"
//! key_id = "k1"
//!
//! [token_endpoint]
//! url = "https://idp.example.com/oauth/token"
//! content_type = "form"
//! auth_method = "client_secret_basic"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use config::{Config, Environment, File};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::codec::jwt::MIN_SECRET_LEN;
use crate::codec::paseto::LOCAL_KEY_LEN;
use crate::codec::{JwtCodec, PasetoCodec, PasetoPurpose, SigningAlgorithm, SigningKeyPair, TokenCodec};
use crate::oauth::token_endpoint::{TokenEndpointAuthMethod, TokenRequestContentType};
use crate::refresh::RefreshTokenFormat;

/// Environment variable prefix, e.g. `TOKENWARD__ACCESS_TOKEN__EXPIRATION=900`.
pub const ENV_PREFIX: &str = "TOKENWARD";

/// Default configuration file looked up when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "tokenward.toml";

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenSecurityConfig {
    /// Enables token issuance. Read on every call; when `false` every
    /// issuing operation fails with a configuration error.
    pub enabled: bool,

    /// Value of the `iss` claim. Omitted when unset.
    pub issuer: Option<String>,

    /// Claim carrying the principal's roles.
    pub roles_claim: String,

    /// Access token settings.
    pub access_token: AccessTokenConfig,

    /// Refresh token settings.
    pub refresh_token: RefreshTokenConfig,

    /// JWT codec settings.
    pub jwt: JwtConfig,

    /// PASETO codec settings.
    pub paseto: PasetoConfig,

    /// Provider token endpoint.
    pub token_endpoint: TokenEndpointConfig,

    /// OAuth client registration at the provider.
    pub client: OAuthClientConfig,
}

impl Default for TokenSecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            issuer: None,
            roles_claim: crate::claims::names::ROLES.to_string(),
            access_token: AccessTokenConfig::default(),
            refresh_token: RefreshTokenConfig::default(),
            jwt: JwtConfig::default(),
            paseto: PasetoConfig::default(),
            token_endpoint: TokenEndpointConfig::default(),
            client: OAuthClientConfig::default(),
        }
    }
}

/// Access token settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessTokenConfig {
    /// Lifetime in seconds.
    pub expiration: i64,
}

impl Default for AccessTokenConfig {
    fn default() -> Self {
        Self { expiration: 3600 }
    }
}

/// Refresh token settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshTokenConfig {
    /// Issue refresh tokens alongside access tokens.
    pub enabled: bool,

    /// Refresh token representation.
    pub format: RefreshTokenFormat,
}

impl Default for RefreshTokenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: RefreshTokenFormat::Signed,
        }
    }
}

/// JWT codec settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Use JWT when PASETO is disabled.
    pub enabled: bool,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    /// Shared secret for HS* algorithms.
    pub secret: Option<String>,

    /// PKCS#8 PEM private key for RS*/ES384.
    pub private_key_pem: Option<String>,

    /// SPKI PEM public key for RS*.
    pub public_key_pem: Option<String>,

    /// Key id written to the `kid` header.
    pub key_id: Option<String>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: SigningAlgorithm::HS256,
            secret: None,
            private_key_pem: None,
            public_key_pem: None,
            key_id: None,
        }
    }
}

/// PASETO codec settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PasetoConfig {
    /// Use PASETO. Takes precedence over JWT.
    pub enabled: bool,

    /// `local` (symmetric) or `public` (Ed25519).
    pub purpose: PasetoPurpose,

    /// Hex-encoded 32-byte key for `local`.
    pub secret: Option<String>,

    /// Hex-encoded 64-byte Ed25519 secret key for `public`.
    pub secret_key: Option<String>,

    /// Hex-encoded 32-byte Ed25519 public key for `public`.
    pub public_key: Option<String>,

    /// Key id written to the footer.
    pub key_id: Option<String>,
}

impl Default for PasetoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            purpose: PasetoPurpose::Local,
            secret: None,
            secret_key: None,
            public_key: None,
            key_id: None,
        }
    }
}

/// Provider token endpoint settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenEndpointConfig {
    /// Token endpoint URL.
    pub url: Option<Url>,

    /// Encoding of token request bodies.
    pub content_type: TokenRequestContentType,

    /// Client authentication method.
    pub auth_method: TokenEndpointAuthMethod,
}

/// OAuth client registration at the provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthClientConfig {
    /// Client identifier.
    pub client_id: String,

    /// Client secret for confidential clients.
    pub client_secret: Option<String>,

    /// Provider authorization endpoint.
    pub authorization_url: Option<Url>,

    /// Redirect URI registered with the provider.
    pub redirect_uri: Option<Url>,

    /// Requested scopes.
    pub scopes: Vec<String>,

    /// Send a PKCE S256 challenge.
    pub use_pkce: bool,
}

impl Default for OAuthClientConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            authorization_url: None,
            redirect_uri: None,
            scopes: vec!["openid".to_string()],
            use_pkce: true,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl TokenSecurityConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The access token expiration is not positive
    /// - The roles claim is empty
    /// - A configured secret has the wrong size or encoding
    ///
    /// Returns `ConfigError::Missing` if no codec is enabled, or the token
    /// endpoint is configured without the client credentials its auth method
    /// needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_token.expiration <= 0 {
            return Err(ConfigError::InvalidValue(
                "access_token.expiration must be > 0".to_string(),
            ));
        }

        if self.roles_claim.is_empty() {
            return Err(ConfigError::InvalidValue(
                "roles_claim cannot be empty".to_string(),
            ));
        }

        if self.enabled && !self.paseto.enabled && !self.jwt.enabled {
            return Err(ConfigError::Missing(
                "paseto.enabled or jwt.enabled".to_string(),
            ));
        }

        if let Some(secret) = &self.jwt.secret {
            if !self.jwt.algorithm.is_hmac() {
                return Err(ConfigError::InvalidValue(format!(
                    "jwt.secret cannot be used with {}",
                    self.jwt.algorithm
                )));
            }
            if secret.len() < MIN_SECRET_LEN {
                return Err(ConfigError::InvalidValue(format!(
                    "jwt.secret must be at least {MIN_SECRET_LEN} bytes"
                )));
            }
        }

        if self.jwt.algorithm.is_rsa()
            && self.jwt.private_key_pem.is_some() != self.jwt.public_key_pem.is_some()
        {
            return Err(ConfigError::Missing(
                "jwt.private_key_pem and jwt.public_key_pem must be set together".to_string(),
            ));
        }

        if let Some(secret) = &self.paseto.secret {
            let len = hex::decode(secret.trim())
                .map_err(|e| ConfigError::InvalidValue(format!("paseto.secret: {e}")))?
                .len();
            if len != LOCAL_KEY_LEN {
                return Err(ConfigError::InvalidValue(format!(
                    "paseto.secret must be {LOCAL_KEY_LEN} bytes, got {len}"
                )));
            }
        }

        if self.paseto.secret_key.is_some() != self.paseto.public_key.is_some() {
            return Err(ConfigError::Missing(
                "paseto.secret_key and paseto.public_key must be set together".to_string(),
            ));
        }

        if self.token_endpoint.url.is_some() {
            if self.client.client_id.is_empty() {
                return Err(ConfigError::Missing("client.client_id".to_string()));
            }
            if self.token_endpoint.auth_method.requires_secret()
                && self.client.client_secret.is_none()
            {
                return Err(ConfigError::Missing(format!(
                    "client.client_secret (required by {})",
                    self.token_endpoint.auth_method
                )));
            }
        }

        Ok(())
    }
}

/// Loads configuration from `path` (or [`DEFAULT_CONFIG_FILE`] when `None`)
/// and `TOKENWARD__`-prefixed environment variables, then validates it.
///
/// A missing file is not an error; defaults and environment still apply.
///
/// # Errors
/// Returns an error if the sources cannot be merged or the result is invalid.
pub fn load_config(path: Option<&Path>) -> Result<TokenSecurityConfig, ConfigError> {
    let mut builder = Config::builder();

    let file = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), Path::to_path_buf);
    if file.exists() {
        builder = builder.add_source(File::from(file));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__"),
    );

    let merged: TokenSecurityConfig = builder
        .build()
        .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?
        .try_deserialize()
        .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;

    merged.validate()?;
    Ok(merged)
}

// ============================================================================
// Shared configuration
// ============================================================================

/// Process-wide configuration handle.
///
/// Readers take a snapshot per call, so a replaced configuration is seen by
/// the next token generation without locking.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<ArcSwap<TokenSecurityConfig>>,
}

impl SharedConfig {
    /// Wraps `config`.
    #[must_use]
    pub fn new(config: TokenSecurityConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Returns the current configuration.
    #[must_use]
    pub fn load(&self) -> Arc<TokenSecurityConfig> {
        self.inner.load_full()
    }

    /// Validates and installs a new configuration.
    ///
    /// Keys, issuer and roles claim are bound when the codec and generators
    /// are built; expiration and refresh settings are read on every call.
    ///
    /// # Errors
    /// Returns the validation error and keeps the previous configuration.
    pub fn replace(&self, config: TokenSecurityConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.inner.store(Arc::new(config));
        info!("Token security configuration replaced");
        Ok(())
    }

    /// Current access token lifetime in seconds.
    #[must_use]
    pub fn access_token_expiration(&self) -> i64 {
        self.inner.load().access_token.expiration
    }

    /// Whether token issuance is currently enabled.
    #[must_use]
    pub fn issuance_enabled(&self) -> bool {
        self.inner.load().enabled
    }

    /// Whether refresh tokens are currently enabled.
    #[must_use]
    pub fn refresh_enabled(&self) -> bool {
        self.inner.load().refresh_token.enabled
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(TokenSecurityConfig::default())
    }
}

impl From<TokenSecurityConfig> for SharedConfig {
    fn from(config: TokenSecurityConfig) -> Self {
        Self::new(config)
    }
}

// ============================================================================
// Codec selection
// ============================================================================

/// Builds the active codec: PASETO when enabled, otherwise JWT.
///
/// When no key material is configured an ephemeral key is generated and a
/// warning is logged; tokens then do not survive a restart.
///
/// # Errors
/// Returns an error if neither family is enabled or the key material is
/// unusable.
pub fn build_codec(config: &TokenSecurityConfig) -> Result<Arc<dyn TokenCodec>, ConfigError> {
    if config.paseto.enabled {
        let codec = build_paseto(&config.paseto)?;
        info!(family = "paseto", purpose = %config.paseto.purpose, "Token codec ready");
        return Ok(Arc::new(codec));
    }

    if config.jwt.enabled {
        let codec = build_jwt(&config.jwt)?;
        info!(family = "jwt", algorithm = %config.jwt.algorithm, "Token codec ready");
        return Ok(Arc::new(codec));
    }

    Err(ConfigError::Missing(
        "paseto.enabled or jwt.enabled".to_string(),
    ))
}

fn build_paseto(config: &PasetoConfig) -> Result<PasetoCodec, ConfigError> {
    let invalid = |e: crate::codec::EncodingError| ConfigError::InvalidValue(format!("paseto: {e}"));

    let codec = match config.purpose {
        PasetoPurpose::Local => match &config.secret {
            Some(secret) => PasetoCodec::local_from_hex(secret).map_err(invalid)?,
            None => {
                warn!("paseto.secret not set, generating an ephemeral v4.local key");
                PasetoCodec::generate_local().map_err(invalid)?
            }
        },
        PasetoPurpose::Public => match (&config.secret_key, &config.public_key) {
            (Some(secret), Some(public)) => {
                let secret = hex::decode(secret.trim())
                    .map_err(|e| ConfigError::InvalidValue(format!("paseto.secret_key: {e}")))?;
                let public = hex::decode(public.trim())
                    .map_err(|e| ConfigError::InvalidValue(format!("paseto.public_key: {e}")))?;
                PasetoCodec::public(&secret, &public).map_err(invalid)?
            }
            _ => {
                warn!("paseto key pair not set, generating an ephemeral v4.public key pair");
                PasetoCodec::generate_public().map_err(invalid)?
            }
        },
    };

    match &config.key_id {
        Some(kid) => codec.with_key_id(kid.as_str()).map_err(invalid),
        None => Ok(codec),
    }
}

fn build_jwt(config: &JwtConfig) -> Result<JwtCodec, ConfigError> {
    let invalid = |e: crate::codec::EncodingError| ConfigError::InvalidValue(format!("jwt: {e}"));
    let kid = config
        .key_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let key = if config.algorithm.is_hmac() {
        match &config.secret {
            Some(secret) => SigningKeyPair::from_secret(kid, config.algorithm, secret.as_bytes()),
            None => {
                warn!(algorithm = %config.algorithm, "jwt.secret not set, generating an ephemeral secret");
                let mut secret = [0u8; MIN_SECRET_LEN];
                OsRng.fill_bytes(&mut secret);
                SigningKeyPair::from_secret(kid, config.algorithm, &secret)
            }
        }
    } else {
        match (&config.private_key_pem, &config.public_key_pem) {
            (Some(private_pem), public_pem) => SigningKeyPair::from_pem(
                kid,
                config.algorithm,
                private_pem,
                public_pem.as_deref().unwrap_or_default(),
            ),
            (None, _) if config.algorithm.is_rsa() => {
                warn!(algorithm = %config.algorithm, "jwt key pair not set, generating an ephemeral RSA key");
                SigningKeyPair::generate_rsa(config.algorithm)
            }
            (None, _) => {
                warn!("jwt key pair not set, generating an ephemeral P-384 key");
                SigningKeyPair::generate_ec()
            }
        }
    }
    .map_err(invalid)?;

    Ok(JwtCodec::new(key))
}
