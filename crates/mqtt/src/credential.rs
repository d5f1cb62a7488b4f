//! Short-lived bearer credentials for the device connection.
//!
//! The cloud bridge authenticates a device by a signed JWT passed as the MQTT
//! password. The token carries `iat`, `exp` and the project id as audience.
//! The bridge drops the connection once `exp` passes, so a fresh credential
//! is issued for every connection attempt and never reused across
//! reconnects.
//!
//! Signing itself sits behind [`TokenSigner`]; [`JwtSigner`] is the
//! `jsonwebtoken` implementation used in production.

use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use super::{config::Config, error::SigningError};

/// A signed token together with its validity window.
#[derive(Clone)]
pub struct Credential {
    token: String,
    issued_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

impl Credential {
    pub fn new(token: String, issued_at: OffsetDateTime, expires_at: OffsetDateTime) -> Self {
        Self {
            token,
            issued_at,
            expires_at,
        }
    }

    /// The opaque bearer token.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> OffsetDateTime {
        self.issued_at
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

// Never print the token itself.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// JWT claims expected by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
}

/// Supported signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    Rs256,
    Es256,
}

impl FromStr for SigningAlgorithm {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RS256" => Ok(Self::Rs256),
            "ES256" => Ok(Self::Es256),
            _ => Err(SigningError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rs256 => write!(f, "RS256"),
            Self::Es256 => write!(f, "ES256"),
        }
    }
}

/// Produces an opaque token from claims and a PEM private key.
pub trait TokenSigner: Send + Sync {
    fn sign(
        &self,
        claims: &Claims,
        key_pem: &[u8],
        algorithm: SigningAlgorithm,
    ) -> Result<String, SigningError>;
}

/// JWT signer backed by `jsonwebtoken`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtSigner;

impl TokenSigner for JwtSigner {
    fn sign(
        &self,
        claims: &Claims,
        key_pem: &[u8],
        algorithm: SigningAlgorithm,
    ) -> Result<String, SigningError> {
        let (key, alg) = match algorithm {
            SigningAlgorithm::Rs256 => (EncodingKey::from_rsa_pem(key_pem), Algorithm::RS256),
            SigningAlgorithm::Es256 => (EncodingKey::from_ec_pem(key_pem), Algorithm::ES256),
        };
        let key = key.map_err(|e| SigningError::InvalidKey(e.to_string()))?;

        jsonwebtoken::encode(&Header::new(alg), claims, &key)
            .map_err(|e| SigningError::Encode(e.to_string()))
    }
}

/// Issues a new [`Credential`] for each connection attempt.
#[derive(Clone)]
pub struct CredentialManager {
    audience: String,
    key_path: PathBuf,
    algorithm: String,
    validity: Duration,
    signer: Arc<dyn TokenSigner>,
}

impl CredentialManager {
    /// # Arguments
    /// - `audience`: project id the token is issued for
    /// - `key_path`: PEM private key, read on every issue
    /// - `algorithm`: `RS256` or `ES256`, checked on every issue
    /// - `validity`: lifetime of each token
    /// - `signer`: signing backend
    pub fn new(
        audience: impl Into<String>,
        key_path: impl AsRef<Path>,
        algorithm: impl Into<String>,
        validity: Duration,
        signer: Arc<dyn TokenSigner>,
    ) -> Self {
        Self {
            audience: audience.into(),
            key_path: key_path.as_ref().to_path_buf(),
            algorithm: algorithm.into(),
            validity,
            signer,
        }
    }

    /// Manager with the JWT signer, configured from the device settings.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.project_id.clone(),
            &config.private_key_file,
            config.algorithm.clone(),
            config.token_validity(),
            Arc::new(JwtSigner),
        )
    }

    /// Issues a credential valid from now.
    pub fn issue(&self) -> Result<Credential, SigningError> {
        self.issue_at(OffsetDateTime::now_utc())
    }

    /// Issues a credential valid from `now`.
    ///
    /// # Errors
    ///
    /// `UnsupportedAlgorithm` for an unknown algorithm, `KeyRead` when the key
    /// file cannot be read, `InvalidKey`/`Encode` from the signer.
    pub fn issue_at(&self, now: OffsetDateTime) -> Result<Credential, SigningError> {
        let algorithm: SigningAlgorithm = self.algorithm.parse()?;

        let key = fs::read(&self.key_path).map_err(|source| SigningError::KeyRead {
            path: self.key_path.clone(),
            source,
        })?;

        let expires_at = now + self.validity;
        let claims = Claims {
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
            aud: self.audience.clone(),
        };

        let token = self.signer.sign(&claims, &key, algorithm)?;
        debug!(
            "Issued {} credential for '{}', expires at {}",
            algorithm, self.audience, expires_at
        );

        Ok(Credential::new(token, now, expires_at))
    }
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialManager")
            .field("audience", &self.audience)
            .field("key_path", &self.key_path)
            .field("algorithm", &self.algorithm)
            .field("validity", &self.validity)
            .finish()
    }
}
