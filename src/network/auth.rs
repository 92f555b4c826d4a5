//! Player Authentication
//!
//! A connection authenticates once with a bearer token. When the server holds
//! a verification key the token must be a JWT from the operator's identity
//! provider and the account is keyed by its `sub` claim. Tokens are never
//! issued here.
//!
//! Without a key the server can run in guest mode: the token is an opaque
//! handle and the account is keyed by the handle itself, so reconnecting with
//! the same token lands on the same balance.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Sha256, Digest};
use thiserror::Error;

use crate::engine::state::PlayerId;
use crate::network::protocol::ErrorCode;

const GUEST_DOMAIN: &[u8] = b"crash-engine-guest:";
const PLAYER_DOMAIN: &[u8] = b"crash-engine-player:";

/// Key used to check token signatures.
#[derive(Clone, Debug)]
pub enum VerifyKey {
    /// RS256 public key, PEM encoded.
    RsaPem(String),
    /// HS256 shared secret.
    Secret(String),
}

/// Authentication configuration.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Signature key; `None` means tokens cannot be verified.
    pub key: Option<VerifyKey>,
    /// Required `iss` claim.
    pub issuer: Option<String>,
    /// Required `aud` claim.
    pub audience: Option<String>,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_secs: u64,
    /// Admit unverified guests when no key is configured.
    pub allow_guests: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            key: None,
            issuer: None,
            audience: None,
            leeway_secs: 30,
            allow_guests: true,
        }
    }
}

impl AuthConfig {
    /// Create config from `AUTH_*` environment variables.
    ///
    /// `AUTH_PUBLIC_KEY_PEM` wins over `AUTH_SECRET`. Empty values count as unset.
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let key = var("AUTH_PUBLIC_KEY_PEM")
            .map(VerifyKey::RsaPem)
            .or_else(|| var("AUTH_SECRET").map(VerifyKey::Secret));

        let defaults = Self::default();
        Self {
            key,
            issuer: var("AUTH_ISSUER"),
            audience: var("AUTH_AUDIENCE"),
            leeway_secs: var("AUTH_LEEWAY_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.leeway_secs),
            allow_guests: var("AUTH_ALLOW_GUESTS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.allow_guests),
        }
    }

    /// Whether tokens are accepted without verification.
    pub fn guest_mode(&self) -> bool {
        self.key.is_none() && self.allow_guests
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.leeway = self.leeway_secs;
        validation.set_required_spec_claims(&["sub", "exp"]);
        if let Some(ref issuer) = self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match self.audience {
            Some(ref audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

/// The claims the crash server reads. Issuer, audience and expiry are
/// checked by the decoder and not kept.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerClaims {
    /// Account id at the identity provider.
    pub sub: String,
}

/// Who a connection authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Account the connection acts for.
    pub player_id: PlayerId,
    /// Token subject, or `"guest"`.
    pub subject: String,
    /// Accepted without signature verification.
    pub guest: bool,
}

impl Identity {
    fn verified(subject: String) -> Self {
        Self {
            player_id: derive_player_id(PLAYER_DOMAIN, &subject),
            subject,
            guest: false,
        }
    }

    fn guest(token: &str) -> Self {
        Self {
            player_id: derive_player_id(GUEST_DOMAIN, token),
            subject: "guest".to_string(),
            guest: true,
        }
    }
}

fn derive_player_id(domain: &[u8], subject: &str) -> PlayerId {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(subject.as_bytes());
    let hash = hasher.finalize();

    let mut id = [0u8; 16];
    id.copy_from_slice(&hash[..16]);
    PlayerId::new(id)
}

/// Why a token was refused.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Blank token.
    #[error("empty token")]
    EmptyToken,
    /// No key to verify with and guests are turned off.
    #[error("guest access is disabled")]
    GuestsDisabled,
    /// Not a well-formed JWT.
    #[error("malformed token")]
    Malformed,
    /// Signature does not match the configured key.
    #[error("invalid signature")]
    InvalidSignature,
    /// Past `exp`.
    #[error("token expired")]
    Expired,
    /// `iss` differs from the configured issuer.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// `aud` differs from the configured audience.
    #[error("invalid audience")]
    InvalidAudience,
    /// A required claim is absent or empty.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// The configured key could not be loaded.
    #[error("bad verification key: {0}")]
    BadKey(String),
    /// Anything else the decoder rejected.
    #[error("decode error: {0}")]
    Decode(String),
}

impl AuthError {
    /// Error code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Expired => ErrorCode::TokenExpired,
            Self::GuestsDisabled | Self::BadKey(_) => ErrorCode::AuthFailed,
            _ => ErrorCode::InvalidToken,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            ErrorKind::InvalidAudience => Self::InvalidAudience,
            ErrorKind::MissingRequiredClaim(claim) => Self::MissingClaim(claim.clone()),
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                Self::Malformed
            }
            _ => Self::Decode(err.to_string()),
        }
    }
}

/// Verify a JWT against `key` and return its claims.
pub fn verify_jwt(token: &str, key: &VerifyKey, config: &AuthConfig) -> Result<PlayerClaims, AuthError> {
    let (decoding_key, algorithm) = match key {
        VerifyKey::RsaPem(pem) => (
            DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| AuthError::BadKey(e.to_string()))?,
            Algorithm::RS256,
        ),
        VerifyKey::Secret(secret) => (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256),
    };

    let claims = decode::<PlayerClaims>(token, &decoding_key, &config.validation(algorithm))?.claims;
    if claims.sub.trim().is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }
    Ok(claims)
}

/// Authenticate a connection: verify the JWT when a key is configured,
/// otherwise admit it as a guest.
pub fn authenticate(token: &str, config: &AuthConfig) -> Result<Identity, AuthError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::EmptyToken);
    }

    match config.key {
        Some(ref key) => verify_jwt(token, key, config).map(|claims| Identity::verified(claims.sub)),
        None if config.allow_guests => Ok(Identity::guest(token)),
        None => Err(AuthError::GuestsDisabled),
    }
}

// =============================================================================
// TESTS
// =============================================================================
