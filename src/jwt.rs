//! JWT token generation and validation.
//!
//! Tokens are compact HS256 JWTs. Access tokens are stateless and carry no
//! `jti`; refresh tokens always carry a random 128-bit `jti` so they can be
//! denylisted.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// The only algorithm tokens are signed and accepted with.
pub const TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

/// Default value of the `iss` claim.
pub const DEFAULT_ISSUER: &str = "worklog";

/// Token kind, serialized into the `type` claim.
///
/// Matched exhaustively wherever the denylist check is decided, so a new
/// kind has to be handled there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived token authorizing API calls. Never denylisted.
    Access,
    /// Long-lived token used only to mint new pairs. Tracked by `jti`.
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// JWT claims shared by both token kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Token kind
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// JWT ID, present only on refresh tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Not before (Unix timestamp)
    pub nbf: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    /// The revocation id of a refresh token.
    pub fn refresh_id(&self) -> Option<&str> {
        match self.kind {
            TokenKind::Refresh => self.jti.as_deref(),
            TokenKind::Access => None,
        }
    }

    fn check_shape(&self) -> Result<(), TokenError> {
        match (self.kind, self.jti.as_deref()) {
            (TokenKind::Access, None) => Ok(()),
            (TokenKind::Refresh, Some(jti)) if !jti.is_empty() => Ok(()),
            _ => Err(TokenError::Malformed),
        }
    }
}

/// A freshly signed token together with the claims it carries.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The JWT token string
    pub token: String,
    /// Claims embedded in `token`
    pub claims: Claims,
}

/// Errors that can occur during JWT operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Not a JWT, or the payload does not have the expected shape.
    #[error("malformed token")]
    Malformed,
    /// Signature mismatch or a header declaring another algorithm.
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("failed to encode token: {0}")]
    Encoding(#[source] jsonwebtoken::errors::Error),
}

impl TokenError {
    fn from_decode(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::ImmatureSignature => TokenError::NotYetValid,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::InvalidKeyFormat => TokenError::InvalidSignature,
            _ => TokenError::Malformed,
        }
    }
}

/// Signs and verifies tokens with one symmetric secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
}

impl TokenCodec {
    /// Create a codec with the given secret and the default issuer.
    pub fn new(secret: &[u8]) -> Self {
        Self::with_issuer(secret, DEFAULT_ISSUER)
    }

    pub fn with_issuer(secret: &[u8], issuer: &str) -> Self {
        let mut validation = Validation::new(TOKEN_ALGORITHM);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "nbf", "iat", "iss", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer: issuer.to_string(),
        }
    }

    /// Sign a new token of `kind` for `subject`, valid for `ttl`.
    /// Every refresh token gets a fresh `jti`.
    pub fn issue(
        &self,
        kind: TokenKind,
        subject: &str,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        let now = unix_now();

        let jti = match kind {
            TokenKind::Access => None,
            TokenKind::Refresh => Some(generate_jti()),
        };

        let claims = Claims {
            sub: subject.to_string(),
            kind,
            jti,
            iat: now,
            nbf: now,
            exp: now.saturating_add(ttl.as_secs()),
            iss: self.issuer.clone(),
        };

        let header = Header::new(TOKEN_ALGORITHM);
        let token = jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(TokenError::Encoding)?;

        Ok(IssuedToken { token, claims })
    }

    /// Verify signature, algorithm and time bounds, and return the claims.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        // Reject foreign algorithms before handing the token to the verifier,
        // including ones jsonwebtoken cannot even parse (e.g. "none").
        if let Some(alg) = declared_algorithm(token) {
            if alg != "HS256" {
                warn!(alg = %alg, "Rejected token declaring a foreign algorithm");
                return Err(TokenError::InvalidSignature);
            }
        }

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(TokenError::from_decode)?;

        data.claims.check_shape()?;
        Ok(data.claims)
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 128 random bits, hex encoded.
fn generate_jti() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

/// Read the `alg` field of the header segment without verifying anything.
fn declared_algorithm(token: &str) -> Option<String> {
    let header = token.split('.').next()?;
    let bytes = URL_SAFE_NO_PAD.decode(header).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("alg")?.as_str().map(str::to_string)
}
