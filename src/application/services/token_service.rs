//! Token Service
//!
//! Issues, verifies, and refreshes signed session tokens.
//!
//! Access tokens are stateless-verifiable: verification is a pure function
//! of the token and the shared signing secret, so every gateway instance can
//! validate a handshake without a database round trip. Rejections are typed
//! results, never panics or control-flow exceptions.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::JwtSettings;
use crate::domain::{Identity, IdentityId, IdentityStore, IdentityStoreError, Scope};

/// Token kind. Access tokens are short-lived (minutes); refresh tokens are
/// long-lived (days) and can only be exchanged for new access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// A signed, time-bounded credential binding an identity to an expiry.
#[derive(Debug, Clone, Serialize)]
pub struct SessionToken {
    pub token: String,
    pub token_type: TokenType,
    pub expires_at: DateTime<Utc>,
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (identity ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at time (Unix timestamp)
    pub iat: i64,
    /// Token type discriminator
    pub typ: TokenType,
    /// Display name carried for gateway-side logging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<Scope>,
}

impl TokenClaims {
    /// Parse the subject claim into an identity id.
    pub fn identity_id(&self) -> Result<IdentityId, TokenRejected> {
        self.sub
            .parse::<i64>()
            .map(IdentityId)
            .map_err(|_| TokenRejected::Malformed)
    }
}

/// Typed verification rejections. Callers branch on these explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenRejected {
    #[error("token expired")]
    Expired,

    #[error("bad token signature")]
    BadSignature,

    #[error("wrong token type")]
    WrongType,

    #[error("malformed token")]
    Malformed,
}

/// Errors while signing a new token.
#[derive(Debug, thiserror::Error)]
pub enum TokenIssueError {
    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Errors on the refresh path.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Rejected(#[from] TokenRejected),

    #[error("identity no longer exists")]
    UnknownIdentity,

    #[error(transparent)]
    Store(#[from] IdentityStoreError),

    #[error(transparent)]
    Issue(#[from] TokenIssueError),
}

/// Stateless JWT token service (HMAC-SHA256).
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(settings: &JwtSettings) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(settings.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(settings.secret.as_bytes()),
            access_ttl: Duration::minutes(settings.access_token_expiry_minutes),
            refresh_ttl: Duration::days(settings.refresh_token_expiry_days),
        }
    }

    fn ttl(&self, token_type: TokenType) -> Duration {
        match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        }
    }

    /// Issue a signed token for an identity with expiry `now + TTL(type)`.
    pub fn issue(
        &self,
        identity: &Identity,
        token_type: TokenType,
    ) -> Result<SessionToken, TokenIssueError> {
        self.issue_at(identity, token_type, Utc::now())
    }

    /// Issue with an explicit clock. Used by expiry boundary tests.
    pub fn issue_at(
        &self,
        identity: &Identity,
        token_type: TokenType,
        now: DateTime<Utc>,
    ) -> Result<SessionToken, TokenIssueError> {
        let expires_at = now + self.ttl(token_type);

        let claims = TokenClaims {
            sub: identity.id.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            typ: token_type,
            name: Some(identity.username.clone()),
            scopes: identity.scopes.iter().copied().collect(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)?;

        Ok(SessionToken {
            token,
            token_type,
            expires_at,
        })
    }

    /// Verify a token against the current clock.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<TokenClaims, TokenRejected> {
        self.verify_at(token, expected, Utc::now())
    }

    /// Verify a token against an explicit clock.
    ///
    /// Zero leeway: a token is valid through its expiry instant and rejected
    /// strictly after it. Signature and shape failures map to
    /// `BadSignature` / `Malformed`; a type mismatch maps to `WrongType`.
    pub fn verify_at(
        &self,
        token: &str,
        expected: TokenType,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, TokenRejected> {
        let mut validation = Validation::default();
        // Expiry is checked below against the supplied clock, without leeway.
        validation.validate_exp = false;

        let data =
            decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenRejected::BadSignature,
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenRejected::Expired,
                    _ => TokenRejected::Malformed,
                }
            })?;

        let claims = data.claims;

        if claims.typ != expected {
            return Err(TokenRejected::WrongType);
        }
        if now.timestamp() > claims.exp {
            return Err(TokenRejected::Expired);
        }

        Ok(claims)
    }

    /// Exchange a refresh token for a new access token (sliding refresh;
    /// the refresh token itself stays valid).
    pub async fn refresh(
        &self,
        refresh_token: &str,
        identities: &dyn IdentityStore,
    ) -> Result<SessionToken, RefreshError> {
        let claims = self.verify(refresh_token, TokenType::Refresh)?;
        let identity_id = claims.identity_id()?;

        let identity = identities
            .resolve(identity_id)
            .await?
            .ok_or(RefreshError::UnknownIdentity)?;

        Ok(self.issue(&identity, TokenType::Access)?)
    }
}
