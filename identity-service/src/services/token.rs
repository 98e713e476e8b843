use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::models::RoleName;

/// Discriminates the three token families. Verification always names
/// the expected kind, so a token minted for one step can never be
/// replayed into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Emailed with an invite; proves control of the invited address.
    InviteVerification,
    /// Short-lived bridge between email verification and password choice.
    PasswordSetup,
    /// Bearer credential for an active account.
    Session,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::InviteVerification => "invite_verification",
            TokenKind::PasswordSetup => "password_setup",
            TokenKind::Session => "session",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Account id for session tokens, invited email for onboarding tokens.
    pub sub: String,
    pub email: String,
    pub role: RoleName,
    pub kind: TokenKind,
    /// Account id of the inviter; onboarding kinds only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invited_by: Option<Uuid>,
    /// Digest of the originating verification token; password-setup kind
    /// only. Ties the setup step back to its pending invite record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_hash: Option<String>,
    /// Unique token id.
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiry (Unix timestamp)
    pub exp: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Wrong token kind")]
    WrongKind,
}

/// Issues and verifies the service's HMAC-signed tokens. All three
/// kinds share one signing secret; the `kind` claim keeps them from
/// being interchangeable.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    invite_ttl: Duration,
    setup_ttl: Duration,
    session_ttl: Duration,
}

impl TokenService {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.signing_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.signing_secret.as_bytes()),
            invite_ttl: Duration::seconds(config.invite_ttl_seconds),
            setup_ttl: Duration::seconds(config.setup_ttl_seconds),
            session_ttl: Duration::seconds(config.session_ttl_seconds),
        }
    }

    /// Mint the token that accompanies an invite email.
    pub fn issue_invite_verification(
        &self,
        email: &str,
        role: &RoleName,
        invited_by: Uuid,
    ) -> Result<(String, DateTime<Utc>), anyhow::Error> {
        self.issue(
            TokenKind::InviteVerification,
            email.to_string(),
            email,
            role,
            Some(invited_by),
            None,
            self.invite_ttl,
        )
    }

    /// Mint the token returned by a successful email verification.
    /// `invite_hash` is the digest of the verification token that was
    /// just accepted.
    pub fn issue_password_setup(
        &self,
        email: &str,
        role: &RoleName,
        invited_by: Uuid,
        invite_hash: &str,
    ) -> Result<(String, DateTime<Utc>), anyhow::Error> {
        self.issue(
            TokenKind::PasswordSetup,
            email.to_string(),
            email,
            role,
            Some(invited_by),
            Some(invite_hash.to_string()),
            self.setup_ttl,
        )
    }

    /// Mint a session token for an active account.
    pub fn issue_session(
        &self,
        account_id: Uuid,
        email: &str,
        role: &RoleName,
    ) -> Result<(String, DateTime<Utc>), anyhow::Error> {
        self.issue(
            TokenKind::Session,
            account_id.to_string(),
            email,
            role,
            None,
            None,
            self.session_ttl,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn issue(
        &self,
        kind: TokenKind,
        sub: String,
        email: &str,
        role: &RoleName,
        invited_by: Option<Uuid>,
        invite_hash: Option<String>,
        ttl: Duration,
    ) -> Result<(String, DateTime<Utc>), anyhow::Error> {
        let now = Utc::now();
        let expires_utc = now + ttl;
        let claims = TokenClaims {
            sub,
            email: email.to_string(),
            role: role.clone(),
            kind,
            invited_by,
            invite_hash,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: expires_utc.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode {} token: {}", kind.as_str(), e))?;
        Ok((token, expires_utc))
    }

    /// Decode and validate a token, then check it is of the expected
    /// kind. Expiry is checked against the server clock with no leeway.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        let data = decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;

        if data.claims.kind != expected {
            return Err(TokenError::WrongKind);
        }
        Ok(data.claims)
    }

    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl.num_seconds()
    }
}
