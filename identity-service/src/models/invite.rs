use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::models::role::RoleName;

/// An invitation that has been issued but not yet converted into an
/// account. Keyed by email (one live invite per address) and located by
/// the SHA-256 digest of its verification token; the plaintext token
/// exists only in the email that was sent.
#[derive(Debug, Clone)]
pub struct PendingInvite {
    pub invite_id: Uuid,
    pub email: String,
    pub role: RoleName,
    pub token_hash: String,
    pub invited_by: Uuid,
    pub expires_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl PendingInvite {
    pub fn new(
        email: String,
        role: RoleName,
        token_hash: String,
        invited_by: Uuid,
        expires_utc: DateTime<Utc>,
    ) -> Self {
        PendingInvite {
            invite_id: Uuid::new_v4(),
            email,
            role,
            token_hash,
            invited_by,
            expires_utc,
            created_utc: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_utc
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct InviteRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 1, message = "Role is required"))]
    pub role: String,
}
