use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::role::{Permission, RoleName};

/// Lowercases and trims an email address. Every store lookup and every
/// persisted record uses this canonical form, so two spellings of the
/// same address can never coexist.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Lifecycle state of an account. Accounts are only created once the
/// invitee has chosen a password, so the earlier onboarding steps exist
/// purely as signed tokens and a pending invite record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    /// Password is set; waiting for the first one-time code.
    #[serde(rename = "pending_2fa")]
    PendingTwoFactor,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "suspended")]
    Suspended,
    #[serde(rename = "deactivated")]
    Deactivated,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::PendingTwoFactor => "pending_2fa",
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Deactivated => "deactivated",
        }
    }

    pub fn parse(s: &str) -> Option<AccountStatus> {
        match s {
            "pending_2fa" => Some(AccountStatus::PendingTwoFactor),
            "active" => Some(AccountStatus::Active),
            "suspended" => Some(AccountStatus::Suspended),
            "deactivated" => Some(AccountStatus::Deactivated),
            _ => None,
        }
    }
}

/// An outstanding one-time sign-in code. Only the SHA-256 digest of the
/// code is kept; the plaintext exists solely in the delivery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoFactorChallenge {
    pub code_hash: String,
    pub expires_utc: DateTime<Utc>,
}

impl TwoFactorChallenge {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_utc
    }
}

/// A member of the workspace. The email is immutable once the record
/// exists and is always stored in normalized form.
#[derive(Debug, Clone)]
pub struct Account {
    pub account_id: Uuid,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: RoleName,
    pub status: AccountStatus,
    /// Per-account grants on top of the role table.
    pub overrides: Vec<Permission>,
    pub two_factor: Option<TwoFactorChallenge>,
    pub created_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub last_login_utc: Option<DateTime<Utc>>,
}

impl Account {
    /// A freshly onboarded account: password chosen, first one-time code
    /// outstanding.
    pub fn new(
        email: String,
        password_hash: String,
        role: RoleName,
        created_by: Option<Uuid>,
        challenge: TwoFactorChallenge,
    ) -> Self {
        let now = Utc::now();
        Account {
            account_id: Uuid::new_v4(),
            email,
            password_hash: Some(password_hash),
            role,
            status: AccountStatus::PendingTwoFactor,
            overrides: Vec::new(),
            two_factor: Some(challenge),
            created_by,
            created_utc: now,
            updated_utc: now,
            last_login_utc: None,
        }
    }

    /// An account created outside the invite flow, immediately active.
    /// Used to seed the first administrator of a fresh deployment.
    pub fn bootstrap(email: String, password_hash: String, role: RoleName) -> Self {
        let now = Utc::now();
        Account {
            account_id: Uuid::new_v4(),
            email,
            password_hash: Some(password_hash),
            role,
            status: AccountStatus::Active,
            overrides: Vec::new(),
            two_factor: None,
            created_by: None,
            created_utc: now,
            updated_utc: now,
            last_login_utc: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// The externally visible view of the account. Credential material
    /// never leaves through this struct.
    pub fn profile(&self) -> AccountProfile {
        AccountProfile {
            account_id: self.account_id,
            email: self.email.clone(),
            role: self.role.clone(),
            status: self.status,
            created_utc: self.created_utc,
            last_login_utc: self.last_login_utc,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountProfile {
    pub account_id: Uuid,
    pub email: String,
    pub role: RoleName,
    pub status: AccountStatus,
    pub created_utc: DateTime<Utc>,
    pub last_login_utc: Option<DateTime<Utc>>,
}

impl From<Account> for AccountProfile {
    fn from(account: Account) -> Self {
        account.profile()
    }
}
