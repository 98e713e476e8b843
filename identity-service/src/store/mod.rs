use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Account, AccountStatus, PendingInvite};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional create lost: the key is already bound to a live record.
    #[error("record already exists")]
    AlreadyExists,

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Persistence seam for accounts and pending invites.
///
/// All writes are conditional so that concurrent requests racing on the
/// same email or account settle inside the store, without any in-process
/// locking above it. Emails are expected in normalized form; an
/// account's email never changes after `put_account`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn account_by_id(&self, account_id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Creates the account only if no account holds its email yet.
    /// Fails with `AlreadyExists` otherwise.
    async fn put_account(&self, account: &Account) -> Result<(), StoreError>;

    /// Persists `account` only while the stored status still equals
    /// `expected`. Returns `false` when the precondition no longer holds
    /// (the record changed underneath us, or is gone).
    async fn update_account(
        &self,
        account: &Account,
        expected: AccountStatus,
    ) -> Result<bool, StoreError>;

    /// Looks up a pending invite by the SHA-256 digest of its
    /// verification token.
    async fn invite_by_token(&self, token_hash: &str) -> Result<Option<PendingInvite>, StoreError>;

    /// Creates the invite only if no live invite holds its email. An
    /// expired invite for the same email is replaced atomically.
    async fn put_invite(&self, invite: &PendingInvite) -> Result<(), StoreError>;

    /// Returns `true` when a record was removed, `false` when the invite
    /// was already gone.
    async fn delete_invite(&self, invite_id: Uuid) -> Result<bool, StoreError>;

    /// Connectivity probe for the health endpoint.
    async fn health_check(&self) -> Result<(), StoreError>;
}
