use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::{Account, AccountStatus, PendingInvite};
use crate::store::{CredentialStore, StoreError};

/// In-memory credential store. Backs local development and the
/// integration tests; the maps give the same conditional-write semantics
/// the SQL adapter gets from unique indexes and guarded UPDATEs.
///
/// `accounts` and `invites` are keyed by normalized email and are the
/// source of truth; the remaining maps are lookup indexes into them.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: DashMap<String, Account>,
    account_ids: DashMap<Uuid, String>,
    invites: DashMap<String, PendingInvite>,
    invite_tokens: DashMap<String, String>,
    invite_ids: DashMap<Uuid, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn unlink_invite(&self, invite: &PendingInvite) {
        self.invite_tokens.remove(&invite.token_hash);
        self.invite_ids.remove(&invite.invite_id);
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(email).map(|entry| entry.clone()))
    }

    async fn account_by_id(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        let Some(email) = self.account_ids.get(&account_id).map(|entry| entry.clone()) else {
            return Ok(None);
        };
        Ok(self.accounts.get(&email).map(|entry| entry.clone()))
    }

    async fn put_account(&self, account: &Account) -> Result<(), StoreError> {
        match self.accounts.entry(account.email.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(account.clone());
                self.account_ids
                    .insert(account.account_id, account.email.clone());
                Ok(())
            }
        }
    }

    async fn update_account(
        &self,
        account: &Account,
        expected: AccountStatus,
    ) -> Result<bool, StoreError> {
        let Some(email) = self.account_ids.get(&account.account_id).map(|entry| entry.clone())
        else {
            return Ok(false);
        };
        // The shard write lock held by get_mut makes check-and-swap atomic.
        let Some(mut entry) = self.accounts.get_mut(&email) else {
            return Ok(false);
        };
        if entry.status != expected {
            return Ok(false);
        }
        *entry = account.clone();
        Ok(true)
    }

    async fn invite_by_token(&self, token_hash: &str) -> Result<Option<PendingInvite>, StoreError> {
        let Some(email) = self.invite_tokens.get(token_hash).map(|entry| entry.clone()) else {
            return Ok(None);
        };
        Ok(self
            .invites
            .get(&email)
            .filter(|invite| invite.token_hash == token_hash)
            .map(|invite| invite.clone()))
    }

    async fn put_invite(&self, invite: &PendingInvite) -> Result<(), StoreError> {
        match self.invites.entry(invite.email.clone()) {
            Entry::Occupied(mut slot) => {
                if !slot.get().is_expired() {
                    return Err(StoreError::AlreadyExists);
                }
                let stale = slot.insert(invite.clone());
                self.unlink_invite(&stale);
            }
            Entry::Vacant(slot) => {
                slot.insert(invite.clone());
            }
        }
        self.invite_tokens
            .insert(invite.token_hash.clone(), invite.email.clone());
        self.invite_ids.insert(invite.invite_id, invite.email.clone());
        Ok(())
    }

    async fn delete_invite(&self, invite_id: Uuid) -> Result<bool, StoreError> {
        let Some((_, email)) = self.invite_ids.remove(&invite_id) else {
            return Ok(false);
        };
        // remove_if guards against the slot having been replaced by a
        // newer invite for the same email.
        match self
            .invites
            .remove_if(&email, |_, invite| invite.invite_id == invite_id)
        {
            Some((_, invite)) => {
                self.invite_tokens.remove(&invite.token_hash);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RoleName, TwoFactorChallenge};
    use chrono::{Duration, Utc};

    fn pending_account(email: &str) -> Account {
        Account::new(
            email.to_string(),
            "$argon2id$stub".to_string(),
            RoleName::new("EXECUTIVE"),
            None,
            TwoFactorChallenge {
                code_hash: "ab".repeat(32),
                expires_utc: Utc::now() + Duration::minutes(10),
            },
        )
    }

    fn invite_for(email: &str, token_hash: &str, expires_utc: chrono::DateTime<Utc>) -> PendingInvite {
        PendingInvite::new(
            email.to_string(),
            RoleName::new("EXECUTIVE"),
            token_hash.to_string(),
            Uuid::new_v4(),
            expires_utc,
        )
    }

    #[tokio::test]
    async fn test_put_account_rejects_duplicate_email() {
        let store = MemoryStore::new();
        store.put_account(&pending_account("bob@x.com")).await.unwrap();

        let result = store.put_account(&pending_account("bob@x.com")).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists)));
    }

    #[tokio::test]
    async fn test_account_lookup_by_id_and_email_agree() {
        let store = MemoryStore::new();
        let account = pending_account("bob@x.com");
        store.put_account(&account).await.unwrap();

        let by_email = store.account_by_email("bob@x.com").await.unwrap().unwrap();
        let by_id = store.account_by_id(account.account_id).await.unwrap().unwrap();
        assert_eq!(by_email.account_id, by_id.account_id);
        assert!(store.account_by_email("nobody@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_account_applies_when_status_matches() {
        let store = MemoryStore::new();
        let account = pending_account("bob@x.com");
        store.put_account(&account).await.unwrap();

        let mut activated = account.clone();
        activated.status = AccountStatus::Active;
        activated.two_factor = None;

        let swapped = store
            .update_account(&activated, AccountStatus::PendingTwoFactor)
            .await
            .unwrap();
        assert!(swapped);

        let stored = store.account_by_email("bob@x.com").await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Active);
        assert!(stored.two_factor.is_none());
    }

    #[tokio::test]
    async fn test_update_account_refuses_stale_status() {
        let store = MemoryStore::new();
        let account = pending_account("bob@x.com");
        store.put_account(&account).await.unwrap();

        let mut activated = account.clone();
        activated.status = AccountStatus::Active;

        let swapped = store
            .update_account(&activated, AccountStatus::Active)
            .await
            .unwrap();
        assert!(!swapped);

        let stored = store.account_by_email("bob@x.com").await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::PendingTwoFactor);
    }

    #[tokio::test]
    async fn test_concurrent_activation_wins_exactly_once() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let account = pending_account("bob@x.com");
        store.put_account(&account).await.unwrap();

        let mut activated = account.clone();
        activated.status = AccountStatus::Active;
        activated.two_factor = None;

        let first = {
            let store = store.clone();
            let activated = activated.clone();
            tokio::spawn(async move {
                store
                    .update_account(&activated, AccountStatus::PendingTwoFactor)
                    .await
                    .unwrap()
            })
        };
        let second = {
            let store = store.clone();
            let activated = activated.clone();
            tokio::spawn(async move {
                store
                    .update_account(&activated, AccountStatus::PendingTwoFactor)
                    .await
                    .unwrap()
            })
        };

        let (first, second) = (first.await.unwrap(), second.await.unwrap());
        assert!(first ^ second, "exactly one writer must win the swap");
    }

    #[tokio::test]
    async fn test_put_invite_rejects_live_duplicate() {
        let store = MemoryStore::new();
        let live = invite_for("bob@x.com", &"aa".repeat(32), Utc::now() + Duration::hours(24));
        store.put_invite(&live).await.unwrap();

        let duplicate = invite_for("bob@x.com", &"bb".repeat(32), Utc::now() + Duration::hours(24));
        assert!(matches!(
            store.put_invite(&duplicate).await,
            Err(StoreError::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_put_invite_replaces_expired_invite() {
        let store = MemoryStore::new();
        let stale = invite_for("bob@x.com", &"aa".repeat(32), Utc::now() - Duration::hours(1));
        store.put_invite(&stale).await.unwrap();

        let fresh = invite_for("bob@x.com", &"bb".repeat(32), Utc::now() + Duration::hours(24));
        store.put_invite(&fresh).await.unwrap();

        assert!(store
            .invite_by_token(&"aa".repeat(32))
            .await
            .unwrap()
            .is_none());
        let found = store
            .invite_by_token(&"bb".repeat(32))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.invite_id, fresh.invite_id);
    }

    #[tokio::test]
    async fn test_delete_invite_is_idempotent() {
        let store = MemoryStore::new();
        let invite = invite_for("bob@x.com", &"aa".repeat(32), Utc::now() + Duration::hours(24));
        store.put_invite(&invite).await.unwrap();

        assert!(store.delete_invite(invite.invite_id).await.unwrap());
        assert!(!store.delete_invite(invite.invite_id).await.unwrap());
        assert!(store
            .invite_by_token(&"aa".repeat(32))
            .await
            .unwrap()
            .is_none());
    }
}
