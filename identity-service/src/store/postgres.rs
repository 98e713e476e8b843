use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{
    Account, AccountStatus, PendingInvite, Permission, RoleName, TwoFactorChallenge,
};
use crate::store::{CredentialStore, StoreError};

/// PostgreSQL-backed credential store. Conditional semantics come from
/// the schema: a unique index on email plus guarded INSERT/UPDATE
/// statements, so racing requests settle inside the database.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }
}

#[derive(Debug, FromRow)]
struct AccountRow {
    account_id: Uuid,
    email: String,
    password_hash: Option<String>,
    role: String,
    status: String,
    permission_overrides: Vec<String>,
    two_factor_code_hash: Option<String>,
    two_factor_expires_utc: Option<DateTime<Utc>>,
    created_by: Option<Uuid>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
    last_login_utc: Option<DateTime<Utc>>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let status = AccountStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Backend(anyhow::anyhow!("Unknown account status in row: {}", row.status))
        })?;
        let overrides = row
            .permission_overrides
            .iter()
            .map(|raw| raw.parse::<Permission>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("Bad permission override: {}", e)))?;
        let two_factor = match (row.two_factor_code_hash, row.two_factor_expires_utc) {
            (Some(code_hash), Some(expires_utc)) => {
                Some(TwoFactorChallenge { code_hash, expires_utc })
            }
            _ => None,
        };
        Ok(Account {
            account_id: row.account_id,
            email: row.email,
            password_hash: row.password_hash,
            role: RoleName::new(&row.role),
            status,
            overrides,
            two_factor,
            created_by: row.created_by,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
            last_login_utc: row.last_login_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct InviteRow {
    invite_id: Uuid,
    email: String,
    role: String,
    token_hash: String,
    invited_by: Uuid,
    expires_utc: DateTime<Utc>,
    created_utc: DateTime<Utc>,
}

impl From<InviteRow> for PendingInvite {
    fn from(row: InviteRow) -> Self {
        PendingInvite {
            invite_id: row.invite_id,
            email: row.email,
            role: RoleName::new(&row.role),
            token_hash: row.token_hash,
            invited_by: row.invited_by,
            expires_utc: row.expires_utc,
            created_utc: row.created_utc,
        }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(anyhow::Error::new(e))
}

#[async_trait]
impl CredentialStore for PgStore {
    // ==================== Accounts ====================

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(Account::try_from).transpose()
    }

    async fn account_by_id(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(Account::try_from).transpose()
    }

    async fn put_account(&self, account: &Account) -> Result<(), StoreError> {
        let overrides: Vec<String> = account
            .overrides
            .iter()
            .map(|permission| permission.to_string())
            .collect();
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (
                account_id, email, password_hash, role, status, permission_overrides,
                two_factor_code_hash, two_factor_expires_utc, created_by,
                created_utc, updated_utc, last_login_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(account.account_id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(account.status.as_str())
        .bind(&overrides)
        .bind(account.two_factor.as_ref().map(|challenge| challenge.code_hash.clone()))
        .bind(account.two_factor.as_ref().map(|challenge| challenge.expires_utc))
        .bind(account.created_by)
        .bind(account.created_utc)
        .bind(account.updated_utc)
        .bind(account.last_login_utc)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists);
        }
        Ok(())
    }

    async fn update_account(
        &self,
        account: &Account,
        expected: AccountStatus,
    ) -> Result<bool, StoreError> {
        let overrides: Vec<String> = account
            .overrides
            .iter()
            .map(|permission| permission.to_string())
            .collect();
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET password_hash = $2,
                role = $3,
                status = $4,
                permission_overrides = $5,
                two_factor_code_hash = $6,
                two_factor_expires_utc = $7,
                updated_utc = $8,
                last_login_utc = $9
            WHERE account_id = $1 AND status = $10
            "#,
        )
        .bind(account.account_id)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(account.status.as_str())
        .bind(&overrides)
        .bind(account.two_factor.as_ref().map(|challenge| challenge.code_hash.clone()))
        .bind(account.two_factor.as_ref().map(|challenge| challenge.expires_utc))
        .bind(account.updated_utc)
        .bind(account.last_login_utc)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    // ==================== Pending invites ====================

    async fn invite_by_token(&self, token_hash: &str) -> Result<Option<PendingInvite>, StoreError> {
        let row = sqlx::query_as::<_, InviteRow>(
            "SELECT * FROM pending_invites WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(PendingInvite::from))
    }

    async fn put_invite(&self, invite: &PendingInvite) -> Result<(), StoreError> {
        // A single statement so the expired-invite replacement cannot
        // race another insert for the same email.
        let result = sqlx::query(
            r#"
            INSERT INTO pending_invites (
                invite_id, email, role, token_hash, invited_by, expires_utc, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (email) DO UPDATE
            SET invite_id = EXCLUDED.invite_id,
                role = EXCLUDED.role,
                token_hash = EXCLUDED.token_hash,
                invited_by = EXCLUDED.invited_by,
                expires_utc = EXCLUDED.expires_utc,
                created_utc = EXCLUDED.created_utc
            WHERE pending_invites.expires_utc <= NOW()
            "#,
        )
        .bind(invite.invite_id)
        .bind(&invite.email)
        .bind(invite.role.as_str())
        .bind(&invite.token_hash)
        .bind(invite.invited_by)
        .bind(invite.expires_utc)
        .bind(invite.created_utc)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists);
        }
        Ok(())
    }

    async fn delete_invite(&self, invite_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM pending_invites WHERE invite_id = $1")
            .bind(invite_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    // ==================== Health ====================

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}
