use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    normalize_email, Account, AccountProfile, AccountStatus, Action, PendingInvite, RoleName,
};
use crate::services::authz::Evaluator;
use crate::services::error::ServiceError;
use crate::services::metrics;
use crate::services::notifier::NotificationDispatcher;
use crate::services::token::{TokenClaims, TokenError, TokenKind, TokenService};
use crate::services::two_factor::CodeGenerator;
use crate::store::CredentialStore;
use crate::utils::{sha256_hex, Password, SecretHasher};

/// A new invite, ready to be delivered. The token is returned to the
/// caller as well so an administrator can hand the link over out of
/// band when email is unavailable.
#[derive(Debug, Serialize)]
pub struct InviteCreated {
    pub invite_id: Uuid,
    pub email: String,
    pub role: RoleName,
    pub invite_token: String,
    pub expires_utc: DateTime<Utc>,
}

/// Email ownership proven; the holder may now choose a password.
#[derive(Debug, Serialize)]
pub struct EmailVerified {
    pub email: String,
    pub role: RoleName,
    pub setup_token: String,
    pub expires_utc: DateTime<Utc>,
}

/// Password accepted and account written; one step short of active.
#[derive(Debug, Serialize)]
pub struct AccountCreated {
    pub account_id: Uuid,
    pub email: String,
    pub status: AccountStatus,
    pub two_factor_expires_utc: DateTime<Utc>,
}

/// An issued session token plus the profile it belongs to.
#[derive(Debug, Serialize)]
pub struct SessionIssued {
    pub session_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub expires_utc: DateTime<Utc>,
    pub account: AccountProfile,
}

/// A replacement one-time code is on its way.
#[derive(Debug, Serialize)]
pub struct CodeResent {
    pub account_id: Uuid,
    pub two_factor_expires_utc: DateTime<Utc>,
}

/// Orchestrates the account lifecycle: invite, email verification,
/// password setup, two-factor activation, login, and session checks.
///
/// Every state transition goes through a conditional store write, so
/// two requests racing on the same email or account settle in the store
/// rather than in this process. Notification delivery happens after the
/// transition committed and never rolls it back.
#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn CredentialStore>,
    tokens: TokenService,
    hasher: SecretHasher,
    codes: CodeGenerator,
    notifier: Arc<dyn NotificationDispatcher>,
    evaluator: Evaluator,
    password_min_length: usize,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: TokenService,
        hasher: SecretHasher,
        codes: CodeGenerator,
        notifier: Arc<dyn NotificationDispatcher>,
        evaluator: Evaluator,
        password_min_length: usize,
    ) -> Self {
        Self {
            store,
            tokens,
            hasher,
            codes,
            notifier,
            evaluator,
            password_min_length,
        }
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Invite `email_raw` into the workspace with `role_raw`. The
    /// inviter needs `users:manage` and may only hand out roles at or
    /// below their own privilege level.
    #[tracing::instrument(skip_all, fields(inviter = %inviter.account_id, email = %email_raw))]
    pub async fn invite(
        &self,
        inviter: &Account,
        email_raw: &str,
        role_raw: &str,
    ) -> Result<InviteCreated, ServiceError> {
        if !inviter.is_active() {
            return Err(ServiceError::PermissionDenied);
        }
        self.evaluator.require(inviter, "users", Action::Manage)?;

        let role = RoleName::new(role_raw);
        if !self.evaluator.registry().contains(&role) {
            return Err(ServiceError::UnknownRole(role.as_str().to_string()));
        }
        if !self.evaluator.may_assign(inviter, &role) {
            return Err(ServiceError::PermissionDenied);
        }

        let email = normalize_email(email_raw);
        if self.store.account_by_email(&email).await?.is_some() {
            metrics::record(&metrics::INVITES_TOTAL, "conflict");
            return Err(ServiceError::EmailTaken);
        }

        let (invite_token, expires_utc) =
            self.tokens
                .issue_invite_verification(&email, &role, inviter.account_id)?;
        let invite = PendingInvite::new(
            email.clone(),
            role.clone(),
            sha256_hex(&invite_token),
            inviter.account_id,
            expires_utc,
        );

        // The store enforces one live invite per email; a lost race
        // surfaces here as a conflict.
        if let Err(e) = self.store.put_invite(&invite).await {
            if matches!(e, crate::store::StoreError::AlreadyExists) {
                metrics::record(&metrics::INVITES_TOTAL, "conflict");
            }
            return Err(e.into());
        }
        metrics::record(&metrics::INVITES_TOTAL, "created");
        tracing::info!(invite_id = %invite.invite_id, role = %invite.role, "Invite created");

        if let Err(e) = self
            .notifier
            .send_verification_link(&email, &invite_token, expires_utc)
            .await
        {
            tracing::warn!(error = %e, invite_id = %invite.invite_id, "Verification link delivery failed");
        }

        Ok(InviteCreated {
            invite_id: invite.invite_id,
            email,
            role,
            invite_token,
            expires_utc,
        })
    }

    /// Exchange a verification token for a password-setup token. The
    /// invite stays in place; only account creation consumes it.
    #[tracing::instrument(skip_all)]
    pub async fn verify_email(&self, token: &str) -> Result<EmailVerified, ServiceError> {
        let claims = self
            .tokens
            .verify(token, TokenKind::InviteVerification)
            .map_err(onboarding_token_error)?;

        let token_hash = sha256_hex(token);
        let invite = self
            .store
            .invite_by_token(&token_hash)
            .await?
            .ok_or(ServiceError::InviteNotFound)?;
        if invite.email != claims.email {
            return Err(ServiceError::InvalidToken);
        }
        if invite.is_expired() {
            return Err(ServiceError::TokenExpired);
        }

        let (setup_token, expires_utc) = self.tokens.issue_password_setup(
            &invite.email,
            &invite.role,
            invite.invited_by,
            &token_hash,
        )?;
        tracing::info!(invite_id = %invite.invite_id, "Email verified");

        Ok(EmailVerified {
            email: invite.email,
            role: invite.role,
            setup_token,
            expires_utc,
        })
    }

    /// Choose a password and materialize the account in `pending_2fa`.
    /// Consumes the originating invite, which is what makes both
    /// onboarding tokens single-use.
    #[tracing::instrument(skip_all)]
    pub async fn setup_password(
        &self,
        token: &str,
        password: &str,
        confirm: &str,
    ) -> Result<AccountCreated, ServiceError> {
        let claims = self
            .tokens
            .verify(token, TokenKind::PasswordSetup)
            .map_err(onboarding_token_error)?;

        if password != confirm {
            return Err(ServiceError::Validation(
                "Password and confirmation do not match".to_string(),
            ));
        }
        if password.chars().count() < self.password_min_length {
            return Err(ServiceError::Validation(format!(
                "Password must be at least {} characters",
                self.password_min_length
            )));
        }

        let invite_hash = claims.invite_hash.as_deref().ok_or(ServiceError::InvalidToken)?;
        let invite = self
            .store
            .invite_by_token(invite_hash)
            .await?
            .ok_or(ServiceError::InviteNotFound)?;
        if invite.email != claims.email {
            return Err(ServiceError::InvalidToken);
        }

        let password_hash = self.hasher.hash(&Password::new(password.to_string()))?;
        let issued = self.codes.generate();
        let account = Account::new(
            invite.email.clone(),
            password_hash.into_string(),
            invite.role.clone(),
            claims.invited_by,
            issued.challenge.clone(),
        );

        self.store.put_account(&account).await?;
        if !self.store.delete_invite(invite.invite_id).await? {
            tracing::warn!(invite_id = %invite.invite_id, "Invite was already removed");
        }
        tracing::info!(account_id = %account.account_id, "Account created, awaiting two-factor");

        if let Err(e) = self
            .notifier
            .send_two_factor_code(&account.email, &issued.code, issued.challenge.expires_utc)
            .await
        {
            tracing::warn!(error = %e, account_id = %account.account_id, "Two-factor code delivery failed");
        }

        Ok(AccountCreated {
            account_id: account.account_id,
            email: account.email,
            status: account.status,
            two_factor_expires_utc: issued.challenge.expires_utc,
        })
    }

    /// Activate a pending account with its one-time code and issue the
    /// first session. The pending → active swap is conditional, so the
    /// code cannot be redeemed twice.
    #[tracing::instrument(skip_all, fields(account_id = %account_id))]
    pub async fn verify_two_factor(
        &self,
        account_id: Uuid,
        code: &str,
    ) -> Result<SessionIssued, ServiceError> {
        let account = self
            .store
            .account_by_id(account_id)
            .await?
            .ok_or(ServiceError::AccountNotFound)?;
        if account.status != AccountStatus::PendingTwoFactor {
            return Err(ServiceError::AccountNotFound);
        }
        let challenge = account.two_factor.clone().ok_or_else(|| {
            ServiceError::Internal(anyhow::anyhow!("Pending account has no two-factor challenge"))
        })?;

        if challenge.is_expired() {
            metrics::record(&metrics::TWO_FACTOR_TOTAL, "expired");
            return Err(ServiceError::CodeExpired);
        }
        if !crate::services::two_factor::code_matches(code, &challenge.code_hash) {
            metrics::record(&metrics::TWO_FACTOR_TOTAL, "rejected");
            return Err(ServiceError::InvalidCode);
        }

        let mut activated = account.clone();
        activated.status = AccountStatus::Active;
        activated.two_factor = None;
        activated.updated_utc = Utc::now();
        activated.last_login_utc = Some(Utc::now());

        let swapped = self
            .store
            .update_account(&activated, AccountStatus::PendingTwoFactor)
            .await?;
        if !swapped {
            // Another request won the activation race.
            metrics::record(&metrics::TWO_FACTOR_TOTAL, "rejected");
            return Err(ServiceError::InvalidCode);
        }
        metrics::record(&metrics::TWO_FACTOR_TOTAL, "activated");
        tracing::info!("Account activated");

        self.issue_session(&activated)
    }

    /// Replace the outstanding one-time code and redeliver. The old
    /// code dies with the swap even though it had time left.
    #[tracing::instrument(skip_all, fields(account_id = %account_id))]
    pub async fn resend_two_factor(&self, account_id: Uuid) -> Result<CodeResent, ServiceError> {
        let account = self
            .store
            .account_by_id(account_id)
            .await?
            .ok_or(ServiceError::AccountNotFound)?;
        if account.status != AccountStatus::PendingTwoFactor {
            return Err(ServiceError::AccountNotFound);
        }

        let issued = self.codes.generate();
        let mut refreshed = account.clone();
        refreshed.two_factor = Some(issued.challenge.clone());
        refreshed.updated_utc = Utc::now();

        let swapped = self
            .store
            .update_account(&refreshed, AccountStatus::PendingTwoFactor)
            .await?;
        if !swapped {
            return Err(ServiceError::AccountNotFound);
        }
        tracing::info!("Two-factor code reissued");

        if let Err(e) = self
            .notifier
            .send_two_factor_code(&refreshed.email, &issued.code, issued.challenge.expires_utc)
            .await
        {
            tracing::warn!(error = %e, "Two-factor code delivery failed");
        }

        Ok(CodeResent {
            account_id,
            two_factor_expires_utc: issued.challenge.expires_utc,
        })
    }

    /// Email + password login for active accounts. All failure shapes
    /// collapse into `InvalidCredentials`.
    #[tracing::instrument(skip_all, fields(email = %email_raw))]
    pub async fn login(&self, email_raw: &str, password: &str) -> Result<SessionIssued, ServiceError> {
        let email = normalize_email(email_raw);
        let Some(account) = self.store.account_by_email(&email).await? else {
            metrics::record(&metrics::LOGINS_TOTAL, "rejected");
            return Err(ServiceError::InvalidCredentials);
        };
        if !account.is_active() {
            metrics::record(&metrics::LOGINS_TOTAL, "rejected");
            return Err(ServiceError::InvalidCredentials);
        }
        let Some(stored_hash) = account.password_hash.as_deref() else {
            metrics::record(&metrics::LOGINS_TOTAL, "rejected");
            return Err(ServiceError::InvalidCredentials);
        };
        if !self
            .hasher
            .verify(&Password::new(password.to_string()), stored_hash)
        {
            metrics::record(&metrics::LOGINS_TOTAL, "rejected");
            return Err(ServiceError::InvalidCredentials);
        }

        let mut seen = account.clone();
        seen.last_login_utc = Some(Utc::now());
        seen.updated_utc = Utc::now();
        if !self.store.update_account(&seen, AccountStatus::Active).await? {
            // The account stopped being active mid-login.
            metrics::record(&metrics::LOGINS_TOTAL, "rejected");
            return Err(ServiceError::InvalidCredentials);
        }
        metrics::record(&metrics::LOGINS_TOTAL, "success");
        tracing::info!(account_id = %seen.account_id, "Login succeeded");

        self.issue_session(&seen)
    }

    /// Resolve a session token to its live account. Fails closed for
    /// any token problem and for accounts that are no longer active.
    pub async fn verify_session(
        &self,
        token: &str,
    ) -> Result<(Account, TokenClaims), ServiceError> {
        let claims = self
            .tokens
            .verify(token, TokenKind::Session)
            .map_err(|_| ServiceError::InvalidSession)?;
        let account_id =
            Uuid::parse_str(&claims.sub).map_err(|_| ServiceError::InvalidSession)?;
        let account = self
            .store
            .account_by_id(account_id)
            .await?
            .ok_or(ServiceError::InvalidSession)?;
        if !account.is_active() {
            return Err(ServiceError::InvalidSession);
        }
        Ok((account, claims))
    }

    /// Seed the first administrator on a fresh deployment. A no-op when
    /// the email is already taken, so it is safe to run on every boot.
    pub async fn bootstrap_super_admin(
        &self,
        email_raw: &str,
        password: &str,
    ) -> Result<Option<Uuid>, ServiceError> {
        let email = normalize_email(email_raw);
        if self.store.account_by_email(&email).await?.is_some() {
            return Ok(None);
        }

        let password_hash = self.hasher.hash(&Password::new(password.to_string()))?;
        let account = Account::bootstrap(
            email.clone(),
            password_hash.into_string(),
            RoleName::new("SUPER_ADMIN"),
        );
        match self.store.put_account(&account).await {
            Ok(()) => {
                tracing::info!(account_id = %account.account_id, "Bootstrap super admin created");
                Ok(Some(account.account_id))
            }
            // A peer replica created it between the check and the write.
            Err(crate::store::StoreError::AlreadyExists) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn issue_session(&self, account: &Account) -> Result<SessionIssued, ServiceError> {
        let (session_token, expires_utc) =
            self.tokens
                .issue_session(account.account_id, &account.email, &account.role)?;
        Ok(SessionIssued {
            session_token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.session_ttl_seconds(),
            expires_utc,
            account: account.profile(),
        })
    }
}

fn onboarding_token_error(err: TokenError) -> ServiceError {
    match err {
        TokenError::Expired => ServiceError::TokenExpired,
        TokenError::Invalid | TokenError::WrongKind => ServiceError::InvalidToken,
    }
}
