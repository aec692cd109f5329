use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use sqlx::SqlitePool;
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::password::{hash_password, verify_password};
use crate::auth::repo::{
    Identity, LoginEvent, Profile, RequestMeta, User, Verification, Waitlist,
};
use crate::auth::token::{generate_token, token_hash};
use crate::config::AuthPolicy;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn clean_opt(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Freshly issued verification token. The plaintext token exists only in this
/// value; the store keeps a digest.
#[derive(Debug, Clone)]
pub struct EmailVerification {
    pub token: String,
    pub email: String,
    pub expires_at: OffsetDateTime,
}

/// Identity claims as asserted by the upstream Google sign-in.
#[derive(Debug, Clone, Default)]
pub struct GoogleClaims {
    pub sub: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email_verified: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct UserProfileData {
    pub sender_profile: Option<Value>,
    pub preferences: Option<Value>,
    pub updated_at: Option<OffsetDateTime>,
}

/// SQLite-backed auth + profile service. Stateless between calls; every
/// mutating operation runs inside one transaction so partial writes cannot
/// leak out of a failed call.
#[derive(Clone)]
pub struct AuthService {
    db: SqlitePool,
    policy: Arc<AuthPolicy>,
}

fn map_insert_err(e: sqlx::Error) -> AuthError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AuthError::DuplicateAccount,
        _ => AuthError::Database(e),
    }
}

impl AuthService {
    pub fn new(db: SqlitePool, policy: AuthPolicy) -> Self {
        Self {
            db,
            policy: Arc::new(policy),
        }
    }

    pub fn invite_only(&self) -> bool {
        self.policy.invite_only
    }

    pub fn invite_required_for_login(&self) -> bool {
        self.policy.invite_required_for_login
    }

    fn validate_invite(&self, invite_code: Option<&str>, enforce: bool) -> Result<(), AuthError> {
        if !enforce {
            return Ok(());
        }
        if self.policy.invite_codes.is_empty() {
            // Misconfiguration, not a user error.
            return Err(AuthError::SignupDisabled);
        }
        let code = invite_code.unwrap_or("").trim();
        if code.is_empty() {
            return Err(AuthError::InviteRequired);
        }
        if !self.policy.invite_codes.iter().any(|c| c == code) {
            return Err(AuthError::InviteInvalid);
        }
        Ok(())
    }

    /// Validate an invite code against the allow-list, always enforced.
    pub fn validate_invite_code(&self, invite_code: Option<&str>) -> Result<(), AuthError> {
        self.validate_invite(invite_code, true)
    }

    /// Login-time gate: only enforced while the login toggle is on.
    pub fn validate_invite_for_login(&self, invite_code: Option<&str>) -> Result<(), AuthError> {
        self.validate_invite(invite_code, self.policy.invite_required_for_login)
    }

    // -----------------------------------------------------------------
    // Password accounts
    // -----------------------------------------------------------------

    pub async fn create_password_user(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
        invite_code: Option<&str>,
        meta: &RequestMeta,
    ) -> Result<EmailVerification, AuthError> {
        let email_norm = normalize_email(email);
        if email_norm.is_empty() {
            return Err(AuthError::Invalid("Email is required."));
        }
        if password.len() < 8 {
            return Err(AuthError::Invalid("Password must be at least 8 characters."));
        }
        self.validate_invite(invite_code, self.policy.invite_only)?;

        let now = OffsetDateTime::now_utc();
        let user_id = Uuid::new_v4().to_string();
        let identity_id = Uuid::new_v4().to_string();
        let password_hash = hash_password(password)?;

        let mut tx = self.db.begin().await?;
        if Identity::email_claimed(tx.as_mut(), &email_norm).await? {
            return Err(AuthError::DuplicateAccount);
        }

        User::insert(
            tx.as_mut(),
            &user_id,
            Some(&email_norm),
            clean_opt(display_name).as_deref(),
            None,
            now,
            None,
        )
        .await?;
        // The UNIQUE(provider, provider_sub) constraint settles signup races
        // that slip past the read above.
        Identity::insert_password(tx.as_mut(), &identity_id, &user_id, &email_norm, &password_hash, now)
            .await
            .map_err(map_insert_err)?;
        Profile::ensure(tx.as_mut(), &user_id, now).await?;

        let verification = self
            .issue_verification(tx.as_mut(), &identity_id, &email_norm, now)
            .await?;
        LoginEvent::record(
            tx.as_mut(),
            Some(&user_id),
            "password",
            Some(&email_norm),
            true,
            "signup",
            meta,
            now,
        )
        .await?;
        tx.commit().await?;

        debug!(user_id = %user_id, "password user created");
        Ok(verification)
    }

    pub async fn authenticate_password(
        &self,
        email: &str,
        password: &str,
        meta: &RequestMeta,
    ) -> Result<User, AuthError> {
        let email_norm = normalize_email(email);
        if email_norm.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.begin().await?;
        let identity = Identity::find_password(tx.as_mut(), &email_norm).await?;

        let credentials_ok = match &identity {
            Some(row) => match &row.password_hash {
                Some(hash) => verify_password(password, hash).unwrap_or(false),
                None => false,
            },
            None => false,
        };
        if !credentials_ok {
            LoginEvent::record(
                tx.as_mut(),
                None,
                "password",
                Some(&email_norm),
                false,
                "invalid_credentials",
                meta,
                now,
            )
            .await?;
            tx.commit().await?;
            return Err(AuthError::InvalidCredentials);
        }

        // Unwrap is safe: credentials_ok implies the row exists.
        let row = identity.ok_or(AuthError::InvalidCredentials)?;

        // Checked only after the hash verifies, so failed-password attempts
        // cannot probe verification status.
        if !row.email_verified {
            LoginEvent::record(
                tx.as_mut(),
                Some(&row.user_id),
                "password",
                Some(&email_norm),
                false,
                "email_not_verified",
                meta,
                now,
            )
            .await?;
            tx.commit().await?;
            return Err(AuthError::EmailNotVerified);
        }

        Identity::touch(tx.as_mut(), &row.identity_id, now).await?;
        User::touch_login(tx.as_mut(), &row.user_id, now).await?;
        Profile::ensure(tx.as_mut(), &row.user_id, now).await?;
        LoginEvent::record(
            tx.as_mut(),
            Some(&row.user_id),
            "password",
            Some(&email_norm),
            true,
            "login",
            meta,
            now,
        )
        .await?;
        let user = User::find_by_id(tx.as_mut(), &row.user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        tx.commit().await?;
        Ok(user)
    }

    // -----------------------------------------------------------------
    // Email verification
    // -----------------------------------------------------------------

    async fn issue_verification(
        &self,
        conn: &mut sqlx::SqliteConnection,
        identity_id: &str,
        email: &str,
        now: OffsetDateTime,
    ) -> Result<EmailVerification, AuthError> {
        let token = generate_token();
        let expires_at = now + Duration::hours(self.policy.email_verify_ttl_hours);
        Verification::insert(conn, identity_id, &token_hash(&token), expires_at, now).await?;
        Ok(EmailVerification {
            token,
            email: email.to_string(),
            expires_at,
        })
    }

    /// Issue a fresh token for an unverified password identity. Earlier
    /// unexpired tokens stay valid; consuming any one of them verifies.
    pub async fn resend_email_verification(
        &self,
        email: &str,
        meta: &RequestMeta,
    ) -> Result<EmailVerification, AuthError> {
        let email_norm = normalize_email(email);
        if email_norm.is_empty() {
            return Err(AuthError::Invalid("Email is required."));
        }

        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.begin().await?;
        let row = Identity::find_password(tx.as_mut(), &email_norm)
            .await?
            .ok_or(AuthError::Invalid("No password account found for this email."))?;
        if row.email_verified {
            return Err(AuthError::Invalid("Email is already verified."));
        }

        let verification = self
            .issue_verification(tx.as_mut(), &row.identity_id, &email_norm, now)
            .await?;
        LoginEvent::record(
            tx.as_mut(),
            Some(&row.user_id),
            "password",
            Some(&email_norm),
            true,
            "resend_verification",
            meta,
            now,
        )
        .await?;
        tx.commit().await?;
        Ok(verification)
    }

    /// Consume a verification token. Invalid, expired, and replayed tokens
    /// are a normal outcome (crawlers replay links), never an error.
    pub async fn verify_email_token(&self, token: &str) -> Result<Option<String>, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        let now = OffsetDateTime::now_utc();

        let mut tx = self.db.begin().await?;
        let row = match Verification::find_by_token_hash(tx.as_mut(), &token_hash(token)).await? {
            Some(row) => row,
            None => return Ok(None),
        };
        if row.used_at.is_some() || row.expires_at < now {
            return Ok(None);
        }

        Identity::mark_verified(tx.as_mut(), &row.identity_id, now).await?;
        Verification::mark_used(tx.as_mut(), &row.verification_id, now).await?;
        Profile::ensure(tx.as_mut(), &row.user_id, now).await?;
        tx.commit().await?;
        debug!(user_id = %row.user_id, "email verified");
        Ok(Some(row.user_id))
    }

    // -----------------------------------------------------------------
    // Google accounts
    // -----------------------------------------------------------------

    /// Three-way resolution: existing google identity, linkable account by
    /// verified email, or brand-new signup. Linking requires the incoming
    /// claim to be verified; an unverified assertion never attaches to an
    /// existing account.
    pub async fn authenticate_google(
        &self,
        claims: &GoogleClaims,
        invite_code: Option<&str>,
        meta: &RequestMeta,
    ) -> Result<User, AuthError> {
        let sub = claims.sub.trim();
        if sub.is_empty() {
            return Err(AuthError::Invalid("Missing Google subject."));
        }
        let email_norm = claims
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty());
        let display_name = clean_opt(claims.display_name.as_deref());
        let avatar_url = clean_opt(claims.avatar_url.as_deref());
        let now = OffsetDateTime::now_utc();

        let mut tx = self.db.begin().await?;

        // 1) Returning google identity.
        if let Some(user_id) = Identity::find_google_user_id(tx.as_mut(), sub).await? {
            Identity::touch_google(tx.as_mut(), sub, now).await?;
            User::refresh_contact(
                tx.as_mut(),
                &user_id,
                email_norm.as_deref(),
                display_name.as_deref(),
                avatar_url.as_deref(),
                now,
            )
            .await?;
            Profile::ensure(tx.as_mut(), &user_id, now).await?;
            LoginEvent::record(
                tx.as_mut(),
                Some(&user_id),
                "google",
                email_norm.as_deref(),
                true,
                "login",
                meta,
                now,
            )
            .await?;
            let user = User::find_by_id(tx.as_mut(), &user_id)
                .await?
                .ok_or(AuthError::Invalid("Account not found."))?;
            tx.commit().await?;
            return Ok(user);
        }

        // 2) Link to an existing account, but only on a verified claim.
        let linkable = match &email_norm {
            Some(email) => match User::find_by_primary_email(tx.as_mut(), email).await? {
                Some(user) => Some(user),
                None => User::find_by_identity_email(tx.as_mut(), email).await?,
            },
            None => None,
        };
        if let Some(existing) = linkable {
            if claims.email_verified == Some(true) {
                Identity::insert_google(
                    tx.as_mut(),
                    &existing.id,
                    sub,
                    email_norm.as_deref(),
                    true,
                    now,
                )
                .await
                .map_err(map_insert_err)?;
                User::refresh_contact(
                    tx.as_mut(),
                    &existing.id,
                    None,
                    display_name.as_deref(),
                    avatar_url.as_deref(),
                    now,
                )
                .await?;
                Profile::ensure(tx.as_mut(), &existing.id, now).await?;
                LoginEvent::record(
                    tx.as_mut(),
                    Some(&existing.id),
                    "google",
                    email_norm.as_deref(),
                    true,
                    "link_and_login",
                    meta,
                    now,
                )
                .await?;
                let user = User::find_by_id(tx.as_mut(), &existing.id)
                    .await?
                    .ok_or(AuthError::Invalid("Account not found."))?;
                tx.commit().await?;
                return Ok(user);
            }
            // Unverified claim on a known email falls through to the signup
            // path and its invite gate.
        }

        // 3) Brand-new signup.
        self.validate_invite(invite_code, self.policy.invite_only)?;
        let user_id = Uuid::new_v4().to_string();
        User::insert(
            tx.as_mut(),
            &user_id,
            email_norm.as_deref(),
            display_name.as_deref(),
            avatar_url.as_deref(),
            now,
            Some(now),
        )
        .await?;
        Identity::insert_google(
            tx.as_mut(),
            &user_id,
            sub,
            email_norm.as_deref(),
            claims.email_verified == Some(true),
            now,
        )
        .await
        .map_err(map_insert_err)?;
        Profile::ensure(tx.as_mut(), &user_id, now).await?;
        LoginEvent::record(
            tx.as_mut(),
            Some(&user_id),
            "google",
            email_norm.as_deref(),
            true,
            "signup_and_login",
            meta,
            now,
        )
        .await?;
        let user = User::find_by_id(tx.as_mut(), &user_id)
            .await?
            .ok_or(AuthError::Invalid("Account not found."))?;
        tx.commit().await?;
        Ok(user)
    }

    // -----------------------------------------------------------------
    // Lookups & beta access
    // -----------------------------------------------------------------

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, AuthError> {
        if user_id.is_empty() {
            return Ok(None);
        }
        let mut conn = self.db.acquire().await?;
        Ok(User::find_by_id(&mut conn, user_id).await?)
    }

    pub async fn get_user_id_for_password_email(
        &self,
        email: &str,
    ) -> Result<Option<String>, AuthError> {
        let email_norm = normalize_email(email);
        if email_norm.is_empty() {
            return Ok(None);
        }
        let mut conn = self.db.acquire().await?;
        Ok(Identity::find_password(&mut conn, &email_norm)
            .await?
            .map(|row| row.user_id))
    }

    pub async fn get_user_id_for_google_sub(&self, sub: &str) -> Result<Option<String>, AuthError> {
        let sub = sub.trim();
        if sub.is_empty() {
            return Ok(None);
        }
        let mut conn = self.db.acquire().await?;
        Ok(Identity::find_google_user_id(&mut conn, sub).await?)
    }

    pub async fn user_has_beta_access(&self, user_id: &str) -> Result<bool, AuthError> {
        if user_id.is_empty() {
            return Ok(false);
        }
        let mut conn = self.db.acquire().await?;
        Ok(User::has_beta_access(&mut conn, user_id).await?)
    }

    /// One-way flag; repeat grants keep the first grant timestamp.
    pub async fn grant_beta_access(&self, user_id: &str) -> Result<(), AuthError> {
        if user_id.is_empty() {
            return Ok(());
        }
        let mut conn = self.db.acquire().await?;
        Ok(User::grant_beta_access(&mut conn, user_id, OffsetDateTime::now_utc()).await?)
    }

    // -----------------------------------------------------------------
    // Waitlist
    // -----------------------------------------------------------------

    pub async fn add_waitlist_email(
        &self,
        email: &str,
        meta: &RequestMeta,
    ) -> Result<bool, AuthError> {
        let email_norm = normalize_email(email);
        if email_norm.is_empty() {
            return Err(AuthError::Invalid("Email is required."));
        }
        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.begin().await?;
        let created = Waitlist::insert_if_absent(tx.as_mut(), &email_norm, meta, now).await?;
        tx.commit().await?;
        Ok(created)
    }

    // -----------------------------------------------------------------
    // User profile (sender profile + preferences)
    // -----------------------------------------------------------------

    pub async fn get_user_profile(&self, user_id: &str) -> Result<UserProfileData, AuthError> {
        if user_id.is_empty() {
            return Ok(UserProfileData {
                sender_profile: None,
                preferences: None,
                updated_at: None,
            });
        }
        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.begin().await?;
        Profile::ensure(tx.as_mut(), user_id, now).await?;
        let row = Profile::fetch(tx.as_mut(), user_id).await?;
        tx.commit().await?;

        Ok(match row {
            Some(row) => UserProfileData {
                sender_profile: json_or_none(&row.sender_profile_json),
                preferences: json_or_none(&row.preferences_json),
                updated_at: Some(row.updated_at),
            },
            None => UserProfileData {
                sender_profile: None,
                preferences: None,
                updated_at: None,
            },
        })
    }

    /// Each field updates only when provided; both share one `updated_at`.
    pub async fn update_user_profile(
        &self,
        user_id: &str,
        sender_profile: Option<&Value>,
        preferences: Option<&Value>,
    ) -> Result<(), AuthError> {
        if user_id.is_empty() {
            return Err(AuthError::Invalid("Missing user id."));
        }
        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.begin().await?;
        Profile::ensure(tx.as_mut(), user_id, now).await?;
        if let Some(profile) = sender_profile {
            let json = serde_json::to_string(profile).map_err(anyhow::Error::from)?;
            Profile::set_sender_profile(tx.as_mut(), user_id, &json, now).await?;
        }
        if let Some(prefs) = preferences {
            let json = serde_json::to_string(prefs).map_err(anyhow::Error::from)?;
            Profile::set_preferences(tx.as_mut(), user_id, &json, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Empty objects read back as "nothing stored yet".
fn json_or_none(raw: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) => None,
        Ok(Value::Object(map)) if map.is_empty() => None,
        Ok(value) => Some(value),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(invite_only: bool, login_gate: bool, codes: &[&str]) -> AuthPolicy {
        AuthPolicy {
            invite_only,
            invite_required_for_login: login_gate,
            invite_codes: codes.iter().map(|c| c.to_string()).collect(),
            email_verify_ttl_hours: 24,
        }
    }

    async fn service(policy: AuthPolicy) -> AuthService {
        let pool = crate::db::connect_memory().await.expect("in-memory db");
        AuthService::new(pool, policy)
    }

    fn meta() -> RequestMeta {
        RequestMeta {
            ip: Some("127.0.0.1".into()),
            user_agent: Some("tests".into()),
        }
    }

    #[tokio::test]
    async fn invite_gating_on_password_signup() {
        let svc = service(policy(true, false, &["INV123"])).await;

        let err = svc
            .create_password_user("a@example.com", "password123", None, None, &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InviteRequired));

        let err = svc
            .create_password_user("a@example.com", "password123", None, Some("NOPE"), &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InviteInvalid));

        let verification = svc
            .create_password_user("a@example.com", "password123", None, Some("INV123"), &meta())
            .await
            .expect("valid code should pass");
        assert_eq!(verification.email, "a@example.com");
        assert!(!verification.token.is_empty());
    }

    #[tokio::test]
    async fn signup_disabled_without_configured_codes() {
        let svc = service(policy(true, false, &[])).await;
        let err = svc
            .create_password_user("a@example.com", "password123", None, Some("ANY"), &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SignupDisabled));
    }

    #[tokio::test]
    async fn signup_rejects_bad_input() {
        let svc = service(policy(false, false, &[])).await;
        assert!(matches!(
            svc.create_password_user("  ", "password123", None, None, &meta())
                .await
                .unwrap_err(),
            AuthError::Invalid(_)
        ));
        assert!(matches!(
            svc.create_password_user("a@example.com", "short", None, None, &meta())
                .await
                .unwrap_err(),
            AuthError::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn verification_gates_login_not_signup() {
        let svc = service(policy(true, false, &["INV123"])).await;
        let verification = svc
            .create_password_user("b@example.com", "password123", None, Some("INV123"), &meta())
            .await
            .unwrap();

        let err = svc
            .authenticate_password("b@example.com", "password123", &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailNotVerified));

        let user_id = svc
            .verify_email_token(&verification.token)
            .await
            .unwrap()
            .expect("token should verify");

        let user = svc
            .authenticate_password("b@example.com", "password123", &meta())
            .await
            .unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(user.primary_email.as_deref(), Some("b@example.com"));
        assert!(user.last_login_at.is_some());
    }

    #[tokio::test]
    async fn wrong_password_on_unverified_account_reports_invalid_credentials() {
        let svc = service(policy(false, false, &[])).await;
        svc.create_password_user("c@example.com", "password123", None, None, &meta())
            .await
            .unwrap();

        // Verification status must not leak through failed credentials.
        let err = svc
            .authenticate_password("c@example.com", "wrong-password", &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let err = svc
            .authenticate_password("nobody@example.com", "password123", &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_across_providers() {
        let svc = service(policy(false, false, &[])).await;
        svc.create_password_user("dup@example.com", "password123", None, None, &meta())
            .await
            .unwrap();
        let err = svc
            .create_password_user("Dup@Example.com", "password456", None, None, &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateAccount));

        // A google-claimed email blocks password signup too.
        svc.authenticate_google(
            &GoogleClaims {
                sub: "g-sub-dup".into(),
                email: Some("gonly@example.com".into()),
                email_verified: Some(true),
                ..Default::default()
            },
            None,
            &meta(),
        )
        .await
        .unwrap();
        let err = svc
            .create_password_user("gonly@example.com", "password123", None, None, &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateAccount));
    }

    #[tokio::test]
    async fn resend_issues_distinct_independently_valid_tokens() {
        let svc = service(policy(true, false, &["INV123"])).await;
        let first = svc
            .create_password_user("c2@example.com", "password123", None, Some("INV123"), &meta())
            .await
            .unwrap();
        let second = svc
            .resend_email_verification("c2@example.com", &meta())
            .await
            .unwrap();

        assert_ne!(first.token, second.token);
        // Issuing the second must not invalidate the first.
        assert!(svc.verify_email_token(&second.token).await.unwrap().is_some());
        assert!(svc.verify_email_token(&first.token).await.unwrap().is_some());
        // Replay of a consumed token is a quiet miss.
        assert!(svc.verify_email_token(&first.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resend_fails_for_unknown_or_verified_accounts() {
        let svc = service(policy(false, false, &[])).await;
        assert!(matches!(
            svc.resend_email_verification("missing@example.com", &meta())
                .await
                .unwrap_err(),
            AuthError::Invalid(_)
        ));

        let verification = svc
            .create_password_user("done@example.com", "password123", None, None, &meta())
            .await
            .unwrap();
        svc.verify_email_token(&verification.token).await.unwrap().unwrap();
        assert!(matches!(
            svc.resend_email_verification("done@example.com", &meta())
                .await
                .unwrap_err(),
            AuthError::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn expired_and_unknown_tokens_verify_to_none() {
        let mut expired_policy = policy(false, false, &[]);
        expired_policy.email_verify_ttl_hours = 0;
        let svc = service(expired_policy).await;

        let verification = svc
            .create_password_user("late@example.com", "password123", None, None, &meta())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(svc
            .verify_email_token(&verification.token)
            .await
            .unwrap()
            .is_none());

        assert!(svc.verify_email_token("").await.unwrap().is_none());
        assert!(svc
            .verify_email_token("definitely-not-a-token")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn google_links_to_password_account_on_verified_email() {
        let svc = service(policy(true, false, &["INV123"])).await;
        let verification = svc
            .create_password_user("d@example.com", "password123", None, Some("INV123"), &meta())
            .await
            .unwrap();
        let user_id = svc
            .verify_email_token(&verification.token)
            .await
            .unwrap()
            .unwrap();

        // No invite code needed when linking to an existing account.
        let user = svc
            .authenticate_google(
                &GoogleClaims {
                    sub: "google-sub-1".into(),
                    email: Some("d@example.com".into()),
                    display_name: Some("D".into()),
                    email_verified: Some(true),
                    ..Default::default()
                },
                None,
                &meta(),
            )
            .await
            .unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(
            svc.get_user_id_for_google_sub("google-sub-1").await.unwrap(),
            Some(user_id)
        );
    }

    #[tokio::test]
    async fn google_never_links_on_unverified_claim() {
        let svc = service(policy(false, false, &[])).await;
        svc.create_password_user("e@example.com", "password123", None, None, &meta())
            .await
            .unwrap();
        let password_user_id = svc
            .get_user_id_for_password_email("e@example.com")
            .await
            .unwrap()
            .unwrap();

        let user = svc
            .authenticate_google(
                &GoogleClaims {
                    sub: "google-sub-2".into(),
                    email: Some("e@example.com".into()),
                    email_verified: Some(false),
                    ..Default::default()
                },
                None,
                &meta(),
            )
            .await
            .unwrap();
        assert_ne!(user.id, password_user_id);
    }

    #[tokio::test]
    async fn google_unverified_claim_still_faces_the_invite_gate() {
        let svc = service(policy(true, false, &["INV123"])).await;
        svc.create_password_user("f@example.com", "password123", None, Some("INV123"), &meta())
            .await
            .unwrap();

        let err = svc
            .authenticate_google(
                &GoogleClaims {
                    sub: "google-sub-3".into(),
                    email: Some("f@example.com".into()),
                    email_verified: Some(false),
                    ..Default::default()
                },
                None,
                &meta(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InviteRequired));
    }

    #[tokio::test]
    async fn google_returning_login_refreshes_contact_fields() {
        let svc = service(policy(false, false, &[])).await;
        let first = svc
            .authenticate_google(
                &GoogleClaims {
                    sub: "google-sub-4".into(),
                    email: None,
                    email_verified: Some(true),
                    ..Default::default()
                },
                None,
                &meta(),
            )
            .await
            .unwrap();
        assert!(first.primary_email.is_none());
        assert!(first.display_name.is_none());

        let second = svc
            .authenticate_google(
                &GoogleClaims {
                    sub: "google-sub-4".into(),
                    email: Some("fill@example.com".into()),
                    display_name: Some("Filled".into()),
                    avatar_url: Some("https://example.com/a.png".into()),
                    email_verified: Some(true),
                },
                None,
                &meta(),
            )
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.primary_email.as_deref(), Some("fill@example.com"));
        assert_eq!(second.display_name.as_deref(), Some("Filled"));

        // Email fills only while null; later claims do not overwrite it.
        let third = svc
            .authenticate_google(
                &GoogleClaims {
                    sub: "google-sub-4".into(),
                    email: Some("other@example.com".into()),
                    email_verified: Some(true),
                    ..Default::default()
                },
                None,
                &meta(),
            )
            .await
            .unwrap();
        assert_eq!(third.primary_email.as_deref(), Some("fill@example.com"));
        assert_eq!(third.display_name.as_deref(), Some("Filled"));
    }

    #[tokio::test]
    async fn profile_updates_are_field_independent() {
        let svc = service(policy(false, false, &[])).await;
        let verification = svc
            .create_password_user("p@example.com", "password123", None, None, &meta())
            .await
            .unwrap();
        let user_id = svc
            .verify_email_token(&verification.token)
            .await
            .unwrap()
            .unwrap();

        // Fresh profile reads as empty, without error.
        let empty = svc.get_user_profile(&user_id).await.unwrap();
        assert!(empty.sender_profile.is_none());
        assert!(empty.preferences.is_none());

        let sender = json!({"name": "P", "skills": ["rust"]});
        svc.update_user_profile(&user_id, Some(&sender), None)
            .await
            .unwrap();
        let prefs = json!({"track": "finance", "location": "NYC"});
        svc.update_user_profile(&user_id, None, Some(&prefs))
            .await
            .unwrap();

        let loaded = svc.get_user_profile(&user_id).await.unwrap();
        assert_eq!(loaded.sender_profile.unwrap()["name"], "P");
        assert_eq!(loaded.preferences.unwrap()["location"], "NYC");
        assert!(loaded.updated_at.is_some());

        assert!(matches!(
            svc.update_user_profile("", None, None).await.unwrap_err(),
            AuthError::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn waitlist_dedupes_by_normalized_email() {
        let svc = service(policy(false, false, &[])).await;
        assert!(svc
            .add_waitlist_email("Waitlist@Example.com", &meta())
            .await
            .unwrap());
        assert!(!svc
            .add_waitlist_email("waitlist@example.com", &meta())
            .await
            .unwrap());
        assert!(matches!(
            svc.add_waitlist_email("", &meta()).await.unwrap_err(),
            AuthError::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn beta_access_is_monotonic() {
        let svc = service(policy(false, true, &["INV123"])).await;
        svc.create_password_user("beta@example.com", "password123", None, None, &meta())
            .await
            .unwrap();
        let user_id = svc
            .get_user_id_for_password_email("beta@example.com")
            .await
            .unwrap()
            .unwrap();

        assert!(!svc.user_has_beta_access(&user_id).await.unwrap());
        svc.grant_beta_access(&user_id).await.unwrap();
        assert!(svc.user_has_beta_access(&user_id).await.unwrap());

        let first = svc.get_user(&user_id).await.unwrap().unwrap();
        let granted_at = first.beta_access_granted_at.expect("grant timestamp");

        svc.grant_beta_access(&user_id).await.unwrap();
        let second = svc.get_user(&user_id).await.unwrap().unwrap();
        assert_eq!(second.beta_access_granted_at, Some(granted_at));
    }

    #[tokio::test]
    async fn login_invite_validator_follows_the_toggle() {
        let gated = service(policy(false, true, &["INV123"])).await;
        assert!(matches!(
            gated.validate_invite_for_login(None).unwrap_err(),
            AuthError::InviteRequired
        ));
        assert!(matches!(
            gated.validate_invite_for_login(Some("NOPE")).unwrap_err(),
            AuthError::InviteInvalid
        ));
        gated.validate_invite_for_login(Some("INV123")).unwrap();

        let open = service(policy(false, false, &[])).await;
        open.validate_invite_for_login(None).unwrap();
        open.validate_invite_for_login(Some("anything")).unwrap();

        // The standalone checker is always enforced, whatever the toggles say.
        assert!(matches!(
            open.validate_invite_code(Some("anything")).unwrap_err(),
            AuthError::SignupDisabled
        ));
        gated.validate_invite_code(Some("INV123")).unwrap();
    }

    #[test]
    fn email_format_check() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a b@c.co"));
    }
}
