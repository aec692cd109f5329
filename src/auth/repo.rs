use serde::Serialize;
use sqlx::{FromRow, SqliteConnection};
use time::OffsetDateTime;
use uuid::Uuid;

/// Caller metadata attached to audit rows.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: String,
    pub primary_email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
    pub beta_access: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub beta_access_granted_at: Option<OffsetDateTime>,
}

const USER_COLUMNS: &str = "id, primary_email, display_name, avatar_url, created_at, \
                            last_login_at, beta_access, beta_access_granted_at";

impl User {
    pub async fn insert(
        conn: &mut SqliteConnection,
        id: &str,
        primary_email: Option<&str>,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
        now: OffsetDateTime,
        last_login_at: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO users (id, primary_email, display_name, avatar_url, created_at, last_login_at, is_active)
            VALUES (?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(id)
        .bind(primary_email)
        .bind(display_name)
        .bind(avatar_url)
        .bind(now)
        .bind(last_login_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ? LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(conn)
        .await
    }

    pub async fn find_by_primary_email(
        conn: &mut SqliteConnection,
        email: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE primary_email = ? LIMIT 1"
        ))
        .bind(email)
        .fetch_optional(conn)
        .await
    }

    /// Fallback linking lookup: a user whose identity carries this email.
    pub async fn find_by_identity_email(
        conn: &mut SqliteConnection,
        email: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.primary_email, u.display_name, u.avatar_url, u.created_at,
                   u.last_login_at, u.beta_access, u.beta_access_granted_at
            FROM auth_identities ai
            JOIN users u ON u.id = ai.user_id
            WHERE ai.email = ?
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(conn)
        .await
    }

    pub async fn touch_login(
        conn: &mut SqliteConnection,
        user_id: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
            .bind(now)
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// OAuth contact refresh: name/avatar overwrite only when newly provided,
    /// primary_email fills only when previously null.
    pub async fn refresh_contact(
        conn: &mut SqliteConnection,
        user_id: &str,
        email: Option<&str>,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET primary_email = COALESCE(primary_email, ?),
                display_name = COALESCE(?, display_name),
                avatar_url = COALESCE(?, avatar_url),
                last_login_at = ?
            WHERE id = ?
            "#,
        )
        .bind(email)
        .bind(display_name)
        .bind(avatar_url)
        .bind(now)
        .bind(user_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn has_beta_access(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let granted: Option<bool> =
            sqlx::query_scalar("SELECT beta_access FROM users WHERE id = ? LIMIT 1")
                .bind(user_id)
                .fetch_optional(conn)
                .await?;
        Ok(granted.unwrap_or(false))
    }

    /// Monotonic grant; the first-grant timestamp survives repeat calls.
    pub async fn grant_beta_access(
        conn: &mut SqliteConnection,
        user_id: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET beta_access = 1,
                beta_access_granted_at = COALESCE(beta_access_granted_at, ?)
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(user_id)
        .execute(conn)
        .await?;
        Ok(())
    }
}

/// Provider credential joined to its owning user, as needed for password login.
#[derive(Debug, FromRow)]
pub struct PasswordIdentity {
    pub identity_id: String,
    pub user_id: String,
    pub password_hash: Option<String>,
    pub email_verified: bool,
}

pub struct Identity;

impl Identity {
    pub async fn find_password(
        conn: &mut SqliteConnection,
        email: &str,
    ) -> Result<Option<PasswordIdentity>, sqlx::Error> {
        sqlx::query_as::<_, PasswordIdentity>(
            r#"
            SELECT id AS identity_id, user_id, password_hash, email_verified
            FROM auth_identities
            WHERE provider = 'password' AND provider_sub = ?
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(conn)
        .await
    }

    pub async fn find_google_user_id(
        conn: &mut SqliteConnection,
        sub: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM auth_identities
            WHERE provider = 'google' AND provider_sub = ?
            LIMIT 1
            "#,
        )
        .bind(sub)
        .fetch_optional(conn)
        .await
    }

    /// True when any identity, across providers, already claims this email.
    pub async fn email_claimed(
        conn: &mut SqliteConnection,
        email: &str,
    ) -> Result<bool, sqlx::Error> {
        let claimed: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM auth_identities WHERE email = ? LIMIT 1")
                .bind(email)
                .fetch_optional(conn)
                .await?;
        Ok(claimed.is_some())
    }

    pub async fn insert_password(
        conn: &mut SqliteConnection,
        id: &str,
        user_id: &str,
        email: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO auth_identities
                (id, user_id, provider, provider_sub, email, password_hash, email_verified, created_at, last_used_at)
            VALUES (?, ?, 'password', ?, ?, ?, 0, ?, NULL)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(email)
        .bind(email)
        .bind(password_hash)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn insert_google(
        conn: &mut SqliteConnection,
        user_id: &str,
        sub: &str,
        email: Option<&str>,
        email_verified: bool,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO auth_identities
                (id, user_id, provider, provider_sub, email, password_hash, email_verified, created_at, last_used_at)
            VALUES (?, ?, 'google', ?, ?, NULL, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(sub)
        .bind(email)
        .bind(email_verified)
        .bind(now)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn touch(
        conn: &mut SqliteConnection,
        identity_id: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE auth_identities SET last_used_at = ? WHERE id = ?")
            .bind(now)
            .bind(identity_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn touch_google(
        conn: &mut SqliteConnection,
        sub: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE auth_identities SET last_used_at = ? WHERE provider = 'google' AND provider_sub = ?",
        )
        .bind(now)
        .bind(sub)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn mark_verified(
        conn: &mut SqliteConnection,
        identity_id: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE auth_identities SET email_verified = 1, last_used_at = ? WHERE id = ?")
            .bind(now)
            .bind(identity_id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

/// Pending verification token joined to its identity.
#[derive(Debug, FromRow)]
pub struct VerificationRow {
    pub verification_id: String,
    pub identity_id: String,
    pub user_id: String,
    pub expires_at: OffsetDateTime,
    pub used_at: Option<OffsetDateTime>,
}

pub struct Verification;

impl Verification {
    pub async fn insert(
        conn: &mut SqliteConnection,
        identity_id: &str,
        token_hash: &str,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO email_verifications (id, identity_id, token_hash, expires_at, used_at, created_at)
            VALUES (?, ?, ?, ?, NULL, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(identity_id)
        .bind(token_hash)
        .bind(expires_at)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find_by_token_hash(
        conn: &mut SqliteConnection,
        token_hash: &str,
    ) -> Result<Option<VerificationRow>, sqlx::Error> {
        sqlx::query_as::<_, VerificationRow>(
            r#"
            SELECT ev.id AS verification_id, ai.id AS identity_id, ai.user_id,
                   ev.expires_at, ev.used_at
            FROM email_verifications ev
            JOIN auth_identities ai ON ai.id = ev.identity_id
            WHERE ev.token_hash = ?
            LIMIT 1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(conn)
        .await
    }

    pub async fn mark_used(
        conn: &mut SqliteConnection,
        verification_id: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE email_verifications SET used_at = ? WHERE id = ?")
            .bind(now)
            .bind(verification_id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

#[derive(Debug, FromRow)]
pub struct ProfileRow {
    pub sender_profile_json: String,
    pub preferences_json: String,
    pub updated_at: OffsetDateTime,
}

pub struct Profile;

impl Profile {
    /// Lazily materialize the row so read-before-write is always safe.
    pub async fn ensure(
        conn: &mut SqliteConnection,
        user_id: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO user_profiles (user_id, sender_profile_json, preferences_json, updated_at)
            VALUES (?, '{}', '{}', ?)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn fetch(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> Result<Option<ProfileRow>, sqlx::Error> {
        sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT sender_profile_json, preferences_json, updated_at
            FROM user_profiles
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(conn)
        .await
    }

    pub async fn set_sender_profile(
        conn: &mut SqliteConnection,
        user_id: &str,
        json: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE user_profiles SET sender_profile_json = ?, updated_at = ? WHERE user_id = ?")
            .bind(json)
            .bind(now)
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn set_preferences(
        conn: &mut SqliteConnection,
        user_id: &str,
        json: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE user_profiles SET preferences_json = ?, updated_at = ? WHERE user_id = ?")
            .bind(json)
            .bind(now)
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct LoginEvent;

impl LoginEvent {
    /// Append-only audit record; shares the caller's transaction so the event
    /// lands together with the operation it describes.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        conn: &mut SqliteConnection,
        user_id: Option<&str>,
        provider: &str,
        email: Option<&str>,
        success: bool,
        reason: &str,
        meta: &RequestMeta,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO login_events (id, user_id, provider, email, success, reason, ip, user_agent, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(provider)
        .bind(email)
        .bind(success)
        .bind(reason)
        .bind(meta.ip.as_deref())
        .bind(meta.user_agent.as_deref())
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }
}

pub struct Waitlist;

impl Waitlist {
    /// Returns true when a new entry was created, false for a duplicate.
    pub async fn insert_if_absent(
        conn: &mut SqliteConnection,
        email: &str,
        meta: &RequestMeta,
        now: OffsetDateTime,
    ) -> Result<bool, sqlx::Error> {
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM waitlist WHERE email = ? LIMIT 1")
                .bind(email)
                .fetch_optional(&mut *conn)
                .await?;
        if existing.is_some() {
            return Ok(false);
        }
        sqlx::query(
            r#"
            INSERT INTO waitlist (id, email, created_at, ip, user_agent)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(email)
        .bind(now)
        .bind(meta.ip.as_deref())
        .bind(meta.user_agent.as_deref())
        .execute(conn)
        .await?;
        Ok(true)
    }
}
