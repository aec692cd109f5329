use thiserror::Error;

/// Auth failure taxonomy. Everything here is a recoverable, user-facing
/// condition; the request layer maps each variant to a response.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong email/password pair. Deliberately covers "no such account" too,
    /// so callers cannot enumerate registered emails.
    #[error("Invalid email or password.")]
    InvalidCredentials,

    /// Credentials are correct but the password identity is unverified.
    #[error("Email not verified.")]
    EmailNotVerified,

    /// Invite code required but missing.
    #[error("Invite code is required.")]
    InviteRequired,

    /// Invite code present but not on the allow-list.
    #[error("Invalid invite code.")]
    InviteInvalid,

    /// Invite-only is enabled but no codes are configured (operator error).
    #[error("Signups are currently disabled.")]
    SignupDisabled,

    /// Signup collision on an already-claimed email.
    #[error("An account with this email already exists.")]
    DuplicateAccount,

    /// Input validation failure or "no account found" lookup.
    #[error("{0}")]
    Invalid(&'static str),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
