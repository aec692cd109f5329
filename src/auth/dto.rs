use serde::{Deserialize, Serialize};

use crate::auth::repo::User;

/// Request body for password signup.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub invite_code: Option<String>,
}

/// Returned after signup/resend. When mail transport is unconfigured the
/// verification link is handed back directly instead of failing.
#[derive(Debug, Serialize)]
pub struct VerificationResponse {
    pub email: String,
    pub email_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_link: Option<String>,
}

/// Request body for password login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub invite_code: Option<String>,
}

/// Google sign-in claims forwarded by the OAuth callback.
#[derive(Debug, Deserialize)]
pub struct GoogleLoginRequest {
    pub sub: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email_verified: Option<bool>,
    pub invite_code: Option<String>,
}

/// Request body for token refresh.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Pre-check an invite code before showing signup/login forms.
#[derive(Debug, Deserialize)]
pub struct InviteCheckRequest {
    pub invite_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResendRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyEmailResponse {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WaitlistRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct WaitlistResponse {
    pub created: bool,
}

/// Response returned after login, google sign-in or refresh.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: PublicUser,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub beta_access: bool,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.primary_email,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            beta_access: user.beta_access,
        }
    }
}

/// JSON error body; `code` drives distinct UI prompts per failure.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_user_hides_nothing_it_should_show() {
        let json = serde_json::to_string(&PublicUser {
            id: "u-1".into(),
            email: Some("t@example.com".into()),
            display_name: None,
            avatar_url: None,
            beta_access: false,
        })
        .unwrap();
        assert!(json.contains("t@example.com"));
        assert!(json.contains("\"id\":\"u-1\""));
    }

    #[test]
    fn verification_link_is_omitted_when_sent() {
        let json = serde_json::to_string(&VerificationResponse {
            email: "t@example.com".into(),
            email_sent: true,
            verification_link: None,
        })
        .unwrap();
        assert!(!json.contains("verification_link"));
    }
}
