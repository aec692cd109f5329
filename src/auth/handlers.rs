use axum::{
    extract::{FromRef, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ErrorBody, GoogleLoginRequest, InviteCheckRequest, LoginRequest,
            PublicUser, RefreshRequest, ResendRequest, SignupRequest, VerificationResponse,
            VerifyEmailQuery, VerifyEmailResponse, WaitlistRequest, WaitlistResponse,
        },
        error::AuthError,
        jwt::{AuthUser, JwtKeys},
        repo::RequestMeta,
        service::{is_valid_email, GoogleClaims},
    },
    mailer::MailOutcome,
    state::AppState,
};

type ErrorResponse = (StatusCode, Json<ErrorBody>);

/// Exhaustive mapping of the auth taxonomy onto transport responses.
pub fn error_response(e: AuthError) -> ErrorResponse {
    let (status, code) = match &e {
        AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
        AuthError::EmailNotVerified => (StatusCode::FORBIDDEN, "email_not_verified"),
        AuthError::InviteRequired => (StatusCode::FORBIDDEN, "invite_required"),
        AuthError::InviteInvalid => (StatusCode::FORBIDDEN, "invite_invalid"),
        AuthError::SignupDisabled => (StatusCode::FORBIDDEN, "signup_disabled"),
        AuthError::DuplicateAccount => (StatusCode::CONFLICT, "duplicate_account"),
        AuthError::Invalid(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        AuthError::Database(_) | AuthError::Internal(_) => {
            error!(error = %e, "auth internal error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "Internal error".into(),
                    code: "internal_error",
                }),
            );
        }
    };
    (
        status,
        Json(ErrorBody {
            error: e.to_string(),
            code,
        }),
    )
}

fn internal(e: anyhow::Error) -> ErrorResponse {
    error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: "Internal error".into(),
            code: "internal_error",
        }),
    )
}

fn request_meta(headers: &HeaderMap) -> RequestMeta {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    RequestMeta {
        ip: header_str("x-forwarded-for")
            .map(|v| v.split(',').next().unwrap_or("").trim().to_string())
            .filter(|v| !v.is_empty()),
        user_agent: header_str("user-agent"),
    }
}

fn token_pair(keys: &JwtKeys, user_id: &str) -> Result<(String, String), ErrorResponse> {
    let access = keys.sign_access(user_id).map_err(internal)?;
    let refresh = keys.sign_refresh(user_id).map_err(internal)?;
    Ok((access, refresh))
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/google", post(google))
        .route("/auth/verify-email", get(verify_email))
        .route("/auth/resend-verification", post(resend_verification))
        .route("/auth/refresh", post(refresh))
        .route("/auth/invite/check", post(invite_check))
        .route("/waitlist", post(waitlist))
        .route("/me", get(get_me))
}

#[instrument(skip(state, headers, payload))]
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<VerificationResponse>), ErrorResponse> {
    let email = payload.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        warn!("signup with invalid email shape");
        return Err(error_response(AuthError::Invalid("Invalid email.")));
    }

    let meta = request_meta(&headers);
    let verification = state
        .auth
        .create_password_user(
            &email,
            &payload.password,
            payload.display_name.as_deref(),
            payload.invite_code.as_deref(),
            &meta,
        )
        .await
        .map_err(error_response)?;

    let link = format!(
        "{}/auth/verify-email?token={}",
        state.config.public_base_url.trim_end_matches('/'),
        verification.token
    );
    let outcome = state
        .mailer
        .send_verification(&verification.email, &link)
        .await
        .unwrap_or_else(|e| {
            // Mail failures must not undo the signup.
            warn!(error = %e, "verification mail failed; returning link");
            MailOutcome::NotConfigured
        });
    let email_sent = matches!(outcome, MailOutcome::Sent);

    info!(email = %verification.email, email_sent, "password signup complete");
    Ok((
        StatusCode::CREATED,
        Json(VerificationResponse {
            email: verification.email,
            email_sent,
            verification_link: (!email_sent).then_some(link),
        }),
    ))
}

#[instrument(skip(state, headers, payload))]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ErrorResponse> {
    let meta = request_meta(&headers);

    // Beta gate: returning users with standing access never need a code.
    let mut grant_after = false;
    if state.auth.invite_required_for_login() {
        let known = state
            .auth
            .get_user_id_for_password_email(&payload.email)
            .await
            .map_err(error_response)?;
        let exempt = match &known {
            Some(id) => state
                .auth
                .user_has_beta_access(id)
                .await
                .map_err(error_response)?,
            None => false,
        };
        if !exempt {
            state
                .auth
                .validate_invite_for_login(payload.invite_code.as_deref())
                .map_err(error_response)?;
            grant_after = true;
        }
    }

    let user = state
        .auth
        .authenticate_password(&payload.email, &payload.password, &meta)
        .await
        .map_err(error_response)?;

    // First successful invite-gated login earns standing beta access.
    if grant_after && !user.beta_access {
        state
            .auth
            .grant_beta_access(&user.id)
            .await
            .map_err(error_response)?;
    }

    let keys = JwtKeys::from_ref(&state);
    let (access_token, refresh_token) = token_pair(&keys, &user.id)?;
    info!(user_id = %user.id, "password login");
    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user: user.into(),
    }))
}

#[instrument(skip(state, headers, payload))]
pub async fn google(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GoogleLoginRequest>,
) -> Result<Json<AuthResponse>, ErrorResponse> {
    let meta = request_meta(&headers);
    let claims = GoogleClaims {
        sub: payload.sub,
        email: payload.email,
        display_name: payload.display_name,
        avatar_url: payload.avatar_url,
        email_verified: payload.email_verified,
    };

    let mut grant_after = false;
    if state.auth.invite_required_for_login() {
        let known = state
            .auth
            .get_user_id_for_google_sub(&claims.sub)
            .await
            .map_err(error_response)?;
        let exempt = match &known {
            Some(id) => state
                .auth
                .user_has_beta_access(id)
                .await
                .map_err(error_response)?,
            None => false,
        };
        if !exempt {
            state
                .auth
                .validate_invite_for_login(payload.invite_code.as_deref())
                .map_err(error_response)?;
            grant_after = true;
        }
    }

    let user = state
        .auth
        .authenticate_google(&claims, payload.invite_code.as_deref(), &meta)
        .await
        .map_err(error_response)?;

    if grant_after && !user.beta_access {
        state
            .auth
            .grant_beta_access(&user.id)
            .await
            .map_err(error_response)?;
    }

    let keys = JwtKeys::from_ref(&state);
    let (access_token, refresh_token) = token_pair(&keys, &user.id)?;
    info!(user_id = %user.id, "google login");
    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user: user.into(),
    }))
}

#[instrument(skip(state, query))]
pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<Json<VerifyEmailResponse>, ErrorResponse> {
    // Invalid/expired/replayed tokens are a normal outcome, not an error.
    let user_id = state
        .auth
        .verify_email_token(&query.token)
        .await
        .map_err(error_response)?;
    Ok(Json(VerifyEmailResponse {
        verified: user_id.is_some(),
        user_id,
    }))
}

#[instrument(skip(state, headers, payload))]
pub async fn resend_verification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ResendRequest>,
) -> Result<Json<VerificationResponse>, ErrorResponse> {
    let meta = request_meta(&headers);
    let verification = state
        .auth
        .resend_email_verification(&payload.email, &meta)
        .await
        .map_err(error_response)?;

    let link = format!(
        "{}/auth/verify-email?token={}",
        state.config.public_base_url.trim_end_matches('/'),
        verification.token
    );
    let outcome = state
        .mailer
        .send_verification(&verification.email, &link)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "verification mail failed; returning link");
            MailOutcome::NotConfigured
        });
    let email_sent = matches!(outcome, MailOutcome::Sent);

    Ok(Json(VerificationResponse {
        email: verification.email,
        email_sent,
        verification_link: (!email_sent).then_some(link),
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, ErrorResponse> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&payload.refresh_token).map_err(|_| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody {
                error: "Invalid refresh token".into(),
                code: "invalid_token",
            }),
        )
    })?;

    let user = state
        .auth
        .get_user(&claims.sub)
        .await
        .map_err(error_response)?
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody {
                    error: "User not found".into(),
                    code: "invalid_token",
                }),
            )
        })?;

    let (access_token, refresh_token) = token_pair(&keys, &user.id)?;
    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user: user.into(),
    }))
}

/// Lets the UI verify a code up front, before any account exists.
#[instrument(skip(state, payload))]
pub async fn invite_check(
    State(state): State<AppState>,
    Json(payload): Json<InviteCheckRequest>,
) -> Result<StatusCode, ErrorResponse> {
    state
        .auth
        .validate_invite_code(payload.invite_code.as_deref())
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, headers, payload))]
pub async fn waitlist(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<WaitlistRequest>,
) -> Result<Json<WaitlistResponse>, ErrorResponse> {
    let meta = request_meta(&headers);
    let created = state
        .auth
        .add_waitlist_email(&payload.email, &meta)
        .await
        .map_err(error_response)?;
    Ok(Json(WaitlistResponse { created }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, ErrorResponse> {
    let user = state
        .auth
        .get_user(&user_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody {
                    error: "User not found".into(),
                    code: "invalid_token",
                }),
            )
        })?;
    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_distinct_statuses() {
        let (status, body) = error_response(AuthError::InvalidCredentials);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.code, "invalid_credentials");

        let (status, body) = error_response(AuthError::EmailNotVerified);
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.code, "email_not_verified");

        let (status, body) = error_response(AuthError::InviteRequired);
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.code, "invite_required");

        let (status, body) = error_response(AuthError::InviteInvalid);
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.code, "invite_invalid");

        let (status, _) = error_response(AuthError::SignupDisabled);
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = error_response(AuthError::DuplicateAccount);
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.code, "duplicate_account");

        let (status, _) = error_response(AuthError::Invalid("bad"));
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn meta_reads_forwarded_ip_and_agent() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        headers.insert("user-agent", "tests/1.0".parse().unwrap());
        let meta = request_meta(&headers);
        assert_eq!(meta.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(meta.user_agent.as_deref(), Some("tests/1.0"));

        let meta = request_meta(&HeaderMap::new());
        assert!(meta.ip.is_none());
        assert!(meta.user_agent.is_none());
    }
}
