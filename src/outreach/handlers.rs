use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::{instrument, warn};

use crate::{
    auth::dto::ErrorBody,
    auth::handlers::error_response,
    auth::jwt::AuthUser,
    outreach::dto::{GenerateEmailRequest, GenerateEmailResponse, RecommendResponse},
    state::AppState,
};

type ErrorResponse = (StatusCode, Json<ErrorBody>);

pub fn outreach_routes() -> Router<AppState> {
    Router::new()
        .route("/outreach/email", post(generate_email))
        .route("/outreach/recommend", post(recommend))
}

fn upstream_failed(e: anyhow::Error) -> ErrorResponse {
    warn!(error = %e, "text generation failed");
    (
        StatusCode::BAD_GATEWAY,
        Json(ErrorBody {
            error: "Text generation failed".into(),
            code: "generation_failed",
        }),
    )
}

fn missing(what: &'static str) -> ErrorResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: format!("No {what} stored yet."),
            code: "profile_incomplete",
        }),
    )
}

#[instrument(skip(state, payload))]
pub async fn generate_email(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<GenerateEmailRequest>,
) -> Result<Json<GenerateEmailResponse>, ErrorResponse> {
    let profile = state
        .auth
        .get_user_profile(&user_id)
        .await
        .map_err(error_response)?;
    let sender = profile.sender_profile.ok_or_else(|| missing("sender profile"))?;

    let email_text = state
        .generator
        .generate_email(&sender, &payload.receiver, &payload.goal)
        .await
        .map_err(upstream_failed)?;
    Ok(Json(GenerateEmailResponse { email_text }))
}

#[instrument(skip(state))]
pub async fn recommend(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<RecommendResponse>, ErrorResponse> {
    let profile = state
        .auth
        .get_user_profile(&user_id)
        .await
        .map_err(error_response)?;
    let preferences = profile.preferences.ok_or_else(|| missing("preferences"))?;

    let contacts = state
        .generator
        .recommend_contacts(&preferences)
        .await
        .map_err(upstream_failed)?;
    Ok(Json(RecommendResponse { contacts }))
}
