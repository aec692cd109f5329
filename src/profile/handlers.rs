use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::handlers::error_response,
    auth::jwt::AuthUser,
    profile::dto::{ProfileResponse, UpdateProfileRequest},
    state::AppState,
};

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/me/profile", get(get_profile).put(update_profile))
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileResponse>, (axum::http::StatusCode, Json<crate::auth::dto::ErrorBody>)> {
    let profile = state
        .auth
        .get_user_profile(&user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(ProfileResponse {
        sender_profile: profile.sender_profile,
        preferences: profile.preferences,
        updated_at: profile.updated_at,
    }))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, (axum::http::StatusCode, Json<crate::auth::dto::ErrorBody>)> {
    state
        .auth
        .update_user_profile(
            &user_id,
            payload.sender_profile.as_ref(),
            payload.preferences.as_ref(),
        )
        .await
        .map_err(error_response)?;

    let profile = state
        .auth
        .get_user_profile(&user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(ProfileResponse {
        sender_profile: profile.sender_profile,
        preferences: profile.preferences,
        updated_at: profile.updated_at,
    }))
}
